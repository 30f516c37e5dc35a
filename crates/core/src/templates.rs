//! Message template rendering engine.

use crate::types::Customer;

/// Placeholders recognised by [`MessageTemplate::render`].
pub const PLACEHOLDERS: &[&str] = &["id", "name", "email", "total_spent", "total_orders", "status"];

/// Simple template using `{placeholder}` syntax. Unknown placeholders
/// are kept verbatim so operators can spot them in the message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    body: String,
}

impl MessageTemplate {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Render the template for one customer.
    pub fn render(&self, customer: &Customer) -> String {
        let mut out = String::with_capacity(self.body.len() + 32);
        let mut rest = self.body.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let key = &after[..close];
                    match lookup(customer, key) {
                        Some(value) => out.push_str(&value),
                        None => {
                            out.push('{');
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Placeholders in the template body that no customer field resolves.
    pub fn unknown_placeholders(&self) -> Vec<String> {
        let mut unknown = Vec::new();
        let mut rest = self.body.as_str();
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else { break };
            let key = &after[..close];
            if !PLACEHOLDERS.contains(&key) && !unknown.iter().any(|k| k == key) {
                unknown.push(key.to_string());
            }
            rest = &after[close + 1..];
        }
        unknown
    }
}

fn lookup(customer: &Customer, key: &str) -> Option<String> {
    match key {
        "id" => Some(customer.id.to_string()),
        "name" => Some(customer.name.clone()),
        "email" => Some(customer.email.clone()),
        "total_spent" => Some(format_amount(customer.total_spent)),
        "total_orders" => Some(customer.total_orders.to_string()),
        "status" => Some(customer.status.as_str().to_string()),
        _ => None,
    }
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}
