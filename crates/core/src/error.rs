use thiserror::Error;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rule validation error: {0}")]
    RuleValidation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Delivery provider error: {0}")]
    Provider(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Rule suggestion error: {0}")]
    Suggestion(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CampaignError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CampaignError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
