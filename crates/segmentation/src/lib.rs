//! Segment rule compiler and audience resolution — rule model, operator
//! table, predicate compiler, customer store queries, and segment storage.

pub mod builder;
pub mod compiler;
pub mod filter;
pub mod operators;
pub mod resolver;
pub mod rules;
pub mod segments;
pub mod suggest;

pub use builder::RuleBuilder;
pub use compiler::{CompilerOptions, PredicateCompiler};
pub use filter::{CompiledPredicate, FilterExpr, ParamValue};
pub use resolver::{AudienceResolver, CustomerStore, InMemoryCustomerStore, Page};
pub use rules::{CompositeRule, Condition, LogicalOperator, RuleTree};
pub use segments::{Segment, SegmentRepository, SegmentService};
pub use suggest::{HttpRuleSuggester, RuleSuggester};
