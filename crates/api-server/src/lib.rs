#![warn(clippy::unwrap_used)]

pub mod campaign_rest;
pub mod error;
pub mod rest;
pub mod segment_rest;
pub mod server;
pub mod swagger;
pub mod webhook_rest;

pub use error::{ApiError, ErrorResponse};
pub use rest::AppState;
pub use server::{build_router, ApiServer};
pub use swagger::ApiDoc;
