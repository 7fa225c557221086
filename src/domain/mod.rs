pub mod backoff;
pub mod error;
pub mod models;
