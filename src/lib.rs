pub mod aggregate;
pub mod config;
pub mod fetch;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod reconcile;
pub mod source;
pub mod stats;
pub mod store;
pub mod types;
