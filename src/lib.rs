pub mod analyzers;
pub mod config;
pub mod error;
pub mod fetch;
pub mod infra;
pub mod ingest;
pub mod model;
pub mod output;
pub mod projection;
pub mod reference;
pub mod services;
