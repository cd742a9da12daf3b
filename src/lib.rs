pub mod config;
pub mod constants;
pub mod crawler;
pub mod dns;
pub mod dns_seed_discovery;
pub mod errors;
pub mod grpc;
pub mod logging;
pub mod manager;
pub mod netadapter;
pub mod pb;
pub mod profiling;
pub mod types;
pub mod version;

pub use config::Config;
pub use types::*;
