pub mod config;
pub mod health;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod storage;

pub use config::{AppConfig, LoggingConfig, ServerConfig, StorageBackend, StorageConfig};
pub use observability::init_tracing;
pub use server::{AppState, HankoServer, ServerBuilder, build_app, build_router};
