pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod server;
pub mod storage;
pub mod websocket;

pub use config::{AppConfig, LoggingConfig, RealtimeConfig, ServerConfig, StorageConfig};
pub use error::ApiError;
pub use observability::init_tracing;
pub use server::{AppState, ServerBuilder, WardServer, build_app};
pub use storage::{Filter, StorageError, TableClient};
