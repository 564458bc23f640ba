pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod sse;
pub mod translate;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use logging::SharedLogger;
pub use server::{build_router, AppState};
