mod routes;
mod server;
mod session;

pub mod app;
pub mod client;
pub mod config;
pub mod detector;
pub mod envelope;
pub mod logging;
pub mod protocol;
pub mod relay;
pub mod storage;
pub mod telemetry;

pub use app::start_app;
pub use server::{HttpServer, SharedState};
