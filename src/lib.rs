//! The alder service: watch API surface and wiring around the distribution
//! engine.

pub mod config;
pub mod handlers;
pub mod server;
pub mod state;

pub use config::Config;
pub use server::build_router;
pub use state::AppState;
