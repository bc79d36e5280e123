pub mod config;
pub mod destroy;
pub mod env;
pub mod error;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod platform;
pub mod providers;
pub mod readiness;
pub mod retry;
pub mod setup;
pub mod state;
pub mod template;
pub mod trace;
pub mod types;
pub mod workload;

#[cfg(test)]
mod testing;

pub use error::{DevxError, Result};
