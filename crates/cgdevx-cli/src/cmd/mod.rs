pub mod destroy;
pub mod setup;
pub mod state;
pub mod workload;
