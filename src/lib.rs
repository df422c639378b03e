pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod loader;
pub mod model;
pub mod persist;
pub mod runner;
pub mod session;
pub mod state;
pub mod store;
pub mod submit;
pub mod telemetry;
pub mod timer;

#[cfg(test)]
mod test_support;
