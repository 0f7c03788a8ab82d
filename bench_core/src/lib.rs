extern crate tracing;
extern crate tracing_subscriber;

pub mod benchmark;
pub mod client;
pub mod config;
pub mod http;
pub mod logging;
pub mod provision;
pub mod run;
pub mod setup;
pub mod workspace;
