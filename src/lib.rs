// ABOUTME: Root library module for the relay binary
// ABOUTME: Config loading, metrics install, HTTP surface, and the worker websocket

pub mod config;
pub mod metrics;
pub mod server;
pub mod worker_socket;

pub use config::Config;
pub use server::{router, AppState};
pub use worker_socket::{WorkerFrame, WorkerHub};
