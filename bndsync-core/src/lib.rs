pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod drain;
pub mod event;
pub mod gateway;
pub mod graph;
pub mod identity;
pub mod log_sink;
pub mod model;
pub mod progress;
pub mod session;
pub mod view;
