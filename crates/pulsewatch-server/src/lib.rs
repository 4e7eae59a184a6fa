//! HTTP front end and schedulers for the pulsewatch alert pipeline.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod scheduler;
pub mod seed;
pub mod state;
pub mod worker;
