pub mod app;
pub mod backend;
pub mod config;
pub mod decoder;
pub mod event;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod sync;
pub mod transcript;
pub mod transport;
pub mod ui;
