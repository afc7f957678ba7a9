pub mod bot;
pub mod config;
pub mod error;
pub mod handlers;
pub mod poller;
pub mod prober;
pub mod status;
