pub mod config;
pub mod logging;

pub mod auth;
pub mod dispatch;
pub mod folder;
pub mod merge;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod supervisor;
pub mod watchdog;
