pub mod access_log;
pub mod config;
pub mod contact;
pub mod error;
pub mod error_log;
pub mod logfile;
pub mod logging;
pub mod report;
pub mod scgi;
pub mod server;
pub mod stats;
pub mod store;
pub mod timestamp;
