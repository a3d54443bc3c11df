pub mod config;
pub mod logging;

pub mod blob_store;
pub mod checksum;
pub mod clock;
pub mod hooks;
pub mod model;
pub mod probe;
pub mod request_service;
pub mod service;
pub mod services;
pub mod stats;
pub mod status_writer;
pub mod store;
pub mod worker;

pub use services::Services;
