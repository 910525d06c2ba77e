pub mod backoff;
pub mod config;
pub mod error;
pub mod ports;
pub mod types;

pub use error::{NestbedError, Result};
