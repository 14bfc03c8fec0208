pub mod config;
pub mod error;
pub mod mime;

pub use config::Config;
pub use error::{Error, Result};
