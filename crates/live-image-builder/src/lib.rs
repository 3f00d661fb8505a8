pub mod assemble;
pub mod config;
pub mod error;
pub mod executor;
pub mod identity;
pub mod logging;
pub mod merge;
pub mod options;
pub mod pipeline;
pub mod version;

pub use error::{Error, ErrorKind, Result};
