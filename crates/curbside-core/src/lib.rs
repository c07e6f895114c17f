pub mod config;
pub mod error;
pub mod source;
pub mod types;

pub use config::CurbsideConfig;
pub use error::{CurbsideError, Result};
pub use source::ReportSource;
pub use types::*;
