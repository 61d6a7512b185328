mod error_ext;
mod loggable;

pub use crate::error_ext::{extend_err, ErrorExt};
pub use crate::loggable::LoggableError;
