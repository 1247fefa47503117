pub use crate::error::{EpiResult, Error};
pub use crate::types::{Epoch, Timestamp};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, trace, warn, warn_span};

// vim: ts=4
