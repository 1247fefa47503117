pub use epicenter_types::error::{EpiResult, Error};
pub use epicenter_types::types::{Epoch, Patch, Timestamp};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
