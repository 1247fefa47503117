pub use epicenter_types::error::{EpiResult, Error};
pub use epicenter_types::types::{Epoch, Patch, Timestamp};

pub use tracing::{debug, debug_span, error, info, trace, warn};

// vim: ts=4
