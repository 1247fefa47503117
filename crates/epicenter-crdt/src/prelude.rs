pub use epicenter_types::error::{EpiResult, Error};
pub use epicenter_types::types::{Epoch, Timestamp};

pub use tracing::{debug, error, info, trace, warn};

// vim: ts=4
