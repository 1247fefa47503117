pub use epicenter_types::error::{EpiResult, Error};
pub use epicenter_types::validate::{Issue, Validate};

pub use tracing::{debug, trace, warn};

// vim: ts=4
