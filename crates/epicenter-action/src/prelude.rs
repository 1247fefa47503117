pub use epicenter_types::error::{EpiResult, Error};

pub use tracing::{debug, trace, warn};

// vim: ts=4
