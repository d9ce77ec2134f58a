//! Process-wide logging setup shared by every ledgerflow binary.

pub mod tracing;

pub use crate::tracing::{LogFormat, init_with};

/// Install the global subscriber, output format taken from `LOG_FORMAT`.
/// Later calls are no-ops.
pub fn init() {
    tracing::init();
}
