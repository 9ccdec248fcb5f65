/// Errors raised while building or checking a host table.
///
/// Packet observation itself never fails; malformed input is reported through
/// [`crate::ObserveStatus::Rejected`] instead.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("table capacity must be a non-zero power of two, got {capacity}")]
    InvalidCapacity { capacity: usize },

    #[error("tick interval must be greater than zero")]
    ZeroTickInterval,

    #[error("expiry must be at least one tick")]
    ZeroExpiry,

    #[error("table invariant violated: {0}")]
    InvariantViolation(String),
}

impl TableError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}
