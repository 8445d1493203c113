//! Service lifecycle states.

/// Ledger service operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Service is running and accepting transfers.
    Running,
    /// Service is draining queued work, not accepting new transfers.
    ShuttingDown,
    /// Service is stopped.
    Stopped,
}

impl ServiceState {
    /// Check if the service is accepting new transfers.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if shutdown has begun or finished.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, ServiceState::ShuttingDown | ServiceState::Stopped)
    }
}
