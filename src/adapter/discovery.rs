//! Policy for how scanning interacts with an active connection.
//!
//! An LE controller with a single radio can't scan and hold a connection's timing slots at full
//! duty cycle at once on every chipset; the policies below say when the adapter should pause
//! discovery for the sake of a connection in progress rather than always favoring one over the
//! other.

/// When to pause an active discovery scan for the sake of a connection being established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryPolicy {
    /// Never restart discovery once stopped; the caller drives it explicitly.
    AutoOff,
    /// Keep scanning regardless of connection activity.
    AlwaysOn,
    /// Pause once a peer connects, resume once the caller calls `Adapter::mark_device_ready` for
    /// it (typically after service discovery/initial setup finishes, not merely on link-up).
    PauseConnectedUntilReady,
    /// Pause for a connected peer until it completes pairing.
    PauseConnectedUntilPaired,
    /// Pause for a connected peer for as long as it stays connected.
    PauseConnectedUntilDisconnected,
    /// Pause permanently once any peer connects; the caller must resume discovery explicitly.
    PauseConnectedUntilEver,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        DiscoveryPolicy::PauseConnectedUntilReady
    }
}
