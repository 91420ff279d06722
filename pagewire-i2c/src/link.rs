//! Session link state machine
//!
//! Whether the bridge session is usable is a function of the current state
//! and the last thing the reconnect tick observed.

/// Session readiness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// No usable session; the reconnect tick keeps trying
    #[default]
    Unready,
    /// Bus synchronized and every init action succeeded
    Ready,
}

/// Observations that move the link between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// No device at the configured index
    DeviceAbsent,
    /// Device present but the bus handle was closed under us
    LinkLost,
    /// Setup and all init actions succeeded
    BringUpComplete,
}

impl LinkState {
    /// Check if the session can carry traffic
    pub fn is_ready(&self) -> bool {
        matches!(self, LinkState::Ready)
    }

    /// Process an event and return the next state
    pub fn transition(self, event: LinkEvent) -> Self {
        use LinkEvent::*;
        use LinkState::*;

        match (self, event) {
            (Ready, DeviceAbsent) => Unready,
            (Ready, LinkLost) => Unready,
            (Unready, BringUpComplete) => Ready,

            // Default: stay in current state
            _ => self,
        }
    }
}

/// Published whenever the link state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadyChanged {
    /// State after the change
    pub state: LinkState,
    /// What caused it
    pub cause: LinkEvent,
}
