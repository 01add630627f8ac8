use tracing::debug;

use crate::error::{ChannelError, Result};

/// Communication-object state, shared by channels, factories and
/// listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationState {
    Created,
    Opening,
    Opened,
    Closing,
    Closed,
    Faulted,
}

impl std::fmt::Display for CommunicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommunicationState::Created => "created",
            CommunicationState::Opening => "opening",
            CommunicationState::Opened => "opened",
            CommunicationState::Closing => "closing",
            CommunicationState::Closed => "closed",
            CommunicationState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// State machine guarding the open/close discipline of one
/// communication object.
///
/// Legal flow is `Created → Opening → Opened → Closing → Closed`; any
/// failure during use moves to `Faulted`, from which only close and
/// abort make progress. Transitions out of order surface as
/// [`ChannelError::InvalidOperation`], a faulted object surfaces
/// [`ChannelError::Faulted`].
#[derive(Debug)]
pub struct Lifecycle {
    state: CommunicationState,
    object: &'static str,
    fault_reason: Option<String>,
}

impl Lifecycle {
    pub fn new(object: &'static str) -> Self {
        Self {
            state: CommunicationState::Created,
            object,
            fault_reason: None,
        }
    }

    pub fn state(&self) -> CommunicationState {
        self.state
    }

    /// `Created → Opening`.
    pub fn begin_open(&mut self) -> Result<()> {
        match self.state {
            CommunicationState::Created => {
                self.transition(CommunicationState::Opening);
                Ok(())
            }
            _ => Err(self.misuse("open")),
        }
    }

    /// `Opening → Opened`.
    pub fn complete_open(&mut self) {
        debug_assert_eq!(self.state, CommunicationState::Opening);
        self.transition(CommunicationState::Opened);
    }

    /// `Created | Opened | Faulted → Closing`. Closing twice is a no-op
    /// signalled by `Ok(false)`.
    ///
    /// A faulted object may still close; callers tear its resources
    /// down best-effort rather than ending the session gracefully.
    pub fn begin_close(&mut self) -> Result<bool> {
        match self.state {
            CommunicationState::Created
            | CommunicationState::Opened
            | CommunicationState::Faulted => {
                self.transition(CommunicationState::Closing);
                Ok(true)
            }
            CommunicationState::Closing | CommunicationState::Closed => Ok(false),
            _ => Err(self.misuse("close")),
        }
    }

    /// `Closing → Closed`.
    pub fn complete_close(&mut self) {
        debug_assert_eq!(self.state, CommunicationState::Closing);
        self.transition(CommunicationState::Closed);
    }

    /// Forced teardown: any state moves straight to `Closed`.
    pub fn abort(&mut self) {
        if self.state != CommunicationState::Closed {
            self.transition(CommunicationState::Closed);
        }
    }

    /// Record a fault. Closed objects stay closed.
    pub fn fault(&mut self, reason: impl Into<String>) {
        if matches!(
            self.state,
            CommunicationState::Closed | CommunicationState::Faulted
        ) {
            return;
        }
        let reason = reason.into();
        debug!(object = self.object, %reason, "faulting");
        self.fault_reason = Some(reason);
        self.transition(CommunicationState::Faulted);
    }

    /// Guard for operations requiring an opened object.
    pub fn ensure_opened(&self, operation: &str) -> Result<()> {
        match self.state {
            CommunicationState::Opened => Ok(()),
            CommunicationState::Faulted => Err(ChannelError::Faulted(
                self.fault_reason
                    .clone()
                    .unwrap_or_else(|| "unspecified fault".into()),
            )),
            _ => Err(self.misuse(operation)),
        }
    }

    fn misuse(&self, operation: &str) -> ChannelError {
        if self.state == CommunicationState::Faulted {
            return ChannelError::Faulted(
                self.fault_reason
                    .clone()
                    .unwrap_or_else(|| "unspecified fault".into()),
            );
        }
        ChannelError::InvalidOperation(format!(
            "cannot {operation} a {} {}",
            self.state, self.object
        ))
    }

    fn transition(&mut self, next: CommunicationState) {
        debug!(object = self.object, from = %self.state, to = %next, "state transition");
        self.state = next;
    }
}
