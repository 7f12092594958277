//! Sharing state machine
//!
//! Pure transition logic: every transport callback and user action maps to
//! exactly one [`Signal`], and each transition yields the [`Effect`]s the
//! manager must carry out. No I/O happens here.

use crate::notify::Notice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShareState {
    #[default]
    Idle,
    Connecting,
    /// Relay link is up; waiting for the first status snapshot
    Connected,
    Sharing,
    Reconnecting {
        attempt: u32,
    },
    Closed,
}

impl ShareState {
    /// A share is in progress (including while reconnecting)
    pub fn is_active(&self) -> bool {
        !matches!(self, ShareState::Idle | ShareState::Closed)
    }

    /// The relay link is currently usable
    pub fn is_linked(&self) -> bool {
        matches!(self, ShareState::Connected | ShareState::Sharing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// User asked to start sharing
    Start,
    /// First relay connection opened
    Open,
    /// A status snapshot was merged
    StatusSeeded,
    /// Transport is trying to restore a lost link
    ReconnectAttempt(u32),
    /// Link restored
    Reconnect,
    /// Automatic attempts exhausted (or the manual retry failed)
    ReconnectFailed,
    /// Share cancelled by the host (account fields lost, shutdown)
    Disconnect,
    /// User stopped sharing
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Push local fields and call `status`
    RequestStatus,
    Notify(Notice),
    /// Issue a single manual connection attempt
    ManualRetry,
}

/// Connection state plus the one-shot manual retry budget
#[derive(Debug, Default)]
pub struct ShareMachine {
    state: ShareState,
    manual_retry_used: bool,
}

impl ShareMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ShareState {
        self.state
    }

    pub fn handle(&mut self, signal: Signal) -> Vec<Effect> {
        use ShareState::*;

        match (self.state, signal) {
            (Idle | Closed, Signal::Start) => {
                self.state = Connecting;
                self.manual_retry_used = false;
                vec![]
            }
            (Connecting, Signal::Open) => {
                self.state = Connected;
                vec![
                    Effect::Notify(Notice::info("Sharing live status")),
                    Effect::RequestStatus,
                ]
            }
            (Connected | Sharing, Signal::StatusSeeded) => {
                self.state = Sharing;
                vec![]
            }
            (Connecting | Connected | Sharing, Signal::ReconnectAttempt(attempt)) => {
                self.state = Reconnecting { attempt };
                vec![Effect::Notify(Notice::warning("Connection lost, reconnecting"))]
            }
            (Reconnecting { .. }, Signal::ReconnectAttempt(attempt)) => {
                self.state = Reconnecting { attempt };
                vec![]
            }
            (Reconnecting { .. }, Signal::Reconnect) => {
                self.state = Connected;
                self.manual_retry_used = false;
                vec![
                    Effect::Notify(Notice::info("Sharing live status")),
                    Effect::RequestStatus,
                ]
            }
            (Connecting | Connected | Sharing | Reconnecting { .. }, Signal::ReconnectFailed) => {
                // Without automatic attempts the link goes straight from up to failed
                if !matches!(self.state, Reconnecting { .. }) {
                    self.state = Reconnecting { attempt: 0 };
                }
                let mut effects = vec![Effect::Notify(Notice::error("Reconnection failed"))];
                if !self.manual_retry_used {
                    self.manual_retry_used = true;
                    effects.push(Effect::ManualRetry);
                }
                effects
            }
            (Idle | Closed, Signal::Stop | Signal::Disconnect) => {
                self.state = if self.state == Closed { Closed } else { Idle };
                vec![]
            }
            (_, Signal::Stop) => {
                self.state = Idle;
                vec![Effect::Notify(Notice::info("Stop sharing live status"))]
            }
            (_, Signal::Disconnect) => {
                self.state = Closed;
                vec![Effect::Notify(Notice::info("Stop sharing live status"))]
            }
            // Anything else is a stale callback; ignore it
            _ => vec![],
        }
    }
}
