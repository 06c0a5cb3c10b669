// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device lifecycle state machine.
//!
//! ```text
//! uninitialized -> connecting -> {online, error}
//! online -> error      failed poll or send
//! error  -> online     successful poll or re-initialise
//! any    -> offline    explicit remove only
//! ```

use std::time::{Duration, Instant};

use crate::device::DeviceStatus;

/// Events that can trigger state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Device accepted by the registry; initialisation scheduled.
    Connect,
    Initialized,
    InitFailed(String),
    PollSucceeded,
    PollFailed(String),
    SendFailed(String),
    Removed,
}

#[derive(Debug, Clone)]
pub struct DeviceStateMachine {
    state: DeviceStatus,
    error: Option<String>,
    transition_count: u64,
    last_transition: Option<Instant>,
}

impl Default for DeviceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateMachine {
    pub fn new() -> Self {
        Self {
            state: DeviceStatus::Uninitialized,
            error: None,
            transition_count: 0,
            last_transition: None,
        }
    }

    pub fn state(&self) -> DeviceStatus {
        self.state
    }

    /// Reason recorded by the last transition into `error`.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Process an event. Returns true if a transition occurred.
    pub fn process_event(&mut self, event: DeviceEvent) -> bool {
        let reason = match &event {
            DeviceEvent::InitFailed(r) | DeviceEvent::PollFailed(r) | DeviceEvent::SendFailed(r) => {
                Some(r.clone())
            }
            _ => None,
        };
        match self.next_state(event) {
            Some(state) => {
                match state {
                    DeviceStatus::Error => self.error = reason,
                    DeviceStatus::Online => self.error = None,
                    _ => {}
                }
                self.state = state;
                self.transition_count += 1;
                self.last_transition = Some(Instant::now());
                true
            }
            None => {
                // Repeated failures while already in error refresh the reason.
                if self.state == DeviceStatus::Error && reason.is_some() {
                    self.error = reason;
                }
                false
            }
        }
    }

    fn next_state(&self, event: DeviceEvent) -> Option<DeviceStatus> {
        use DeviceStatus::*;
        match (self.state, event) {
            (Uninitialized, DeviceEvent::Connect) => Some(Connecting),

            (Connecting, DeviceEvent::Initialized) => Some(Online),
            (Connecting, DeviceEvent::InitFailed(_)) => Some(Error),

            (Online, DeviceEvent::PollFailed(_)) | (Online, DeviceEvent::SendFailed(_)) => {
                Some(Error)
            }

            (Error, DeviceEvent::PollSucceeded) | (Error, DeviceEvent::Initialized) => Some(Online),

            (Offline, _) => None,
            (_, DeviceEvent::Removed) => Some(Offline),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online() -> DeviceStateMachine {
        let mut sm = DeviceStateMachine::new();
        assert!(sm.process_event(DeviceEvent::Connect));
        assert!(sm.process_event(DeviceEvent::Initialized));
        sm
    }

    #[test]
    fn initial_state() {
        let sm = DeviceStateMachine::new();
        assert_eq!(sm.state(), DeviceStatus::Uninitialized);
        assert_eq!(sm.transition_count(), 0);
    }

    #[test]
    fn happy_path() {
        let sm = online();
        assert_eq!(sm.state(), DeviceStatus::Online);
        assert_eq!(sm.transition_count(), 2);
        assert!(sm.time_in_state().is_some());
    }

    #[test]
    fn init_failure_lands_in_error_with_reason() {
        let mut sm = DeviceStateMachine::new();
        sm.process_event(DeviceEvent::Connect);
        assert!(sm.process_event(DeviceEvent::InitFailed("no SIM".into())));
        assert_eq!(sm.state(), DeviceStatus::Error);
        assert_eq!(sm.error(), Some("no SIM"));
    }

    #[test]
    fn error_recovers_on_successful_poll() {
        let mut sm = online();
        assert!(sm.process_event(DeviceEvent::PollFailed("timeout".into())));
        assert_eq!(sm.state(), DeviceStatus::Error);
        assert!(!sm.process_event(DeviceEvent::PollFailed("timeout again".into())));
        assert_eq!(sm.error(), Some("timeout again"));
        assert!(sm.process_event(DeviceEvent::PollSucceeded));
        assert_eq!(sm.state(), DeviceStatus::Online);
        assert_eq!(sm.error(), None);
    }

    #[test]
    fn send_failure_moves_online_to_error() {
        let mut sm = online();
        assert!(sm.process_event(DeviceEvent::SendFailed("no OK".into())));
        assert_eq!(sm.state(), DeviceStatus::Error);
    }

    #[test]
    fn poll_success_while_online_is_not_a_transition() {
        let mut sm = online();
        assert!(!sm.process_event(DeviceEvent::PollSucceeded));
    }

    #[test]
    fn invalid_transitions_are_ignored() {
        let mut sm = DeviceStateMachine::new();
        assert!(!sm.process_event(DeviceEvent::Initialized));
        assert!(!sm.process_event(DeviceEvent::PollSucceeded));
        assert_eq!(sm.state(), DeviceStatus::Uninitialized);
    }

    #[test]
    fn offline_is_terminal() {
        let mut sm = online();
        assert!(sm.process_event(DeviceEvent::Removed));
        assert_eq!(sm.state(), DeviceStatus::Offline);
        assert!(!sm.process_event(DeviceEvent::Connect));
        assert!(!sm.process_event(DeviceEvent::PollSucceeded));
        assert!(!sm.process_event(DeviceEvent::Removed));
    }
}
