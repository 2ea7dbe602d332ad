//! Split-transaction state machine.
//!
//! Full/low-speed devices behind a high-speed hub are reached through the
//! hub's transaction translator in two phases: a start-split hands the
//! request to the TT, and complete-splits collect the result once the TT
//! has run the downstream transaction.  The TT answers NYET until then.
//!
//! The machine is pure: the channel ISR feeds it events and acts on the
//! returned [`SplitAction`]; time-based re-enables are driven from the
//! timer tick using [`SplitState::ready_for_complete`].

/// Microframes that must elapse after the start-split completes before the
/// first complete-split is attempted.
pub const SPLIT_FRAME_WAIT: u16 = 8;

/// Consecutive NYETs tolerated before the whole transaction restarts.
pub const MAX_SPLIT_NYET_RETRIES: u8 = 50;

/// Frame numbers are 14 bits in `HFNUM`.
const FRAME_MASK: u16 = 0x3FFF;

/// Current phase, mirrored into the channel's `COMPSPLT` bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPhase {
    StartSplit,
    CompleteSplit,
}

/// What the hardware reported for the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitEvent {
    Ack,
    Nyet,
    Nak,
    XferComplete,
    Error,
}

/// What the driver must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitAction {
    /// Set `COMPSPLT` and re-enable once enough microframes have passed.
    WaitThenComplete,
    /// Re-enable the channel for another complete-split attempt.
    RetryComplete,
    /// Clear `COMPSPLT` and retry the entire transfer.
    Restart,
    /// The transaction finished; clear `COMPSPLT`.
    Done,
    /// Hard failure; surface to the caller.
    Fail,
}

/// Per-channel split state.
#[derive(Debug, Clone, Copy)]
pub struct SplitState {
    pub phase: SplitPhase,
    /// Microframe number when the start-split completed.
    pub start_frame: u16,
    /// Consecutive NYETs in the complete phase.
    pub nyet_count: u8,
}

impl SplitState {
    pub const fn new() -> Self {
        SplitState {
            phase: SplitPhase::StartSplit,
            start_frame: 0,
            nyet_count: 0,
        }
    }

    /// Reset to a fresh start-split.
    pub fn reset(&mut self) {
        *self = SplitState::new();
    }

    /// Advance on a hardware event.  `frame` is the current `HFNUM` frame
    /// number, recorded when the start phase completes.
    pub fn on_event(&mut self, event: SplitEvent, frame: u16) -> SplitAction {
        match self.phase {
            SplitPhase::StartSplit => match event {
                SplitEvent::Ack | SplitEvent::Nyet => {
                    // The TT accepted the start-split; switch phases and
                    // give it time to run the downstream transaction.
                    self.phase = SplitPhase::CompleteSplit;
                    self.start_frame = frame & FRAME_MASK;
                    self.nyet_count = 0;
                    SplitAction::WaitThenComplete
                }
                SplitEvent::Nak => {
                    self.reset();
                    SplitAction::Restart
                }
                SplitEvent::XferComplete => {
                    self.reset();
                    SplitAction::Done
                }
                SplitEvent::Error => {
                    self.reset();
                    SplitAction::Fail
                }
            },
            SplitPhase::CompleteSplit => match event {
                SplitEvent::Ack | SplitEvent::XferComplete => {
                    self.reset();
                    SplitAction::Done
                }
                SplitEvent::Nyet => {
                    self.nyet_count += 1;
                    if self.nyet_count >= MAX_SPLIT_NYET_RETRIES {
                        self.reset();
                        SplitAction::Restart
                    } else {
                        SplitAction::RetryComplete
                    }
                }
                SplitEvent::Nak => {
                    self.reset();
                    SplitAction::Restart
                }
                SplitEvent::Error => {
                    self.reset();
                    SplitAction::Fail
                }
            },
        }
    }

    /// Whether enough microframes have elapsed since the start-split for a
    /// complete-split attempt.  Handles 14-bit wraparound.
    pub fn ready_for_complete(&self, frame: u16) -> bool {
        self.phase == SplitPhase::CompleteSplit
            && (frame.wrapping_sub(self.start_frame) & FRAME_MASK) >= SPLIT_FRAME_WAIT
    }
}

impl Default for SplitState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run a transfer through the machine: start-split ACK, then the given
    /// complete-phase events.
    fn run(events: &[SplitEvent]) -> (SplitState, SplitAction) {
        let mut st = SplitState::new();
        let mut last = st.on_event(SplitEvent::Ack, 100);
        assert_eq!(last, SplitAction::WaitThenComplete);
        for &ev in events {
            last = st.on_event(ev, 120);
        }
        (st, last)
    }

    #[test]
    fn ack_then_complete_succeeds() {
        let (st, action) = run(&[SplitEvent::XferComplete]);
        assert_eq!(action, SplitAction::Done);
        assert_eq!(st.phase, SplitPhase::StartSplit);
    }

    #[test]
    fn tolerates_up_to_fifty_nyets() {
        let mut events = alloc::vec![SplitEvent::Nyet; 49];
        events.push(SplitEvent::Ack);
        let (_, action) = run(&events);
        assert_eq!(action, SplitAction::Done);
    }

    #[test]
    fn fifty_first_nyet_restarts() {
        let mut st = SplitState::new();
        st.on_event(SplitEvent::Ack, 0);
        let mut last = SplitAction::WaitThenComplete;
        for _ in 0..MAX_SPLIT_NYET_RETRIES {
            last = st.on_event(SplitEvent::Nyet, 10);
        }
        assert_eq!(last, SplitAction::Restart);
        // Back to a fresh start-split with the counter cleared.
        assert_eq!(st.phase, SplitPhase::StartSplit);
        assert_eq!(st.nyet_count, 0);
    }

    #[test]
    fn nak_restarts_from_either_phase() {
        let mut st = SplitState::new();
        assert_eq!(st.on_event(SplitEvent::Nak, 0), SplitAction::Restart);
        st.on_event(SplitEvent::Ack, 0);
        assert_eq!(st.on_event(SplitEvent::Nak, 9), SplitAction::Restart);
        assert_eq!(st.phase, SplitPhase::StartSplit);
    }

    #[test]
    fn errors_fail() {
        let mut st = SplitState::new();
        assert_eq!(st.on_event(SplitEvent::Error, 0), SplitAction::Fail);
        st.on_event(SplitEvent::Ack, 0);
        assert_eq!(st.on_event(SplitEvent::Error, 9), SplitAction::Fail);
    }

    #[test]
    fn frame_wait_with_wraparound() {
        let mut st = SplitState::new();
        st.on_event(SplitEvent::Nyet, 0x3FFC); // start-split accepted near wrap
        assert_eq!(st.phase, SplitPhase::CompleteSplit);
        assert!(!st.ready_for_complete(0x3FFD));
        assert!(!st.ready_for_complete(0x0001)); // 5 frames
        assert!(st.ready_for_complete(0x0004)); // 8 frames
        assert!(st.ready_for_complete(0x0100));
    }
}
