//! Single-slot handoff of a pending instruction between the two relay
//! directions of one session.

use super::dsl::TestInstruction;
use crate::metrics;
use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Empty,
    Pending(TestInstruction),
    /// An instruction was consumed; the session is one-shot from here on.
    Spent,
}

/// Outcome of [`InstructionSlot::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// Replaced an instruction whose reply had not arrived yet.
    Replaced(TestInstruction),
    /// The slot was already spent; the instruction will never fire.
    Ignored,
}

/// Holds at most one instruction waiting for the next server reply.
///
/// The request path `set`s, the reply path `take`s. A second `set` before
/// the reply arrives replaces the first: instructions are not queued. Once
/// `take` hands an instruction out the slot is spent and later `set`s are
/// ignored.
#[derive(Debug, Default)]
pub struct InstructionSlot {
    state: Mutex<SlotState>,
}

impl InstructionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instruction for the next reply.
    pub fn set(&self, instruction: TestInstruction) -> Registration {
        let mut state = self.state.lock();
        let registration = match std::mem::take(&mut *state) {
            SlotState::Empty => {
                *state = SlotState::Pending(instruction);
                Registration::Registered
            }
            SlotState::Pending(displaced) => {
                *state = SlotState::Pending(instruction);
                Registration::Replaced(displaced)
            }
            SlotState::Spent => {
                *state = SlotState::Spent;
                Registration::Ignored
            }
        };
        drop(state);

        match registration {
            Registration::Registered => metrics::record_instruction("registered"),
            Registration::Replaced(_) => {
                metrics::record_instruction("overwritten");
                warn!("Overwriting pending proxyTest instruction before its reply arrived");
            }
            Registration::Ignored => {
                metrics::record_instruction("ignored");
                debug!("Ignoring proxyTest instruction, session already consumed one");
            }
        }
        registration
    }

    /// Remove and return the pending instruction, spending the slot.
    pub fn take(&self) -> Option<TestInstruction> {
        let mut state = self.state.lock();
        match std::mem::take(&mut *state) {
            SlotState::Pending(instruction) => {
                *state = SlotState::Spent;
                Some(instruction)
            }
            other => {
                *state = other;
                None
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Pending(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::Action;
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn instruction(delay_ms: u64) -> TestInstruction {
        TestInstruction {
            actions: vec![Action {
                delay_ms: Some(delay_ms),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_take_is_read_once() {
        let slot = InstructionSlot::new();
        assert!(slot.take().is_none());

        assert_eq!(slot.set(instruction(1)), Registration::Registered);
        assert!(slot.is_pending());
        assert_eq!(slot.take(), Some(instruction(1)));
        assert!(slot.take().is_none());
        assert!(!slot.is_pending());
    }

    #[test]
    fn test_empty_take_does_not_spend_slot() {
        let slot = InstructionSlot::new();
        assert!(slot.take().is_none());
        assert_eq!(slot.set(instruction(3)), Registration::Registered);
        assert_eq!(slot.take(), Some(instruction(3)));
    }

    #[test]
    #[traced_test]
    fn test_last_write_wins() {
        let slot = InstructionSlot::new();
        slot.set(instruction(1));
        assert_eq!(
            slot.set(instruction(2)),
            Registration::Replaced(instruction(1))
        );
        assert_eq!(slot.take(), Some(instruction(2)));
        assert!(logs_contain("Overwriting pending proxyTest instruction"));
    }

    #[test]
    fn test_set_after_take_is_ignored() {
        let slot = InstructionSlot::new();
        slot.set(instruction(1));
        slot.take();

        assert_eq!(slot.set(instruction(2)), Registration::Ignored);
        assert!(!slot.is_pending());
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_concurrent_set_and_take_hand_off_exactly_once() {
        let slot = Arc::new(InstructionSlot::new());
        slot.set(instruction(7));

        let takers: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                std::thread::spawn(move || slot.take())
            })
            .collect();

        let taken: Vec<_> = takers
            .into_iter()
            .filter_map(|t| t.join().unwrap())
            .collect();
        assert_eq!(taken, vec![instruction(7)]);
    }
}
