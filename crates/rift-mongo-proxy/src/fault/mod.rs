//! In-band fault injection.
//!
//! - `dsl` - parses and strips the `proxyTest` block from client commands
//! - `slot` - per-session handoff of the pending instruction
//! - `executor` - replays the instruction against the next server reply

mod dsl;
mod executor;
mod slot;

pub use dsl::{extract, Action, DslError, Extraction, TestInstruction, PROXY_TEST_FIELD};
pub use executor::{apply_actions, Delivery};
pub use slot::{InstructionSlot, Registration};
