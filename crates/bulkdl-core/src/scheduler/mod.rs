//! Admission control and run orchestration.
//!
//! The throttle bounds in-flight units, the settle latch tracks admitted units
//! until they finish, and the engine drives the admission loop:
//! throttle slot → spawn unit → fetch → record progress or failure → release.

mod latch;
mod progress;
mod result;
mod run;
mod throttle;

pub use latch::{SettleGuard, SettleLatch};
pub use progress::{channel_callback, ProgressCallback, ProgressState, ProgressStats};
pub use result::{RunResult, UnitFailure};
pub use run::{Engine, TransferTask};
pub use throttle::{Slot, Throttle};
