//! The realtime session-event engine.
//!
//! [`SessionEventRouter`] owns the transcript of the conversation on screen and
//! drives the smaller state machines: stream assembly, tool correlation,
//! session identity and permission requests. [`MessageWindow`] pages older
//! history in beside it.

pub mod identity;
pub mod permissions;
pub mod router;
pub mod stream;
pub mod tools;
pub mod window;

pub use identity::{IdentityChange, SessionIdentity, SessionReconciler};
pub use permissions::{remember_key, Decision, DecideOutcome, PendingPermission, PermissionManager};
pub use router::{RouterEffect, SessionEventRouter, ViewStatus};
pub use stream::{FlushTick, StreamAssembler, StreamChannel};
pub use tools::ToolCorrelator;
pub use window::{MessageWindow, PageRequest, ScrollMetrics};
