//! Pending action queue and its replay protocol.
//!
//! Delivery is at-least-once: an action stays stored from the moment normal
//! delivery fails until a replay delivers it. There is no retry limit, backoff
//! or dead-letter state; a failed action waits for the next sync trigger.
//!
//! An action counts as delivered once the server answers with a status below
//! 500 (see [`crate::net::is_delivered`]). A 5xx answer is treated like a
//! transport failure and the action stays queued, so a resolved request is not
//! by itself enough to drop it.

mod replay;
mod store;

pub use replay::{ReplayReport, SyncReplayer};
pub use store::{PendingAction, PendingActionQueue};
