//! Push notification display and click routing.

mod dispatcher;
mod payload;

pub use dispatcher::{ClickRoute, NotificationDispatcher};
pub use payload::{Notification, NotificationData};
