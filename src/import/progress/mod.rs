mod handle;
mod notification;

pub use handle::ImportProgressHandle;
pub use notification::{ImportProgress, NotificationSnapshot, NotificationState, ProgressNotification};
