//! Notification records: creation (fan-out), the recipient's inbox, and delivery preferences.

mod fanout;
mod inbox;
mod preferences;

pub use fanout::{BOOK_TEXT, CHAPTER_TEXT, NotificationFanout};
pub use inbox::{InboxEntry, NotificationInbox};
pub use preferences::PreferenceStore;
