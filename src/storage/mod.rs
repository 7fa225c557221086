mod alert_store;
mod command_store;
mod migrations;
mod outbox_store;
mod session_store;
mod sqlite_store;
mod util;

pub use outbox_store::DeadLetter;
pub use session_store::SessionRow;
pub use sqlite_store::SqliteStore;
pub(crate) use util::now_unix_ms;
