//! Session state: the event bus, the session store, the message/part
//! log, per-session todos, and the JSON storage adapter they persist
//! through.

pub mod bus;
pub mod log;
pub mod storage;
pub mod store;
pub mod todo;

pub use bus::{Bus, BusEvent};
pub use log::MessageLog;
pub use storage::Storage;
pub use store::{CreateSession, SessionStore};
pub use todo::{Todo, TodoStatus, TodoStore};
