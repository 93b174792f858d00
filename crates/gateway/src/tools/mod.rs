//! Built-in tools.
//!
//! Only the tools the session core itself needs live here: `bash` for
//! shell effects, `task` for child-session spawning, `ask_user` for
//! operator questions, and `todo_write` for the session plan. Everything
//! else (file I/O, search, web) is expected to be registered by the
//! embedding front-end.

mod ask_user;
mod bash;
mod task;
mod todo_write;

pub use ask_user::AskUserTool;
pub use bash::BashTool;
pub use task::TaskTool;
pub use todo_write::TodoWriteTool;
