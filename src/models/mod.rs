//! Data models
//!
//! Entities persisted by the session store (Tenant, StorageRecord, Session,
//! CommandLogEntry) plus the input types consumed by the service layer.

mod command_log;
mod session;
mod storage;
mod tenant;

pub use command_log::CommandLogEntry;
pub use session::{CreateSessionInput, Permission, Session};
pub use storage::{StorageProtocol, StorageRecord};
pub use tenant::{EditorMode, Tenant};
