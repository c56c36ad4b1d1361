//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles CRUD operations for a specific entity.

pub mod command_log;
pub mod session;
pub mod storage;
pub mod tenant;

pub use command_log::{CommandLogRepository, SqlxCommandLogRepository};
pub use session::{
    CleanupPreview, InsertError, LockOutcome, ReleaseOutcome, SessionRepository,
    SqlxSessionRepository,
};
pub use storage::{SqlxStorageRepository, StorageRepository};
pub use tenant::{SqlxTenantRepository, TenantRepository};
