//! Service layer
//!
//! Business logic between the HTTP handlers and the repositories:
//! - `registry`: tenant/storage/editor-URL resolution with cached reads
//! - `token`: signed WOPI access tokens
//! - `session`: session lifecycle (create/close/cleanup)
//! - `callback`: best-effort event notification to the origin application
//! - `audit`: append-only operation log

pub mod audit;
pub mod callback;
pub mod registry;
pub mod session;
pub mod token;

pub use audit::AuditLog;
pub use callback::{CallbackDispatcher, CallbackEvent};
pub use registry::{Registry, RegistryError};
pub use session::{CleanupResult, CreateSessionResult, SessionError, SessionManager};
pub use token::{TokenClaims, TokenError, TokenService};
