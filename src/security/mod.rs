pub mod audit;
pub mod csrf;
pub mod session;

pub use audit::{SecurityAuditor, SecurityEvent, SecurityEventType, SecuritySeverity};
pub use csrf::{CsrfError, CsrfGuard, PresentedToken, TokenSource};
pub use session::{
    MemorySessionStore, Principal, Session, SessionError, SessionLookup, SessionPolicy,
    SessionRegistry, SessionStore, generate_token,
};
