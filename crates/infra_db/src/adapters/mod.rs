//! Adapters for the collaborator ports
//!
//! These run outside the unit of work: each holds the pool and issues its
//! own statements.

pub mod inbox;
pub mod notifications;
pub mod reference;
pub mod task_lock;

pub use inbox::PgLegacyInbox;
pub use notifications::PgNotificationOutbox;
pub use reference::PgReferenceData;
pub use task_lock::PgTaskLock;
