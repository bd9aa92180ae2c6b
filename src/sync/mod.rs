// ============================================================================
// Synchronization Coordinator - Keeps orders and subsystems converged
// ============================================================================
//
// Events are processed through an explicit, request-scoped queue:
// - every handler recomputes, compares, and writes only what differs
// - writes made by the coordinator itself run inside a write scope, and
//   events they would raise are suppressed instead of re-entering
// - the same event is handled at most once per request
// - orders being deleted are skipped
//
// Handler failures are logged and counted, never returned to the caller.
//
// ============================================================================

pub mod coordinator;
pub mod event;
pub mod guard;

pub use coordinator::{SyncCoordinator, SyncReport};
pub use event::SyncEvent;
pub use guard::{DeletionGuard, DeletionToken, SyncContext, WriteScope};
