use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use super::event::SyncEvent;

// ============================================================================
// Deletion Guard
// ============================================================================

/// Orders currently being deleted. Shared by the service and the
/// coordinator so handlers stay off rows that are about to disappear.
#[derive(Clone, Default)]
pub struct DeletionGuard {
    deleting: Arc<Mutex<HashSet<Uuid>>>,
}

impl DeletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `order_id` as being deleted until the token is dropped.
    /// `None` if a deletion of the same order is already running.
    pub fn begin(&self, order_id: Uuid) -> Option<DeletionToken> {
        let mut deleting = self.deleting.lock().unwrap_or_else(PoisonError::into_inner);
        if !deleting.insert(order_id) {
            return None;
        }
        Some(DeletionToken {
            guard: self.clone(),
            order_id,
        })
    }

    pub fn is_deleting(&self, order_id: Uuid) -> bool {
        self.deleting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&order_id)
    }
}

pub struct DeletionToken {
    guard: DeletionGuard,
    order_id: Uuid,
}

impl Drop for DeletionToken {
    fn drop(&mut self) {
        self.guard
            .deleting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.order_id);
    }
}

// ============================================================================
// Request-scoped Sync Context
// ============================================================================

/// Event queue for one request, with the re-entrancy flag and the set of
/// events already seen.
#[derive(Debug, Default)]
pub struct SyncContext {
    queue: VecDeque<SyncEvent>,
    seen: HashSet<(&'static str, Uuid)>,
    writing: bool,
    suppressed: usize,
    deduplicated: usize,
}

impl SyncContext {
    pub fn new(initial: SyncEvent) -> Self {
        let mut ctx = Self::default();
        ctx.emit(initial);
        ctx
    }

    /// Queue a follow-up event. Dropped while a coordinator write is in
    /// progress, or when the same event was already queued in this request.
    pub fn emit(&mut self, event: SyncEvent) -> bool {
        if self.writing {
            tracing::trace!(event = event.kind(), order_id = %event.order_id(), "Suppressed re-entrant event");
            self.suppressed += 1;
            return false;
        }
        if !self.seen.insert(event.key()) {
            self.deduplicated += 1;
            return false;
        }
        self.queue.push_back(event);
        true
    }

    pub fn next_event(&mut self) -> Option<SyncEvent> {
        self.queue.pop_front()
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }

    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn deduplicated(&self) -> usize {
        self.deduplicated
    }

    /// Raise the re-entrancy flag until the returned scope is dropped.
    pub fn write_scope(&mut self) -> WriteScope<'_> {
        self.writing = true;
        WriteScope { ctx: self }
    }
}

/// A coordinator write in progress. Events emitted through it are
/// suppressed.
pub struct WriteScope<'a> {
    ctx: &'a mut SyncContext,
}

impl WriteScope<'_> {
    pub fn emit(&mut self, event: SyncEvent) -> bool {
        self.ctx.emit(event)
    }
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        self.ctx.writing = false;
    }
}
