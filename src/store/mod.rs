use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::audit::{ModificationLogEntry, StatusLogEntry};
use crate::domain::order::{FieldChange, LifecycleStatus, LineItem, Order, OrderTypes, Payment};
use crate::domain::subsystems::{InspectionStatus, InstallationStatus};

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

// ============================================================================
// Persistence - Order rows, items, payments and the audit log
// ============================================================================
//
// Every aggregate-level numeric or status field is written through a
// partial-field method that touches only the columns it names. There is no
// "save the whole order" call.
//
// A user mutation stages its row changes, recomputed totals and audit rows in
// a `WriteBatch` and hands it to `OrderStore::commit`, which applies all of
// them or none.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn order_not_found(id: Uuid) -> Self {
        StoreError::NotFound { entity: "order", id }
    }
}

/// Fields owned by the synchronization coordinator. `None` leaves the
/// column untouched; `Some(None)` clears a mirror.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncFields {
    pub status: Option<LifecycleStatus>,
    pub inspection_status: Option<Option<InspectionStatus>>,
    pub installation_status: Option<Option<InstallationStatus>>,
    pub is_fully_completed: Option<bool>,
}

impl SyncFields {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.inspection_status.is_none()
            && self.installation_status.is_none()
            && self.is_fully_completed.is_none()
    }

    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
            order.status_pinned = false;
        }
        if let Some(inspection) = self.inspection_status {
            order.inspection_status = inspection;
        }
        if let Some(installation) = self.installation_status {
            order.installation_status = installation;
        }
        if let Some(done) = self.is_fully_completed {
            order.is_fully_completed = done;
        }
    }
}

/// One row-level change staged in a `WriteBatch`.
#[derive(Debug, Clone)]
pub enum Write {
    InsertOrder(Order),
    Fields { order_id: Uuid, changes: Vec<FieldChange> },
    OrderTypes { order_id: Uuid, order_types: OrderTypes },
    Totals { order_id: Uuid, subtotal: Decimal, discount_total: Decimal },
    PaidAmount { order_id: Uuid, paid_amount: Decimal },
    InsertItem(LineItem),
    UpdateItem(LineItem),
    /// Fails with `NotFound` when the item is already gone.
    DeleteItem { order_id: Uuid, item_id: Uuid },
    InsertPayment(Payment),
    /// Fails with `NotFound` when the payment is already gone.
    DeletePayment { order_id: Uuid, payment_id: Uuid },
    StatusEntry(StatusLogEntry),
    Modification(ModificationLogEntry),
}

/// Writes committed together, in order.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn status_entries(&self) -> impl Iterator<Item = &StatusLogEntry> {
        self.writes.iter().filter_map(|write| match write {
            Write::StatusEntry(entry) => Some(entry),
            _ => None,
        })
    }

    pub fn has_modification(&self) -> bool {
        self.writes.iter().any(|write| matches!(write, Write::Modification(_)))
    }
}

/// Rows removed by a cascade delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeletionReport {
    pub order_id: Uuid,
    pub items: u64,
    pub payments: u64,
    pub status_entries: u64,
    pub modification_entries: u64,
}

impl DeletionReport {
    pub fn dependent_rows(&self) -> u64 {
        self.items + self.payments + self.status_entries + self.modification_entries
    }
}

/// Append-only audit storage.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append_status_entry(&self, entry: &StatusLogEntry) -> Result<(), StoreError>;

    async fn append_modification(&self, entry: &ModificationLogEntry) -> Result<(), StoreError>;

    /// Oldest first.
    async fn status_entries(&self, order_id: Uuid) -> Result<Vec<StatusLogEntry>, StoreError>;

    /// Oldest first.
    async fn modification_entries(&self, order_id: Uuid) -> Result<Vec<ModificationLogEntry>, StoreError>;

    /// Delete automatic status entries created before `before`. Manual
    /// entries are never pruned. Returns the number of rows removed.
    async fn prune_automatic(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait OrderStore: AuditLog {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn require_order(&self, id: Uuid) -> Result<Order, StoreError> {
        self.order(id).await?.ok_or_else(|| StoreError::order_not_found(id))
    }

    /// Write only the columns named by `changes`. A status change also
    /// records whether the status is pinned against synchronization.
    async fn write_fields(&self, id: Uuid, changes: &[FieldChange]) -> Result<(), StoreError>;

    async fn write_order_types(&self, id: Uuid, order_types: &OrderTypes) -> Result<(), StoreError>;

    async fn write_totals(&self, id: Uuid, subtotal: Decimal, discount_total: Decimal) -> Result<(), StoreError>;

    async fn write_paid_amount(&self, id: Uuid, paid_amount: Decimal) -> Result<(), StoreError>;

    async fn write_sync_fields(&self, id: Uuid, fields: &SyncFields) -> Result<(), StoreError>;

    async fn write_expected_delivery(&self, id: Uuid, date: Option<NaiveDate>) -> Result<(), StoreError>;

    async fn items(&self, order_id: Uuid) -> Result<Vec<LineItem>, StoreError>;

    async fn insert_item(&self, item: &LineItem) -> Result<(), StoreError>;

    async fn update_item(&self, item: &LineItem) -> Result<(), StoreError>;

    /// Returns the removed item, if it existed.
    async fn delete_item(&self, order_id: Uuid, item_id: Uuid) -> Result<Option<LineItem>, StoreError>;

    async fn payments(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError>;

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError>;

    /// Returns the removed payment, if it existed.
    async fn delete_payment(&self, order_id: Uuid, payment_id: Uuid) -> Result<Option<Payment>, StoreError>;

    /// Apply every write in `batch` or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Remove the order together with its audit rows, modification rows,
    /// payments and line items, all or nothing.
    async fn delete_order_cascade(&self, id: Uuid) -> Result<DeletionReport, StoreError>;
}
