use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AuditLog, DeletionReport, OrderStore, StoreError, SyncFields, Write, WriteBatch};
use crate::audit::{ModificationLogEntry, StatusLogEntry};
use crate::domain::order::{FieldChange, LineItem, Order, OrderTypeTag, OrderTypes, Payment};
use crate::domain::subsystems::{
    InspectionStatus, InspectionView, InstallationStatus, InstallationView, ManufacturingStatus,
    ManufacturingView, SubsystemGateway,
};

#[derive(Default, Clone)]
struct State {
    orders: HashMap<Uuid, Order>,
    items: HashMap<Uuid, Vec<LineItem>>,
    payments: HashMap<Uuid, Vec<Payment>>,
    status_log: Vec<StatusLogEntry>,
    modifications: Vec<ModificationLogEntry>,
    inspections: HashMap<Uuid, InspectionView>,
    installations: HashMap<Uuid, InstallationView>,
    manufacturing: HashMap<Uuid, ManufacturingView>,
}

impl State {
    fn order_mut(&mut self, id: Uuid) -> Result<&mut Order, StoreError> {
        self.orders.get_mut(&id).ok_or_else(|| StoreError::order_not_found(id))
    }

    fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        if self.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict(format!("order {} already exists", order.id)));
        }
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    fn write_fields(&mut self, id: Uuid, changes: &[FieldChange]) -> Result<(), StoreError> {
        let stored = self.order_mut(id)?;
        for change in changes {
            stored.apply_change(change);
        }
        Ok(())
    }

    fn write_order_types(&mut self, id: Uuid, order_types: &OrderTypes) -> Result<(), StoreError> {
        let stored = self.order_mut(id)?;
        stored.order_types = order_types.clone();
        stored.updated_at = Utc::now();
        Ok(())
    }

    fn write_totals(&mut self, id: Uuid, subtotal: Decimal, discount_total: Decimal) -> Result<(), StoreError> {
        let stored = self.order_mut(id)?;
        stored.subtotal = subtotal;
        stored.discount_total = discount_total;
        Ok(())
    }

    fn insert_item(&mut self, item: &LineItem) -> Result<(), StoreError> {
        self.order_mut(item.order_id)?;
        self.items.entry(item.order_id).or_default().push(item.clone());
        Ok(())
    }

    fn update_item(&mut self, item: &LineItem) -> Result<(), StoreError> {
        let stored = self
            .items
            .get_mut(&item.order_id)
            .and_then(|items| items.iter_mut().find(|i| i.id == item.id))
            .ok_or(StoreError::NotFound { entity: "line item", id: item.id })?;
        *stored = item.clone();
        Ok(())
    }

    fn delete_item(&mut self, order_id: Uuid, item_id: Uuid) -> Option<LineItem> {
        let items = self.items.get_mut(&order_id)?;
        let index = items.iter().position(|i| i.id == item_id)?;
        Some(items.remove(index))
    }

    fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.order_mut(payment.order_id)?;
        self.payments.entry(payment.order_id).or_default().push(payment.clone());
        Ok(())
    }

    fn delete_payment(&mut self, order_id: Uuid, payment_id: Uuid) -> Option<Payment> {
        let payments = self.payments.get_mut(&order_id)?;
        let index = payments.iter().position(|p| p.id == payment_id)?;
        Some(payments.remove(index))
    }

    fn apply(&mut self, write: &Write) -> Result<(), StoreError> {
        match write {
            Write::InsertOrder(order) => self.insert_order(order),
            Write::Fields { order_id, changes } => self.write_fields(*order_id, changes),
            Write::OrderTypes { order_id, order_types } => self.write_order_types(*order_id, order_types),
            Write::Totals { order_id, subtotal, discount_total } => {
                self.write_totals(*order_id, *subtotal, *discount_total)
            }
            Write::PaidAmount { order_id, paid_amount } => {
                self.order_mut(*order_id)?.paid_amount = *paid_amount;
                Ok(())
            }
            Write::InsertItem(item) => self.insert_item(item),
            Write::UpdateItem(item) => self.update_item(item),
            Write::DeleteItem { order_id, item_id } => self
                .delete_item(*order_id, *item_id)
                .map(|_| ())
                .ok_or(StoreError::NotFound { entity: "line item", id: *item_id }),
            Write::InsertPayment(payment) => self.insert_payment(payment),
            Write::DeletePayment { order_id, payment_id } => self
                .delete_payment(*order_id, *payment_id)
                .map(|_| ())
                .ok_or(StoreError::NotFound { entity: "payment", id: *payment_id }),
            Write::StatusEntry(entry) => {
                self.status_log.push(entry.clone());
                Ok(())
            }
            Write::Modification(entry) => {
                self.modifications.push(entry.clone());
                Ok(())
            }
        }
    }
}

/// Single-process store used by tests and the demo binary. Also stands in
/// for the inspection, installation and manufacturing subsystems.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    sync_writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of coordinator write-backs applied so far.
    pub fn sync_writes(&self) -> u64 {
        self.sync_writes.load(Ordering::SeqCst)
    }

    /// Items, payments and audit rows still referencing `order_id`.
    pub async fn dependent_rows(&self, order_id: Uuid) -> usize {
        let state = self.state.lock().await;
        state.items.get(&order_id).map_or(0, Vec::len)
            + state.payments.get(&order_id).map_or(0, Vec::len)
            + state.status_log.iter().filter(|e| e.order_id == order_id).count()
            + state.modifications.iter().filter(|e| e.order_id == order_id).count()
    }

    /// Orders, items, payments and audit rows held across every order.
    pub async fn row_count(&self) -> usize {
        let state = self.state.lock().await;
        state.orders.len()
            + state.items.values().map(Vec::len).sum::<usize>()
            + state.payments.values().map(Vec::len).sum::<usize>()
            + state.status_log.len()
            + state.modifications.len()
    }

    pub async fn put_inspection(&self, order_id: Uuid, status: InspectionStatus) -> InspectionView {
        let mut state = self.state.lock().await;
        let view = state.inspections.entry(order_id).or_insert_with(|| InspectionView {
            id: Uuid::new_v4(),
            order_id,
            status,
            scheduled_date: None,
            completed_at: None,
        });
        view.status = status;
        if status == InspectionStatus::Completed && view.completed_at.is_none() {
            view.completed_at = Some(Utc::now());
        }
        view.clone()
    }

    pub async fn put_installation(
        &self,
        order_id: Uuid,
        status: InstallationStatus,
        scheduled_date: Option<NaiveDate>,
    ) -> InstallationView {
        let mut state = self.state.lock().await;
        let view = state.installations.entry(order_id).or_insert_with(|| InstallationView {
            id: Uuid::new_v4(),
            order_id,
            status,
            scheduled_date,
            completed_at: None,
        });
        view.status = status;
        view.scheduled_date = scheduled_date.or(view.scheduled_date);
        if status == InstallationStatus::Completed && view.completed_at.is_none() {
            view.completed_at = Some(Utc::now());
        }
        view.clone()
    }

    pub async fn set_manufacturing_status(
        &self,
        order_id: Uuid,
        status: ManufacturingStatus,
    ) -> Result<ManufacturingView, StoreError> {
        let mut state = self.state.lock().await;
        let view = state
            .manufacturing
            .get_mut(&order_id)
            .ok_or(StoreError::NotFound { entity: "manufacturing order", id: order_id })?;
        view.status = status;
        if matches!(status, ManufacturingStatus::Completed | ManufacturingStatus::Delivered)
            && view.completion_date.is_none()
        {
            view.completion_date = Some(Utc::now().date_naive());
        }
        Ok(view.clone())
    }

    /// Delete the manufacturing order, returning its last known state.
    pub async fn remove_manufacturing(&self, order_id: Uuid) -> Option<ManufacturingView> {
        self.state.lock().await.manufacturing.remove(&order_id)
    }
}

#[async_trait]
impl AuditLog for InMemoryStore {
    async fn append_status_entry(&self, entry: &StatusLogEntry) -> Result<(), StoreError> {
        self.state.lock().await.status_log.push(entry.clone());
        Ok(())
    }

    async fn append_modification(&self, entry: &ModificationLogEntry) -> Result<(), StoreError> {
        self.state.lock().await.modifications.push(entry.clone());
        Ok(())
    }

    async fn status_entries(&self, order_id: Uuid) -> Result<Vec<StatusLogEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state
            .status_log
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn modification_entries(&self, order_id: Uuid) -> Result<Vec<ModificationLogEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state
            .modifications
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn prune_automatic(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let len = state.status_log.len();
        state
            .status_log
            .retain(|e| !(e.is_automatic && e.created_at < before));
        Ok((len - state.status_log.len()) as u64)
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.state.lock().await.insert_order(order)
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn write_fields(&self, id: Uuid, changes: &[FieldChange]) -> Result<(), StoreError> {
        self.state.lock().await.write_fields(id, changes)
    }

    async fn write_order_types(&self, id: Uuid, order_types: &OrderTypes) -> Result<(), StoreError> {
        self.state.lock().await.write_order_types(id, order_types)
    }

    async fn write_totals(&self, id: Uuid, subtotal: Decimal, discount_total: Decimal) -> Result<(), StoreError> {
        self.state.lock().await.write_totals(id, subtotal, discount_total)
    }

    async fn write_paid_amount(&self, id: Uuid, paid_amount: Decimal) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.order_mut(id)?.paid_amount = paid_amount;
        Ok(())
    }

    async fn write_sync_fields(&self, id: Uuid, fields: &SyncFields) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        fields.apply(state.order_mut(id)?);
        self.sync_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write_expected_delivery(&self, id: Uuid, date: Option<NaiveDate>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.order_mut(id)?.expected_delivery = date;
        Ok(())
    }

    async fn items(&self, order_id: Uuid) -> Result<Vec<LineItem>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .items
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_item(&self, item: &LineItem) -> Result<(), StoreError> {
        self.state.lock().await.insert_item(item)
    }

    async fn update_item(&self, item: &LineItem) -> Result<(), StoreError> {
        self.state.lock().await.update_item(item)
    }

    async fn delete_item(&self, order_id: Uuid, item_id: Uuid) -> Result<Option<LineItem>, StoreError> {
        Ok(self.state.lock().await.delete_item(order_id, item_id))
    }

    async fn payments(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), StoreError> {
        self.state.lock().await.insert_payment(payment)
    }

    async fn delete_payment(&self, order_id: Uuid, payment_id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.lock().await.delete_payment(order_id, payment_id))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();
        for write in batch.writes() {
            staged.apply(write)?;
        }
        *state = staged;
        Ok(())
    }

    async fn delete_order_cascade(&self, id: Uuid) -> Result<DeletionReport, StoreError> {
        let mut state = self.state.lock().await;
        if !state.orders.contains_key(&id) {
            return Err(StoreError::order_not_found(id));
        }

        let status_before = state.status_log.len();
        state.status_log.retain(|e| e.order_id != id);
        let status_entries = (status_before - state.status_log.len()) as u64;

        let modifications_before = state.modifications.len();
        state.modifications.retain(|e| e.order_id != id);
        let modification_entries = (modifications_before - state.modifications.len()) as u64;

        let payments = state.payments.remove(&id).map_or(0, |p| p.len() as u64);
        let items = state.items.remove(&id).map_or(0, |i| i.len() as u64);
        state.orders.remove(&id);

        Ok(DeletionReport {
            order_id: id,
            items,
            payments,
            status_entries,
            modification_entries,
        })
    }
}

#[async_trait]
impl SubsystemGateway for InMemoryStore {
    async fn inspection(&self, order_id: Uuid) -> Result<Option<InspectionView>, StoreError> {
        Ok(self.state.lock().await.inspections.get(&order_id).cloned())
    }

    async fn installation(&self, order_id: Uuid) -> Result<Option<InstallationView>, StoreError> {
        Ok(self.state.lock().await.installations.get(&order_id).cloned())
    }

    async fn manufacturing(&self, order_id: Uuid) -> Result<Option<ManufacturingView>, StoreError> {
        Ok(self.state.lock().await.manufacturing.get(&order_id).cloned())
    }

    async fn ensure_manufacturing(
        &self,
        order_id: Uuid,
        order_type: OrderTypeTag,
        delivery_date: Option<NaiveDate>,
    ) -> Result<(ManufacturingView, bool), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.manufacturing.get(&order_id) {
            return Ok((existing.clone(), false));
        }
        let view = ManufacturingView::new(order_id, order_type, delivery_date);
        state.manufacturing.insert(order_id, view.clone());
        Ok((view, true))
    }

    async fn set_manufacturing_delivery_date(
        &self,
        order_id: Uuid,
        delivery_date: Option<NaiveDate>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let view = state
            .manufacturing
            .get_mut(&order_id)
            .ok_or(StoreError::NotFound { entity: "manufacturing order", id: order_id })?;
        view.delivery_date = delivery_date;
        Ok(())
    }
}
