use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::audit::classifier::ItemChange;
use crate::audit::{ChangeClassifier, ChangeKind, OrderHistory, StatusLogEntry};
use crate::config::AppConfig;
use crate::domain::order::{
    Actor, FieldChange, LifecycleStatus, LineItem, LineItemDraft, NewOrder, Order, OrderCommand, OrderError,
    OrderTypeTag, OrderTypes, Payment, PaymentMethod, MAX_AMOUNT,
};
use crate::domain::subsystems::{CuttingStatus, SubsystemGateway};
use crate::finance::{evaluate, paid_total, FinancialCalculator, RecomputeOutcome};
use crate::integrations::{InventoryClient, NameDirectory};
use crate::metrics::Metrics;
use crate::status::{resolve, Badge, ResolvedStatus};
use crate::store::{DeletionReport, OrderStore, StoreError, Write, WriteBatch};
use crate::sync::{DeletionGuard, SyncCoordinator, SyncEvent, SyncReport};
use crate::worker::{Job, JobDispatcher};

// ============================================================================
// Order Service - Entry point for every order mutation
// ============================================================================
//
// Within one call the steps run in a fixed order:
//   line-item / field mutation -> financial recompute -> audit -> sync
//
// The mutation, the recomputed totals and the audit rows are committed as
// one `WriteBatch`. Validation errors block the mutation. Synchronization
// runs after the commit and never fails the call.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub defer_recompute: bool,
    pub max_sync_passes: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            defer_recompute: false,
            max_sync_passes: 8,
        }
    }
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            defer_recompute: config.finance.defer_recompute,
            max_sync_passes: config.sync.max_passes,
        }
    }
}

/// Current status of an order as shown to users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderStatusView {
    pub order_id: Uuid,
    pub stored_status: LifecycleStatus,
    pub resolved: ResolvedStatus,
    pub badge: Badge,
}

/// Result of [`OrderService::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Order(Order),
    Item(LineItem),
    Payment(Payment),
    Totals(Option<RecomputeOutcome>),
    Deleted(DeletionReport),
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    subsystems: Arc<dyn SubsystemGateway>,
    calculator: Arc<FinancialCalculator>,
    classifier: ChangeClassifier,
    coordinator: SyncCoordinator,
    deletions: DeletionGuard,
    inventory: Arc<dyn InventoryClient>,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
    metrics: Arc<Metrics>,
    settings: ServiceSettings,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        subsystems: Arc<dyn SubsystemGateway>,
        directory: Arc<dyn NameDirectory>,
        inventory: Arc<dyn InventoryClient>,
        metrics: Arc<Metrics>,
        settings: ServiceSettings,
    ) -> Self {
        let classifier = ChangeClassifier::new(directory);
        let deletions = DeletionGuard::new();
        let coordinator = SyncCoordinator::new(
            store.clone(),
            subsystems.clone(),
            classifier.clone(),
            deletions.clone(),
            metrics.clone(),
            settings.max_sync_passes,
        );
        Self {
            calculator: Arc::new(FinancialCalculator::new(store.clone(), metrics.clone())),
            store,
            subsystems,
            classifier,
            coordinator,
            deletions,
            inventory,
            dispatcher: None,
            metrics,
            settings,
        }
    }

    /// Route deferred work (recompute, contract upload) to a background worker.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn calculator(&self) -> Arc<FinancialCalculator> {
        self.calculator.clone()
    }

    // ========================================================================
    // Order lifecycle
    // ========================================================================

    pub async fn create_order(&self, input: NewOrder, actor: Option<&Actor>) -> Result<Order, OrderError> {
        let mut order = Order::create(&input)?;
        let items: Vec<LineItem> = input
            .items
            .into_iter()
            .map(|draft| LineItem::new(order.id, draft))
            .collect();

        let mut batch = WriteBatch::new();
        batch.push(Write::InsertOrder(order.clone()));
        for item in &items {
            batch.push(Write::InsertItem(item.clone()));
        }
        let computed = self.calculator.stage(&order, &items, true, &mut batch)?.totals();
        order.subtotal = computed.subtotal;
        order.discount_total = computed.discount_total;
        batch.push(Write::StatusEntry(self.classifier.creation_entry(&order, actor)));
        self.commit(batch).await?;

        tracing::info!(
            order_id = %order.id,
            order_types = %order.order_types,
            item_count = items.len(),
            subtotal = %order.subtotal,
            "Order created"
        );

        if order.order_types.contains(OrderTypeTag::Products) {
            if let Err(e) = self.inventory.deduct_stock(order.id, &items).await {
                tracing::warn!(order_id = %order.id, error = %e, "Stock deduction failed");
            }
        }
        if order.contract_number.is_some() {
            self.dispatch_best_effort(Job::UploadContract { order_id: order.id }).await;
        }

        self.sync(SyncEvent::OrderChanged(order.id)).await;
        Ok(self.store.require_order(order.id).await?)
    }

    /// Apply a multi-field edit. Writes one status log entry per field that
    /// actually changed and, for a user edit, one modification entry. Only
    /// the changed columns are written.
    pub async fn update_fields(
        &self,
        order_id: Uuid,
        changes: &[FieldChange],
        actor: Option<&Actor>,
        note: &str,
    ) -> Result<Order, OrderError> {
        self.ensure_not_deleting(order_id)?;
        let before = self.load(order_id).await?;

        let mut after = before.clone();
        for change in changes {
            after.apply_change(change);
        }
        after.validate()?;

        let entries = self.classifier.classify_changes(&before, changes, actor);
        if entries.is_empty() {
            tracing::debug!(order_id = %order_id, "No tracked field changed");
            return Ok(before);
        }

        let changed: Vec<FieldChange> = changes
            .iter()
            .filter(|change| before.field_value(change.field()) != change.value())
            .cloned()
            .collect();

        let mut batch = WriteBatch::new();
        batch.push(Write::Fields { order_id, changes: changed });
        if let Some(actor) = actor {
            let modification = self.classifier.modification_entry(&before, &after, &entries, actor, note);
            batch.push(Write::Modification(modification));
        }
        let changed_fields = entries.len();
        for entry in entries {
            batch.push(Write::StatusEntry(entry));
        }
        self.commit(batch).await?;

        tracing::info!(
            order_id = %order_id,
            changed_fields,
            automatic = actor.is_none(),
            "Order fields updated"
        );

        let contract_changed = before.contract_number != after.contract_number;
        if contract_changed && after.contract_number.is_some() {
            self.dispatch_best_effort(Job::UploadContract { order_id }).await;
        }

        self.sync(SyncEvent::OrderChanged(order_id)).await;
        Ok(self.store.require_order(order_id).await?)
    }

    /// Manual status edit. A manually set `cancelled` is held against
    /// synchronization.
    pub async fn set_status(
        &self,
        order_id: Uuid,
        status: LifecycleStatus,
        actor: Option<&Actor>,
    ) -> Result<Order, OrderError> {
        self.update_fields(order_id, &[FieldChange::Status(status)], actor, "Status changed")
            .await
    }

    pub async fn change_order_types(
        &self,
        order_id: Uuid,
        tags: &[OrderTypeTag],
        actor: Option<&Actor>,
    ) -> Result<Order, OrderError> {
        self.ensure_not_deleting(order_id)?;
        let order_types = OrderTypes::new(tags.iter().copied())?;
        let before = self.load(order_id).await?;
        if before.order_types == order_types {
            return Ok(before);
        }

        let entry = StatusLogEntry::new(
            order_id,
            ChangeKind::General,
            before.order_types.to_string(),
            order_types.to_string(),
            format!("Order types changed from {} to {}", before.order_types, order_types),
            actor.cloned(),
        )
        .with_field("order_types");

        let mut batch = WriteBatch::new();
        batch.push(Write::OrderTypes { order_id, order_types });
        batch.push(Write::StatusEntry(entry));
        self.commit(batch).await?;

        self.sync(SyncEvent::OrderChanged(order_id)).await;
        Ok(self.store.require_order(order_id).await?)
    }

    // ========================================================================
    // Line items
    // ========================================================================

    pub async fn add_item(
        &self,
        order_id: Uuid,
        draft: LineItemDraft,
        actor: Option<&Actor>,
    ) -> Result<LineItem, OrderError> {
        self.ensure_not_deleting(order_id)?;
        draft.validate()?;
        let before = self.load(order_id).await?;
        let mut items = self.store.items(order_id).await?;

        let item = LineItem::new(order_id, draft);
        items.push(item.clone());

        let mut batch = WriteBatch::new();
        batch.push(Write::InsertItem(item.clone()));
        let pending = self.stage_totals(&before, &items, &mut batch)?;
        let entry = self
            .classifier
            .item_entry(&item, ItemChange::Added, before.subtotal, pending.subtotal, actor);
        batch.push(Write::StatusEntry(entry));
        self.commit(batch).await?;
        self.finish_totals(order_id, pending).await?;

        tracing::info!(order_id = %order_id, item_id = %item.id, product = %item.product_name, "Line item added");
        self.sync(SyncEvent::ItemsChanged(order_id)).await;
        Ok(item)
    }

    pub async fn update_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        draft: LineItemDraft,
        actor: Option<&Actor>,
    ) -> Result<LineItem, OrderError> {
        self.ensure_not_deleting(order_id)?;
        draft.validate()?;
        let before = self.load(order_id).await?;
        let mut items = self.store.items(order_id).await?;

        let item = items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or(OrderError::ItemNotFound { order_id, item_id })?;
        item.apply_draft(draft);
        let item = item.clone();

        let mut batch = WriteBatch::new();
        batch.push(Write::UpdateItem(item.clone()));
        let pending = self.stage_totals(&before, &items, &mut batch)?;
        let entry = self
            .classifier
            .item_entry(&item, ItemChange::Updated, before.subtotal, pending.subtotal, actor);
        batch.push(Write::StatusEntry(entry));
        self.commit(batch).await?;
        self.finish_totals(order_id, pending).await?;

        tracing::info!(order_id = %order_id, item_id = %item_id, "Line item updated");
        self.sync(SyncEvent::ItemsChanged(order_id)).await;
        Ok(item)
    }

    pub async fn remove_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        actor: Option<&Actor>,
    ) -> Result<LineItem, OrderError> {
        self.ensure_not_deleting(order_id)?;
        let before = self.load(order_id).await?;
        let mut items = self.store.items(order_id).await?;

        let index = items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or(OrderError::ItemNotFound { order_id, item_id })?;
        let item = items.remove(index);

        let mut batch = WriteBatch::new();
        batch.push(Write::DeleteItem { order_id, item_id });
        let pending = self.stage_totals(&before, &items, &mut batch)?;
        let entry = self
            .classifier
            .item_entry(&item, ItemChange::Removed, before.subtotal, pending.subtotal, actor);
        batch.push(Write::StatusEntry(entry));
        self.commit(batch).await?;
        self.finish_totals(order_id, pending).await?;

        tracing::info!(order_id = %order_id, item_id = %item_id, "Line item removed");
        self.sync(SyncEvent::ItemsChanged(order_id)).await;
        Ok(item)
    }

    /// Record cutting progress on one item. Totals are unaffected.
    pub async fn set_cutting_status(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        status: Option<CuttingStatus>,
        actor: Option<&Actor>,
    ) -> Result<LineItem, OrderError> {
        self.ensure_not_deleting(order_id)?;
        let mut item = self.find_item(order_id, item_id).await?;
        if item.cutting_status == status {
            return Ok(item);
        }

        let old = item.cutting_status.map(|s| s.as_str()).unwrap_or_default();
        let new = status.map(|s| s.as_str()).unwrap_or_default();
        item.cutting_status = status;

        let entry = StatusLogEntry::new(
            order_id,
            ChangeKind::Cutting,
            old,
            new,
            format!("Cutting of {} set to {}", item.product_name, if new.is_empty() { "(none)" } else { new }),
            actor.cloned(),
        )
        .with_field("cutting_status");

        let mut batch = WriteBatch::new();
        batch.push(Write::UpdateItem(item.clone()));
        batch.push(Write::StatusEntry(entry));
        self.commit(batch).await?;

        self.sync(SyncEvent::ItemsChanged(order_id)).await;
        Ok(item)
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Record a payment. `paid_amount` is re-summed from every payment.
    pub async fn record_payment(
        &self,
        order_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        reference: Option<String>,
        actor: Option<&Actor>,
    ) -> Result<Payment, OrderError> {
        if amount <= Decimal::ZERO {
            return Err(OrderError::InvalidPaymentAmount);
        }
        if amount > MAX_AMOUNT {
            return Err(OrderError::AmountOutOfRange);
        }
        self.ensure_not_deleting(order_id)?;
        let before = self.load(order_id).await?;
        let mut payments = self.store.payments(order_id).await?;

        let payment = Payment::new(order_id, amount, method, reference);
        payments.push(payment.clone());
        let paid_after = paid_total(&payments)?;

        let entry = self
            .classifier
            .payment_entry(&payment, false, before.paid_amount, paid_after, actor);
        let mut batch = WriteBatch::new();
        batch.push(Write::InsertPayment(payment.clone()));
        batch.push(Write::PaidAmount { order_id, paid_amount: paid_after });
        batch.push(Write::StatusEntry(entry));
        self.commit(batch).await?;

        tracing::info!(
            order_id = %order_id,
            payment_id = %payment.id,
            amount = %amount,
            paid_amount = %paid_after,
            "Payment recorded"
        );
        Ok(payment)
    }

    pub async fn remove_payment(
        &self,
        order_id: Uuid,
        payment_id: Uuid,
        actor: Option<&Actor>,
    ) -> Result<Payment, OrderError> {
        self.ensure_not_deleting(order_id)?;
        let before = self.load(order_id).await?;
        let mut payments = self.store.payments(order_id).await?;

        let index = payments
            .iter()
            .position(|payment| payment.id == payment_id)
            .ok_or(OrderError::PaymentNotFound { order_id, payment_id })?;
        let payment = payments.remove(index);
        let paid_after = paid_total(&payments)?;

        let entry = self
            .classifier
            .payment_entry(&payment, true, before.paid_amount, paid_after, actor);
        let mut batch = WriteBatch::new();
        batch.push(Write::DeletePayment { order_id, payment_id });
        batch.push(Write::PaidAmount { order_id, paid_amount: paid_after });
        batch.push(Write::StatusEntry(entry));
        self.commit(batch).await?;

        tracing::info!(order_id = %order_id, payment_id = %payment_id, paid_amount = %paid_after, "Payment removed");
        Ok(payment)
    }

    // ========================================================================
    // Totals
    // ========================================================================

    /// Recompute stored totals. With deferral enabled the job goes to the
    /// worker and `None` is returned; a failed dispatch runs inline.
    pub async fn recompute_totals(&self, order_id: Uuid, force: bool) -> Result<Option<RecomputeOutcome>, OrderError> {
        self.load(order_id).await?;
        if self.try_defer(Job::RecomputeTotals { order_id, force }).await {
            return Ok(None);
        }
        Ok(Some(self.calculator.recompute(order_id, force).await?))
    }

    fn defers_recompute(&self) -> bool {
        self.settings.defer_recompute && self.dispatcher.is_some()
    }

    /// Stage the totals write for an item change, or leave it to the worker
    /// when recomputation is deferred.
    fn stage_totals(
        &self,
        order: &Order,
        items: &[LineItem],
        batch: &mut WriteBatch,
    ) -> Result<PendingTotals, OrderError> {
        if self.defers_recompute() {
            let outcome = evaluate(order, items, false)?;
            return Ok(PendingTotals { subtotal: outcome.subtotal(), deferred: true });
        }
        let outcome = self.calculator.stage(order, items, false, batch)?;
        Ok(PendingTotals { subtotal: outcome.subtotal(), deferred: false })
    }

    /// Hand a deferred recompute to the worker once the item change is
    /// committed. A failed dispatch runs inline.
    async fn finish_totals(&self, order_id: Uuid, pending: PendingTotals) -> Result<(), OrderError> {
        if !pending.deferred || self.try_defer(Job::RecomputeTotals { order_id, force: false }).await {
            return Ok(());
        }
        self.calculator.recompute(order_id, false).await?;
        Ok(())
    }

    async fn try_defer(&self, job: Job) -> bool {
        if !self.settings.defer_recompute {
            return false;
        }
        let Some(dispatcher) = &self.dispatcher else {
            return false;
        };
        let order_id = job.order_id();
        match dispatcher.dispatch(job).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "Dispatch failed, recomputing inline");
                false
            }
        }
    }

    async fn dispatch_best_effort(&self, job: Job) {
        let Some(dispatcher) = &self.dispatcher else {
            tracing::debug!(order_id = %job.order_id(), job = job.kind(), "No worker configured, job skipped");
            return;
        };
        let order_id = job.order_id();
        let kind = job.kind();
        if let Err(e) = dispatcher.dispatch(job).await {
            tracing::warn!(order_id = %order_id, job = kind, error = %e, "Job dispatch failed");
        }
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Remove the order and every dependent row. Synchronization handlers
    /// skip the order while this runs.
    pub async fn delete_order(&self, order_id: Uuid, actor: Option<&Actor>) -> Result<DeletionReport, OrderError> {
        let actor = actor.ok_or(OrderError::DeletionRequiresActor)?;
        let _token = self
            .deletions
            .begin(order_id)
            .ok_or(OrderError::BeingDeleted(order_id))?;

        self.load(order_id).await?;
        let report = self.store.delete_order_cascade(order_id).await?;

        tracing::warn!(
            order_id = %order_id,
            actor_id = %actor.id,
            actor = %actor.name,
            items = report.items,
            payments = report.payments,
            status_entries = report.status_entries,
            modification_entries = report.modification_entries,
            "Order deleted"
        );
        Ok(report)
    }

    // ========================================================================
    // Subsystem events
    // ========================================================================

    /// Entry for inspection, installation and manufacturing changes made
    /// outside this service.
    pub async fn subsystem_changed(&self, event: SyncEvent) -> SyncReport {
        self.sync(event).await
    }

    async fn sync(&self, event: SyncEvent) -> SyncReport {
        let report = self.coordinator.dispatch(event).await;
        if report.failures > 0 {
            tracing::debug!(failures = report.failures, "Synchronization finished with failures");
        }
        report
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn current_status(&self, order_id: Uuid) -> Result<OrderStatusView, OrderError> {
        let order = self.load(order_id).await?;
        let items = self.store.items(order_id).await?;
        let snapshot = self.subsystems.snapshot(order_id).await?;

        let resolved = resolve(&order, &items, &snapshot);
        Ok(OrderStatusView {
            order_id,
            stored_status: order.status,
            badge: resolved.badge(),
            resolved,
        })
    }

    pub async fn history(&self, order_id: Uuid) -> Result<OrderHistory, OrderError> {
        self.load(order_id).await?;
        Ok(OrderHistory {
            status_log: self.store.status_entries(order_id).await?,
            modifications: self.store.modification_entries(order_id).await?,
        })
    }

    /// `final_payable − paid_amount`, computed on read.
    pub async fn remaining_balance(&self, order_id: Uuid) -> Result<Decimal, OrderError> {
        Ok(self.load(order_id).await?.remaining_balance())
    }

    pub async fn order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.load(order_id).await
    }

    /// Delete automatic status entries older than `retention`.
    pub async fn prune_automatic_audit(&self, retention: chrono::Duration) -> Result<u64, OrderError> {
        let cutoff = Utc::now() - retention;
        let pruned = self.store.prune_automatic(cutoff).await?;
        tracing::info!(pruned, cutoff = %cutoff, "Automatic audit entries pruned");
        Ok(pruned)
    }

    // ========================================================================
    // Command dispatch
    // ========================================================================

    pub async fn execute(
        &self,
        order_id: Uuid,
        command: OrderCommand,
        actor: Option<&Actor>,
    ) -> Result<CommandOutcome, OrderError> {
        match command {
            OrderCommand::UpdateFields { changes } => self
                .update_fields(order_id, &changes, actor, "Order edited")
                .await
                .map(CommandOutcome::Order),
            OrderCommand::ChangeOrderTypes { order_types } => self
                .change_order_types(order_id, &order_types, actor)
                .await
                .map(CommandOutcome::Order),
            OrderCommand::AddItem { draft } => self.add_item(order_id, draft, actor).await.map(CommandOutcome::Item),
            OrderCommand::UpdateItem { item_id, draft } => self
                .update_item(order_id, item_id, draft, actor)
                .await
                .map(CommandOutcome::Item),
            OrderCommand::RemoveItem { item_id } => {
                self.remove_item(order_id, item_id, actor).await.map(CommandOutcome::Item)
            }
            OrderCommand::SetCuttingStatus { item_id, status } => self
                .set_cutting_status(order_id, item_id, status, actor)
                .await
                .map(CommandOutcome::Item),
            OrderCommand::RecordPayment { amount, method, reference } => self
                .record_payment(order_id, amount, method, reference, actor)
                .await
                .map(CommandOutcome::Payment),
            OrderCommand::RemovePayment { payment_id } => self
                .remove_payment(order_id, payment_id, actor)
                .await
                .map(CommandOutcome::Payment),
            OrderCommand::RecomputeTotals { force } => {
                self.recompute_totals(order_id, force).await.map(CommandOutcome::Totals)
            }
            OrderCommand::DeleteOrder => self.delete_order(order_id, actor).await.map(CommandOutcome::Deleted),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.store.order(order_id).await?.ok_or(OrderError::NotFound(order_id))
    }

    async fn find_item(&self, order_id: Uuid, item_id: Uuid) -> Result<LineItem, OrderError> {
        self.store
            .items(order_id)
            .await?
            .into_iter()
            .find(|item| item.id == item_id)
            .ok_or(OrderError::ItemNotFound { order_id, item_id })
    }

    fn ensure_not_deleting(&self, order_id: Uuid) -> Result<(), OrderError> {
        if self.deletions.is_deleting(order_id) {
            return Err(OrderError::BeingDeleted(order_id));
        }
        Ok(())
    }

    /// Commit `batch` as one unit, then count the audit rows it carried.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let audited: Vec<(&'static str, bool)> = batch
            .status_entries()
            .map(|entry| (entry.kind.as_str(), entry.is_automatic))
            .collect();
        self.store.commit(batch).await?;
        for (kind, automatic) in audited {
            self.metrics.record_audit_entry(kind, automatic);
        }
        Ok(())
    }
}

/// Subtotal an item change leaves the order with, and whether the write is
/// still owed by the worker.
#[derive(Debug, Clone, Copy)]
struct PendingTotals {
    subtotal: Decimal,
    deferred: bool,
}

// ============================================================================
// Unit Tests
// ============================================================================
