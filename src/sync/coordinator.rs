use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use super::event::SyncEvent;
use super::guard::{DeletionGuard, SyncContext};
use crate::audit::{ChangeClassifier, ChangeKind, StatusLogEntry};
use crate::domain::order::{LifecycleStatus, Order};
use crate::domain::subsystems::{ManufacturingView, StatusSource, SubsystemGateway, SubsystemSnapshot};
use crate::metrics::Metrics;
use crate::status::{resolve, ResolvedStatus};
use crate::store::{OrderStore, StoreError, SyncFields};

/// What one coordinator request did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub passes: usize,
    pub writes: usize,
    pub unchanged: usize,
    pub suppressed: usize,
    pub deduplicated: usize,
    pub skipped: usize,
    pub failures: usize,
}

impl SyncReport {
    pub fn converged(&self) -> bool {
        self.writes == 0 && self.failures == 0
    }
}

fn audit_kind(source: StatusSource) -> ChangeKind {
    match source {
        StatusSource::Cutting => ChangeKind::Cutting,
        StatusSource::Manufacturing => ChangeKind::Manufacturing,
        StatusSource::Inspection => ChangeKind::Inspection,
        StatusSource::Installation => ChangeKind::Installation,
        StatusSource::OrderOwn => ChangeKind::Status,
    }
}

/// Sync-owned fields that differ from what the order stores. A status the
/// order holds is kept; any other status follows the resolver, including a
/// subsystem-derived `cancelled` that the subsystem has since left.
fn target_fields(order: &Order, resolved: &ResolvedStatus, snapshot: &SubsystemSnapshot) -> SyncFields {
    let mut fields = SyncFields::default();

    let status = if order.holds_status() { order.status } else { resolved.status };
    if status != order.status {
        fields.status = Some(status);
    }

    let inspection = snapshot.inspection.as_ref().map(|i| i.status);
    if inspection != order.inspection_status {
        fields.inspection_status = Some(inspection);
    }

    let installation = snapshot.installation.as_ref().map(|i| i.status);
    if installation != order.installation_status {
        fields.installation_status = Some(installation);
    }

    let fully_completed = status.is_finished();
    if fully_completed != order.is_fully_completed {
        fields.is_fully_completed = Some(fully_completed);
    }

    fields
}

// ============================================================================
// Synchronization Coordinator
// ============================================================================

pub struct SyncCoordinator {
    store: Arc<dyn OrderStore>,
    subsystems: Arc<dyn SubsystemGateway>,
    classifier: ChangeClassifier,
    deletions: DeletionGuard,
    metrics: Arc<Metrics>,
    max_passes: usize,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        subsystems: Arc<dyn SubsystemGateway>,
        classifier: ChangeClassifier,
        deletions: DeletionGuard,
        metrics: Arc<Metrics>,
        max_passes: usize,
    ) -> Self {
        Self {
            store,
            subsystems,
            classifier,
            deletions,
            metrics,
            max_passes: max_passes.max(1),
        }
    }

    /// Handle `event` and every follow-up it raises. Never fails; problems
    /// are logged and counted in the report.
    pub async fn dispatch(&self, event: SyncEvent) -> SyncReport {
        let mut ctx = SyncContext::new(event);
        let mut report = SyncReport::default();

        while let Some(event) = ctx.next_event() {
            if report.passes >= self.max_passes {
                tracing::error!(
                    order_id = %event.order_id(),
                    max_passes = self.max_passes,
                    "Synchronization did not settle within the pass limit"
                );
                self.metrics.record_sync_skipped("pass_limit");
                report.skipped += 1;
                break;
            }
            report.passes += 1;

            let started = Instant::now();
            if let Err(e) = self.handle(&mut ctx, &event, &mut report).await {
                tracing::error!(
                    order_id = %event.order_id(),
                    event = event.kind(),
                    error = %e,
                    "Synchronization handler failed"
                );
                self.metrics.record_sync_failure(event.kind());
                report.failures += 1;
            }
            self.metrics
                .record_sync_run(event.kind(), started.elapsed().as_secs_f64());
        }

        report.suppressed = ctx.suppressed();
        report.deduplicated = ctx.deduplicated();
        tracing::debug!(?report, "Synchronization finished");
        report
    }

    async fn handle(
        &self,
        ctx: &mut SyncContext,
        event: &SyncEvent,
        report: &mut SyncReport,
    ) -> Result<(), StoreError> {
        let order_id = event.order_id();
        if self.deletions.is_deleting(order_id) {
            tracing::debug!(order_id = %order_id, event = event.kind(), "Order is being deleted, skipping");
            self.metrics.record_sync_skipped("being_deleted");
            report.skipped += 1;
            return Ok(());
        }

        let Some(order) = self.store.order(order_id).await? else {
            tracing::debug!(order_id = %order_id, event = event.kind(), "Order no longer exists, skipping");
            self.metrics.record_sync_skipped("order_missing");
            report.skipped += 1;
            return Ok(());
        };

        match event {
            SyncEvent::OrderChanged(_) => {
                self.push_delivery_date(ctx, &order, report).await?;
                self.ensure_manufacturing(ctx, &order).await?;
                self.reconcile(ctx, order_id, report).await
            }
            SyncEvent::ManufacturingChanged(_) => {
                self.pull_delivery_date(ctx, &order, report).await?;
                self.reconcile(ctx, order_id, report).await
            }
            SyncEvent::ItemsChanged(_)
            | SyncEvent::InspectionChanged(_)
            | SyncEvent::InstallationChanged(_) => self.reconcile(ctx, order_id, report).await,
            SyncEvent::ManufacturingDeleted { snapshot, .. } => {
                self.record_manufacturing_deleted(ctx, &order, snapshot, report).await
            }
        }
    }

    /// Resolve, compare and write back only the sync-owned fields that differ.
    async fn reconcile(
        &self,
        ctx: &mut SyncContext,
        order_id: Uuid,
        report: &mut SyncReport,
    ) -> Result<(), StoreError> {
        let order = self.store.require_order(order_id).await?;
        let items = self.store.items(order_id).await?;
        let snapshot = self.subsystems.snapshot(order_id).await?;

        let resolved = resolve(&order, &items, &snapshot);
        if let Some(warning) = resolved.warning {
            tracing::warn!(
                order_id = %order_id,
                order_types = %order.order_types,
                warning = %warning,
                "Integrity warning, falling back"
            );
        }

        let target = target_fields(&order, &resolved, &snapshot);
        if target.is_empty() {
            tracing::debug!(order_id = %order_id, status = %order.status, "Order already in sync");
            report.unchanged += 1;
            return Ok(());
        }

        {
            let mut scope = ctx.write_scope();
            self.store.write_sync_fields(order_id, &target).await?;
            scope.emit(SyncEvent::OrderChanged(order_id));
        }
        report.writes += 1;

        if let Some(status) = target.status {
            tracing::info!(
                order_id = %order_id,
                from = %order.status,
                to = %status,
                source = ?resolved.source,
                subsystem_status = %resolved.subsystem_status,
                "Order status synchronized"
            );
            self.metrics.record_status_writeback(resolved.source.as_str());

            let entry = self.classifier.system_entry(
                order_id,
                audit_kind(resolved.source),
                order.status.as_str(),
                status.as_str(),
                format!(
                    "Status follows {} ({})",
                    resolved.source,
                    resolved.subsystem_status.as_str()
                ),
            );
            self.append(&entry).await?;
        }
        Ok(())
    }

    /// Order side wins: copy the expected delivery date to manufacturing.
    async fn push_delivery_date(
        &self,
        ctx: &mut SyncContext,
        order: &Order,
        report: &mut SyncReport,
    ) -> Result<(), StoreError> {
        let Some(manufacturing) = self.subsystems.manufacturing(order.id).await? else {
            return Ok(());
        };
        if manufacturing.delivery_date == order.expected_delivery {
            return Ok(());
        }

        {
            let mut scope = ctx.write_scope();
            self.subsystems
                .set_manufacturing_delivery_date(order.id, order.expected_delivery)
                .await?;
            scope.emit(SyncEvent::ManufacturingChanged(order.id));
        }
        report.writes += 1;
        tracing::info!(
            order_id = %order.id,
            delivery_date = ?order.expected_delivery,
            "Manufacturing delivery date updated from order"
        );
        Ok(())
    }

    /// Manufacturing side wins: copy its delivery date to the order.
    async fn pull_delivery_date(
        &self,
        ctx: &mut SyncContext,
        order: &Order,
        report: &mut SyncReport,
    ) -> Result<(), StoreError> {
        let Some(manufacturing) = self.subsystems.manufacturing(order.id).await? else {
            return Ok(());
        };
        if manufacturing.delivery_date == order.expected_delivery {
            return Ok(());
        }

        {
            let mut scope = ctx.write_scope();
            self.store
                .write_expected_delivery(order.id, manufacturing.delivery_date)
                .await?;
            scope.emit(SyncEvent::OrderChanged(order.id));
        }
        report.writes += 1;

        let format_date = |date: Option<chrono::NaiveDate>| date.map(|d| d.to_string()).unwrap_or_default();
        let entry = self.classifier.system_entry(
            order.id,
            ChangeKind::Date,
            format_date(order.expected_delivery),
            format_date(manufacturing.delivery_date),
            "Expected delivery follows manufacturing delivery date",
        );
        self.append(&entry.with_field("expected_delivery")).await?;
        tracing::info!(
            order_id = %order.id,
            delivery_date = ?manufacturing.delivery_date,
            "Order expected delivery updated from manufacturing"
        );
        Ok(())
    }

    /// Create the manufacturing order once, when the tags call for one.
    async fn ensure_manufacturing(&self, ctx: &mut SyncContext, order: &Order) -> Result<(), StoreError> {
        let Some(kind) = order.order_types.manufacturing_kind() else {
            return Ok(());
        };
        if order.holds_status() {
            return Ok(());
        }

        let (view, created) = self
            .subsystems
            .ensure_manufacturing(order.id, kind, order.expected_delivery)
            .await?;
        if !created {
            return Ok(());
        }

        tracing::info!(
            order_id = %order.id,
            manufacturing_id = %view.id,
            order_type = %kind,
            "Manufacturing order created"
        );
        let entry = self.classifier.system_entry(
            order.id,
            ChangeKind::Manufacturing,
            "",
            view.status.as_str(),
            format!("Manufacturing order created for {kind}"),
        );
        self.append(&entry).await?;
        ctx.emit(SyncEvent::ManufacturingChanged(order.id));
        Ok(())
    }

    async fn record_manufacturing_deleted(
        &self,
        ctx: &mut SyncContext,
        order: &Order,
        snapshot: &ManufacturingView,
        report: &mut SyncReport,
    ) -> Result<(), StoreError> {
        let last_known = serde_json::to_string(snapshot)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));

        let mut fields = SyncFields::default();
        if !order.holds_status() {
            fields.status = Some(LifecycleStatus::ManufacturingDeleted);
        }
        if order.is_fully_completed {
            fields.is_fully_completed = Some(false);
        }

        if fields.is_empty() {
            report.unchanged += 1;
        } else {
            let mut scope = ctx.write_scope();
            self.store.write_sync_fields(order.id, &fields).await?;
            scope.emit(SyncEvent::OrderChanged(order.id));
            drop(scope);
            report.writes += 1;
            self.metrics.record_status_writeback(StatusSource::Manufacturing.as_str());
        }

        let new_status = fields.status.unwrap_or(order.status);
        tracing::warn!(
            order_id = %order.id,
            manufacturing_id = %snapshot.id,
            from = %order.status,
            to = %new_status,
            "Manufacturing order deleted"
        );
        let entry = self
            .classifier
            .system_entry(
                order.id,
                ChangeKind::Manufacturing,
                order.status.as_str(),
                new_status.as_str(),
                format!("Manufacturing order deleted. Last known state: {last_known}"),
            )
            .with_field("status");
        self.append(&entry).await
    }

    async fn append(&self, entry: &StatusLogEntry) -> Result<(), StoreError> {
        self.store.append_status_entry(entry).await?;
        self.metrics
            .record_audit_entry(entry.kind.as_str(), entry.is_automatic);
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{FieldChange, LineItem, LineItemDraft, NewOrder, OrderTypeTag};
    use crate::domain::subsystems::{CuttingStatus, InspectionStatus, InstallationStatus, ManufacturingStatus};
    use crate::integrations::StaticDirectory;
    use crate::store::{AuditLog, InMemoryStore};
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    struct Harness {
        store: Arc<InMemoryStore>,
        coordinator: SyncCoordinator,
        deletions: DeletionGuard,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let deletions = DeletionGuard::new();
        let coordinator = SyncCoordinator::new(
            store.clone(),
            store.clone(),
            ChangeClassifier::new(Arc::new(StaticDirectory::new())),
            deletions.clone(),
            Arc::new(Metrics::new().unwrap()),
            8,
        );
        Harness { store, coordinator, deletions }
    }

    async fn insert(h: &Harness, input: NewOrder) -> Order {
        let order = Order::create(&input).unwrap();
        h.store.insert_order(&order).await.unwrap();
        order
    }

    #[tokio::test]
    async fn test_order_changed_creates_manufacturing_once() {
        let h = harness();
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Tailoring]).with_expected_delivery(date)).await;

        let report = h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        assert_eq!(report.failures, 0);
        assert_eq!(report.passes, 2);

        let manufacturing = h.store.manufacturing(order.id).await.unwrap().unwrap();
        assert_eq!(manufacturing.delivery_date, Some(date));
        assert_eq!(manufacturing.order_type, OrderTypeTag::Tailoring);

        let again = h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        assert!(again.converged());
        let created: Vec<_> = h
            .store
            .status_entries(order.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.note.starts_with("Manufacturing order created"))
            .collect();
        assert_eq!(created.len(), 1);
    }

    #[tokio::test]
    async fn test_products_order_gets_no_manufacturing() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Products, OrderTypeTag::Inspection])).await;
        h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        assert!(h.store.manufacturing(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_written_once_with_one_audit_entry() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Installation])).await;
        h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        h.store
            .set_manufacturing_status(order.id, ManufacturingStatus::InProgress)
            .await
            .unwrap();

        let report = h.coordinator.dispatch(SyncEvent::ManufacturingChanged(order.id)).await;
        assert_eq!(report.writes, 1);
        assert_eq!(report.suppressed, 1);

        let stored = h.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.status, LifecycleStatus::InProgress);

        let entries: Vec<_> = h
            .store
            .status_entries(order.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == ChangeKind::Manufacturing && e.new_value == "in_progress")
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_automatic);

        let repeat = h.coordinator.dispatch(SyncEvent::ManufacturingChanged(order.id)).await;
        assert!(repeat.converged());
        assert_eq!(repeat.unchanged, 1);
    }

    #[tokio::test]
    async fn test_installation_takes_over_and_completes() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Installation])).await;
        h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        h.store
            .set_manufacturing_status(order.id, ManufacturingStatus::ReadyInstall)
            .await
            .unwrap();
        h.store
            .put_installation(order.id, InstallationStatus::Scheduled, NaiveDate::from_ymd_opt(2025, 7, 2))
            .await;
        h.coordinator.dispatch(SyncEvent::InstallationChanged(order.id)).await;

        let stored = h.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.status, LifecycleStatus::ReadyInstall);
        assert_eq!(stored.installation_status, Some(InstallationStatus::Scheduled));
        assert!(!stored.is_fully_completed);

        h.store.put_installation(order.id, InstallationStatus::Completed, None).await;
        h.coordinator.dispatch(SyncEvent::InstallationChanged(order.id)).await;
        let stored = h.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.status, LifecycleStatus::Completed);
        assert!(stored.is_fully_completed);
    }

    #[tokio::test]
    async fn test_inspection_mirror_follows_record() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Inspection])).await;
        h.store.put_inspection(order.id, InspectionStatus::Scheduled).await;
        h.coordinator.dispatch(SyncEvent::InspectionChanged(order.id)).await;

        let stored = h.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.inspection_status, Some(InspectionStatus::Scheduled));
        assert_eq!(stored.status, LifecycleStatus::InProgress);
    }

    #[tokio::test]
    async fn test_missing_inspection_keeps_own_status() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Inspection])).await;
        let report = h.coordinator.dispatch(SyncEvent::InspectionChanged(order.id)).await;
        assert_eq!(report.failures, 0);
        assert_eq!(report.unchanged, 1);
        assert_eq!(h.store.require_order(order.id).await.unwrap().status, order.status);
    }

    #[tokio::test]
    async fn test_cutting_item_drives_products_status() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Products])).await;
        let mut item = LineItem::new(
            order.id,
            LineItemDraft::new(Uuid::new_v4(), "Linen", Decimal::ONE, Decimal::ONE_HUNDRED, Decimal::ZERO),
        );
        item.cutting_status = Some(CuttingStatus::PartiallyCompleted);
        h.store.insert_item(&item).await.unwrap();

        h.coordinator.dispatch(SyncEvent::ItemsChanged(order.id)).await;
        let entries = h.store.status_entries(order.id).await.unwrap();
        assert_eq!(h.store.require_order(order.id).await.unwrap().status, LifecycleStatus::InProgress);
        assert_eq!(entries.last().map(|e| e.kind), Some(ChangeKind::Cutting));
    }

    #[tokio::test]
    async fn test_manufacturing_date_pulled_into_order() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Tailoring])).await;
        h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;

        let date = NaiveDate::from_ymd_opt(2025, 9, 15);
        h.store.set_manufacturing_delivery_date(order.id, date).await.unwrap();
        let report = h.coordinator.dispatch(SyncEvent::ManufacturingChanged(order.id)).await;

        assert_eq!(h.store.require_order(order.id).await.unwrap().expected_delivery, date);
        assert!(report.suppressed >= 1);
        let date_entries = h
            .store
            .status_entries(order.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == ChangeKind::Date)
            .count();
        assert_eq!(date_entries, 1);

        let settled = h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        assert!(settled.converged());
    }

    #[tokio::test]
    async fn test_manufacturing_deleted_is_terminal_with_snapshot() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Tailoring])).await;
        h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        let snapshot = h.store.remove_manufacturing(order.id).await.unwrap();

        h.coordinator
            .dispatch(SyncEvent::ManufacturingDeleted { order_id: order.id, snapshot: snapshot.clone() })
            .await;

        let stored = h.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.status, LifecycleStatus::ManufacturingDeleted);
        let last = h.store.status_entries(order.id).await.unwrap().pop().unwrap();
        assert!(last.note.contains(&snapshot.id.to_string()));

        // Terminal: no manufacturing order is recreated and the status sticks.
        let report = h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        assert!(report.converged());
        assert!(h.store.manufacturing(order.id).await.unwrap().is_none());
        assert_eq!(
            h.store.require_order(order.id).await.unwrap().status,
            LifecycleStatus::ManufacturingDeleted
        );
    }

    #[tokio::test]
    async fn test_subsystem_leaving_cancelled_moves_order_on() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Tailoring])).await;
        h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;

        h.store
            .set_manufacturing_status(order.id, ManufacturingStatus::Cancelled)
            .await
            .unwrap();
        h.coordinator.dispatch(SyncEvent::ManufacturingChanged(order.id)).await;
        let stored = h.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.status, LifecycleStatus::Cancelled);
        assert!(!stored.holds_status());

        h.store
            .set_manufacturing_status(order.id, ManufacturingStatus::InProgress)
            .await
            .unwrap();
        let report = h.coordinator.dispatch(SyncEvent::ManufacturingChanged(order.id)).await;
        assert_eq!(report.failures, 0);
        assert_eq!(h.store.require_order(order.id).await.unwrap().status, LifecycleStatus::InProgress);

        let reopened = h
            .store
            .status_entries(order.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.old_value == "cancelled" && e.new_value == "in_progress")
            .count();
        assert_eq!(reopened, 1);
    }

    #[tokio::test]
    async fn test_user_cancellation_survives_subsystem_changes() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Tailoring])).await;
        h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;

        h.store
            .write_fields(order.id, &[FieldChange::Status(LifecycleStatus::Cancelled)])
            .await
            .unwrap();
        h.store
            .set_manufacturing_status(order.id, ManufacturingStatus::InProgress)
            .await
            .unwrap();
        let report = h.coordinator.dispatch(SyncEvent::ManufacturingChanged(order.id)).await;

        assert!(report.converged());
        let stored = h.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.status, LifecycleStatus::Cancelled);
        assert!(stored.holds_status());
    }

    #[tokio::test]
    async fn test_sync_write_survives_a_later_field_edit() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Tailoring])).await;
        h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        let loaded_by_user = h.store.require_order(order.id).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 11, 3);
        h.store
            .set_manufacturing_status(order.id, ManufacturingStatus::InProgress)
            .await
            .unwrap();
        h.store.set_manufacturing_delivery_date(order.id, date).await.unwrap();
        h.coordinator.dispatch(SyncEvent::ManufacturingChanged(order.id)).await;

        // The edit was prepared from the snapshot taken before the sync landed.
        assert_eq!(loaded_by_user.status, LifecycleStatus::Pending);
        h.store
            .write_fields(order.id, &[FieldChange::Notes(Some("customer called".to_string()))])
            .await
            .unwrap();

        let stored = h.store.require_order(order.id).await.unwrap();
        assert_eq!(stored.status, LifecycleStatus::InProgress);
        assert_eq!(stored.expected_delivery, date);
        assert_eq!(stored.notes.as_deref(), Some("customer called"));

        let report = h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        assert!(report.converged());
        assert_eq!(h.store.manufacturing(order.id).await.unwrap().unwrap().delivery_date, date);
    }

    #[tokio::test]
    async fn test_order_being_deleted_is_skipped() {
        let h = harness();
        let order = insert(&h, NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Tailoring])).await;
        let _token = h.deletions.begin(order.id).unwrap();

        let report = h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        assert_eq!(report.skipped, 1);
        assert!(h.store.manufacturing(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_order_is_skipped_not_failed() {
        let h = harness();
        let report = h.coordinator.dispatch(SyncEvent::InspectionChanged(Uuid::new_v4())).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures, 0);
    }

    struct UnreachableSubsystems;

    #[async_trait::async_trait]
    impl SubsystemGateway for UnreachableSubsystems {
        async fn inspection(&self, _: Uuid) -> Result<Option<crate::domain::subsystems::InspectionView>, StoreError> {
            Err(StoreError::Corrupt("inspection service unreachable".to_string()))
        }

        async fn installation(&self, _: Uuid) -> Result<Option<crate::domain::subsystems::InstallationView>, StoreError> {
            Err(StoreError::Corrupt("installation service unreachable".to_string()))
        }

        async fn manufacturing(&self, _: Uuid) -> Result<Option<ManufacturingView>, StoreError> {
            Err(StoreError::Corrupt("manufacturing service unreachable".to_string()))
        }

        async fn ensure_manufacturing(
            &self,
            _: Uuid,
            _: OrderTypeTag,
            _: Option<NaiveDate>,
        ) -> Result<(ManufacturingView, bool), StoreError> {
            Err(StoreError::Corrupt("manufacturing service unreachable".to_string()))
        }

        async fn set_manufacturing_delivery_date(&self, _: Uuid, _: Option<NaiveDate>) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("manufacturing service unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_handler_failure_is_swallowed() {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Arc::new(UnreachableSubsystems),
            ChangeClassifier::new(Arc::new(StaticDirectory::new())),
            DeletionGuard::new(),
            metrics.clone(),
            8,
        );
        let order = Order::create(&NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Installation])).unwrap();
        store.insert_order(&order).await.unwrap();

        let report = coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
        assert_eq!(report.failures, 1);
        assert_eq!(metrics.sync_failures.with_label_values(&["order_changed"]).get(), 1);
        assert_eq!(store.require_order(order.id).await.unwrap().status, order.status);
    }

    #[derive(Debug, Clone)]
    enum Change {
        Manufacturing(usize),
        Installation(usize),
        Inspection(usize),
    }

    fn change_strategy() -> impl Strategy<Value = Change> {
        prop_oneof![
            (0..ManufacturingStatus::ALL.len()).prop_map(Change::Manufacturing),
            (0..InstallationStatus::ALL.len()).prop_map(Change::Installation),
            (0..InspectionStatus::ALL.len()).prop_map(Change::Inspection),
        ]
    }

    fn tags_strategy() -> impl Strategy<Value = Vec<OrderTypeTag>> {
        prop::sample::subsequence(
            vec![
                OrderTypeTag::Inspection,
                OrderTypeTag::Installation,
                OrderTypeTag::Tailoring,
                OrderTypeTag::Accessory,
                OrderTypeTag::Products,
            ],
            1..=3,
        )
    }

    proptest! {
        #[test]
        fn prop_coordinator_converges_to_resolved_status(
            tags in tags_strategy(),
            changes in prop::collection::vec(change_strategy(), 0..12),
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let h = harness();
                let order = insert(&h, NewOrder::new(Uuid::new_v4(), tags)).await;
                h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;

                for change in changes {
                    let event = match change {
                        Change::Manufacturing(i) => {
                            if h.store.manufacturing(order.id).await.unwrap().is_none() {
                                continue;
                            }
                            h.store
                                .set_manufacturing_status(order.id, ManufacturingStatus::ALL[i])
                                .await
                                .unwrap();
                            SyncEvent::ManufacturingChanged(order.id)
                        }
                        Change::Installation(i) => {
                            h.store.put_installation(order.id, InstallationStatus::ALL[i], None).await;
                            SyncEvent::InstallationChanged(order.id)
                        }
                        Change::Inspection(i) => {
                            h.store.put_inspection(order.id, InspectionStatus::ALL[i]).await;
                            SyncEvent::InspectionChanged(order.id)
                        }
                    };
                    let report = h.coordinator.dispatch(event).await;
                    assert_eq!(report.failures, 0);
                    assert!(report.passes <= 8);
                }

                // A second pass over a settled order writes nothing.
                let writes_before = h.store.sync_writes();
                let report = h.coordinator.dispatch(SyncEvent::OrderChanged(order.id)).await;
                assert!(report.converged(), "{report:?}");
                assert_eq!(h.store.sync_writes(), writes_before);

                let stored = h.store.require_order(order.id).await.unwrap();
                let items = h.store.items(order.id).await.unwrap();
                let snapshot = h.store.snapshot(order.id).await.unwrap();
                let resolved = resolve(&stored, &items, &snapshot);
                assert_eq!(stored.status, resolved.status);
                assert_eq!(stored.is_fully_completed, stored.status.is_finished());
            });
        }
    }
}
