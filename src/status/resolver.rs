use std::fmt;

use serde::Serialize;

use crate::domain::order::{LifecycleStatus, LineItem, Order, OrderTypeTag};
use crate::domain::subsystems::{CuttingStatus, StatusSource, SubsystemSnapshot, SubsystemStatus};

/// A linked record the order's tags call for is missing. Logged, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityWarning {
    MissingInspection,
    MissingInstallation,
    MissingManufacturing,
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityWarning::MissingInspection => f.write_str("inspection record missing"),
            IntegrityWarning::MissingInstallation => f.write_str("installation record missing"),
            IntegrityWarning::MissingManufacturing => f.write_str("manufacturing order missing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedStatus {
    /// Lifecycle status implied by the authoritative subsystem.
    pub status: LifecycleStatus,
    pub source: StatusSource,
    pub subsystem_status: SubsystemStatus,
    pub warning: Option<IntegrityWarning>,
}

impl ResolvedStatus {
    fn from_subsystem(subsystem_status: SubsystemStatus) -> Self {
        Self {
            status: subsystem_status.lifecycle(),
            source: subsystem_status.source(),
            subsystem_status,
            warning: None,
        }
    }

    fn own(order: &Order) -> Self {
        Self::from_subsystem(SubsystemStatus::OrderOwn(order.status))
    }

    fn with_warning(mut self, warning: IntegrityWarning) -> Self {
        self.warning = Some(warning);
        self
    }
}

/// Cutting status of the furthest-along active item that is mid-cutting.
fn active_cutting(items: &[LineItem]) -> Option<CuttingStatus> {
    let mut partial = None;
    for status in items.iter().filter(|i| i.is_mid_cutting()).filter_map(|i| i.cutting_status) {
        if status == CuttingStatus::InProgress {
            return Some(status);
        }
        partial = Some(status);
    }
    partial
}

/// Resolve the authoritative status of `order`. First matching rule wins:
///
/// 1. `products`: an active cutting status, else manufacturing, else own.
/// 2. `inspection`: the inspection record, else own.
/// 3. `installation`: manufacturing until it hands over, then installation.
/// 4. `tailoring`: manufacturing, else own.
/// 5. Otherwise the order's own status.
pub fn resolve(order: &Order, items: &[LineItem], snapshot: &SubsystemSnapshot) -> ResolvedStatus {
    let types = &order.order_types;

    if types.contains(OrderTypeTag::Products) {
        if let Some(cutting) = active_cutting(items) {
            return ResolvedStatus::from_subsystem(SubsystemStatus::Cutting(cutting));
        }
        return match &snapshot.manufacturing {
            Some(manufacturing) => ResolvedStatus::from_subsystem(SubsystemStatus::Manufacturing(manufacturing.status)),
            None => ResolvedStatus::own(order),
        };
    }

    if types.contains(OrderTypeTag::Inspection) {
        return match &snapshot.inspection {
            Some(inspection) => ResolvedStatus::from_subsystem(SubsystemStatus::Inspection(inspection.status)),
            None => ResolvedStatus::own(order).with_warning(IntegrityWarning::MissingInspection),
        };
    }

    if types.contains(OrderTypeTag::Installation) {
        return match (&snapshot.manufacturing, &snapshot.installation) {
            (Some(manufacturing), _) if !manufacturing.status.hands_over_to_installation() => {
                ResolvedStatus::from_subsystem(SubsystemStatus::Manufacturing(manufacturing.status))
            }
            (_, Some(installation)) => {
                ResolvedStatus::from_subsystem(SubsystemStatus::Installation(installation.status))
            }
            (Some(manufacturing), None) => {
                ResolvedStatus::from_subsystem(SubsystemStatus::Manufacturing(manufacturing.status))
                    .with_warning(IntegrityWarning::MissingInstallation)
            }
            (None, None) => ResolvedStatus::own(order).with_warning(IntegrityWarning::MissingManufacturing),
        };
    }

    if types.contains(OrderTypeTag::Tailoring) {
        return match &snapshot.manufacturing {
            Some(manufacturing) => ResolvedStatus::from_subsystem(SubsystemStatus::Manufacturing(manufacturing.status)),
            None => ResolvedStatus::own(order).with_warning(IntegrityWarning::MissingManufacturing),
        };
    }

    ResolvedStatus::own(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{LineItemDraft, NewOrder};
    use crate::domain::subsystems::{
        InspectionStatus, InspectionView, InstallationStatus, InstallationView, ManufacturingStatus,
        ManufacturingView,
    };
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn order(tags: Vec<OrderTypeTag>) -> Order {
        Order::create(&NewOrder::new(Uuid::new_v4(), tags)).unwrap()
    }

    fn manufacturing(order: &Order, status: ManufacturingStatus) -> ManufacturingView {
        let mut view = ManufacturingView::new(order.id, OrderTypeTag::Installation, None);
        view.status = status;
        view
    }

    fn installation(order: &Order, status: InstallationStatus) -> InstallationView {
        InstallationView {
            id: Uuid::new_v4(),
            order_id: order.id,
            status,
            scheduled_date: None,
            completed_at: None,
        }
    }

    fn cutting_item(order: &Order, status: Option<CuttingStatus>) -> LineItem {
        let mut item = LineItem::new(
            order.id,
            LineItemDraft::new(Uuid::new_v4(), "Velvet", Decimal::ONE, Decimal::TEN, Decimal::ZERO),
        );
        item.cutting_status = status;
        item
    }

    #[test]
    fn test_installation_switches_authority_at_ready_install() {
        let order = order(vec![OrderTypeTag::Installation]);
        let mut snapshot = SubsystemSnapshot {
            manufacturing: Some(manufacturing(&order, ManufacturingStatus::InProgress)),
            installation: Some(installation(&order, InstallationStatus::NeedsScheduling)),
            inspection: None,
        };

        let resolved = resolve(&order, &[], &snapshot);
        assert_eq!(resolved.source, StatusSource::Manufacturing);
        assert_eq!(resolved.status, LifecycleStatus::InProgress);

        snapshot.manufacturing = Some(manufacturing(&order, ManufacturingStatus::ReadyInstall));
        let resolved = resolve(&order, &[], &snapshot);
        assert_eq!(resolved.source, StatusSource::Installation);
        assert_eq!(
            resolved.subsystem_status,
            SubsystemStatus::Installation(InstallationStatus::NeedsScheduling)
        );
        assert_eq!(resolved.warning, None);
    }

    #[test]
    fn test_installation_handover_without_schedule_warns() {
        let order = order(vec![OrderTypeTag::Installation]);
        let snapshot = SubsystemSnapshot {
            manufacturing: Some(manufacturing(&order, ManufacturingStatus::Completed)),
            ..SubsystemSnapshot::default()
        };
        let resolved = resolve(&order, &[], &snapshot);
        assert_eq!(resolved.source, StatusSource::Manufacturing);
        assert_eq!(resolved.warning, Some(IntegrityWarning::MissingInstallation));
    }

    #[test]
    fn test_inspection_without_record_falls_back_with_warning() {
        let order = order(vec![OrderTypeTag::Inspection]);
        let resolved = resolve(&order, &[], &SubsystemSnapshot::default());
        assert_eq!(resolved.source, StatusSource::OrderOwn);
        assert_eq!(resolved.status, order.status);
        assert_eq!(resolved.warning, Some(IntegrityWarning::MissingInspection));
    }

    #[test]
    fn test_inspection_completed_passes_through() {
        let order = order(vec![OrderTypeTag::Inspection]);
        let snapshot = SubsystemSnapshot {
            inspection: Some(InspectionView {
                id: Uuid::new_v4(),
                order_id: order.id,
                status: InspectionStatus::Completed,
                scheduled_date: None,
                completed_at: None,
            }),
            ..SubsystemSnapshot::default()
        };
        let resolved = resolve(&order, &[], &snapshot);
        assert_eq!(resolved.source, StatusSource::Inspection);
        assert_eq!(resolved.status, LifecycleStatus::Completed);
    }

    #[test]
    fn test_products_prefers_active_cutting() {
        let order = order(vec![OrderTypeTag::Products, OrderTypeTag::Inspection]);
        let items = vec![
            cutting_item(&order, Some(CuttingStatus::PartiallyCompleted)),
            cutting_item(&order, Some(CuttingStatus::InProgress)),
            cutting_item(&order, Some(CuttingStatus::Completed)),
        ];
        let snapshot = SubsystemSnapshot {
            manufacturing: Some(manufacturing(&order, ManufacturingStatus::Pending)),
            ..SubsystemSnapshot::default()
        };

        let resolved = resolve(&order, &items, &snapshot);
        assert_eq!(resolved.subsystem_status, SubsystemStatus::Cutting(CuttingStatus::InProgress));

        let resolved = resolve(&order, &items[2..], &snapshot);
        assert_eq!(resolved.source, StatusSource::Manufacturing);

        let resolved = resolve(&order, &[], &SubsystemSnapshot::default());
        assert_eq!(resolved.source, StatusSource::OrderOwn);
        assert_eq!(resolved.warning, None);
    }

    #[test]
    fn test_inactive_item_does_not_count_as_cutting() {
        let order = order(vec![OrderTypeTag::Products]);
        let mut item = cutting_item(&order, Some(CuttingStatus::InProgress));
        item.active = false;
        let resolved = resolve(&order, &[item], &SubsystemSnapshot::default());
        assert_eq!(resolved.source, StatusSource::OrderOwn);
    }

    #[test]
    fn test_tailoring_uses_manufacturing() {
        let order = order(vec![OrderTypeTag::Tailoring]);
        let snapshot = SubsystemSnapshot {
            manufacturing: Some(manufacturing(&order, ManufacturingStatus::Delivered)),
            ..SubsystemSnapshot::default()
        };
        let resolved = resolve(&order, &[], &snapshot);
        assert_eq!(resolved.status, LifecycleStatus::Delivered);

        let missing = resolve(&order, &[], &SubsystemSnapshot::default());
        assert_eq!(missing.warning, Some(IntegrityWarning::MissingManufacturing));
    }

    #[test]
    fn test_accessory_only_uses_own_status() {
        let order = order(vec![OrderTypeTag::Accessory]);
        let snapshot = SubsystemSnapshot {
            manufacturing: Some(manufacturing(&order, ManufacturingStatus::InProgress)),
            ..SubsystemSnapshot::default()
        };
        let resolved = resolve(&order, &[], &snapshot);
        assert_eq!(resolved.source, StatusSource::OrderOwn);
    }
}
