use uuid::Uuid;

use crate::domain::subsystems::ManufacturingView;

/// Something changed on one side of an order.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    OrderChanged(Uuid),
    ItemsChanged(Uuid),
    InspectionChanged(Uuid),
    InstallationChanged(Uuid),
    ManufacturingChanged(Uuid),
    ManufacturingDeleted {
        order_id: Uuid,
        snapshot: ManufacturingView,
    },
}

impl SyncEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            SyncEvent::OrderChanged(id)
            | SyncEvent::ItemsChanged(id)
            | SyncEvent::InspectionChanged(id)
            | SyncEvent::InstallationChanged(id)
            | SyncEvent::ManufacturingChanged(id) => *id,
            SyncEvent::ManufacturingDeleted { order_id, .. } => *order_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::OrderChanged(_) => "order_changed",
            SyncEvent::ItemsChanged(_) => "items_changed",
            SyncEvent::InspectionChanged(_) => "inspection_changed",
            SyncEvent::InstallationChanged(_) => "installation_changed",
            SyncEvent::ManufacturingChanged(_) => "manufacturing_changed",
            SyncEvent::ManufacturingDeleted { .. } => "manufacturing_deleted",
        }
    }

    /// Identity used to drop repeats within one request.
    pub fn key(&self) -> (&'static str, Uuid) {
        (self.kind(), self.order_id())
    }
}
