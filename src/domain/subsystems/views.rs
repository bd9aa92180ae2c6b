use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{InspectionStatus, InstallationStatus, ManufacturingStatus};
use crate::domain::order::OrderTypeTag;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: InspectionStatus,
    pub scheduled_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: InstallationStatus,
    pub scheduled_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InstallationView {
    /// Completion date when installed, otherwise the scheduled date.
    pub fn installation_date(&self) -> Option<NaiveDate> {
        self.completed_at
            .map(|at| at.date_naive())
            .or(self.scheduled_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManufacturingView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: ManufacturingStatus,
    pub order_type: OrderTypeTag,
    pub completion_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl ManufacturingView {
    pub fn new(order_id: Uuid, order_type: OrderTypeTag, delivery_date: Option<NaiveDate>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status: ManufacturingStatus::Pending,
            order_type,
            completion_date: None,
            delivery_date,
            created_at: Utc::now(),
        }
    }
}

/// The subordinate records linked to one order, read together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubsystemSnapshot {
    pub inspection: Option<InspectionView>,
    pub installation: Option<InstallationView>,
    pub manufacturing: Option<ManufacturingView>,
}

/// Narrow contract the core uses against the inspection, installation and
/// manufacturing subsystems.
#[async_trait]
pub trait SubsystemGateway: Send + Sync {
    async fn inspection(&self, order_id: Uuid) -> Result<Option<InspectionView>, StoreError>;

    async fn installation(&self, order_id: Uuid) -> Result<Option<InstallationView>, StoreError>;

    async fn manufacturing(&self, order_id: Uuid) -> Result<Option<ManufacturingView>, StoreError>;

    /// Create the manufacturing order for `order_id` unless one exists.
    /// Returns the record and whether it was created by this call.
    async fn ensure_manufacturing(
        &self,
        order_id: Uuid,
        order_type: OrderTypeTag,
        delivery_date: Option<NaiveDate>,
    ) -> Result<(ManufacturingView, bool), StoreError>;

    async fn set_manufacturing_delivery_date(
        &self,
        order_id: Uuid,
        delivery_date: Option<NaiveDate>,
    ) -> Result<(), StoreError>;

    async fn snapshot(&self, order_id: Uuid) -> Result<SubsystemSnapshot, StoreError> {
        Ok(SubsystemSnapshot {
            inspection: self.inspection(order_id).await?,
            installation: self.installation(order_id).await?,
            manufacturing: self.manufacturing(order_id).await?,
        })
    }
}
