use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::order::LineItem;

/// Receives "deduct stock for this order's items". The core never reads
/// stock levels back.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn deduct_stock(&self, order_id: Uuid, items: &[LineItem]) -> anyhow::Result<()>;
}

/// Records deductions in memory.
#[derive(Debug, Default)]
pub struct RecordingInventory {
    deductions: Mutex<Vec<(Uuid, Uuid, Decimal)>>,
}

impl RecordingInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(order_id, product_id, quantity)` triples in call order.
    pub fn deductions(&self) -> Vec<(Uuid, Uuid, Decimal)> {
        self.deductions.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InventoryClient for RecordingInventory {
    async fn deduct_stock(&self, order_id: Uuid, items: &[LineItem]) -> anyhow::Result<()> {
        let mut deductions = self
            .deductions
            .lock()
            .map_err(|_| anyhow::anyhow!("inventory ledger poisoned"))?;

        for item in items.iter().filter(|item| item.active) {
            deductions.push((order_id, item.product_id, item.quantity));
        }

        tracing::debug!(order_id = %order_id, item_count = items.len(), "Stock deducted");
        Ok(())
    }
}
