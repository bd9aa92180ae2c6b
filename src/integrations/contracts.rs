use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::Order;

/// File storage for generated contract documents.
#[async_trait]
pub trait ContractUploader: Send + Sync {
    /// Upload the contract for `order`, returning its storage key.
    async fn upload_contract(&self, order: &Order) -> anyhow::Result<String>;
}

/// Keeps uploaded contract keys in memory, keyed by order.
#[derive(Debug, Default)]
pub struct InMemoryContractStorage {
    uploads: Mutex<HashMap<Uuid, String>>,
}

impl InMemoryContractStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_for(&self, order_id: Uuid) -> Option<String> {
        self.uploads.lock().ok().and_then(|u| u.get(&order_id).cloned())
    }
}

#[async_trait]
impl ContractUploader for InMemoryContractStorage {
    async fn upload_contract(&self, order: &Order) -> anyhow::Result<String> {
        let contract = order
            .contract_number
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("order {} has no contract number", order.id))?;

        let key = format!("contracts/{}/{}.pdf", order.id, contract);
        self.uploads
            .lock()
            .map_err(|_| anyhow::anyhow!("contract storage poisoned"))?
            .insert(order.id, key.clone());

        Ok(key)
    }
}
