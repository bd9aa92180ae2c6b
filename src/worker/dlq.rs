use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

// ============================================================================
// Dead Letter Queue
// ============================================================================
//
// Jobs that failed after all retry attempts. Kept in memory for manual
// intervention; listing is oldest first.
//
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub order_id: Uuid,
    pub job_type: String,
    pub payload: String,
    pub error_message: String,
    pub failure_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DlqStats {
    pub total_messages: usize,
    pub by_job_type: HashMap<String, usize>,
}

#[derive(Clone, Default)]
pub struct DeadLetterQueue {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, letter: DeadLetter) {
        tracing::error!(
            letter_id = %letter.id,
            order_id = %letter.order_id,
            job_type = %letter.job_type,
            error = %letter.error_message,
            failure_count = letter.failure_count,
            "Adding job to Dead Letter Queue"
        );
        self.letters.write().await.push(letter);
    }

    pub async fn list(&self, limit: usize) -> Vec<DeadLetter> {
        self.letters.read().await.iter().take(limit).cloned().collect()
    }

    pub async fn stats(&self) -> DlqStats {
        let letters = self.letters.read().await;
        let mut by_job_type = HashMap::new();
        for letter in letters.iter() {
            *by_job_type.entry(letter.job_type.clone()).or_insert(0) += 1;
        }
        DlqStats {
            total_messages: letters.len(),
            by_job_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(job_type: &str) -> DeadLetter {
        let now = Utc::now();
        DeadLetter {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload: "{}".to_string(),
            error_message: "boom".to_string(),
            failure_count: 3,
            first_failed_at: now,
            last_failed_at: now,
        }
    }

    #[tokio::test]
    async fn test_stats_group_by_job_type() {
        let dlq = DeadLetterQueue::new();
        dlq.push(letter("upload_contract")).await;
        dlq.push(letter("upload_contract")).await;
        dlq.push(letter("recompute_totals")).await;

        let stats = dlq.stats().await;
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.by_job_type["upload_contract"], 2);
        assert_eq!(dlq.list(2).await.len(), 2);
    }
}
