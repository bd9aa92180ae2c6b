use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::order::{Actor, Order};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Status,
    Price,
    Date,
    Customer,
    Payment,
    Manufacturing,
    Installation,
    Inspection,
    Cutting,
    General,
    Creation,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 11] = [
        ChangeKind::Status,
        ChangeKind::Price,
        ChangeKind::Date,
        ChangeKind::Customer,
        ChangeKind::Payment,
        ChangeKind::Manufacturing,
        ChangeKind::Installation,
        ChangeKind::Inspection,
        ChangeKind::Cutting,
        ChangeKind::General,
        ChangeKind::Creation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Status => "status",
            ChangeKind::Price => "price",
            ChangeKind::Date => "date",
            ChangeKind::Customer => "customer",
            ChangeKind::Payment => "payment",
            ChangeKind::Manufacturing => "manufacturing",
            ChangeKind::Installation => "installation",
            ChangeKind::Inspection => "inspection",
            ChangeKind::Cutting => "cutting",
            ChangeKind::General => "general",
            ChangeKind::Creation => "creation",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown change kind: {s}"))
    }
}

/// One recorded change. Append-only.
///
/// Raw values are kept next to their rendered form so the history stays
/// accurate after a referenced customer or branch is renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub kind: ChangeKind,
    pub field: Option<String>,
    pub old_value: String,
    pub new_value: String,
    pub old_display: String,
    pub new_display: String,
    pub note: String,
    pub actor: Option<Actor>,
    pub is_automatic: bool,
    pub created_at: DateTime<Utc>,
}

impl StatusLogEntry {
    pub fn new(
        order_id: Uuid,
        kind: ChangeKind,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
        note: impl Into<String>,
        actor: Option<Actor>,
    ) -> Self {
        let old_value = old_value.into();
        let new_value = new_value.into();
        Self {
            id: Uuid::new_v4(),
            order_id,
            kind,
            field: None,
            old_display: old_value.clone(),
            new_display: new_value.clone(),
            old_value,
            new_value,
            note: note.into(),
            is_automatic: actor.is_none(),
            actor,
            created_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_display(mut self, old_display: impl Into<String>, new_display: impl Into<String>) -> Self {
        self.old_display = old_display.into();
        self.new_display = new_display.into();
        self
    }
}

/// Financial totals captured around an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsSnapshot {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub final_payable: Decimal,
    pub paid_amount: Decimal,
}

impl From<&Order> for TotalsSnapshot {
    fn from(order: &Order) -> Self {
        Self {
            subtotal: order.subtotal,
            discount_total: order.discount_total,
            final_payable: order.final_payable(),
            paid_amount: order.paid_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDelta {
    pub old: String,
    pub new: String,
}

/// One entry per user-initiated edit, however many fields it touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationLogEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub actor: Actor,
    pub totals_before: TotalsSnapshot,
    pub totals_after: TotalsSnapshot,
    pub changes: BTreeMap<String, FieldDelta>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Ordered audit trail of one order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderHistory {
    pub status_log: Vec<StatusLogEntry>,
    pub modifications: Vec<ModificationLogEntry>,
}
