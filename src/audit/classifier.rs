use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::entry::{ChangeKind, FieldDelta, ModificationLogEntry, StatusLogEntry, TotalsSnapshot};
use crate::domain::order::{Actor, FieldChange, FieldValue, LineItem, Order, Payment, TrackedField};
use crate::integrations::NameDirectory;

const EMPTY: &str = "(empty)";

/// What happened to a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemChange {
    Added,
    Updated,
    Removed,
}

impl ItemChange {
    fn verb(&self) -> &'static str {
        match self {
            ItemChange::Added => "added",
            ItemChange::Updated => "updated",
            ItemChange::Removed => "removed",
        }
    }
}

// ============================================================================
// Change Classifier
// ============================================================================
//
// Turns proposed mutations into audit entries:
// - unchanged values (after normalization) produce nothing
// - a missing actor marks the entry automatic
// - references are rendered to names now, not when history is read
//
// ============================================================================

#[derive(Clone)]
pub struct ChangeClassifier {
    directory: Arc<dyn NameDirectory>,
}

impl ChangeClassifier {
    pub fn new(directory: Arc<dyn NameDirectory>) -> Self {
        Self { directory }
    }

    pub fn kind_for(field: TrackedField) -> ChangeKind {
        match field {
            TrackedField::Status => ChangeKind::Status,
            TrackedField::Customer => ChangeKind::Customer,
            TrackedField::ExpectedDelivery | TrackedField::OrderDate => ChangeKind::Date,
            TrackedField::PaymentVerified => ChangeKind::Payment,
            TrackedField::ContractNumber
            | TrackedField::InvoiceNumber
            | TrackedField::Notes
            | TrackedField::DeliveryAddress
            | TrackedField::Branch
            | TrackedField::Salesperson
            | TrackedField::DeliveryType => ChangeKind::General,
        }
    }

    /// Classify one tracked-field change. `None` when the value did not
    /// actually change.
    pub fn classify(
        &self,
        order_id: Uuid,
        field: TrackedField,
        old: &FieldValue,
        new: &FieldValue,
        actor: Option<&Actor>,
    ) -> Option<StatusLogEntry> {
        let old_raw = old.normalized();
        let new_raw = new.normalized();
        if old_raw == new_raw {
            return None;
        }

        let old_display = self.render(old);
        let new_display = self.render(new);
        let note = format!("{} changed from {} to {}", field, old_display, new_display);

        let entry = StatusLogEntry::new(order_id, Self::kind_for(field), old_raw, new_raw, note, actor.cloned())
            .with_field(field.as_str())
            .with_display(old_display, new_display);

        Some(entry)
    }

    /// Classify a batch of edits against the order as it was before them.
    pub fn classify_changes(
        &self,
        before: &Order,
        changes: &[FieldChange],
        actor: Option<&Actor>,
    ) -> Vec<StatusLogEntry> {
        changes
            .iter()
            .filter_map(|change| {
                let field = change.field();
                self.classify(before.id, field, &before.field_value(field), &change.value(), actor)
            })
            .collect()
    }

    /// Collapse the entries of one user edit into a single modification row.
    pub fn modification_entry(
        &self,
        before: &Order,
        after: &Order,
        entries: &[StatusLogEntry],
        actor: &Actor,
        note: impl Into<String>,
    ) -> ModificationLogEntry {
        let changes: BTreeMap<String, FieldDelta> = entries
            .iter()
            .filter_map(|entry| {
                entry.field.clone().map(|field| {
                    (
                        field,
                        FieldDelta {
                            old: entry.old_display.clone(),
                            new: entry.new_display.clone(),
                        },
                    )
                })
            })
            .collect();

        ModificationLogEntry {
            id: Uuid::new_v4(),
            order_id: before.id,
            actor: actor.clone(),
            totals_before: TotalsSnapshot::from(before),
            totals_after: TotalsSnapshot::from(after),
            changes,
            note: note.into(),
            created_at: Utc::now(),
        }
    }

    pub fn item_entry(
        &self,
        item: &LineItem,
        change: ItemChange,
        subtotal_before: Decimal,
        subtotal_after: Decimal,
        actor: Option<&Actor>,
    ) -> StatusLogEntry {
        let note = format!(
            "Item {} {}: {} × {} ({}% off)",
            item.product_name,
            change.verb(),
            item.quantity.normalize(),
            item.unit_price.normalize(),
            item.discount_percent.normalize()
        );
        StatusLogEntry::new(
            item.order_id,
            ChangeKind::Price,
            subtotal_before.normalize().to_string(),
            subtotal_after.normalize().to_string(),
            note,
            actor.cloned(),
        )
        .with_field("subtotal")
    }

    pub fn payment_entry(
        &self,
        payment: &Payment,
        removed: bool,
        paid_before: Decimal,
        paid_after: Decimal,
        actor: Option<&Actor>,
    ) -> StatusLogEntry {
        let note = if removed {
            format!("Payment of {} ({}) removed", payment.amount.normalize(), payment.method.as_str())
        } else {
            format!("Payment of {} received by {}", payment.amount.normalize(), payment.method.as_str())
        };
        StatusLogEntry::new(
            payment.order_id,
            ChangeKind::Payment,
            paid_before.normalize().to_string(),
            paid_after.normalize().to_string(),
            note,
            actor.cloned(),
        )
        .with_field("paid_amount")
    }

    pub fn creation_entry(&self, order: &Order, actor: Option<&Actor>) -> StatusLogEntry {
        let customer = self.render(&FieldValue::Customer(order.customer_id));
        StatusLogEntry::new(
            order.id,
            ChangeKind::Creation,
            "",
            order.status.as_str(),
            format!("Order created for {} ({})", customer, order.order_types),
            actor.cloned(),
        )
        .with_display(EMPTY, order.status.as_str())
    }

    /// Entry written by the synchronization coordinator. Always automatic.
    pub fn system_entry(
        &self,
        order_id: Uuid,
        kind: ChangeKind,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
        note: impl Into<String>,
    ) -> StatusLogEntry {
        StatusLogEntry::new(order_id, kind, old_value, new_value, note, None)
    }

    /// Human-readable rendering, resolving references through the directory.
    pub fn render(&self, value: &FieldValue) -> String {
        match value {
            FieldValue::Text(text) => match text.as_deref().map(str::trim) {
                Some(t) if !t.is_empty() => t.to_string(),
                _ => EMPTY.to_string(),
            },
            FieldValue::Date(date) => date.map_or_else(|| EMPTY.to_string(), |d| d.format("%Y-%m-%d").to_string()),
            FieldValue::Flag(true) => "yes".to_string(),
            FieldValue::Flag(false) => "no".to_string(),
            FieldValue::Status(status) => status.as_str().to_string(),
            FieldValue::Delivery(delivery) => delivery.as_str().to_string(),
            FieldValue::Customer(id) => self
                .directory
                .customer_name(*id)
                .unwrap_or_else(|| id.to_string()),
            FieldValue::Branch(id) => Self::render_reference(*id, |id| self.directory.branch_name(id)),
            FieldValue::Salesperson(id) => {
                Self::render_reference(*id, |id| self.directory.salesperson_name(id))
            }
        }
    }

    fn render_reference(id: Option<Uuid>, lookup: impl Fn(Uuid) -> Option<String>) -> String {
        match id {
            Some(id) => lookup(id).unwrap_or_else(|| id.to_string()),
            None => EMPTY.to_string(),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
