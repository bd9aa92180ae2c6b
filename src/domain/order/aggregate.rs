use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::{FieldChange, NewOrder};
use super::errors::OrderError;
use super::value_objects::{DeliveryType, LifecycleStatus, OrderTypes};
use crate::domain::subsystems::{InspectionStatus, InstallationStatus};

// ============================================================================
// Order Aggregate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub customer_id: Uuid,
    pub order_types: OrderTypes,

    // Status
    pub status: LifecycleStatus,
    pub inspection_status: Option<InspectionStatus>,
    pub installation_status: Option<InstallationStatus>,
    pub is_fully_completed: bool,
    /// Set when a user wrote a terminal status directly.
    pub status_pinned: bool,

    // Money. `subtotal` is pre-discount; the payable amount is derived.
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub paid_amount: Decimal,

    // Tracked fields
    pub contract_number: Option<String>,
    pub invoice_number: Option<String>,
    pub notes: Option<String>,
    pub delivery_type: DeliveryType,
    pub delivery_address: Option<String>,
    pub expected_delivery: Option<NaiveDate>,
    pub order_date: NaiveDate,
    pub branch_id: Option<Uuid>,
    pub salesperson_id: Option<Uuid>,
    pub payment_verified: bool,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a validated order from creation input. Totals start at zero and
    /// are filled in by the financial calculator once items are persisted.
    pub fn create(input: &NewOrder) -> Result<Self, OrderError> {
        let order_types = OrderTypes::new(input.order_types.iter().copied())?;
        let customer_id = match input.customer_id {
            Some(id) if !id.is_nil() => id,
            _ => return Err(OrderError::MissingCustomer),
        };

        for draft in &input.items {
            draft.validate()?;
        }

        let now = Utc::now();
        let order = Self {
            id: Uuid::new_v4(),
            customer_id,
            order_types,
            status: if input.requires_approval {
                LifecycleStatus::PendingApproval
            } else {
                LifecycleStatus::Pending
            },
            inspection_status: None,
            installation_status: None,
            is_fully_completed: false,
            status_pinned: false,
            subtotal: Decimal::ZERO,
            discount_total: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            contract_number: input.contract_number.clone(),
            invoice_number: input.invoice_number.clone(),
            notes: input.notes.clone(),
            delivery_type: input.delivery_type,
            delivery_address: input.delivery_address.clone(),
            expected_delivery: input.expected_delivery,
            order_date: input.order_date.unwrap_or_else(|| now.date_naive()),
            branch_id: input.branch_id,
            salesperson_id: input.salesperson_id,
            payment_verified: false,
            created_at: now,
            updated_at: now,
        };

        order.validate()?;
        Ok(order)
    }

    /// Rules that must hold after every user edit.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.customer_id.is_nil() {
            return Err(OrderError::MissingCustomer);
        }
        if self.delivery_type == DeliveryType::HomeDelivery
            && self
                .delivery_address
                .as_deref()
                .map_or(true, |address| address.trim().is_empty())
        {
            return Err(OrderError::MissingDeliveryAddress);
        }
        Ok(())
    }

    /// `subtotal − discount_total`, never stored.
    pub fn final_payable(&self) -> Decimal {
        self.subtotal - self.discount_total
    }

    pub fn remaining_balance(&self) -> Decimal {
        self.final_payable() - self.paid_amount
    }

    /// Whether synchronization must leave `status` alone. Statuses the
    /// subsystems can never produce always hold; a cancellation holds only
    /// when a user set it, since a subsystem may later leave `cancelled`.
    pub fn holds_status(&self) -> bool {
        match self.status {
            LifecycleStatus::Rejected | LifecycleStatus::ManufacturingDeleted => true,
            status => self.status_pinned && status.is_terminal(),
        }
    }

    pub fn has_payments(&self) -> bool {
        self.paid_amount > Decimal::ZERO
    }

    pub fn field_value(&self, field: TrackedField) -> FieldValue {
        match field {
            TrackedField::ContractNumber => FieldValue::Text(self.contract_number.clone()),
            TrackedField::InvoiceNumber => FieldValue::Text(self.invoice_number.clone()),
            TrackedField::Notes => FieldValue::Text(self.notes.clone()),
            TrackedField::DeliveryAddress => FieldValue::Text(self.delivery_address.clone()),
            TrackedField::ExpectedDelivery => FieldValue::Date(self.expected_delivery),
            TrackedField::Status => FieldValue::Status(self.status),
            TrackedField::Customer => FieldValue::Customer(self.customer_id),
            TrackedField::Branch => FieldValue::Branch(self.branch_id),
            TrackedField::Salesperson => FieldValue::Salesperson(self.salesperson_id),
            TrackedField::DeliveryType => FieldValue::Delivery(self.delivery_type),
            TrackedField::PaymentVerified => FieldValue::Flag(self.payment_verified),
            TrackedField::OrderDate => FieldValue::Date(Some(self.order_date)),
        }
    }

    pub fn apply_change(&mut self, change: &FieldChange) {
        match change {
            FieldChange::ContractNumber(v) => self.contract_number = v.clone(),
            FieldChange::InvoiceNumber(v) => self.invoice_number = v.clone(),
            FieldChange::Notes(v) => self.notes = v.clone(),
            FieldChange::DeliveryAddress(v) => self.delivery_address = v.clone(),
            FieldChange::ExpectedDelivery(d) => self.expected_delivery = *d,
            FieldChange::Status(s) => {
                self.status = *s;
                self.status_pinned = s.is_terminal();
            }
            FieldChange::Customer(id) => self.customer_id = *id,
            FieldChange::Branch(id) => self.branch_id = *id,
            FieldChange::Salesperson(id) => self.salesperson_id = *id,
            FieldChange::DeliveryType(t) => self.delivery_type = *t,
            FieldChange::PaymentVerified(b) => self.payment_verified = *b,
            FieldChange::OrderDate(d) => self.order_date = *d,
        }
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Tracked Fields
// ============================================================================

/// Fields whose changes are written to the status log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    ContractNumber,
    InvoiceNumber,
    Notes,
    DeliveryAddress,
    ExpectedDelivery,
    Status,
    Customer,
    Branch,
    Salesperson,
    DeliveryType,
    PaymentVerified,
    OrderDate,
}

impl TrackedField {
    pub const ALL: [TrackedField; 12] = [
        TrackedField::ContractNumber,
        TrackedField::InvoiceNumber,
        TrackedField::Notes,
        TrackedField::DeliveryAddress,
        TrackedField::ExpectedDelivery,
        TrackedField::Status,
        TrackedField::Customer,
        TrackedField::Branch,
        TrackedField::Salesperson,
        TrackedField::DeliveryType,
        TrackedField::PaymentVerified,
        TrackedField::OrderDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedField::ContractNumber => "contract_number",
            TrackedField::InvoiceNumber => "invoice_number",
            TrackedField::Notes => "notes",
            TrackedField::DeliveryAddress => "delivery_address",
            TrackedField::ExpectedDelivery => "expected_delivery",
            TrackedField::Status => "status",
            TrackedField::Customer => "customer",
            TrackedField::Branch => "branch",
            TrackedField::Salesperson => "salesperson",
            TrackedField::DeliveryType => "delivery_type",
            TrackedField::PaymentVerified => "payment_verified",
            TrackedField::OrderDate => "order_date",
        }
    }
}

impl fmt::Display for TrackedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a tracked field, typed so references can be rendered to names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Flag(bool),
    Status(LifecycleStatus),
    Delivery(DeliveryType),
    Customer(Uuid),
    Branch(Option<Uuid>),
    Salesperson(Option<Uuid>),
}

impl FieldValue {
    /// Canonical string used to decide whether a value actually changed.
    /// Absent and blank text compare equal; surrounding whitespace is ignored.
    pub fn normalized(&self) -> String {
        match self {
            FieldValue::Text(v) => v.as_deref().map(str::trim).unwrap_or_default().to_string(),
            FieldValue::Date(d) => d.map(|d| d.to_string()).unwrap_or_default(),
            FieldValue::Flag(b) => b.to_string(),
            FieldValue::Status(s) => s.as_str().to_string(),
            FieldValue::Delivery(t) => t.as_str().to_string(),
            FieldValue::Customer(id) => id.to_string(),
            FieldValue::Branch(id) | FieldValue::Salesperson(id) => {
                id.map(|id| id.to_string()).unwrap_or_default()
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{LineItemDraft, OrderTypeTag};
    use rust_decimal_macros::dec;

    fn new_order() -> NewOrder {
        NewOrder::new(Uuid::new_v4(), vec![OrderTypeTag::Installation])
    }

    #[test]
    fn test_create_order_defaults() {
        let order = Order::create(&new_order()).unwrap();
        assert_eq!(order.status, LifecycleStatus::Pending);
        assert_eq!(order.subtotal, Decimal::ZERO);
        assert!(!order.is_fully_completed);
    }

    #[test]
    fn test_create_requires_approval_when_requested() {
        let mut input = new_order();
        input.requires_approval = true;
        let order = Order::create(&input).unwrap();
        assert_eq!(order.status, LifecycleStatus::PendingApproval);
    }

    #[test]
    fn test_create_without_order_type_fails() {
        let input = NewOrder::new(Uuid::new_v4(), vec![]);
        assert!(matches!(Order::create(&input), Err(OrderError::MissingOrderType)));
    }

    #[test]
    fn test_create_without_customer_fails() {
        let mut input = new_order();
        input.customer_id = None;
        assert!(matches!(Order::create(&input), Err(OrderError::MissingCustomer)));

        input.customer_id = Some(Uuid::nil());
        assert!(matches!(Order::create(&input), Err(OrderError::MissingCustomer)));
    }

    #[test]
    fn test_home_delivery_requires_address() {
        let mut input = new_order();
        input.delivery_type = DeliveryType::HomeDelivery;
        input.delivery_address = Some("   ".to_string());
        assert!(matches!(Order::create(&input), Err(OrderError::MissingDeliveryAddress)));

        let ok = new_order().with_home_delivery("12 Palm Street");
        assert!(Order::create(&ok).is_ok());
    }

    #[test]
    fn test_zero_quantity_item_rejected() {
        let input = new_order().with_item(LineItemDraft::new(
            Uuid::new_v4(),
            "Sheer",
            Decimal::ZERO,
            dec!(10),
            Decimal::ZERO,
        ));
        assert!(matches!(Order::create(&input), Err(OrderError::InvalidQuantity(_))));
    }

    #[test]
    fn test_final_payable_and_remaining_balance() {
        let mut order = Order::create(&new_order()).unwrap();
        order.subtotal = dec!(250);
        order.discount_total = dec!(20);
        order.paid_amount = dec!(100);
        assert_eq!(order.final_payable(), dec!(230));
        assert_eq!(order.remaining_balance(), dec!(130));
        assert!(order.has_payments());
    }

    #[test]
    fn test_apply_change_updates_tracked_field() {
        let mut order = Order::create(&new_order()).unwrap();
        let change = FieldChange::Notes(Some("call before delivery".to_string()));
        order.apply_change(&change);
        assert_eq!(order.field_value(TrackedField::Notes), change.value());
    }

    #[test]
    fn test_only_user_cancellation_holds_status() {
        let mut order = Order::create(&new_order()).unwrap();
        order.status = LifecycleStatus::Cancelled;
        assert!(!order.holds_status());

        order.apply_change(&FieldChange::Status(LifecycleStatus::Cancelled));
        assert!(order.holds_status());

        order.apply_change(&FieldChange::Status(LifecycleStatus::InProgress));
        assert!(!order.status_pinned);
        assert!(!order.holds_status());

        order.status = LifecycleStatus::ManufacturingDeleted;
        assert!(order.holds_status());
        order.status = LifecycleStatus::Rejected;
        assert!(order.holds_status());
    }

    #[test]
    fn test_normalized_blank_text_equals_absent() {
        assert_eq!(
            FieldValue::Text(Some("  ".to_string())).normalized(),
            FieldValue::Text(None).normalized()
        );
        assert_eq!(
            FieldValue::Text(Some(" A-12 ".to_string())).normalized(),
            FieldValue::Text(Some("A-12".to_string())).normalized()
        );
    }
}
