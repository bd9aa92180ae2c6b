use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregate::{FieldValue, TrackedField};
use super::value_objects::{DeliveryType, LifecycleStatus, LineItemDraft, OrderTypeTag, PaymentMethod};
use crate::domain::subsystems::CuttingStatus;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

/// Input for creating an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub customer_id: Option<Uuid>,
    pub order_types: Vec<OrderTypeTag>,
    pub delivery_type: DeliveryType,
    pub delivery_address: Option<String>,
    pub expected_delivery: Option<NaiveDate>,
    pub order_date: Option<NaiveDate>,
    pub branch_id: Option<Uuid>,
    pub salesperson_id: Option<Uuid>,
    pub contract_number: Option<String>,
    pub invoice_number: Option<String>,
    pub notes: Option<String>,
    pub requires_approval: bool,
    pub items: Vec<LineItemDraft>,
}

impl NewOrder {
    pub fn new(customer_id: Uuid, order_types: Vec<OrderTypeTag>) -> Self {
        Self {
            customer_id: Some(customer_id),
            order_types,
            delivery_type: DeliveryType::BranchPickup,
            delivery_address: None,
            expected_delivery: None,
            order_date: None,
            branch_id: None,
            salesperson_id: None,
            contract_number: None,
            invoice_number: None,
            notes: None,
            requires_approval: false,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, draft: LineItemDraft) -> Self {
        self.items.push(draft);
        self
    }

    pub fn with_home_delivery(mut self, address: impl Into<String>) -> Self {
        self.delivery_type = DeliveryType::HomeDelivery;
        self.delivery_address = Some(address.into());
        self
    }

    pub fn with_expected_delivery(mut self, date: NaiveDate) -> Self {
        self.expected_delivery = Some(date);
        self
    }

    pub fn with_contract_number(mut self, number: impl Into<String>) -> Self {
        self.contract_number = Some(number.into());
        self
    }
}

/// A single edit to one tracked field of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldChange {
    ContractNumber(Option<String>),
    InvoiceNumber(Option<String>),
    Notes(Option<String>),
    DeliveryAddress(Option<String>),
    ExpectedDelivery(Option<NaiveDate>),
    Status(LifecycleStatus),
    Customer(Uuid),
    Branch(Option<Uuid>),
    Salesperson(Option<Uuid>),
    DeliveryType(DeliveryType),
    PaymentVerified(bool),
    OrderDate(NaiveDate),
}

impl FieldChange {
    pub fn field(&self) -> TrackedField {
        match self {
            FieldChange::ContractNumber(_) => TrackedField::ContractNumber,
            FieldChange::InvoiceNumber(_) => TrackedField::InvoiceNumber,
            FieldChange::Notes(_) => TrackedField::Notes,
            FieldChange::DeliveryAddress(_) => TrackedField::DeliveryAddress,
            FieldChange::ExpectedDelivery(_) => TrackedField::ExpectedDelivery,
            FieldChange::Status(_) => TrackedField::Status,
            FieldChange::Customer(_) => TrackedField::Customer,
            FieldChange::Branch(_) => TrackedField::Branch,
            FieldChange::Salesperson(_) => TrackedField::Salesperson,
            FieldChange::DeliveryType(_) => TrackedField::DeliveryType,
            FieldChange::PaymentVerified(_) => TrackedField::PaymentVerified,
            FieldChange::OrderDate(_) => TrackedField::OrderDate,
        }
    }

    pub fn value(&self) -> FieldValue {
        match self {
            FieldChange::ContractNumber(v)
            | FieldChange::InvoiceNumber(v)
            | FieldChange::Notes(v)
            | FieldChange::DeliveryAddress(v) => FieldValue::Text(v.clone()),
            FieldChange::ExpectedDelivery(d) => FieldValue::Date(*d),
            FieldChange::Status(s) => FieldValue::Status(*s),
            FieldChange::Customer(id) => FieldValue::Customer(*id),
            FieldChange::Branch(id) => FieldValue::Branch(*id),
            FieldChange::Salesperson(id) => FieldValue::Salesperson(*id),
            FieldChange::DeliveryType(t) => FieldValue::Delivery(*t),
            FieldChange::PaymentVerified(b) => FieldValue::Flag(*b),
            FieldChange::OrderDate(d) => FieldValue::Date(Some(*d)),
        }
    }
}

/// A mutation of an existing order.
#[derive(Debug, Clone)]
pub enum OrderCommand {
    UpdateFields {
        changes: Vec<FieldChange>,
    },
    ChangeOrderTypes {
        order_types: Vec<OrderTypeTag>,
    },
    AddItem {
        draft: LineItemDraft,
    },
    UpdateItem {
        item_id: Uuid,
        draft: LineItemDraft,
    },
    RemoveItem {
        item_id: Uuid,
    },
    SetCuttingStatus {
        item_id: Uuid,
        status: Option<CuttingStatus>,
    },
    RecordPayment {
        amount: Decimal,
        method: PaymentMethod,
        reference: Option<String>,
    },
    RemovePayment {
        payment_id: Uuid,
    },
    RecomputeTotals {
        force: bool,
    },
    DeleteOrder,
}
