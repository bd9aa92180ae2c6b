use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::OrderError;
use crate::domain::subsystems::CuttingStatus;
use crate::finance::coerce;

// ============================================================================
// Order Value Objects
// ============================================================================

/// Label describing what kind of work an order involves. An order may carry
/// several at once; each implies different subsystem wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTypeTag {
    Inspection,
    Installation,
    Tailoring,
    Accessory,
    Products,
}

impl OrderTypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderTypeTag::Inspection => "inspection",
            OrderTypeTag::Installation => "installation",
            OrderTypeTag::Tailoring => "tailoring",
            OrderTypeTag::Accessory => "accessory",
            OrderTypeTag::Products => "products",
        }
    }
}

impl fmt::Display for OrderTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderTypeTag {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "inspection" => Ok(OrderTypeTag::Inspection),
            "installation" => Ok(OrderTypeTag::Installation),
            "tailoring" => Ok(OrderTypeTag::Tailoring),
            "accessory" => Ok(OrderTypeTag::Accessory),
            "products" => Ok(OrderTypeTag::Products),
            other => Err(OrderError::UnknownOrderType(other.to_string())),
        }
    }
}

/// Non-empty set of order-type tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<OrderTypeTag>", into = "Vec<OrderTypeTag>")]
pub struct OrderTypes(BTreeSet<OrderTypeTag>);

impl OrderTypes {
    pub fn new(tags: impl IntoIterator<Item = OrderTypeTag>) -> Result<Self, OrderError> {
        let set: BTreeSet<_> = tags.into_iter().collect();
        if set.is_empty() {
            return Err(OrderError::MissingOrderType);
        }
        Ok(Self(set))
    }

    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, OrderError> {
        let tags = raw
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<OrderTypeTag>, _>>()?;
        Self::new(tags)
    }

    pub fn contains(&self, tag: OrderTypeTag) -> bool {
        self.0.contains(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = OrderTypeTag> + '_ {
        self.0.iter().copied()
    }

    /// Tags that get a manufacturing order created automatically.
    pub fn needs_manufacturing(&self) -> bool {
        self.manufacturing_kind().is_some()
    }

    /// The manufacturing order type implied by the tags, if any.
    /// Installation wins over tailoring, tailoring over accessory.
    pub fn manufacturing_kind(&self) -> Option<OrderTypeTag> {
        [OrderTypeTag::Installation, OrderTypeTag::Tailoring, OrderTypeTag::Accessory]
            .into_iter()
            .find(|tag| self.contains(*tag))
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.iter().map(|t| t.as_str().to_string()).collect()
    }
}

impl TryFrom<Vec<OrderTypeTag>> for OrderTypes {
    type Error = OrderError;

    fn try_from(tags: Vec<OrderTypeTag>) -> Result<Self, Self::Error> {
        Self::new(tags)
    }
}

impl From<OrderTypes> for Vec<OrderTypeTag> {
    fn from(types: OrderTypes) -> Self {
        types.0.into_iter().collect()
    }
}

impl fmt::Display for OrderTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_strings().join(","))
    }
}

/// Lifecycle status stored on the order row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    PendingApproval,
    Pending,
    InProgress,
    ReadyInstall,
    Completed,
    Delivered,
    Rejected,
    Cancelled,
    ManufacturingDeleted,
}

impl LifecycleStatus {
    pub const ALL: [LifecycleStatus; 9] = [
        LifecycleStatus::PendingApproval,
        LifecycleStatus::Pending,
        LifecycleStatus::InProgress,
        LifecycleStatus::ReadyInstall,
        LifecycleStatus::Completed,
        LifecycleStatus::Delivered,
        LifecycleStatus::Rejected,
        LifecycleStatus::Cancelled,
        LifecycleStatus::ManufacturingDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::PendingApproval => "pending_approval",
            LifecycleStatus::Pending => "pending",
            LifecycleStatus::InProgress => "in_progress",
            LifecycleStatus::ReadyInstall => "ready_install",
            LifecycleStatus::Completed => "completed",
            LifecycleStatus::Delivered => "delivered",
            LifecycleStatus::Rejected => "rejected",
            LifecycleStatus::Cancelled => "cancelled",
            LifecycleStatus::ManufacturingDeleted => "manufacturing_deleted",
        }
    }

    /// Statuses that end an order. Only `Rejected` and `ManufacturingDeleted`
    /// are always held against synchronization; `Cancelled` is held only when
    /// a user set it (see `Order::holds_status`).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::Rejected
                | LifecycleStatus::Cancelled
                | LifecycleStatus::ManufacturingDeleted
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, LifecycleStatus::Completed | LifecycleStatus::Delivered)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryType {
    BranchPickup,
    HomeDelivery,
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryType::BranchPickup => "branch_pickup",
            DeliveryType::HomeDelivery => "home_delivery",
        }
    }
}

impl FromStr for DeliveryType {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "branch_pickup" => Ok(DeliveryType::BranchPickup),
            "home_delivery" => Ok(DeliveryType::HomeDelivery),
            other => Err(OrderError::UnknownDeliveryType(other.to_string())),
        }
    }
}

/// The user behind a mutation. `None` wherever an `Option<Actor>` is taken
/// means the change is system-generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
}

impl Actor {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

// ============================================================================
// Line Items
// ============================================================================

/// Largest money value a `NUMERIC(14, 2)` column holds.
pub const MAX_AMOUNT: Decimal = dec!(999999999999.99);

/// Largest quantity a `NUMERIC(12, 3)` column holds.
pub const MAX_QUANTITY: Decimal = dec!(999999999.999);

/// Line item input before it is priced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemDraft {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
}

impl LineItemDraft {
    pub fn new(
        product_id: Uuid,
        product_name: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
        discount_percent: Decimal,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
            discount_percent,
        }
    }

    /// Build a draft from raw form strings. Malformed numbers become zero.
    pub fn from_form(
        product_id: Uuid,
        product_name: impl Into<String>,
        quantity: &str,
        unit_price: &str,
        discount_percent: &str,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity: coerce::lenient_decimal(quantity),
            unit_price: coerce::lenient_decimal(unit_price),
            discount_percent: coerce::discount_percent(coerce::lenient_decimal(discount_percent)),
        }
    }

    /// Quantity must be positive and both numbers must fit their columns.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.quantity <= Decimal::ZERO {
            return Err(OrderError::InvalidQuantity(self.quantity));
        }
        if self.quantity > MAX_QUANTITY
            || self.unit_price < Decimal::ZERO
            || self.unit_price > MAX_AMOUNT
        {
            return Err(OrderError::AmountOutOfRange);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub discount_amount: Decimal,
    pub line_total: Decimal,
    pub active: bool,
    pub cutting_status: Option<CuttingStatus>,
}

impl LineItem {
    pub fn new(order_id: Uuid, draft: LineItemDraft) -> Self {
        let mut item = Self {
            id: Uuid::new_v4(),
            order_id,
            product_id: draft.product_id,
            product_name: draft.product_name,
            quantity: draft.quantity,
            unit_price: draft.unit_price,
            discount_percent: draft.discount_percent,
            discount_amount: Decimal::ZERO,
            line_total: Decimal::ZERO,
            active: true,
            cutting_status: None,
        };
        item.touch();
        item
    }

    /// Replace the priced fields from a draft, keeping identity.
    pub fn apply_draft(&mut self, draft: LineItemDraft) {
        self.product_id = draft.product_id;
        self.product_name = draft.product_name;
        self.quantity = draft.quantity;
        self.unit_price = draft.unit_price;
        self.discount_percent = draft.discount_percent;
        self.touch();
    }

    /// Recompute the derived discount amount and post-discount total.
    pub fn touch(&mut self) {
        let gross = self.gross();
        self.discount_amount = gross.saturating_mul(coerce::discount_percent(self.discount_percent))
            / Decimal::ONE_HUNDRED;
        self.line_total = gross.saturating_sub(self.discount_amount);
    }

    /// `quantity × unit price`, saturating for rows that bypassed validation.
    pub fn gross(&self) -> Decimal {
        self.quantity.saturating_mul(self.unit_price)
    }

    pub fn is_mid_cutting(&self) -> bool {
        self.active && self.cutting_status.is_some_and(|s| s.is_active())
    }
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Cheque,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Other => "other",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "cheque" => Ok(PaymentMethod::Cheque),
            "other" => Ok(PaymentMethod::Other),
            other => Err(OrderError::UnknownPaymentMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub reference: Option<String>,
}

impl Payment {
    pub fn new(order_id: Uuid, amount: Decimal, method: PaymentMethod, reference: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            amount,
            method,
            paid_at: Utc::now(),
            reference,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
