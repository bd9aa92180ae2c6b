use uuid::Uuid;

use crate::store::StoreError;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order must carry at least one order type")]
    MissingOrderType,

    #[error("Unknown order type: {0}")]
    UnknownOrderType(String),

    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    #[error("Unknown delivery type: {0}")]
    UnknownDeliveryType(String),

    #[error("Unknown payment method: {0}")]
    UnknownPaymentMethod(String),

    #[error("Order must reference a customer")]
    MissingCustomer,

    #[error("Home delivery requires a delivery address")]
    MissingDeliveryAddress,

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(rust_decimal::Decimal),

    #[error("Payment amount must be positive")]
    InvalidPaymentAmount,

    #[error("Amount exceeds the supported range")]
    AmountOutOfRange,

    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Line item {item_id} not found on order {order_id}")]
    ItemNotFound { order_id: Uuid, item_id: Uuid },

    #[error("Payment {payment_id} not found on order {order_id}")]
    PaymentNotFound { order_id: Uuid, payment_id: Uuid },

    #[error("Order {0} is being deleted")]
    BeingDeleted(Uuid),

    #[error("Deleting an order requires an acting user")]
    DeletionRequiresActor,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Validation errors block the mutation and are shown to the user.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrderError::MissingOrderType
                | OrderError::UnknownOrderType(_)
                | OrderError::UnknownStatus(_)
                | OrderError::UnknownDeliveryType(_)
                | OrderError::UnknownPaymentMethod(_)
                | OrderError::MissingCustomer
                | OrderError::MissingDeliveryAddress
                | OrderError::InvalidQuantity(_)
                | OrderError::InvalidPaymentAmount
                | OrderError::AmountOutOfRange
                | OrderError::DeletionRequiresActor
        )
    }
}
