// ============================================================================
// Order Domain - Business Logic for the Order Aggregate
// ============================================================================
//
// - Value objects (OrderTypeTag, LifecycleStatus, LineItem, Payment)
// - Aggregate (Order with tracked fields and derived amounts)
// - Commands (NewOrder input, OrderCommand mutations, FieldChange)
// - Errors (OrderError enum)
//
// ============================================================================

pub mod value_objects;
pub mod aggregate;
pub mod commands;
pub mod errors;

// Re-export for convenience
pub use value_objects::*;
pub use aggregate::*;
pub use commands::*;
pub use errors::*;
