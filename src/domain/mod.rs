// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Aggregates and value objects owned by the order core:
// - order/      - Order aggregate, line items, payments, commands, errors
// - subsystems/ - read views of the inspection, installation and
//                 manufacturing records other teams own
//
// Persistence, audit and synchronization live outside this module.
//
// ============================================================================

pub mod order;
pub mod subsystems;
