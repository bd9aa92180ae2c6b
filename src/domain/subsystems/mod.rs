// ============================================================================
// Subordinate Aggregates - Read views of records owned by other subsystems
// ============================================================================
//
// Inspection records, installation schedules and manufacturing orders are
// owned by other teams' workflows. The order core reads their status and
// touches them only through the narrow `SubsystemGateway` contract:
// - manufacturing orders are created once per order (create-if-not-exists)
// - the manufacturing delivery date follows the order's expected delivery
//
// ============================================================================

mod status;
mod views;

pub use status::*;
pub use views::*;
