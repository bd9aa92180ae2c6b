// ============================================================================
// Status Resolver - Picks the authoritative subsystem for an order's status
// ============================================================================
//
// Read-only. Given an order's type tags, its line items and the linked
// inspection, installation and manufacturing records, decides which
// subsystem's status is shown and what lifecycle status it implies.
//
// ============================================================================

pub mod presentation;
pub mod resolver;

pub use presentation::{badge, Badge};
pub use resolver::{resolve, IntegrityWarning, ResolvedStatus};
