// ============================================================================
// Audit - Status Log and Modification Log
// ============================================================================
//
// Every change to an order or its items is recorded as a Status Log entry
// tagged with a change kind and an automatic/manual flag. A multi-field
// user edit additionally produces one Modification Log entry with totals
// before and after.
//
// ============================================================================

pub mod entry;
pub mod classifier;

pub use entry::*;
pub use classifier::ChangeClassifier;
