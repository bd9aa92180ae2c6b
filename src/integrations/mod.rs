// ============================================================================
// External Collaborators
// ============================================================================
//
// Interfaces the order core consumes but does not own:
// - directory  - display names for customers, branches and salespeople
// - inventory  - one-way stock deduction for `products` orders
// - contracts  - contract document storage used by the background worker
//
// ============================================================================

pub mod contracts;
pub mod directory;
pub mod inventory;

pub use contracts::{ContractUploader, InMemoryContractStorage};
pub use directory::{NameDirectory, StaticDirectory};
pub use inventory::{InventoryClient, RecordingInventory};
