use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

/// Resolves foreign references to display names at audit-write time.
pub trait NameDirectory: Send + Sync {
    fn customer_name(&self, id: Uuid) -> Option<String>;
    fn branch_name(&self, id: Uuid) -> Option<String>;
    fn salesperson_name(&self, id: Uuid) -> Option<String>;
}

/// In-process directory, filled by the caller.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    customers: RwLock<HashMap<Uuid, String>>,
    branches: RwLock<HashMap<Uuid, String>>,
    salespeople: RwLock<HashMap<Uuid, String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_customer(&self, id: Uuid, name: impl Into<String>) {
        if let Ok(mut customers) = self.customers.write() {
            customers.insert(id, name.into());
        }
    }

    pub fn add_branch(&self, id: Uuid, name: impl Into<String>) {
        if let Ok(mut branches) = self.branches.write() {
            branches.insert(id, name.into());
        }
    }

    pub fn add_salesperson(&self, id: Uuid, name: impl Into<String>) {
        if let Ok(mut salespeople) = self.salespeople.write() {
            salespeople.insert(id, name.into());
        }
    }
}

fn lookup(map: &RwLock<HashMap<Uuid, String>>, id: Uuid) -> Option<String> {
    map.read().ok().and_then(|m| m.get(&id).cloned())
}

impl NameDirectory for StaticDirectory {
    fn customer_name(&self, id: Uuid) -> Option<String> {
        lookup(&self.customers, id)
    }

    fn branch_name(&self, id: Uuid) -> Option<String> {
        lookup(&self.branches, id)
    }

    fn salesperson_name(&self, id: Uuid) -> Option<String> {
        lookup(&self.salespeople, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_registered_names() {
        let directory = StaticDirectory::new();
        let id = Uuid::new_v4();
        directory.add_customer(id, "Huda Salem");

        assert_eq!(directory.customer_name(id).as_deref(), Some("Huda Salem"));
        assert_eq!(directory.branch_name(id), None);
    }
}
