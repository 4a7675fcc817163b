use crate::error::{DashboardError, Result};
use crate::table::Table;
use std::collections::BTreeMap;

/// Minimum number of uploaded tables before any operation is offered.
pub const MIN_TABLES: usize = 2;

/// Loaded tables keyed by the file name they were uploaded under.
///
/// Keys are unique within a session. Inserting under an existing key replaces
/// the table; entries are only dropped with the whole session.
#[derive(Clone, Debug, Default)]
pub struct TableRegistry {
    tables: BTreeMap<String, Table>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, table: Table) -> Option<Table> {
        self.tables.insert(name.into(), table)
    }

    pub fn get(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DashboardError::TableNotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DashboardError::TableNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Table)> {
        self.tables.iter()
    }

    /// Operations are enabled once at least two tables are loaded.
    pub fn is_ready(&self) -> bool {
        self.tables.len() >= MIN_TABLES
    }

    pub fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(DashboardError::NotEnoughTables {
                required: MIN_TABLES,
                available: self.tables.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_of_unknown_key_is_an_error() {
        let registry = TableRegistry::new();
        match registry.get("missing.xlsx") {
            Err(DashboardError::TableNotFound(name)) => assert_eq!(name, "missing.xlsx"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn insert_overwrites_and_readiness_needs_two_tables() {
        let mut registry = TableRegistry::new();
        registry.insert("a.xlsx", Table::new(vec!["A".into()]));
        assert!(!registry.is_ready());
        assert!(registry.ensure_ready().is_err());

        let previous = registry.insert("a.xlsx", Table::new(vec!["B".into()]));
        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a.xlsx").unwrap().column_names(), vec!["B"]);

        registry.insert("b.xlsx", Table::default());
        assert!(registry.is_ready());
        assert_eq!(registry.names(), vec!["a.xlsx", "b.xlsx"]);
    }
}
