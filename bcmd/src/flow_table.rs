// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The software copy of a P4 table: every entry the controller has
//! successfully written, keyed by its match key.

use std::collections::BTreeMap;

use common::p4::{MatchKey, P4TableDef, TableEntry};

use crate::types::*;

/// Basic statistics about p4 table usage
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableUsage {
    /// Maximum number of entries in the table
    pub size: u32,
    /// Current number of entries in the table
    pub occupancy: u32,
    /// Total number of entries inserted over time
    pub inserts: u64,
    /// Total number of entries deleted over time
    pub deletes: u64,
    /// Number of entries updated in place over time
    pub updates: u64,
    /// Number of inserts failed due to a collision
    pub collisions: u64,
    /// Number of updates failed due to a missing entry
    pub update_misses: u64,
    /// Number of deletes failed due to a missing entry
    pub delete_misses: u64,
    /// Number of inserts that failed due to space exhaustion
    pub exhaustion: u64,
}

impl TableUsage {
    /// Initialize a TableUsage structure with the provided size
    pub fn new(size: u32) -> TableUsage {
        TableUsage {
            size,
            ..Default::default()
        }
    }
}

/// The operations shared by every kind of table the table manager owns.
pub trait EntryTable {
    fn flow_table(&self) -> &FlowTable;

    /// Validate and add a new entry.
    fn insert_entry(&mut self, entry: &TableEntry) -> BcmdResult<()>;

    /// Replace an existing entry, returning the one it replaced.
    fn modify_entry(&mut self, entry: &TableEntry) -> BcmdResult<TableEntry>;

    /// Remove an entry, returning the copy that was stored.
    fn delete_entry(&mut self, entry: &TableEntry) -> BcmdResult<TableEntry>;
}

#[derive(Debug, Clone)]
pub struct FlowTable {
    id: u32,
    name: String,
    is_const: bool,
    entries: BTreeMap<MatchKey, TableEntry>,
    usage: TableUsage,
}

impl FlowTable {
    pub fn new(def: &P4TableDef) -> Self {
        FlowTable {
            id: def.id,
            name: def.name.clone(),
            is_const: def.is_const,
            entries: BTreeMap::new(),
            usage: TableUsage::new(def.size as u32),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of entries.  A table declared without a size is not
    /// bounded.
    pub fn size(&self) -> u32 {
        self.usage.size
    }

    /// Whether entries are owned by the switch rather than the controller
    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn usage(&self) -> &TableUsage {
        &self.usage
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_entry(&self, entry: &TableEntry) -> bool {
        self.entries.contains_key(&entry.match_key())
    }

    /// Return the stored entry with the same match key.
    pub fn lookup(&self, entry: &TableEntry) -> BcmdResult<&TableEntry> {
        self.entries.get(&entry.match_key()).ok_or_else(|| {
            BcmdError::Missing(format!(
                "entry not found in table {}",
                self.name
            ))
        })
    }

    /// All entries, in match key order
    pub fn entries(&self) -> impl Iterator<Item = &TableEntry> {
        self.entries.values()
    }

    fn full(&self) -> bool {
        self.usage.size > 0 && self.entries.len() >= self.usage.size as usize
    }

    /// Check whether `entry` could be inserted, without changing anything.
    pub fn dry_run_insert(&self, entry: &TableEntry) -> BcmdResult<()> {
        if self.has_entry(entry) {
            return Err(BcmdError::Exists(format!(
                "entry already present in table {}",
                self.name
            )));
        }
        if self.full() {
            return Err(BcmdError::NoResource(format!(
                "table {} is full ({} entries)",
                self.name, self.usage.size
            )));
        }
        Ok(())
    }

    pub fn insert(&mut self, entry: &TableEntry) -> BcmdResult<()> {
        if let Err(e) = self.dry_run_insert(entry) {
            match e {
                BcmdError::Exists(_) => self.usage.collisions += 1,
                BcmdError::NoResource(_) => self.usage.exhaustion += 1,
                _ => {}
            }
            return Err(e);
        }
        self.entries.insert(entry.match_key(), entry.clone());
        self.usage.inserts += 1;
        self.usage.occupancy = self.entries.len() as u32;
        Ok(())
    }

    pub fn modify(&mut self, entry: &TableEntry) -> BcmdResult<TableEntry> {
        match self.entries.get_mut(&entry.match_key()) {
            Some(old) => {
                self.usage.updates += 1;
                Ok(std::mem::replace(old, entry.clone()))
            }
            None => {
                self.usage.update_misses += 1;
                Err(BcmdError::Missing(format!(
                    "entry to modify not found in table {}",
                    self.name
                )))
            }
        }
    }

    pub fn delete(&mut self, entry: &TableEntry) -> BcmdResult<TableEntry> {
        match self.entries.remove(&entry.match_key()) {
            Some(old) => {
                self.usage.deletes += 1;
                self.usage.occupancy = self.entries.len() as u32;
                Ok(old)
            }
            None => {
                self.usage.delete_misses += 1;
                Err(BcmdError::Missing(format!(
                    "entry to delete not found in table {}",
                    self.name
                )))
            }
        }
    }
}

impl EntryTable for FlowTable {
    fn flow_table(&self) -> &FlowTable {
        self
    }

    fn insert_entry(&mut self, entry: &TableEntry) -> BcmdResult<()> {
        self.insert(entry)
    }

    fn modify_entry(&mut self, entry: &TableEntry) -> BcmdResult<TableEntry> {
        self.modify(entry)
    }

    fn delete_entry(&mut self, entry: &TableEntry) -> BcmdResult<TableEntry> {
        self.delete(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::p4::{FieldMatch, TableAction};

    fn def(size: usize) -> P4TableDef {
        P4TableDef {
            id: 10,
            name: "l2_table".to_string(),
            match_fields: vec![1],
            size,
            is_const: false,
            table_type: Default::default(),
            stage: Default::default(),
        }
    }

    fn entry(v: u8) -> TableEntry {
        TableEntry {
            table_id: 10,
            matches: vec![FieldMatch::exact(1, &[v])],
            priority: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_lookup_delete() -> anyhow::Result<()> {
        let mut t = FlowTable::new(&def(4));
        t.insert(&entry(1))?;
        assert!(t.has_entry(&entry(1)));
        assert_eq!(t.lookup(&entry(1))?, &entry(1));
        assert!(matches!(t.insert(&entry(1)), Err(BcmdError::Exists(_))));
        assert_eq!(t.usage().collisions, 1);

        let removed = t.delete(&entry(1))?;
        assert_eq!(removed, entry(1));
        assert!(t.is_empty());
        assert!(matches!(t.delete(&entry(1)), Err(BcmdError::Missing(_))));
        assert_eq!(t.usage().delete_misses, 1);
        Ok(())
    }

    #[test]
    fn test_modify_returns_previous() -> anyhow::Result<()> {
        let mut t = FlowTable::new(&def(4));
        let mut e = entry(1);
        e.action = Some(TableAction::ActionProfileMemberId(1));
        t.insert(&e)?;

        let mut updated = e.clone();
        updated.action = Some(TableAction::ActionProfileMemberId(2));
        let old = t.modify(&updated)?;
        assert_eq!(old.member_id(), Some(1));
        assert_eq!(t.lookup(&e)?.member_id(), Some(2));
        assert!(t.modify(&entry(2)).is_err());
        Ok(())
    }

    #[test]
    fn test_capacity() -> anyhow::Result<()> {
        let mut t = FlowTable::new(&def(1));
        t.insert(&entry(1))?;
        assert!(matches!(
            t.dry_run_insert(&entry(2)),
            Err(BcmdError::NoResource(_))
        ));
        assert!(t.insert(&entry(2)).is_err());
        assert_eq!(t.entry_count(), 1);
        assert_eq!(t.usage().exhaustion, 1);
        Ok(())
    }
}
