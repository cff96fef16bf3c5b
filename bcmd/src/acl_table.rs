// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A logical ACL table: a flow table bound to a field processor stage, a
//! fixed set of match fields, and (once installed) a physical table in the
//! ASIC.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use aal::AclStage;
use common::p4::{MatchKey, P4HeaderType, P4TableDef, PipelineStage, TableEntry};

use crate::flow_table::{EntryTable, FlowTable};
use crate::types::*;

/// Map the pipeline stage a table is annotated with to the field processor
/// that implements it.  Stages that are not ACL stages map to
/// `AclStage::Unknown`.
pub fn p4_pipeline_to_acl_stage(stage: PipelineStage) -> AclStage {
    match stage {
        PipelineStage::VlanAcl => AclStage::Vfp,
        PipelineStage::IngressAcl => AclStage::Ifp,
        PipelineStage::EgressAcl => AclStage::Efp,
        _ => AclStage::Unknown,
    }
}

#[derive(Debug, Clone)]
pub struct AclTable {
    table: FlowTable,
    stage: AclStage,
    priority: i32,
    match_fields: BTreeSet<u32>,
    /// Header validity conditions the pipeline applies before this table
    const_conditions: BTreeMap<P4HeaderType, bool>,
    physical_table_id: Option<i32>,
    udf_set_id: Option<u32>,
    udf_match_fields: BTreeSet<u32>,
    flow_ids: BTreeMap<MatchKey, i32>,
}

impl AclTable {
    pub fn new(
        def: &P4TableDef,
        stage: AclStage,
        priority: i32,
        const_conditions: BTreeMap<P4HeaderType, bool>,
    ) -> Self {
        AclTable {
            table: FlowTable::new(def),
            stage,
            priority,
            match_fields: def.match_fields.iter().copied().collect(),
            const_conditions,
            physical_table_id: None,
            udf_set_id: None,
            udf_match_fields: BTreeSet::new(),
            flow_ids: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.table.id()
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn stage(&self) -> AclStage {
        self.stage
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn match_fields(&self) -> &BTreeSet<u32> {
        &self.match_fields
    }

    pub fn has_field(&self, field_id: u32) -> bool {
        self.match_fields.contains(&field_id)
    }

    pub fn const_conditions(&self) -> &BTreeMap<P4HeaderType, bool> {
        &self.const_conditions
    }

    pub fn physical_table_id(&self) -> Option<i32> {
        self.physical_table_id
    }

    pub fn set_physical_table_id(&mut self, id: i32) {
        self.physical_table_id = Some(id);
    }

    pub fn udf_set_id(&self) -> Option<u32> {
        self.udf_set_id
    }

    pub fn udf_match_fields(&self) -> &BTreeSet<u32> {
        &self.udf_match_fields
    }

    pub fn has_udf(&self) -> bool {
        !self.udf_match_fields.is_empty()
    }

    pub fn is_udf_field(&self, field_id: u32) -> bool {
        self.udf_match_fields.contains(&field_id)
    }

    pub fn entry_count(&self) -> usize {
        self.table.entry_count()
    }

    pub fn size(&self) -> u32 {
        self.table.size()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TableEntry> {
        self.table.entries()
    }

    pub fn lookup(&self, entry: &TableEntry) -> BcmdResult<&TableEntry> {
        self.table.lookup(entry)
    }

    pub fn has_entry(&self, entry: &TableEntry) -> bool {
        self.table.has_entry(entry)
    }

    /// Record that `field_id` is matched through the given UDF set.  A table
    /// draws all of its UDF fields from a single set.
    pub fn mark_udf_match_field(
        &mut self,
        field_id: u32,
        udf_set_id: u32,
    ) -> BcmdResult<()> {
        if !self.has_field(field_id) {
            return Err(BcmdError::Invalid(format!(
                "field {field_id} is not a match field of table {}",
                self.name()
            )));
        }
        match self.udf_set_id {
            Some(id) if id != udf_set_id => {
                return Err(BcmdError::Invalid(format!(
                    "table {} already uses udf set {id}, cannot use {udf_set_id}",
                    self.name()
                )))
            }
            _ => self.udf_set_id = Some(udf_set_id),
        }
        self.udf_match_fields.insert(field_id);
        Ok(())
    }

    /// Check whether `entry` could be inserted, without changing anything.
    pub fn dry_run_insert(&self, entry: &TableEntry) -> BcmdResult<()> {
        self.table.dry_run_insert(entry)?;
        if let Some(m) =
            entry.matches.iter().find(|m| !self.has_field(m.field_id))
        {
            return Err(BcmdError::Invalid(format!(
                "field {} is not a match field of table {}",
                m.field_id,
                self.name()
            )));
        }
        Ok(())
    }

    pub fn insert(&mut self, entry: &TableEntry) -> BcmdResult<()> {
        self.dry_run_insert(entry)?;
        self.table.insert(entry)
    }

    /// Insert an entry along with the id the ASIC assigned its flow.
    pub fn insert_with_flow_id(
        &mut self,
        entry: &TableEntry,
        flow_id: i32,
    ) -> BcmdResult<()> {
        let key = entry.match_key();
        if let Some(existing) = self.flow_ids.get(&key) {
            return Err(BcmdError::Internal(format!(
                "table {} already maps this entry to flow {existing}",
                self.name()
            )));
        }
        self.insert(entry)?;
        self.flow_ids.insert(key, flow_id);
        Ok(())
    }

    /// Attach a flow id to an entry that is already present.
    pub fn set_flow_id(
        &mut self,
        entry: &TableEntry,
        flow_id: i32,
    ) -> BcmdResult<()> {
        if !self.has_entry(entry) {
            return Err(BcmdError::Missing(format!(
                "entry not found in table {}",
                self.name()
            )));
        }
        self.flow_ids.insert(entry.match_key(), flow_id);
        Ok(())
    }

    /// Replace an entry.  The flow id of the entry, if any, is kept.
    pub fn modify(&mut self, entry: &TableEntry) -> BcmdResult<TableEntry> {
        self.table.modify(entry)
    }

    pub fn delete(&mut self, entry: &TableEntry) -> BcmdResult<TableEntry> {
        // The entry may never have been given a flow id.
        self.flow_ids.remove(&entry.match_key());
        self.table.delete(entry)
    }

    /// Return the ASIC flow id of an entry.
    pub fn flow_id(&self, entry: &TableEntry) -> BcmdResult<i32> {
        if !self.has_entry(entry) {
            return Err(BcmdError::Missing(format!(
                "entry not found in table {}",
                self.name()
            )));
        }
        self.flow_ids.get(&entry.match_key()).copied().ok_or_else(|| {
            BcmdError::NotInitialized(format!(
                "entry in table {} has no flow id",
                self.name()
            ))
        })
    }
}

impl EntryTable for AclTable {
    fn flow_table(&self) -> &FlowTable {
        &self.table
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
