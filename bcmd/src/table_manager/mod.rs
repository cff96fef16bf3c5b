// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The software record of everything programmed on a unit: table entries,
//! action profile members and groups, multicast groups and clone sessions.
//!
//! The table manager never talks to the hardware itself.  Callers make the
//! hardware call first and only update the table manager once it has
//! succeeded, so a hardware failure never leaves a trace here.  The
//! translation of P4 objects into their vendor form lives in the
//! `translate`, `nexthop` and `readback` submodules.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use slog::{debug, error, info, o};

use aal::{NexthopType, Unit};
use common::p4::{
    ActionProfileGroup, ActionProfileMember, CloneSessionEntry,
    DirectMeterEntry, MulticastGroupEntry, TableEntry,
};

use crate::acl_table::AclTable;
use crate::chassis::ChassisRo;
use crate::flow_table::{EntryTable, FlowTable};
use crate::mapper::P4TableMapper;
use crate::types::*;

mod nexthop;
mod readback;
mod translate;

pub use translate::{
    const_conditions_to_vendor_fields, fill_meter_config, p4_field_to_vendor_field,
};

/// What the table manager knows about the egress object behind an action
/// profile member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonMultipathNexthopInfo {
    pub egress_intf_id: i32,
    pub nexthop_type: NexthopType,
    /// Logical port or trunk port, depending on the nexthop type
    pub port: i32,
    /// Number of groups the member belongs to
    pub group_ref_count: u32,
    /// Number of flows pointing directly at the member
    pub flow_ref_count: u32,
}

/// What the table manager knows about the egress object behind an action
/// profile group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipathNexthopInfo {
    pub egress_intf_id: i32,
    pub flow_ref_count: u32,
    pub member_id_to_weight: BTreeMap<u32, u32>,
}

pub struct TableManager {
    log: slog::Logger,
    unit: Unit,
    node_id: u64,
    port_id_to_logical_port: BTreeMap<u32, i32>,
    trunk_id_to_trunk_port: BTreeMap<u32, i32>,
    /// Non-ACL tables, created on first use and dropped once empty
    generic_tables: BTreeMap<u32, FlowTable>,
    acl_tables: BTreeMap<u32, AclTable>,
    members: BTreeMap<u32, ActionProfileMember>,
    groups: BTreeMap<u32, ActionProfileGroup>,
    member_nexthops: BTreeMap<u32, NonMultipathNexthopInfo>,
    group_nexthops: BTreeMap<u32, MultipathNexthopInfo>,
    /// The groups with a member egressing through each logical port
    port_to_group_ids: BTreeMap<i32, BTreeSet<u32>>,
    multicast_groups: BTreeMap<u32, MulticastGroupEntry>,
    clone_sessions: BTreeMap<u32, CloneSessionEntry>,
}

impl TableManager {
    pub fn new(log: &slog::Logger, unit: Unit) -> Self {
        TableManager {
            log: log.new(o!("unit" => "table_manager", "bcm_unit" => unit)),
            unit,
            node_id: 0,
            port_id_to_logical_port: BTreeMap::new(),
            trunk_id_to_trunk_port: BTreeMap::new(),
            generic_tables: BTreeMap::new(),
            acl_tables: BTreeMap::new(),
            members: BTreeMap::new(),
            groups: BTreeMap::new(),
            member_nexthops: BTreeMap::new(),
            group_nexthops: BTreeMap::new(),
            port_to_group_ids: BTreeMap::new(),
            multicast_groups: BTreeMap::new(),
            clone_sessions: BTreeMap::new(),
        }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Rebuild the port and trunk translation maps for the node bound to
    /// this unit.
    pub fn push_chassis_config(
        &mut self,
        chassis: &dyn ChassisRo,
        node_id: u64,
    ) -> BcmdResult<()> {
        let ports = chassis.port_id_to_sdk_port(node_id)?;
        let trunks = chassis.trunk_id_to_sdk_trunk(node_id)?;

        let mut port_id_to_logical_port = BTreeMap::new();
        for (port_id, sdk) in ports {
            if sdk.unit != self.unit {
                return Err(BcmdError::Internal(format!(
                    "port {port_id} of node {node_id} is on unit {}, not {}",
                    sdk.unit, self.unit
                )));
            }
            port_id_to_logical_port.insert(port_id, sdk.logical_port);
        }
        let mut trunk_id_to_trunk_port = BTreeMap::new();
        for (trunk_id, sdk) in trunks {
            if sdk.unit != self.unit {
                return Err(BcmdError::Internal(format!(
                    "trunk {trunk_id} of node {node_id} is on unit {}, not {}",
                    sdk.unit, self.unit
                )));
            }
            trunk_id_to_trunk_port.insert(trunk_id, sdk.trunk_port);
        }

        info!(self.log, "pushed chassis config";
            "node_id" => node_id,
            "ports" => port_id_to_logical_port.len(),
            "trunks" => trunk_id_to_trunk_port.len());
        self.node_id = node_id;
        self.port_id_to_logical_port = port_id_to_logical_port;
        self.trunk_id_to_trunk_port = trunk_id_to_trunk_port;
        Ok(())
    }

    pub fn verify_chassis_config(&self, node_id: u64) -> BcmdResult<()> {
        if node_id == 0 {
            return Err(BcmdError::Invalid("invalid node id 0".to_string()));
        }
        if self.node_id > 0 && self.node_id != node_id {
            return Err(BcmdError::RebootRequired(format!(
                "detected a change in the node id ({} vs {node_id})",
                self.node_id
            )));
        }
        Ok(())
    }

    /// Forget the chassis maps and the nexthop objects.  ACL tables stay
    /// recorded: they are still programmed, and the next pipeline push needs
    /// them to tear the hardware tables down.
    pub fn shutdown(&mut self) {
        info!(self.log, "shutting down");
        self.port_id_to_logical_port.clear();
        self.trunk_id_to_trunk_port.clear();
        self.generic_tables.clear();
        self.members.clear();
        self.groups.clear();
        self.member_nexthops.clear();
        self.group_nexthops.clear();
        self.port_to_group_ids.clear();
        self.multicast_groups.clear();
        self.clone_sessions.clear();
    }

    fn entry_table(&self, table_id: u32) -> Option<&dyn EntryTable> {
        if let Some(t) = self.generic_tables.get(&table_id) {
            return Some(t);
        }
        self.acl_tables.get(&table_id).map(|t| t as &dyn EntryTable)
    }

    fn entry_table_mut(
        &mut self,
        table_id: u32,
    ) -> Option<&mut dyn EntryTable> {
        if let Some(t) = self.generic_tables.get_mut(&table_id) {
            return Some(t);
        }
        self.acl_tables
            .get_mut(&table_id)
            .map(|t| t as &mut dyn EntryTable)
    }

    pub fn has_table(&self, table_id: u32) -> bool {
        self.entry_table(table_id).is_some()
    }

    pub fn is_acl_table(&self, table_id: u32) -> bool {
        self.acl_tables.contains_key(&table_id)
    }

    // An entry may only point at members and groups that exist.
    fn check_action_refs(&self, entry: &TableEntry) -> BcmdResult<()> {
        if let Some(id) = entry.member_id() {
            if !self.member_nexthops.contains_key(&id) {
                return Err(BcmdError::Missing(format!(
                    "action profile member {id}"
                )));
            }
        }
        if let Some(id) = entry.group_id() {
            if !self.group_nexthops.contains_key(&id) {
                return Err(BcmdError::Missing(format!(
                    "action profile group {id}"
                )));
            }
        }
        Ok(())
    }

    fn update_action_refs(
        &mut self,
        entry: &TableEntry,
        delta: i32,
    ) -> BcmdResult<()> {
        if let Some(id) = entry.member_id() {
            self.update_flow_ref_count_for_member(id, delta)?;
        }
        if let Some(id) = entry.group_id() {
            self.update_flow_ref_count_for_group(id, delta)?;
        }
        Ok(())
    }

    /// Record a new entry, creating the table it belongs to if this is the
    /// first entry of a non-ACL table.
    pub fn add_table_entry(
        &mut self,
        entry: &TableEntry,
        mapper: &dyn P4TableMapper,
    ) -> BcmdResult<()> {
        if entry.table_id == 0 {
            return Err(BcmdError::Invalid(
                "table entry has no table id".to_string(),
            ));
        }
        self.check_action_refs(entry)?;
        match self.entry_table_mut(entry.table_id) {
            Some(table) => table.insert_entry(entry)?,
            None => {
                let def = mapper.lookup_table(entry.table_id)?;
                let mut table = FlowTable::new(&def);
                table.insert(entry)?;
                debug!(self.log, "created table";
                    "table_id" => entry.table_id,
                    "name" => table.name());
                self.generic_tables.insert(entry.table_id, table);
            }
        }
        self.update_action_refs(entry, 1)
    }

    /// Replace an entry, moving the flow reference from the member or group
    /// the old entry pointed at to the one the new entry points at.
    pub fn update_table_entry(&mut self, entry: &TableEntry) -> BcmdResult<()> {
        self.check_action_refs(entry)?;
        let table_id = entry.table_id;
        let old = self
            .entry_table_mut(table_id)
            .ok_or_else(|| BcmdError::Missing(format!("table {table_id}")))?
            .modify_entry(entry)?;
        if old.member_id() == entry.member_id()
            && old.group_id() == entry.group_id()
        {
            return Ok(());
        }
        self.update_action_refs(&old, -1)?;
        self.update_action_refs(entry, 1)
    }

    /// Remove an entry, returning the copy that was stored.  A non-ACL table
    /// left empty is forgotten.
    pub fn delete_table_entry(
        &mut self,
        entry: &TableEntry,
    ) -> BcmdResult<TableEntry> {
        let table_id = entry.table_id;
        let old = self
            .entry_table_mut(table_id)
            .ok_or_else(|| BcmdError::Missing(format!("table {table_id}")))?
            .delete_entry(entry)?;
        self.update_action_refs(&old, -1)?;
        if self
            .generic_tables
            .get(&table_id)
            .map(|t| t.is_empty())
            .unwrap_or(false)
        {
            debug!(self.log, "dropping empty table"; "table_id" => table_id);
            self.generic_tables.remove(&table_id);
        }
        Ok(old)
    }

    /// Record the meter configuration of an ACL entry.
    pub fn update_table_entry_meter(
        &mut self,
        meter: &DirectMeterEntry,
    ) -> BcmdResult<()> {
        let table_id = meter.table_entry.table_id;
        let table = self.acl_tables.get_mut(&table_id).ok_or_else(|| {
            BcmdError::Invalid(format!(
                "meters are only supported on acl tables, not table \
                 {table_id}"
            ))
        })?;
        let mut entry = table.lookup(&meter.table_entry)?.clone();
        entry.meter_config = meter.config;
        table.modify(&entry)?;
        Ok(())
    }

    /// Return the stored copy of an entry.
    pub fn lookup_table_entry(
        &self,
        entry: &TableEntry,
    ) -> BcmdResult<TableEntry> {
        let table_id = entry.table_id;
        self.entry_table(table_id)
            .ok_or_else(|| BcmdError::Missing(format!("table {table_id}")))?
            .flow_table()
            .lookup(entry)
            .cloned()
    }

    /// Return the entries of the given tables, or of every table if no ids
    /// are given.  Entries of const tables are owned by the switch and are
    /// never reported.
    pub fn read_table_entries(
        &self,
        table_ids: &BTreeSet<u32>,
    ) -> Vec<TableEntry> {
        let tables = self
            .generic_tables
            .values()
            .map(|t| t as &dyn EntryTable)
            .chain(self.acl_tables.values().map(|t| t as &dyn EntryTable));
        let mut entries = Vec::new();
        for t in tables {
            let t = t.flow_table();
            if t.is_const() {
                continue;
            }
            if !table_ids.is_empty() && !table_ids.contains(&t.id()) {
                continue;
            }
            entries.extend(t.entries().cloned());
        }
        entries
    }

    pub fn add_acl_table(&mut self, table: AclTable) -> BcmdResult<()> {
        let id = table.id();
        if self.has_table(id) {
            return Err(BcmdError::Exists(format!("table {id}")));
        }
        debug!(self.log, "added acl table";
            "table_id" => id,
            "name" => table.name(),
            "physical_table_id" => table.physical_table_id());
        self.acl_tables.insert(id, table);
        Ok(())
    }

    pub fn acl_table(&self, table_id: u32) -> BcmdResult<&AclTable> {
        match self.acl_tables.get(&table_id) {
            Some(t) => Ok(t),
            None if self.generic_tables.contains_key(&table_id) => {
                Err(BcmdError::Invalid(format!(
                    "table {table_id} is not an acl table"
                )))
            }
            None => Err(BcmdError::Missing(format!("acl table {table_id}"))),
        }
    }

    pub fn all_acl_table_ids(&self) -> BTreeSet<u32> {
        self.acl_tables.keys().copied().collect()
    }

    /// Record a new ACL entry along with the id of its flow in the hardware.
    pub fn add_acl_table_entry(
        &mut self,
        entry: &TableEntry,
        flow_id: i32,
    ) -> BcmdResult<()> {
        self.check_action_refs(entry)?;
        let table_id = entry.table_id;
        self.acl_tables
            .get_mut(&table_id)
            .ok_or_else(|| BcmdError::Missing(format!("acl table {table_id}")))?
            .insert_with_flow_id(entry, flow_id)?;
        self.update_action_refs(entry, 1)
    }

    /// Forget an ACL table and every entry in it.  The caller is responsible
    /// for removing them from the hardware.
    pub fn delete_table(&mut self, table_id: u32) -> BcmdResult<()> {
        let entries: Vec<TableEntry> =
            self.acl_table(table_id)?.entries().cloned().collect();
        for entry in &entries {
            if let Err(e) = self.delete_table_entry(entry) {
                error!(self.log, "failed to delete entry of deleted table";
                    "table_id" => table_id,
                    "error" => %e);
                return Err(BcmdError::Internal(format!(
                    "deleting entries of table {table_id}: {e}"
                )));
            }
        }
        self.acl_tables.remove(&table_id);
        debug!(self.log, "deleted acl table"; "table_id" => table_id);
        Ok(())
    }

    fn update_flow_ref_count_for_member(
        &mut self,
        member_id: u32,
        delta: i32,
    ) -> BcmdResult<()> {
        let info = self.member_nexthops.get_mut(&member_id).ok_or_else(|| {
            BcmdError::Missing(format!("action profile member {member_id}"))
        })?;
        info.flow_ref_count = info
            .flow_ref_count
            .checked_add_signed(delta)
            .ok_or_else(|| {
                BcmdError::Internal(format!(
                    "flow reference count of member {member_id} would go \
                     negative"
                ))
            })?;
        Ok(())
    }

    fn update_flow_ref_count_for_group(
        &mut self,
        group_id: u32,
        delta: i32,
    ) -> BcmdResult<()> {
        let info = self.group_nexthops.get_mut(&group_id).ok_or_else(|| {
            BcmdError::Missing(format!("action profile group {group_id}"))
        })?;
        info.flow_ref_count = info
            .flow_ref_count
            .checked_add_signed(delta)
            .ok_or_else(|| {
                BcmdError::Internal(format!(
                    "flow reference count of group {group_id} would go \
                     negative"
                ))
            })?;
        Ok(())
    }

    /// Record a member whose egress object has been created in the
    /// hardware.
    pub fn add_action_profile_member(
        &mut self,
        member: &ActionProfileMember,
        nexthop_type: NexthopType,
        egress_intf_id: i32,
        port: i32,
    ) -> BcmdResult<()> {
        if member.member_id == 0 || member.action_profile_id == 0 {
            return Err(BcmdError::Invalid(format!(
                "member needs non-zero member id and action profile id: \
                 {member:?}"
            )));
        }
        let member_id = member.member_id;
        if let Some((other, _)) = self
            .member_nexthops
            .iter()
            .find(|(_, info)| info.egress_intf_id == egress_intf_id)
        {
            return Err(BcmdError::Exists(format!(
                "egress intf {egress_intf_id} of member {member_id} is \
                 already assigned to member {other}"
            )));
        }
        if self.member_nexthops.contains_key(&member_id) {
            return Err(BcmdError::Exists(format!(
                "action profile member {member_id}"
            )));
        }

        self.member_nexthops.insert(
            member_id,
            NonMultipathNexthopInfo {
                egress_intf_id,
                nexthop_type,
                port,
                group_ref_count: 0,
                flow_ref_count: 0,
            },
        );
        self.members.insert(member_id, member.clone());
        debug!(self.log, "added member";
            "member_id" => member_id,
            "egress_intf_id" => egress_intf_id,
            "type" => %nexthop_type);
        Ok(())
    }

    /// Record a group whose egress object has been created in the hardware.
    /// Every member of the group must already exist.
    pub fn add_action_profile_group(
        &mut self,
        group: &ActionProfileGroup,
        egress_intf_id: i32,
    ) -> BcmdResult<()> {
        if group.group_id == 0 || group.action_profile_id == 0 {
            return Err(BcmdError::Invalid(format!(
                "group needs non-zero group id and action profile id: \
                 {group:?}"
            )));
        }
        let group_id = group.group_id;
        if self.group_nexthops.contains_key(&group_id) {
            return Err(BcmdError::Exists(format!(
                "action profile group {group_id}"
            )));
        }
        if let Some((other, _)) = self
            .group_nexthops
            .iter()
            .find(|(_, info)| info.egress_intf_id == egress_intf_id)
        {
            return Err(BcmdError::Exists(format!(
                "egress intf {egress_intf_id} of group {group_id} is already \
                 assigned to group {other}"
            )));
        }

        let member_id_to_weight = self.member_weights(group)?;
        for member_id in member_id_to_weight.keys() {
            self.add_group_ref(group_id, *member_id)?;
        }
        self.group_nexthops.insert(
            group_id,
            MultipathNexthopInfo {
                egress_intf_id,
                flow_ref_count: 0,
                member_id_to_weight,
            },
        );
        self.groups.insert(group_id, group.clone());
        debug!(self.log, "added group";
            "group_id" => group_id,
            "egress_intf_id" => egress_intf_id,
            "members" => group.members.len());
        Ok(())
    }

    // Check that every member of a group exists, and collect their weights.
    // A weight below 1 is treated as 1.
    fn member_weights(
        &self,
        group: &ActionProfileGroup,
    ) -> BcmdResult<BTreeMap<u32, u32>> {
        let mut weights = BTreeMap::new();
        for m in &group.members {
            if !self.member_nexthops.contains_key(&m.member_id) {
                return Err(BcmdError::Missing(format!(
                    "member {} of group {}",
                    m.member_id, group.group_id
                )));
            }
            weights.insert(m.member_id, m.weight.max(1) as u32);
        }
        Ok(weights)
    }

    fn add_group_ref(&mut self, group_id: u32, member_id: u32) -> BcmdResult<()> {
        let info = self.member_nexthops.get_mut(&member_id).ok_or_else(|| {
            BcmdError::Missing(format!("action profile member {member_id}"))
        })?;
        info.group_ref_count += 1;
        if info.nexthop_type == NexthopType::Port {
            self.port_to_group_ids
                .entry(info.port)
                .or_default()
                .insert(group_id);
        }
        Ok(())
    }

    // Drop a member's reference to a group.  The group is only removed from
    // the port index if no other remaining member shares the port.
    fn remove_group_ref(
        &mut self,
        group_id: u32,
        member_id: u32,
        remaining_ports: &BTreeSet<i32>,
    ) -> BcmdResult<()> {
        let info = self.member_nexthops.get_mut(&member_id).ok_or_else(|| {
            BcmdError::Missing(format!("action profile member {member_id}"))
        })?;
        if info.group_ref_count == 0 {
            return Err(BcmdError::Internal(format!(
                "member {member_id} has no group references to drop"
            )));
        }
        info.group_ref_count -= 1;
        if info.nexthop_type == NexthopType::Port
            && !remaining_ports.contains(&info.port)
        {
            // Another removed member on the same port may have emptied the
            // set already.
            let port = info.port;
            if let Some(groups) = self.port_to_group_ids.get_mut(&port) {
                groups.remove(&group_id);
                if groups.is_empty() {
                    self.port_to_group_ids.remove(&port);
                }
            }
        }
        Ok(())
    }

    /// Update the egress object type and port of an existing member.
    pub fn update_action_profile_member(
        &mut self,
        member: &ActionProfileMember,
        nexthop_type: NexthopType,
        port: i32,
    ) -> BcmdResult<()> {
        let member_id = member.member_id;
        let info = self.member_nexthops.get_mut(&member_id).ok_or_else(|| {
            BcmdError::Missing(format!("action profile member {member_id}"))
        })?;
        let moved = info.nexthop_type != nexthop_type || info.port != port;
        info.nexthop_type = nexthop_type;
        info.port = port;
        self.members.insert(member_id, member.clone());

        if moved {
            for group_id in self.groups_for_member(member_id) {
                self.reindex_group_ports(group_id);
            }
        }
        Ok(())
    }

    // Recompute the port index entries of a single group.
    fn reindex_group_ports(&mut self, group_id: u32) {
        self.port_to_group_ids.retain(|_, groups| {
            groups.remove(&group_id);
            !groups.is_empty()
        });
        let Some(group) = self.group_nexthops.get(&group_id) else {
            return;
        };
        for member_id in group.member_id_to_weight.keys() {
            if let Some(info) = self.member_nexthops.get(member_id) {
                if info.nexthop_type == NexthopType::Port {
                    self.port_to_group_ids
                        .entry(info.port)
                        .or_default()
                        .insert(group_id);
                }
            }
        }
    }

    /// Replace the membership of an existing group.
    pub fn update_action_profile_group(
        &mut self,
        group: &ActionProfileGroup,
    ) -> BcmdResult<()> {
        let group_id = group.group_id;
        let old_weights = self
            .group_nexthops
            .get(&group_id)
            .ok_or_else(|| {
                BcmdError::Missing(format!("action profile group {group_id}"))
            })?
            .member_id_to_weight
            .clone();
        let new_weights = self.member_weights(group)?;

        let new_ports: BTreeSet<i32> = new_weights
            .keys()
            .filter_map(|id| self.member_nexthops.get(id))
            .filter(|info| info.nexthop_type == NexthopType::Port)
            .map(|info| info.port)
            .collect();
        for member_id in new_weights.keys() {
            if !old_weights.contains_key(member_id) {
                self.add_group_ref(group_id, *member_id)?;
            }
        }
        for member_id in old_weights.keys() {
            if !new_weights.contains_key(member_id) {
                self.remove_group_ref(group_id, *member_id, &new_ports)?;
            }
        }

        if let Some(info) = self.group_nexthops.get_mut(&group_id) {
            info.member_id_to_weight = new_weights;
        }
        self.groups.insert(group_id, group.clone());
        Ok(())
    }

    /// Forget a member.  It may not be used by any flow or group.
    pub fn delete_action_profile_member(
        &mut self,
        member: &ActionProfileMember,
    ) -> BcmdResult<()> {
        let member_id = member.member_id;
        let info = self.member_nexthops.get(&member_id).ok_or_else(|| {
            BcmdError::Missing(format!("action profile member {member_id}"))
        })?;
        if info.flow_ref_count != 0 || info.group_ref_count != 0 {
            return Err(BcmdError::FailedPrecondition(format!(
                "member {member_id} is still used by {} flows and {} groups",
                info.flow_ref_count, info.group_ref_count
            )));
        }
        self.member_nexthops.remove(&member_id);
        self.members.remove(&member_id);
        debug!(self.log, "deleted member"; "member_id" => member_id);
        Ok(())
    }

    /// Forget a group, releasing its members.  It may not be used by any
    /// flow.
    pub fn delete_action_profile_group(
        &mut self,
        group: &ActionProfileGroup,
    ) -> BcmdResult<()> {
        let group_id = group.group_id;
        let info = self.group_nexthops.get(&group_id).ok_or_else(|| {
            BcmdError::Missing(format!("action profile group {group_id}"))
        })?;
        if info.flow_ref_count != 0 {
            return Err(BcmdError::FailedPrecondition(format!(
                "group {group_id} is still used by {} flows",
                info.flow_ref_count
            )));
        }
        let member_ids: Vec<u32> =
            info.member_id_to_weight.keys().copied().collect();
        for member_id in member_ids {
            self.remove_group_ref(group_id, member_id, &BTreeSet::new())?;
        }
        self.group_nexthops.remove(&group_id);
        self.groups.remove(&group_id);
        debug!(self.log, "deleted group"; "group_id" => group_id);
        Ok(())
    }

    pub fn add_multicast_group(
        &mut self,
        group: &MulticastGroupEntry,
    ) -> BcmdResult<()> {
        let id = group.multicast_group_id;
        if id == 0 {
            return Err(BcmdError::Invalid(
                "multicast group id must be non-zero".to_string(),
            ));
        }
        if self.multicast_groups.contains_key(&id) {
            return Err(BcmdError::Exists(format!("multicast group {id}")));
        }
        self.multicast_groups.insert(id, group.clone());
        Ok(())
    }

    pub fn delete_multicast_group(
        &mut self,
        group: &MulticastGroupEntry,
    ) -> BcmdResult<()> {
        let id = group.multicast_group_id;
        self.multicast_groups
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| BcmdError::Missing(format!("multicast group {id}")))
    }

    pub fn add_clone_session(
        &mut self,
        session: &CloneSessionEntry,
    ) -> BcmdResult<()> {
        let id = session.session_id;
        if id == 0 {
            return Err(BcmdError::Invalid(
                "clone session id must be non-zero".to_string(),
            ));
        }
        if self.clone_sessions.contains_key(&id) {
            return Err(BcmdError::Exists(format!("clone session {id}")));
        }
        self.clone_sessions.insert(id, session.clone());
        Ok(())
    }

    pub fn delete_clone_session(
        &mut self,
        session: &CloneSessionEntry,
    ) -> BcmdResult<()> {
        let id = session.session_id;
        self.clone_sessions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| BcmdError::Missing(format!("clone session {id}")))
    }

    pub fn action_profile_member_exists(&self, member_id: u32) -> bool {
        self.member_nexthops.contains_key(&member_id)
    }

    pub fn action_profile_group_exists(&self, group_id: u32) -> bool {
        self.group_nexthops.contains_key(&group_id)
    }

    pub fn non_multipath_nexthop_info(
        &self,
        member_id: u32,
    ) -> BcmdResult<NonMultipathNexthopInfo> {
        self.member_nexthops.get(&member_id).cloned().ok_or_else(|| {
            BcmdError::Missing(format!("action profile member {member_id}"))
        })
    }

    pub fn multipath_nexthop_info(
        &self,
        group_id: u32,
    ) -> BcmdResult<MultipathNexthopInfo> {
        self.group_nexthops.get(&group_id).cloned().ok_or_else(|| {
            BcmdError::Missing(format!("action profile group {group_id}"))
        })
    }

    /// The ids of the groups a member belongs to.
    pub fn groups_for_member(&self, member_id: u32) -> BTreeSet<u32> {
        self.group_nexthops
            .iter()
            .filter(|(_, g)| g.member_id_to_weight.contains_key(&member_id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Return the members of the given action profiles, or of every profile
    /// if no ids are given.
    pub fn read_action_profile_members(
        &self,
        action_profile_ids: &BTreeSet<u32>,
    ) -> Vec<ActionProfileMember> {
        self.members
            .values()
            .filter(|m| {
                action_profile_ids.is_empty()
                    || action_profile_ids.contains(&m.action_profile_id)
            })
            .cloned()
            .collect()
    }

    pub fn read_action_profile_groups(
        &self,
        action_profile_ids: &BTreeSet<u32>,
    ) -> Vec<ActionProfileGroup> {
        self.groups
            .values()
            .filter(|g| {
                action_profile_ids.is_empty()
                    || action_profile_ids.contains(&g.action_profile_id)
            })
            .cloned()
            .collect()
    }

    pub fn read_multicast_groups(
        &self,
        group_ids: &BTreeSet<u32>,
    ) -> Vec<MulticastGroupEntry> {
        self.multicast_groups
            .values()
            .filter(|g| {
                group_ids.is_empty() || group_ids.contains(&g.multicast_group_id)
            })
            .cloned()
            .collect()
    }

    pub fn read_clone_sessions(
        &self,
        session_ids: &BTreeSet<u32>,
    ) -> Vec<CloneSessionEntry> {
        self.clone_sessions
            .values()
            .filter(|s| {
                session_ids.is_empty() || session_ids.contains(&s.session_id)
            })
            .cloned()
            .collect()
    }
}
