// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! An in-memory model of the field processor of one or more units.  It
//! enforces the same structural rules the SDK does (qualifier sets, stages,
//! stat objects), which makes it usable as a stand-in for hardware in tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use slog::{debug, info, o};

use aal::{
    AclControl, AclStage, AclStats, AclTableSpec, AsicError, AsicOps,
    AsicResult, Counter, FieldType, FlowEntry, MeterConfig, TableType,
    UdfChunkConfig, Unit,
};

mod acl;
use acl::{StubFlow, UnitState};

/// The stub has nothing to configure.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AsicConfig {}

pub struct StubHandle {
    units: Mutex<BTreeMap<Unit, UnitState>>,
    log: slog::Logger,
}

impl StubHandle {
    pub fn new(log: &slog::Logger, _config: &AsicConfig) -> AsicResult<Self> {
        let log = log.new(o!("unit" => "bcm_stub"));
        info!(log, "initialized stub ASIC");
        Ok(StubHandle {
            units: Mutex::new(BTreeMap::new()),
            log,
        })
    }

    fn with_unit<T>(
        &self,
        unit: Unit,
        f: impl FnOnce(&mut UnitState) -> AsicResult<T>,
    ) -> AsicResult<T> {
        let mut units = self.units.lock().unwrap();
        match units.get_mut(&unit) {
            Some(state) => f(state),
            None => Err(AsicError::Uninitialized(format!(
                "ACL hardware of unit {unit}"
            ))),
        }
    }

    /// Number of physical ACL tables currently installed on a unit.
    pub fn acl_table_count(&self, unit: Unit) -> usize {
        let units = self.units.lock().unwrap();
        units.get(&unit).map(|u| u.tables.len()).unwrap_or(0)
    }

    /// Return the spec a physical ACL table was created with.
    pub fn acl_table(&self, unit: Unit, table_id: i32) -> Option<AclTableSpec> {
        let units = self.units.lock().unwrap();
        units.get(&unit).and_then(|u| u.tables.get(&table_id).cloned())
    }

    /// Number of flows currently installed on a unit, across all tables.
    pub fn acl_flow_count(&self, unit: Unit) -> usize {
        let units = self.units.lock().unwrap();
        units.get(&unit).map(|u| u.flows.len()).unwrap_or(0)
    }

    pub fn acl_control(&self, unit: Unit) -> Option<AclControl> {
        let units = self.units.lock().unwrap();
        units.get(&unit).and_then(|u| u.control)
    }

    pub fn udf_chunks(&self, unit: Unit) -> Option<UdfChunkConfig> {
        let units = self.units.lock().unwrap();
        units.get(&unit).and_then(|u| u.udfs.clone())
    }

    /// Account traffic against a flow, as if packets had hit it.
    pub fn count_traffic(
        &self,
        unit: Unit,
        flow_id: i32,
        bytes: u64,
        packets: u64,
    ) -> AsicResult<()> {
        self.with_unit(unit, |state| {
            let flow = state.flow_mut(flow_id)?;
            let bump = |c: &mut Option<Counter>| {
                if let Some(c) = c {
                    c.bytes += bytes;
                    c.packets += packets;
                }
            };
            if let Some(stats) = flow.stats.as_mut() {
                bump(&mut stats.total);
                bump(&mut stats.green);
            }
            Ok(())
        })
    }
}

impl AsicOps for StubHandle {
    fn init_acl_hardware(&self, unit: Unit) -> AsicResult<()> {
        let mut units = self.units.lock().unwrap();
        units.entry(unit).or_insert_with(UnitState::new);
        info!(self.log, "initialized ACL hardware"; "bcm_unit" => unit);
        Ok(())
    }

    fn set_acl_control(
        &self,
        unit: Unit,
        control: &AclControl,
    ) -> AsicResult<()> {
        self.with_unit(unit, |state| {
            state.control = Some(*control);
            Ok(())
        })
    }

    fn set_acl_udf_chunks(
        &self,
        unit: Unit,
        udfs: &UdfChunkConfig,
    ) -> AsicResult<()> {
        self.with_unit(unit, |state| {
            let mut seen = std::collections::BTreeSet::new();
            for chunk in &udfs.chunks {
                if !seen.insert(chunk.id) {
                    return Err(AsicError::InvalidArg(format!(
                        "duplicate UDF chunk id {}",
                        chunk.id
                    )));
                }
            }
            debug!(self.log, "configured UDF chunks";
                "bcm_unit" => unit, "chunks" => udfs.chunks.len());
            state.udfs = Some(udfs.clone());
            Ok(())
        })
    }

    fn create_acl_table(
        &self,
        unit: Unit,
        table: &AclTableSpec,
    ) -> AsicResult<i32> {
        self.with_unit(unit, |state| {
            if table.stage == AclStage::Unknown {
                return Err(AsicError::InvalidArg(
                    "ACL table must have a stage".to_string(),
                ));
            }
            for id in &table.udf_chunk_ids {
                if !state.has_udf_chunk(*id) {
                    return Err(AsicError::InvalidArg(format!(
                        "UDF chunk {id} is not configured"
                    )));
                }
            }
            let id = state.next_table_id;
            state.next_table_id += 1;
            state.tables.insert(id, table.clone());
            debug!(self.log, "created ACL table";
                "bcm_unit" => unit, "table_id" => id,
                "stage" => %table.stage);
            Ok(id)
        })
    }

    fn destroy_acl_table(&self, unit: Unit, table_id: i32) -> AsicResult<()> {
        self.with_unit(unit, |state| {
            if !state.tables.contains_key(&table_id) {
                return Err(AsicError::Missing(format!(
                    "ACL table {table_id}"
                )));
            }
            if state.flows.values().any(|f| f.flow.acl_table_id == table_id) {
                return Err(AsicError::SdkError {
                    ctx: "destroy_acl_table".to_string(),
                    err: format!("ACL table {table_id} still has flows"),
                });
            }
            state.tables.remove(&table_id);
            Ok(())
        })
    }

    fn insert_acl_flow(
        &self,
        flow: &FlowEntry,
        add_stats: bool,
        color_aware: bool,
    ) -> AsicResult<i32> {
        self.with_unit(flow.unit, |state| {
            if flow.table_type != TableType::Acl {
                return Err(AsicError::InvalidArg(format!(
                    "not an ACL flow: {}",
                    flow.table_type
                )));
            }
            let spec =
                state.tables.get(&flow.acl_table_id).ok_or_else(|| {
                    AsicError::Missing(format!(
                        "ACL table {}",
                        flow.acl_table_id
                    ))
                })?;
            if spec.stage != flow.acl_stage {
                return Err(AsicError::InvalidArg(format!(
                    "flow stage {} does not match table stage {}",
                    flow.acl_stage, spec.stage
                )));
            }
            for field in &flow.fields {
                let ok = match field.field_type {
                    FieldType::Udf => field
                        .udf_chunk_id
                        .map(|id| spec.udf_chunk_ids.contains(&id))
                        .unwrap_or(false),
                    t => spec.fields.contains(&t),
                };
                if !ok {
                    return Err(AsicError::InvalidArg(format!(
                        "qualifier {} is not in the qualifier set of table {}",
                        field.field_type, flow.acl_table_id
                    )));
                }
            }
            if state.flows.values().any(|f| f.same_match(flow)) {
                return Err(AsicError::Exists);
            }

            let stats = add_stats.then(|| {
                if color_aware {
                    AclStats {
                        total: None,
                        green: Some(Counter::default()),
                        red: Some(Counter::default()),
                    }
                } else {
                    AclStats {
                        total: Some(Counter::default()),
                        green: None,
                        red: None,
                    }
                }
            });
            let id = state.next_flow_id;
            state.next_flow_id += 1;
            state.flows.insert(
                id,
                StubFlow {
                    flow: flow.clone(),
                    stats,
                },
            );
            Ok(id)
        })
    }

    fn modify_acl_flow(
        &self,
        unit: Unit,
        flow_id: i32,
        flow: &FlowEntry,
    ) -> AsicResult<()> {
        self.with_unit(unit, |state| {
            let existing = state.flow_mut(flow_id)?;
            existing.flow.actions = flow.actions.clone();
            existing.flow.meter = flow.meter;
            Ok(())
        })
    }

    fn remove_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<()> {
        self.with_unit(unit, |state| match state.flows.remove(&flow_id) {
            Some(_) => Ok(()),
            None => Err(AsicError::Missing(format!("ACL flow {flow_id}"))),
        })
    }

    fn get_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<FlowEntry> {
        self.with_unit(unit, |state| Ok(state.flow_mut(flow_id)?.flow.clone()))
    }

    fn get_acl_stats(&self, unit: Unit, flow_id: i32) -> AsicResult<AclStats> {
        self.with_unit(unit, |state| {
            state.flow_mut(flow_id)?.stats.clone().ok_or_else(|| {
                AsicError::Missing(format!("stats for ACL flow {flow_id}"))
            })
        })
    }

    fn set_acl_policer(
        &self,
        unit: Unit,
        flow_id: i32,
        meter: &MeterConfig,
    ) -> AsicResult<()> {
        self.with_unit(unit, |state| {
            state.flow_mut(flow_id)?.flow.meter = Some(*meter);
            Ok(())
        })
    }
}
