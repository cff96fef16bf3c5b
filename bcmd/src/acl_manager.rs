// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Installation of the ACL tables a forwarding pipeline describes, and the
//! per-entry ACL operations.
//!
//! The ACL manager owns the field processor of a unit: the one-time ACL
//! setup, the UDF chunk allocation and the physical tables.  The software
//! record of the logical tables and their entries lives in the
//! `TableManager`, which every operation here is handed along with the
//! hardware handle.  Each write reaches the hardware before the table
//! manager is told about it.

use std::collections::BTreeSet;

use slog::{debug, error, info, o, warn};

use aal::{
    AclControl, AclStage, AclTableSpec, AsicOps, StageFlags, Unit,
};
use common::chassis::ChassisConfig;
use common::p4::{
    CommonFlowEntry, CounterData, DirectMeterEntry, ForwardingPipelineConfig,
    P4PipelineConfig, TableEntry, UpdateType,
};

use crate::acl_table::{p4_pipeline_to_acl_stage, AclTable};
use crate::hw_specs::{ChipType, HardwareSpecs, UdfSpec};
use crate::mapper::P4TableMapper;
use crate::pipeline::{physical_pipeline_string, PhysicalTable, PipelineProcessor};
use crate::table_manager::{
    const_conditions_to_vendor_fields, fill_meter_config,
    p4_field_to_vendor_field, TableManager,
};
use crate::types::*;
use crate::udf::UdfManager;

/// The ACL control flags programmed when the unit is first set up.
pub const DEFAULT_ACL_CONTROL: AclControl = AclControl {
    extern_port_flags: StageFlags {
        vfp_enable: true,
        ifp_enable: true,
        efp_enable: true,
        apply: true,
    },
    intern_port_flags: StageFlags {
        vfp_enable: false,
        ifp_enable: false,
        efp_enable: false,
        apply: true,
    },
    cpu_port_flags: StageFlags {
        vfp_enable: true,
        ifp_enable: true,
        efp_enable: false,
        apply: true,
    },
    intra_double_wide_enable: Some(true),
    stats_read_through_enable: Some(true),
};

/// The logical tables sharing one physical table, highest priority first.
#[derive(Debug)]
struct PhysicalAclTable {
    stage: AclStage,
    tables: Vec<AclTable>,
}

pub struct AclManager {
    log: slog::Logger,
    unit: Unit,
    node_id: u64,
    hardware_specs_file: String,
    num_controller_udf_sets: u32,
    /// Set once the ACL hardware has been initialized.  Never cleared.
    initialized: bool,
    udf_spec: Option<UdfSpec>,
    udf: Option<UdfManager>,
    /// The pipeline currently installed
    pipeline_config: Option<ForwardingPipelineConfig>,
}

impl AclManager {
    pub fn new(
        log: &slog::Logger,
        unit: Unit,
        hardware_specs_file: impl ToString,
        num_controller_udf_sets: u32,
    ) -> Self {
        AclManager {
            log: log.new(o!("unit" => "acl_manager", "bcm_unit" => unit)),
            unit,
            node_id: 0,
            hardware_specs_file: hardware_specs_file.to_string(),
            num_controller_udf_sets,
            initialized: false,
            udf_spec: None,
            udf: None,
            pipeline_config: None,
        }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn udf_manager(&self) -> Option<&UdfManager> {
        self.udf.as_ref()
    }

    /// Read the hardware specs and set up the unit for the chip the
    /// chassis is built on.
    pub fn push_chassis_config(
        &mut self,
        asic: &dyn AsicOps,
        config: &ChassisConfig,
        node_id: u64,
    ) -> BcmdResult<()> {
        let specs = HardwareSpecs::load(&self.hardware_specs_file)?;
        self.push_chassis_config_with_specs(asic, config, node_id, &specs)
    }

    pub fn push_chassis_config_with_specs(
        &mut self,
        asic: &dyn AsicOps,
        config: &ChassisConfig,
        node_id: u64,
        specs: &HardwareSpecs,
    ) -> BcmdResult<()> {
        self.verify_chassis_config(config, node_id)?;
        let chip = ChipType::from(config.platform);
        let spec = specs.chip_spec(chip)?;
        // Built here to reject a bad udf geometry before any pipeline push
        let udf = UdfManager::new(
            &self.log,
            self.unit,
            &spec.udf,
            self.num_controller_udf_sets,
            None,
        )?;

        self.node_id = node_id;
        self.one_time_setup(asic)?;
        if self.udf.is_none() {
            self.udf = Some(udf);
        }
        self.udf_spec = Some(spec.udf);
        info!(self.log, "pushed chassis config";
            "node_id" => node_id,
            "chip" => %chip);
        Ok(())
    }

    pub fn verify_chassis_config(
        &self,
        _config: &ChassisConfig,
        node_id: u64,
    ) -> BcmdResult<()> {
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

    fn one_time_setup(&mut self, asic: &dyn AsicOps) -> BcmdResult<()> {
        if self.initialized {
            return Ok(());
        }
        asic.init_acl_hardware(self.unit)?;
        asic.set_acl_control(self.unit, &DEFAULT_ACL_CONTROL)?;
        self.initialized = true;
        info!(self.log, "configured acl hardware"; "node_id" => self.node_id);
        Ok(())
    }

    fn check_initialized(&self) -> BcmdResult<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(BcmdError::NotInitialized(format!(
                "acl hardware of unit {} has not been set up",
                self.unit
            )))
        }
    }

    pub fn verify_forwarding_pipeline_config(
        &self,
        config: &ForwardingPipelineConfig,
    ) -> BcmdResult<()> {
        config.pipeline()?;
        Ok(())
    }

    /// Replace every ACL table with the ones the new pipeline describes.
    ///
    /// Everything that can be checked without touching the hardware is
    /// checked before the existing tables are torn down, so a bad pipeline
    /// leaves the installed one alone.  A failure once the teardown has
    /// started leaves the unit in an unknown state, reported as
    /// `RebootRequired`.
    pub fn push_forwarding_pipeline_config(
        &mut self,
        tm: &mut TableManager,
        asic: &dyn AsicOps,
        mapper: &dyn P4TableMapper,
        config: &ForwardingPipelineConfig,
    ) -> BcmdResult<()> {
        let pipeline = config.pipeline()?;
        if self.pipeline_config.as_ref() == Some(config) {
            info!(self.log, "forwarding pipeline config is unchanged";
                "node_id" => self.node_id);
            return Ok(());
        }
        self.check_initialized()?;
        let udf_spec = self.udf_spec.ok_or_else(|| {
            BcmdError::NotInitialized("no hardware spec for unit".to_string())
        })?;

        let mut physical = self.physical_acl_tables(&pipeline, mapper)?;
        let mut udf = UdfManager::new(
            &self.log,
            self.unit,
            &udf_spec,
            self.num_controller_udf_sets,
            None,
        )?;
        for p in &mut physical {
            udf.set_up_static_udfs(&mut p.tables, mapper)?;
        }
        let specs = physical
            .iter()
            .map(|p| self.physical_table_spec(p, mapper, &udf))
            .collect::<BcmdResult<Vec<_>>>()?;

        // From here on there is no way back to the old pipeline.
        self.pipeline_config = None;
        if let Err(e) = self.rebuild(tm, asic, physical, specs, &udf) {
            error!(self.log, "failed to rebuild acl tables, reboot required";
                "error" => %e);
            return Err(BcmdError::RebootRequired(format!(
                "rebuilding the acl tables of unit {}: {e}",
                self.unit
            )));
        }
        self.udf = Some(udf);
        self.pipeline_config = Some(config.clone());
        info!(self.log, "pushed forwarding pipeline config";
            "node_id" => self.node_id);
        Ok(())
    }

    fn rebuild(
        &self,
        tm: &mut TableManager,
        asic: &dyn AsicOps,
        physical: Vec<PhysicalAclTable>,
        specs: Vec<AclTableSpec>,
        udf: &UdfManager,
    ) -> BcmdResult<()> {
        self.clear_all_acl_tables(tm, asic)?;
        udf.install_udfs(asic)?;

        let mut installed = Vec::new();
        for (mut p, spec) in physical.into_iter().zip(specs) {
            let id = asic.create_acl_table(self.unit, &spec)?;
            let ids: Vec<u32> = p.tables.iter().map(|t| t.id()).collect();
            info!(self.log, "installed physical acl table";
                "physical_table_id" => id,
                "stage" => %p.stage,
                "fields" => spec.fields.len(),
                "udf_chunks" => spec.udf_chunk_ids.len(),
                "tables" => ?ids);
            for t in &mut p.tables {
                t.set_physical_table_id(id);
            }
            installed.push(p);
        }
        for t in installed.into_iter().flat_map(|p| p.tables) {
            tm.add_acl_table(t)?;
        }
        Ok(())
    }

    // Remove every ACL entry and table, from the hardware and then from the
    // table manager.
    fn clear_all_acl_tables(
        &self,
        tm: &mut TableManager,
        asic: &dyn AsicOps,
    ) -> BcmdResult<()> {
        let table_ids = tm.all_acl_table_ids();
        if table_ids.is_empty() {
            return Ok(());
        }
        let mut physical_ids = BTreeSet::new();
        for id in table_ids {
            let table = tm.acl_table(id)?;
            if let Some(p) = table.physical_table_id() {
                physical_ids.insert(p);
            }
            let entries: Vec<TableEntry> = table.entries().cloned().collect();
            for entry in &entries {
                self.delete_table_entry(tm, asic, entry)?;
            }
            tm.delete_table(id)?;
        }
        for id in physical_ids {
            asic.destroy_acl_table(self.unit, id)?;
        }
        debug!(self.log, "cleared all acl tables");
        Ok(())
    }

    // Group the ACL tables of every control into the physical tables they
    // will share.  Non-ACL groups are left to other managers.
    fn physical_acl_tables(
        &self,
        pipeline: &P4PipelineConfig,
        mapper: &dyn P4TableMapper,
    ) -> BcmdResult<Vec<PhysicalAclTable>> {
        let mut physical = Vec::new();
        for control in &pipeline.controls {
            let processor = PipelineProcessor::new(&self.log, &control.main)
                .with_context(|| format!("control {}", control.name))?;
            let groups = processor.into_physical_pipeline();
            debug!(self.log, "physical pipeline";
                "control" => &control.name,
                "pipeline" => physical_pipeline_string(&groups));
            for group in groups {
                if let Some(p) = self.physical_acl_table(group, mapper)? {
                    physical.push(p);
                }
            }
        }
        Ok(physical)
    }

    fn physical_acl_table(
        &self,
        group: PhysicalTable,
        mapper: &dyn P4TableMapper,
    ) -> BcmdResult<Option<PhysicalAclTable>> {
        let first = group.first().ok_or_else(|| {
            BcmdError::Internal(
                "physical pipeline contains an empty physical table"
                    .to_string(),
            )
        })?;
        let stage = p4_pipeline_to_acl_stage(first.table.stage);
        if stage == AclStage::Unknown {
            debug!(self.log, "skipping non-acl physical table";
                "first_table" => &first.table.table_name);
            return Ok(None);
        }
        let mut tables = Vec::with_capacity(group.len());
        for t in group {
            let def = mapper.lookup_table(t.table.table_id)?;
            tables.push(AclTable::new(&def, stage, t.priority, t.valid_conditions));
        }
        Ok(Some(PhysicalAclTable { stage, tables }))
    }

    // The qualifier set of a physical table is the union of what its
    // logical tables match on, including their header conditions.
    fn physical_table_spec(
        &self,
        physical: &PhysicalAclTable,
        mapper: &dyn P4TableMapper,
        udf: &UdfManager,
    ) -> BcmdResult<AclTableSpec> {
        let first = physical.tables.first().ok_or_else(|| {
            BcmdError::Internal("empty physical acl table".to_string())
        })?;
        let mut spec = AclTableSpec {
            stage: physical.stage,
            priority: first.priority(),
            ..Default::default()
        };
        for table in &physical.tables {
            for field_id in table.match_fields() {
                if table.is_udf_field(*field_id) {
                    continue;
                }
                let field = mapper
                    .map_match_field(table.id(), *field_id)
                    .with_context(|| {
                        format!("match types of table {}", table.name())
                    })?;
                match p4_field_to_vendor_field(field.field_type) {
                    Some(t) => {
                        spec.fields.insert(t);
                    }
                    None => warn!(self.log, "unsupported match field";
                        "table" => table.name(),
                        "field_type" => %field.field_type),
                }
            }
            for f in const_conditions_to_vendor_fields(table.const_conditions())?
            {
                spec.fields.insert(f.field_type);
            }
            if let Some(set_id) = table.udf_set_id() {
                spec.udf_chunk_ids.extend(udf.chunk_ids(set_id));
            }
        }
        Ok(spec)
    }

    /// Program a new ACL entry, then record it along with its flow id.
    pub fn insert_table_entry(
        &self,
        tm: &mut TableManager,
        asic: &dyn AsicOps,
        mapper: &dyn P4TableMapper,
        entry: &TableEntry,
    ) -> BcmdResult<()> {
        tm.acl_table(entry.table_id)?.dry_run_insert(entry)?;
        let flow = tm
            .fill_flow_entry(entry, UpdateType::Insert, mapper, self.udf.as_ref())
            .with_context(|| format!("inserting entry into table {}", entry.table_id))?;

        // Stats are created uncolored, so the total counter is always kept
        let flow_id = asic.insert_acl_flow(&flow, true, false)?;
        if let Err(e) = tm.add_acl_table_entry(entry, flow_id) {
            error!(self.log, "acl flow installed but not recorded";
                "table_id" => entry.table_id,
                "flow_id" => flow_id,
                "error" => %e);
            return Err(BcmdError::Internal(format!(
                "acl flow {flow_id} was created but failed to record: {e}"
            )));
        }
        debug!(self.log, "inserted acl entry";
            "table_id" => entry.table_id,
            "flow_id" => flow_id);
        Ok(())
    }

    pub fn modify_table_entry(
        &self,
        tm: &mut TableManager,
        asic: &dyn AsicOps,
        mapper: &dyn P4TableMapper,
        entry: &TableEntry,
    ) -> BcmdResult<()> {
        let flow_id = tm.acl_table(entry.table_id)?.flow_id(entry)?;
        let flow = tm
            .fill_flow_entry(entry, UpdateType::Modify, mapper, self.udf.as_ref())
            .with_context(|| format!("modifying entry of table {}", entry.table_id))?;
        asic.modify_acl_flow(self.unit, flow_id, &flow)?;
        tm.update_table_entry(entry)?;
        debug!(self.log, "modified acl entry";
            "table_id" => entry.table_id,
            "flow_id" => flow_id);
        Ok(())
    }

    pub fn delete_table_entry(
        &self,
        tm: &mut TableManager,
        asic: &dyn AsicOps,
        entry: &TableEntry,
    ) -> BcmdResult<()> {
        let flow_id = tm.acl_table(entry.table_id)?.flow_id(entry)?;
        asic.remove_acl_flow(self.unit, flow_id)?;
        tm.delete_table_entry(entry)?;
        debug!(self.log, "deleted acl entry";
            "table_id" => entry.table_id,
            "flow_id" => flow_id);
        Ok(())
    }

    pub fn update_table_entry_meter(
        &self,
        tm: &mut TableManager,
        asic: &dyn AsicOps,
        meter: &DirectMeterEntry,
    ) -> BcmdResult<()> {
        let entry = &meter.table_entry;
        let flow_id = tm.acl_table(entry.table_id)?.flow_id(entry)?;
        let config = meter.config.as_ref().ok_or_else(|| {
            BcmdError::Invalid("meter entry has no meter config".to_string())
        })?;
        asic.set_acl_policer(self.unit, flow_id, &fill_meter_config(config)?)?;
        tm.update_table_entry_meter(meter)
    }

    /// Return the traffic an entry has matched.
    pub fn get_table_entry_stats(
        &self,
        tm: &TableManager,
        asic: &dyn AsicOps,
        entry: &TableEntry,
    ) -> BcmdResult<CounterData> {
        let flow_id = tm.acl_table(entry.table_id)?.flow_id(entry)?;
        let stats = asic
            .get_acl_stats(self.unit, flow_id)
            .map_err(BcmdError::from)
            .with_context(|| {
                format!("reading stats of acl flow {flow_id}")
            })?;
        let total = stats.total.ok_or_else(|| {
            BcmdError::Missing(format!(
                "total counter of entry in table {}",
                entry.table_id
            ))
        })?;
        Ok(CounterData {
            byte_count: total.bytes as i64,
            packet_count: total.packets as i64,
        })
    }

    /// Read an entry's flow back from the hardware.
    pub fn read_back_entry(
        &self,
        tm: &TableManager,
        asic: &dyn AsicOps,
        mapper: &dyn P4TableMapper,
        entry: &TableEntry,
    ) -> BcmdResult<CommonFlowEntry> {
        let flow_id = tm.acl_table(entry.table_id)?.flow_id(entry)?;
        let flow = asic.get_acl_flow(self.unit, flow_id)?;
        tm.vendor_flow_to_common_entry(
            &flow,
            entry.table_id,
            mapper,
            self.udf.as_ref(),
        )
    }

    /// Remove a single ACL table along with its entries.  The physical
    /// table goes too once no other logical table shares it.
    pub fn delete_table(
        &self,
        tm: &mut TableManager,
        asic: &dyn AsicOps,
        table_id: u32,
    ) -> BcmdResult<()> {
        let table = tm.acl_table(table_id)?;
        let physical_id = table.physical_table_id();
        let entries: Vec<TableEntry> = table.entries().cloned().collect();
        for entry in &entries {
            self.delete_table_entry(tm, asic, entry)?;
        }
        tm.delete_table(table_id)?;

        if let Some(id) = physical_id {
            let shared = tm
                .all_acl_table_ids()
                .into_iter()
                .filter_map(|t| tm.acl_table(t).ok())
                .any(|t| t.physical_table_id() == Some(id));
            if !shared {
                asic.destroy_acl_table(self.unit, id)?;
            }
        }
        info!(self.log, "deleted acl table"; "table_id" => table_id);
        Ok(())
    }

    /// Forget the installed pipeline, so the next push rebuilds the tables
    /// even if it carries the same config.  The hardware setup is kept.
    pub fn shutdown(&mut self) -> BcmdResult<()> {
        self.pipeline_config = None;
        Ok(())
    }
}
