// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use rand::random;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::collections::HashMap;

use aal::{
    AclControl, AclStage, AclStats, AclTableSpec, AsicError, AsicOps,
    AsicResult, FlowEntry, MeterConfig, UdfChunkConfig, Unit,
};

use crate::bcm_stub::StubHandle;

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> Self {
        let mut c = Self::default();
        c.set(value);
        c
    }
    /// Set the chaos value. Panics if value is outside the range [0.0, 1.0].
    pub fn set(&mut self, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            panic!("probability out of range");
        }
        self.value = value;
    }

    /// Get the underlying chaos value.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Return a chaos error according to the underlying probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> AsicResult<()> {
        if self.value >= random() {
            slog::error!(log, "chaos error: {}", message);
            return Err(AsicError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// A form of chaos that applies per field processor stage.
#[derive(Default, Debug, Serialize, Deserialize, Clone)]
pub struct StageChaos {
    /// Track a set of chaos probabilities keyed by stage name.
    pub values: HashMap<String, f64>,
}

/// A convenience function for creating stage chaos.
#[macro_export]
macro_rules! stage_chaos {
    ( $( ($stage:expr, $prob:expr) ),* ) => {
        StageChaos {
            values: HashMap::from([
                $( ($stage.to_string(), $prob) ),*
            ])
        }
    }
}

impl StageChaos {
    /// Assign the same chaos value to every field processor stage.
    pub fn uniform(v: f64) -> Self {
        stage_chaos!(
            (AclStage::Vfp, v),
            (AclStage::Ifp, v),
            (AclStage::Efp, v)
        )
    }

    /// Return a chaos error according to the underlying probability value for
    /// the given `stage`.
    pub fn unfurled(
        &self,
        log: &Logger,
        stage: AclStage,
        message: &str,
    ) -> AsicResult<()> {
        if let Some(value) = self.values.get(&stage.to_string()) {
            if *value >= random() {
                slog::error!(log, "chaos stage error: {}", message);
                return Err(AsicError::Synthetic(message.into()));
            }
        }
        Ok(())
    }
}

/// The chaos ASIC config contains chaos values for each ASIC operation.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct AsicConfig {
    pub init_acl_hardware: Chaos,
    pub set_acl_control: Chaos,
    pub set_acl_udf_chunks: Chaos,
    pub create_acl_table: StageChaos,
    pub destroy_acl_table: Chaos,
    pub insert_acl_flow: StageChaos,
    pub modify_acl_flow: StageChaos,
    pub remove_acl_flow: Chaos,
    pub get_acl_flow: Chaos,
    pub get_acl_stats: Chaos,
    pub set_acl_policer: Chaos,
}

impl AsicConfig {
    /// The uniform chaos config applies a uniform underlying probability to each
    /// chaos value.
    pub fn uniform(v: f64) -> Self {
        Self {
            init_acl_hardware: Chaos::new(v),
            set_acl_control: Chaos::new(v),
            set_acl_udf_chunks: Chaos::new(v),
            create_acl_table: StageChaos::uniform(v),
            destroy_acl_table: Chaos::new(v),
            insert_acl_flow: StageChaos::uniform(v),
            modify_acl_flow: StageChaos::uniform(v),
            remove_acl_flow: Chaos::new(v),
            get_acl_flow: Chaos::new(v),
            get_acl_stats: Chaos::new(v),
            set_acl_policer: Chaos::new(v),
        }
    }

    /// Only flow programming fails; table setup always succeeds.  This lets
    /// a test build a pipeline and then hammer its entry paths.
    pub fn flows_only(v: f64) -> Self {
        Self {
            insert_acl_flow: StageChaos::uniform(v),
            modify_acl_flow: StageChaos::uniform(v),
            remove_acl_flow: Chaos::new(v),
            set_acl_policer: Chaos::new(v),
            ..Default::default()
        }
    }
}

/// A chaotic ASIC: every operation may fail according to its configured
/// probability before it reaches the stub hardware model.
pub struct Handle {
    stub: StubHandle,
    config: AsicConfig,
    log: Logger,
}

impl Handle {
    /// Create a new chaos ASIC with the provided logger and config.
    pub fn new(log: &Logger, config: &AsicConfig) -> AsicResult<Self> {
        Ok(Handle {
            stub: StubHandle::new(log, &Default::default())?,
            config: config.clone(),
            log: log.clone(),
        })
    }

    /// The hardware model behind the chaos.
    pub fn stub(&self) -> &StubHandle {
        &self.stub
    }
}

/// A convenience macro for unfurling chaos. The $name should be a regular
/// `Chaos` member of [`AsicConfig`]. The `handle` is a [`Handle`] object.
macro_rules! unfurl {
    ($handle:ident, $name:ident) => {
        $handle
            .config
            .$name
            .unfurled(&$handle.log, stringify!($name))?
    };
}

/// A convenience macro for unfurling per-stage chaos. The $name should be a
/// `StageChaos` member of [`AsicConfig`]. The `handle` is a [`Handle`] object.
macro_rules! stage_unfurl {
    ($handle:ident, $stage: expr, $name:ident) => {
        $handle
            .config
            .$name
            .unfurled(&$handle.log, $stage, stringify!($name))?
    };
}

impl AsicOps for Handle {
    fn init_acl_hardware(&self, unit: Unit) -> AsicResult<()> {
        unfurl!(self, init_acl_hardware);
        self.stub.init_acl_hardware(unit)
    }

    fn set_acl_control(
        &self,
        unit: Unit,
        control: &AclControl,
    ) -> AsicResult<()> {
        unfurl!(self, set_acl_control);
        self.stub.set_acl_control(unit, control)
    }

    fn set_acl_udf_chunks(
        &self,
        unit: Unit,
        udfs: &UdfChunkConfig,
    ) -> AsicResult<()> {
        unfurl!(self, set_acl_udf_chunks);
        self.stub.set_acl_udf_chunks(unit, udfs)
    }

    fn create_acl_table(
        &self,
        unit: Unit,
        table: &AclTableSpec,
    ) -> AsicResult<i32> {
        stage_unfurl!(self, table.stage, create_acl_table);
        self.stub.create_acl_table(unit, table)
    }

    fn destroy_acl_table(&self, unit: Unit, table_id: i32) -> AsicResult<()> {
        unfurl!(self, destroy_acl_table);
        self.stub.destroy_acl_table(unit, table_id)
    }

    fn insert_acl_flow(
        &self,
        flow: &FlowEntry,
        add_stats: bool,
        color_aware: bool,
    ) -> AsicResult<i32> {
        stage_unfurl!(self, flow.acl_stage, insert_acl_flow);
        self.stub.insert_acl_flow(flow, add_stats, color_aware)
    }

    fn modify_acl_flow(
        &self,
        unit: Unit,
        flow_id: i32,
        flow: &FlowEntry,
    ) -> AsicResult<()> {
        stage_unfurl!(self, flow.acl_stage, modify_acl_flow);
        self.stub.modify_acl_flow(unit, flow_id, flow)
    }

    fn remove_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<()> {
        unfurl!(self, remove_acl_flow);
        self.stub.remove_acl_flow(unit, flow_id)
    }

    fn get_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<FlowEntry> {
        unfurl!(self, get_acl_flow);
        self.stub.get_acl_flow(unit, flow_id)
    }

    fn get_acl_stats(&self, unit: Unit, flow_id: i32) -> AsicResult<AclStats> {
        unfurl!(self, get_acl_stats);
        self.stub.get_acl_stats(unit, flow_id)
    }

    fn set_acl_policer(
        &self,
        unit: Unit,
        flow_id: i32,
        meter: &MeterConfig,
    ) -> AsicResult<()> {
        unfurl!(self, set_acl_policer);
        self.stub.set_acl_policer(unit, flow_id, meter)
    }
}
