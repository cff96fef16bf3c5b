// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Mock collaborators for unit tests.

use std::collections::BTreeMap;

use aal::{
    AclControl, AclStats, AclTableSpec, AsicOps, AsicResult, FlowEntry,
    MeterConfig, UdfChunkConfig, Unit,
};
use common::p4::{
    ActionProfileGroup, ActionProfileMember, CommonFlowEntry, MappedAction,
    MappedField, P4TableDef, TableEntry, UpdateType,
};

use crate::chassis::{ChassisRo, PortState, SdkPort, SdkTrunk};
use crate::mapper::P4TableMapper;
use crate::types::*;

mockall::mock! {
    pub Asic {}
    impl AsicOps for Asic {
        fn init_acl_hardware(&self, unit: Unit) -> AsicResult<()>;
        fn set_acl_control(
            &self,
            unit: Unit,
            control: &AclControl,
        ) -> AsicResult<()>;
        fn set_acl_udf_chunks(
            &self,
            unit: Unit,
            udfs: &UdfChunkConfig,
        ) -> AsicResult<()>;
        fn create_acl_table(
            &self,
            unit: Unit,
            table: &AclTableSpec,
        ) -> AsicResult<i32>;
        fn destroy_acl_table(&self, unit: Unit, table_id: i32) -> AsicResult<()>;
        fn insert_acl_flow(
            &self,
            flow: &FlowEntry,
            add_stats: bool,
            color_aware: bool,
        ) -> AsicResult<i32>;
        fn modify_acl_flow(
            &self,
            unit: Unit,
            flow_id: i32,
            flow: &FlowEntry,
        ) -> AsicResult<()>;
        fn remove_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<()>;
        fn get_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<FlowEntry>;
        fn get_acl_stats(&self, unit: Unit, flow_id: i32) -> AsicResult<AclStats>;
        fn set_acl_policer(
            &self,
            unit: Unit,
            flow_id: i32,
            meter: &MeterConfig,
        ) -> AsicResult<()>;
    }
}

mockall::mock! {
    pub P4TableMapper {}
    impl P4TableMapper for P4TableMapper {
        fn lookup_table(&self, table_id: u32) -> BcmdResult<P4TableDef>;
        fn map_match_field(
            &self,
            table_id: u32,
            field_id: u32,
        ) -> BcmdResult<MappedField>;
        fn map_flow_entry(
            &self,
            entry: &TableEntry,
            update_type: UpdateType,
        ) -> BcmdResult<CommonFlowEntry>;
        fn map_action_profile_member(
            &self,
            member: &ActionProfileMember,
        ) -> BcmdResult<MappedAction>;
        fn map_action_profile_group(
            &self,
            group: &ActionProfileGroup,
        ) -> BcmdResult<MappedAction>;
    }
}

mockall::mock! {
    pub Chassis {}
    impl ChassisRo for Chassis {
        fn port_id_to_sdk_port(
            &self,
            node_id: u64,
        ) -> BcmdResult<BTreeMap<u32, SdkPort>>;
        fn trunk_id_to_sdk_trunk(
            &self,
            node_id: u64,
        ) -> BcmdResult<BTreeMap<u32, SdkTrunk>>;
        fn port_state(&self, port: SdkPort) -> BcmdResult<PortState>;
    }
}

pub fn test_log() -> slog::Logger {
    common::logging::init("test", &None, common::logging::LogFormat::Human)
        .unwrap()
}
