// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::path::PathBuf;
use std::sync::Arc;

use aal::AsicOps;
use bcmd::chassis::StaticChassis;
use bcmd::mapper::StaticTableMapper;
use bcmd::node::Node;
use bcmd::types::{BcmdResult, ErrorKind};
use common::logging::LogFormat;
use common::p4::{
    Action, ActionParam, Entity, FieldMatch, ForwardingPipelineConfig,
    P4PipelineConfig, TableAction, TableEntry, Update, UpdateType,
};

pub(crate) const ACL_INGRESS: u32 = 33554433;
pub(crate) const ACL_PUNT: u32 = 33554434;
pub(crate) const L3_FIB: u32 = 33554500;

pub(crate) const DROP: u32 = 16777217;
pub(crate) const TRAP_TO_CPU: u32 = 16777218;

pub(crate) const NODE_ID: u64 = 1;
pub(crate) const UNIT: i32 = 0;

// One set is reserved for the controller, so static chunks start at id 9.
pub(crate) const CONTROLLER_UDF_SETS: u32 = 1;

pub(crate) fn data_file(name: &str) -> PathBuf {
    [env!("CARGO_MANIFEST_DIR"), "tests", "data", name]
        .iter()
        .collect()
}

pub(crate) fn test_log() -> slog::Logger {
    common::logging::init("bcmd-test", &None, LogFormat::Human).unwrap()
}

pub(crate) fn mapper() -> StaticTableMapper {
    StaticTableMapper::load(data_file("mapper.json")).unwrap()
}

pub(crate) fn pipeline_desc() -> P4PipelineConfig {
    let txt = std::fs::read_to_string(data_file("pipeline.json")).unwrap();
    serde_json::from_str(&txt).unwrap()
}

pub(crate) fn pipeline() -> ForwardingPipelineConfig {
    ForwardingPipelineConfig::from_pipeline(&pipeline_desc()).unwrap()
}

/// A node built on top of `asic`, with the chassis config pushed but no
/// pipeline.
pub(crate) fn new_node<A>(asic: Arc<A>) -> Node
where
    A: AsicOps + Send + Sync + 'static,
{
    let chassis = StaticChassis::load(data_file("chassis.toml")).unwrap();
    let config = chassis.config().clone();
    let specs = data_file("hardware_specs.toml");
    let node = Node::new(
        &test_log(),
        UNIT,
        &specs.to_string_lossy(),
        CONTROLLER_UDF_SETS,
        Box::new(asic),
        Box::new(mapper()),
        Box::new(chassis),
    );
    node.push_chassis_config(&config, NODE_ID).unwrap();
    node
}

/// A node with the test pipeline installed.
pub(crate) fn configured_node<A>(asic: Arc<A>) -> Node
where
    A: AsicOps + Send + Sync + 'static,
{
    let node = new_node(asic);
    node.push_forwarding_pipeline_config(&pipeline()).unwrap();
    node
}

/// Drop ARP requests for a /24 of target addresses.
pub(crate) fn arp_entry(tpa: [u8; 3], priority: i32) -> TableEntry {
    TableEntry {
        table_id: ACL_INGRESS,
        matches: vec![
            FieldMatch::exact(1, &[0x08, 0x06]),
            FieldMatch::ternary(
                3,
                &[tpa[0], tpa[1], tpa[2], 0],
                &[0xff, 0xff, 0xff, 0],
            ),
        ],
        action: Some(TableAction::Action(Action {
            action_id: DROP,
            params: Vec::new(),
        })),
        priority,
        ..Default::default()
    }
}

/// Send IPv4 packets of the given protocol to a cpu queue.
pub(crate) fn punt_entry(proto: u8, queue: u8) -> TableEntry {
    TableEntry {
        table_id: ACL_PUNT,
        matches: vec![
            FieldMatch::exact(1, &[0x08, 0x00]),
            FieldMatch::exact(2, &[proto]),
        ],
        action: Some(TableAction::Action(Action {
            action_id: TRAP_TO_CPU,
            params: vec![ActionParam {
                param_id: 1,
                value: vec![queue],
            }],
        })),
        priority: 10,
        ..Default::default()
    }
}

pub(crate) fn update(update_type: UpdateType, entity: Entity) -> Update {
    Update {
        update_type,
        entity,
    }
}

pub(crate) fn write_entry(
    node: &Node,
    update_type: UpdateType,
    entry: &TableEntry,
) -> BcmdResult<()> {
    let mut results = node.write_forwarding_entries(&[update(
        update_type,
        Entity::TableEntry(entry.clone()),
    )]);
    assert_eq!(results.len(), 1);
    results.remove(0)
}

pub(crate) fn expect_kind<T: std::fmt::Debug>(
    result: BcmdResult<T>,
    kind: ErrorKind,
) {
    match result {
        Ok(v) => panic!("expected a {kind} error, got {v:?}"),
        Err(e) => assert_eq!(e.kind(), kind, "unexpected error: {e}"),
    }
}
