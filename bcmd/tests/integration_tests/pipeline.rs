// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use aal::{AclStage, FieldType, PacketLayer};
use asic::bcm_stub::{AsicConfig, StubHandle};
use bcmd::acl_manager::DEFAULT_ACL_CONTROL;
use bcmd::chassis::StaticChassis;
use bcmd::node::Node;
use bcmd::types::ErrorKind;
use common::p4::{
    ForwardingPipelineConfig, P4ControlStatement, TableEntry, UpdateType,
};

use super::harness::*;

fn stub() -> Arc<StubHandle> {
    Arc::new(StubHandle::new(&test_log(), &AsicConfig::default()).unwrap())
}

#[test]
fn test_pipeline_install() {
    let asic = stub();
    let _node = configured_node(asic.clone());

    assert_eq!(asic.acl_control(UNIT), Some(DEFAULT_ACL_CONTROL));

    // Both ACL tables share a single physical table.  The L3 table is not an
    // ACL table and gets nothing.
    assert_eq!(asic.acl_table_count(UNIT), 1);
    let spec = asic.acl_table(UNIT, 1).expect("physical table 1");
    assert_eq!(spec.stage, AclStage::Ifp);
    for t in [FieldType::EthType, FieldType::Ipv4Dst, FieldType::IpProtoNextHdr]
    {
        assert!(spec.fields.contains(&t), "missing qualifier {t}");
    }
    assert!(!spec.fields.contains(&FieldType::Udf));

    // The ARP target address spans two 16 bit chunks of the first static
    // set.
    assert_eq!(spec.udf_chunk_ids, BTreeSet::from([9, 10]));
    let udfs = asic.udf_chunks(UNIT).expect("udf chunks");
    assert_eq!(udfs.chunk_size, 2);
    let mut chunks: Vec<(u32, PacketLayer, u32)> = udfs
        .chunks
        .iter()
        .map(|c| (c.id, c.layer, c.offset))
        .collect();
    chunks.sort();
    assert_eq!(
        chunks,
        vec![(9, PacketLayer::L3, 24), (10, PacketLayer::L3, 26)]
    );
}

#[test]
fn test_pipeline_requires_chassis() {
    let asic = stub();
    let chassis = StaticChassis::load(data_file("chassis.toml")).unwrap();
    let node = Node::new(
        &test_log(),
        UNIT,
        &data_file("hardware_specs.toml").to_string_lossy(),
        CONTROLLER_UDF_SETS,
        Box::new(asic.clone()),
        Box::new(mapper()),
        Box::new(chassis),
    );

    expect_kind(
        node.push_forwarding_pipeline_config(&pipeline()),
        ErrorKind::NotInitialized,
    );
    expect_kind(
        write_entry(&node, UpdateType::Insert, &arp_entry([10, 1, 2], 10)),
        ErrorKind::NotInitialized,
    );
    assert_eq!(asic.acl_table_count(UNIT), 0);
    assert_eq!(asic.acl_control(UNIT), None);
}

#[test]
fn test_verify_chassis_config() {
    let asic = stub();
    let node = new_node(asic);
    let config = StaticChassis::load(data_file("chassis.toml"))
        .unwrap()
        .config()
        .clone();

    node.verify_chassis_config(&config, NODE_ID).unwrap();
    expect_kind(
        node.verify_chassis_config(&config, 0),
        ErrorKind::InvalidArgument,
    );
    expect_kind(
        node.verify_chassis_config(&config, NODE_ID + 1),
        ErrorKind::RebootRequired,
    );
}

#[test]
fn test_repush_same_pipeline() {
    let asic = stub();
    let node = configured_node(asic.clone());
    let entry = arp_entry([10, 1, 2], 10);
    write_entry(&node, UpdateType::Insert, &entry).unwrap();

    node.verify_forwarding_pipeline_config(&pipeline()).unwrap();
    node.push_forwarding_pipeline_config(&pipeline()).unwrap();

    assert_eq!(asic.acl_table_count(UNIT), 1);
    assert_eq!(asic.acl_flow_count(UNIT), 1);
    let entries = node.read_table_entries(&BTreeSet::new()).unwrap();
    assert_eq!(entries, vec![entry]);
}

#[test]
fn test_repush_new_pipeline() {
    let asic = stub();
    let node = configured_node(asic.clone());
    write_entry(&node, UpdateType::Insert, &arp_entry([10, 1, 2], 10))
        .unwrap();
    write_entry(&node, UpdateType::Insert, &punt_entry(17, 4)).unwrap();
    assert_eq!(asic.acl_flow_count(UNIT), 2);

    // Keep only the punt table, applied unconditionally
    let mut desc = pipeline_desc();
    let punt = desc.controls[0]
        .main
        .statements
        .iter()
        .find_map(|s| match s {
            P4ControlStatement::Branch(b) => {
                b.true_block.statements.first().cloned()
            }
            _ => None,
        })
        .expect("punt table apply");
    desc.controls[0].main.statements = vec![punt];
    let config = ForwardingPipelineConfig::from_pipeline(&desc).unwrap();
    node.push_forwarding_pipeline_config(&config).unwrap();

    // Every entry is gone along with the old tables
    assert_eq!(asic.acl_flow_count(UNIT), 0);
    assert_eq!(asic.acl_table_count(UNIT), 1);
    assert!(node.read_table_entries(&BTreeSet::new()).unwrap().is_empty());
    let spec = asic.acl_table(UNIT, 2).expect("physical table 2");
    assert!(spec.udf_chunk_ids.is_empty());

    expect_kind(
        write_entry(&node, UpdateType::Insert, &arp_entry([10, 1, 2], 10)),
        ErrorKind::Unimplemented,
    );
    write_entry(&node, UpdateType::Insert, &punt_entry(17, 4)).unwrap();
}

#[test]
fn test_invalid_pipeline_keeps_tables() {
    let asic = stub();
    let node = configured_node(asic.clone());
    write_entry(&node, UpdateType::Insert, &punt_entry(6, 2)).unwrap();

    let garbage = ForwardingPipelineConfig {
        p4_device_config: b"not a pipeline".to_vec(),
    };
    expect_kind(
        node.verify_forwarding_pipeline_config(&garbage),
        ErrorKind::InvalidArgument,
    );
    expect_kind(
        node.push_forwarding_pipeline_config(&garbage),
        ErrorKind::InvalidArgument,
    );
    assert_eq!(asic.acl_table_count(UNIT), 1);
    assert_eq!(asic.acl_flow_count(UNIT), 1);
    assert_eq!(node.read_table_entries(&BTreeSet::new()).unwrap().len(), 1);
}

#[test]
fn test_delete_table() {
    let asic = stub();
    let node = configured_node(asic.clone());
    write_entry(&node, UpdateType::Insert, &arp_entry([10, 1, 2], 10))
        .unwrap();
    write_entry(&node, UpdateType::Insert, &punt_entry(17, 4)).unwrap();

    // The physical table is still used by the ingress table
    node.delete_table(ACL_PUNT).unwrap();
    assert_eq!(asic.acl_table_count(UNIT), 1);
    assert_eq!(asic.acl_flow_count(UNIT), 1);
    let entries: Vec<TableEntry> =
        node.read_table_entries(&BTreeSet::new()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].table_id, ACL_INGRESS);
    expect_kind(
        write_entry(&node, UpdateType::Insert, &punt_entry(17, 4)),
        ErrorKind::Unimplemented,
    );

    node.delete_table(ACL_INGRESS).unwrap();
    assert_eq!(asic.acl_table_count(UNIT), 0);
    assert_eq!(asic.acl_flow_count(UNIT), 0);
    expect_kind(node.delete_table(ACL_INGRESS), ErrorKind::NotFound);
}

#[test]
fn test_shutdown() {
    let asic = stub();
    let node = configured_node(asic);
    node.shutdown().unwrap();
    expect_kind(
        write_entry(&node, UpdateType::Insert, &punt_entry(17, 4)),
        ErrorKind::NotInitialized,
    );
    expect_kind(
        node.read_table_entries(&BTreeSet::new()),
        ErrorKind::NotInitialized,
    );
}

// The tables programmed before a shutdown are torn down by the first
// pipeline push after it, so they are not installed twice.
#[test]
fn test_shutdown_then_repush() {
    let asic = stub();
    let node = configured_node(asic.clone());
    let punt = punt_entry(17, 4);
    write_entry(&node, UpdateType::Insert, &punt).unwrap();
    node.shutdown().unwrap();

    let config = StaticChassis::load(data_file("chassis.toml"))
        .unwrap()
        .config()
        .clone();
    node.push_chassis_config(&config, NODE_ID).unwrap();
    node.push_forwarding_pipeline_config(&pipeline()).unwrap();

    assert_eq!(asic.acl_table_count(UNIT), 1);
    assert!(asic.acl_table(UNIT, 1).is_none());
    assert_eq!(asic.acl_flow_count(UNIT), 0);
    assert!(node.read_table_entries(&BTreeSet::new()).unwrap().is_empty());

    write_entry(&node, UpdateType::Insert, &punt).unwrap();
    assert_eq!(asic.acl_flow_count(UNIT), 1);
    assert_eq!(
        node.read_table_entries(&BTreeSet::new()).unwrap(),
        vec![punt]
    );
}
