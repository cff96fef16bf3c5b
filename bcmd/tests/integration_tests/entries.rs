// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use aal::{AsicOps, FieldType};
use asic::bcm_stub::{AsicConfig, StubHandle};
use bcmd::mapper::P4TableMapper;
use bcmd::node::batch_result;
use bcmd::types::ErrorKind;
use common::p4::{
    ActionOp, CounterData, DirectMeterEntry, Entity, FieldMatch,
    MappedAction, MeterConfig, TableEntry, UpdateType,
};

use super::harness::*;

fn stub() -> Arc<StubHandle> {
    Arc::new(StubHandle::new(&test_log(), &AsicConfig::default()).unwrap())
}

#[test]
fn test_insert_entries() {
    let asic = stub();
    let node = configured_node(asic.clone());
    let arp = arp_entry([10, 1, 2], 10);
    let punt = punt_entry(17, 4);

    let results = node.write_forwarding_entries(&[
        update(UpdateType::Insert, Entity::TableEntry(arp.clone())),
        update(UpdateType::Insert, Entity::TableEntry(punt.clone())),
    ]);
    batch_result(&results).unwrap();
    assert_eq!(asic.acl_flow_count(UNIT), 2);

    // The ARP target address is qualified through one udf qualifier per
    // chunk it spans.
    let flow = asic.get_acl_flow(UNIT, 1).unwrap();
    assert_eq!(flow.acl_table_id, 1);
    let chunks: BTreeSet<u32> = flow
        .fields
        .iter()
        .filter(|f| f.field_type == FieldType::Udf)
        .filter_map(|f| f.udf_chunk_id)
        .collect();
    assert_eq!(chunks, BTreeSet::from([9, 10]));
    assert!(flow.fields.iter().any(|f| f.field_type == FieldType::EthType));

    let all = node.read_table_entries(&BTreeSet::new()).unwrap();
    assert_eq!(all.len(), 2);
    let punts = node
        .read_table_entries(&BTreeSet::from([ACL_PUNT]))
        .unwrap();
    assert_eq!(punts, vec![punt]);
}

#[test]
fn test_insert_errors() {
    let asic = stub();
    let node = configured_node(asic.clone());
    let arp = arp_entry([10, 1, 2], 10);
    write_entry(&node, UpdateType::Insert, &arp).unwrap();

    // The same match collides, whatever the action
    expect_kind(
        write_entry(&node, UpdateType::Insert, &arp),
        ErrorKind::AlreadyExists,
    );

    // Field 3 belongs to the ingress table, not the punt table
    let mut bad_field = punt_entry(17, 4);
    bad_field
        .matches
        .push(FieldMatch::ternary(3, &[10, 0, 0, 0], &[0xff, 0, 0, 0]));
    expect_kind(
        write_entry(&node, UpdateType::Insert, &bad_field),
        ErrorKind::InvalidArgument,
    );

    // Only ACL tables are programmed
    let l3 = TableEntry {
        table_id: L3_FIB,
        ..arp.clone()
    };
    expect_kind(
        write_entry(&node, UpdateType::Insert, &l3),
        ErrorKind::Unimplemented,
    );
    let unknown = TableEntry {
        table_id: 42,
        ..arp.clone()
    };
    expect_kind(
        write_entry(&node, UpdateType::Insert, &unknown),
        ErrorKind::NotFound,
    );

    // None of the failures touched the hardware
    assert_eq!(asic.acl_flow_count(UNIT), 1);
    assert_eq!(node.read_table_entries(&BTreeSet::new()).unwrap().len(), 1);
}

#[test]
fn test_batch_continues_past_failures() {
    let asic = stub();
    let node = configured_node(asic.clone());
    let arp = arp_entry([10, 1, 2], 10);

    let results = node.write_forwarding_entries(&[
        update(UpdateType::Insert, Entity::TableEntry(arp.clone())),
        update(UpdateType::Insert, Entity::TableEntry(arp.clone())),
        update(UpdateType::Insert, Entity::TableEntry(punt_entry(6, 1))),
    ]);
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert_eq!(
        results[1].as_ref().unwrap_err().kind(),
        ErrorKind::AlreadyExists
    );
    assert!(results[2].is_ok());
    expect_kind(batch_result(&results), ErrorKind::AlreadyExists);
    assert_eq!(asic.acl_flow_count(UNIT), 2);
}

#[test]
fn test_readback_round_trip() {
    let asic = stub();
    let node = configured_node(asic);
    let arp = arp_entry([192, 168, 7], 20);
    write_entry(&node, UpdateType::Insert, &arp).unwrap();

    let expected = mapper().map_flow_entry(&arp, UpdateType::Insert).unwrap();
    let back = node.read_back_entry(&arp).unwrap();
    assert_eq!(back.table_info, expected.table_info);
    assert_eq!(back.fields, expected.fields);
    assert_eq!(back.priority, 20);
    match back.action {
        MappedAction::Function(f) => {
            assert!(f.primitives.iter().any(|p| p.op == ActionOp::Drop))
        }
        a => panic!("expected an action function, got {a:?}"),
    }

    expect_kind(
        node.read_back_entry(&arp_entry([192, 168, 8], 20)),
        ErrorKind::NotFound,
    );
}

#[test]
fn test_modify_and_delete() {
    let asic = stub();
    let node = configured_node(asic.clone());
    let punt = punt_entry(17, 4);
    write_entry(&node, UpdateType::Insert, &punt).unwrap();
    let before = asic.get_acl_flow(UNIT, 1).unwrap();

    let requeued = punt_entry(17, 7);
    write_entry(&node, UpdateType::Modify, &requeued).unwrap();
    let after = asic.get_acl_flow(UNIT, 1).unwrap();
    assert_eq!(after.fields, before.fields);
    assert_ne!(after.actions, before.actions);
    assert_eq!(
        node.read_table_entries(&BTreeSet::new()).unwrap(),
        vec![requeued.clone()]
    );

    expect_kind(
        write_entry(&node, UpdateType::Modify, &punt_entry(6, 7)),
        ErrorKind::NotFound,
    );

    write_entry(&node, UpdateType::Delete, &requeued).unwrap();
    assert_eq!(asic.acl_flow_count(UNIT), 0);
    assert!(node.read_table_entries(&BTreeSet::new()).unwrap().is_empty());
    expect_kind(
        write_entry(&node, UpdateType::Delete, &requeued),
        ErrorKind::NotFound,
    );
}

#[test]
fn test_stats() {
    let asic = stub();
    let node = configured_node(asic.clone());
    let punt = punt_entry(17, 4);
    write_entry(&node, UpdateType::Insert, &punt).unwrap();

    assert_eq!(
        node.get_table_entry_stats(&punt).unwrap(),
        CounterData::default()
    );
    asic.count_traffic(UNIT, 1, 1500, 3).unwrap();
    asic.count_traffic(UNIT, 1, 64, 1).unwrap();
    assert_eq!(
        node.get_table_entry_stats(&punt).unwrap(),
        CounterData {
            byte_count: 1564,
            packet_count: 4,
        }
    );
    expect_kind(
        node.get_table_entry_stats(&punt_entry(6, 4)),
        ErrorKind::NotFound,
    );
}

#[test]
fn test_meter() {
    let asic = stub();
    let node = configured_node(asic.clone());
    let punt = punt_entry(17, 4);
    write_entry(&node, UpdateType::Insert, &punt).unwrap();

    let config = MeterConfig {
        cir: 1000,
        cburst: 100,
        pir: 2000,
        pburst: 200,
    };
    let meter = DirectMeterEntry {
        table_entry: punt.clone(),
        config: Some(config),
    };
    let results = node.write_forwarding_entries(&[update(
        UpdateType::Modify,
        Entity::DirectMeterEntry(meter.clone()),
    )]);
    batch_result(&results).unwrap();

    let flow = asic.get_acl_flow(UNIT, 1).unwrap();
    assert_eq!(
        flow.meter,
        Some(aal::MeterConfig {
            committed_rate: 1000,
            committed_burst: 100,
            peak_rate: 2000,
            peak_burst: 200,
        })
    );
    let entries = node.read_table_entries(&BTreeSet::new()).unwrap();
    assert_eq!(entries[0].meter_config, Some(config));

    // Meters are only ever modified
    let results = node.write_forwarding_entries(&[update(
        UpdateType::Insert,
        Entity::DirectMeterEntry(meter),
    )]);
    expect_kind(batch_result(&results), ErrorKind::InvalidArgument);
}
