// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use aal::AsicOps;
use asic::chaos::{AsicConfig, Chaos, Handle, StageChaos};
use bcmd::types::ErrorKind;
use common::p4::UpdateType;

use crate::integration_tests::harness::*;

fn chaos_asic(config: AsicConfig) -> Arc<Handle> {
    Arc::new(Handle::new(&test_log(), &config).unwrap())
}

// A failed flow insert leaves nothing behind in software.
#[test]
fn test_insert_failure() {
    let asic = chaos_asic(AsicConfig::flows_only(1.0));
    let node = configured_node(asic.clone());

    expect_kind(
        write_entry(&node, UpdateType::Insert, &punt_entry(17, 4)),
        ErrorKind::Internal,
    );
    assert!(node.read_table_entries(&BTreeSet::new()).unwrap().is_empty());
    assert_eq!(asic.stub().acl_flow_count(UNIT), 0);
}

// A failed modify keeps the entry as it was.
#[test]
fn test_modify_failure() {
    let asic = chaos_asic(AsicConfig {
        modify_acl_flow: StageChaos::uniform(1.0),
        ..Default::default()
    });
    let node = configured_node(asic.clone());
    let punt = punt_entry(17, 4);
    write_entry(&node, UpdateType::Insert, &punt).unwrap();
    let before = asic.stub().get_acl_flow(UNIT, 1).unwrap();

    expect_kind(
        write_entry(&node, UpdateType::Modify, &punt_entry(17, 7)),
        ErrorKind::Internal,
    );
    assert_eq!(
        node.read_table_entries(&BTreeSet::new()).unwrap(),
        vec![punt]
    );
    assert_eq!(asic.stub().get_acl_flow(UNIT, 1).unwrap(), before);
}

// A failed remove keeps the entry, so the delete can be retried.
#[test]
fn test_delete_failure() {
    let asic = chaos_asic(AsicConfig {
        remove_acl_flow: Chaos::new(1.0),
        ..Default::default()
    });
    let node = configured_node(asic.clone());
    let punt = punt_entry(17, 4);
    write_entry(&node, UpdateType::Insert, &punt).unwrap();

    expect_kind(
        write_entry(&node, UpdateType::Delete, &punt),
        ErrorKind::Internal,
    );
    assert_eq!(
        node.read_table_entries(&BTreeSet::new()).unwrap(),
        vec![punt]
    );
    assert_eq!(asic.stub().acl_flow_count(UNIT), 1);
}

// A table creation failure after the old tables are gone needs a reboot, and
// leaves no acl tables behind in software.
#[test]
fn test_pipeline_failure() {
    let asic = chaos_asic(AsicConfig {
        create_acl_table: StageChaos::uniform(1.0),
        ..Default::default()
    });
    let node = new_node(asic.clone());

    expect_kind(
        node.push_forwarding_pipeline_config(&pipeline()),
        ErrorKind::RebootRequired,
    );
    assert_eq!(asic.stub().acl_table_count(UNIT), 0);
    expect_kind(
        write_entry(&node, UpdateType::Insert, &punt_entry(17, 4)),
        ErrorKind::Unimplemented,
    );

    // Nothing was recorded as installed, so the same config is retried
    expect_kind(
        node.push_forwarding_pipeline_config(&pipeline()),
        ErrorKind::RebootRequired,
    );
}
