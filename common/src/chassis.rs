// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The subset of the chassis configuration consumed by the table and ACL
//! managers: which platform we are running on, how nodes map onto hardware
//! units, and how controller-visible port and trunk ids map onto vendor port
//! numbers.

use serde::Deserialize;
use serde::Serialize;

/// The switch platforms we know how to describe.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    #[default]
    Unknown,
    GenericTrident2,
    GenericTridentPlus,
    GenericTomahawk,
    GenericTomahawkPlus,
}

/// A single controller node, bound to one hardware unit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeSpec {
    pub id: u64,
    pub unit: i32,
}

/// A front-panel (or internal) port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SingletonPort {
    /// Controller-visible port id
    pub id: u32,
    /// Node the port belongs to
    pub node: u64,
    /// Vendor logical port number
    pub logical_port: i32,
}

/// A link aggregation group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrunkPort {
    /// Controller-visible trunk id
    pub id: u32,
    /// Node the trunk belongs to
    pub node: u64,
    /// Vendor trunk port number
    pub trunk_port: i32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChassisConfig {
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub singleton_ports: Vec<SingletonPort>,
    #[serde(default)]
    pub trunk_ports: Vec<TrunkPort>,
}

impl ChassisConfig {
    /// Return the unit bound to the given node, if the node is described.
    pub fn unit_for_node(&self, node_id: u64) -> Option<i32> {
        self.nodes.iter().find(|n| n.id == node_id).map(|n| n.unit)
    }
}
