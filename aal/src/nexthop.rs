// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use serde::Deserialize;
use serde::Serialize;

use crate::Unit;

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
)]
pub enum NexthopType {
    #[default]
    Unknown,
    Drop,
    Port,
    Trunk,
}

/// A single egress object: where to send a packet and how to rewrite its
/// L2 header on the way out.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NonMultipathNexthop {
    pub unit: Unit,
    pub nexthop_type: NexthopType,
    pub vlan: u32,
    pub src_mac: u64,
    pub dst_mac: u64,
    pub logical_port: i32,
    pub trunk_port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MultipathMember {
    pub egress_intf_id: i32,
    pub weight: u32,
}

/// An ECMP/WCMP group of egress objects.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MultipathNexthop {
    pub unit: Unit,
    pub members: Vec<MultipathMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum PacketReplication {
    MulticastGroup { group_id: u32, ports: Vec<u32> },
    /// Cloning is only ever done to the CPU, so there is nothing to carry
    /// beyond the fact that the session exists.
    CloneSession { session_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PacketReplicationEntry {
    pub unit: Unit,
    pub replication: PacketReplication,
}
