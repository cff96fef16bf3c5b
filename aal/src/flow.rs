// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The vendor-side representation of flows and ACL tables.  Everything in
//! here has already been resolved to vendor qualifiers, vendor actions and
//! vendor port numbers; there are no P4 ids left.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::Unit;

/// Hardware qualifiers
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
)]
pub enum FieldType {
    InPort,
    OutPort,
    ClonePort,
    EthType,
    IpType,
    EthSrc,
    EthDst,
    VlanVid,
    VlanPcp,
    Ipv4Src,
    Ipv4Dst,
    Ipv6SrcUpper64,
    Ipv6DstUpper64,
    IpProtoNextHdr,
    IpDscpTrafClass,
    IpTtlHopLimit,
    IcmpTypeCode,
    L4Src,
    L4Dst,
    Vrf,
    VfpDstClassId,
    L3DstClassId,
    /// A user-defined field chunk.  The chunk is identified by
    /// `Field::udf_chunk_id`.
    Udf,
}

/// A value carried by a qualifier or an action parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Value {
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U32(v) => Some(*v as u64),
            Value::U64(v) => Some(*v),
            Value::Bytes(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Field {
    pub field_type: FieldType,
    pub value: Value,
    pub mask: Option<Value>,
    /// Only meaningful for `FieldType::Udf`
    pub udf_chunk_id: Option<u32>,
}

impl Field {
    pub fn new(field_type: FieldType, value: Value) -> Self {
        Field {
            field_type,
            value,
            mask: None,
            udf_chunk_id: None,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
)]
pub enum ActionType {
    Drop,
    OutputPort,
    OutputTrunk,
    OutputL3,
    CopyToCpu,
    SetEthSrc,
    SetEthDst,
    AddOuterVlan,
    SetVlanPcp,
    SetIpv4Src,
    SetIpv4Dst,
    SetIpv6Src,
    SetIpv6Dst,
    SetVrf,
    SetVfpDstClassId,
    SetColor,
    SetL2McastGroup,
    SetCos,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
)]
pub enum ParamType {
    EthSrc,
    EthDst,
    VlanVid,
    VlanPcp,
    Ipv4Src,
    Ipv4Dst,
    Ipv6Src,
    Ipv6Dst,
    Vrf,
    VfpDstClassId,
    Color,
    L2McastGroupId,
    Cos,
    Queue,
    LogicalPort,
    TrunkPort,
    EgressIntfId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ActionParam {
    pub param_type: ParamType,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Action {
    pub action_type: ActionType,
    pub params: Vec<ActionParam>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Action {
            action_type,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param_type: ParamType, value: Value) -> Self {
        self.params.push(ActionParam { param_type, value });
        self
    }

    pub fn param(&self, param_type: ParamType) -> Option<&Value> {
        self.params
            .iter()
            .find(|p| p.param_type == param_type)
            .map(|p| &p.value)
    }
}

/// Meter colors, as encoded in a `ParamType::Color` parameter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
)]
pub enum Color {
    Green = 1,
    Yellow = 2,
    Red = 3,
}

impl From<Color> for u32 {
    fn from(c: Color) -> u32 {
        c as u32
    }
}

impl TryFrom<u32> for Color {
    type Error = crate::AsicError;

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            1 => Ok(Color::Green),
            2 => Ok(Color::Yellow),
            3 => Ok(Color::Red),
            x => Err(crate::AsicError::InvalidArg(format!(
                "invalid color: {x}"
            ))),
        }
    }
}

/// The hardware table a flow is programmed into.
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
pub enum TableType {
    #[default]
    Unknown,
    Acl,
    Ipv4Lpm,
    Ipv6Lpm,
    L2Unicast,
    L2Multicast,
    MyStation,
    Tunnel,
}

/// Field processor stages
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
)]
pub enum AclStage {
    #[default]
    Unknown,
    /// VLAN field processor, ahead of L2/L3 lookup
    Vfp,
    /// Ingress field processor
    Ifp,
    /// Egress field processor
    Efp,
}

/// Policer configuration, in kbps and kbits.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
pub struct MeterConfig {
    pub committed_rate: u32,
    pub committed_burst: u32,
    pub peak_rate: u32,
    pub peak_burst: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlowEntry {
    pub unit: Unit,
    pub table_type: TableType,
    pub acl_stage: AclStage,
    /// The physical ACL table the flow lives in.  Only meaningful for ACL
    /// flows.
    pub acl_table_id: i32,
    pub priority: i32,
    pub fields: Vec<Field>,
    pub actions: Vec<Action>,
    pub meter: Option<MeterConfig>,
}

/// The description of a physical ACL table: the stage it lives in, its
/// priority relative to other tables of the same stage, and the union of
/// qualifiers needed by the logical tables it hosts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AclTableSpec {
    pub stage: AclStage,
    pub priority: i32,
    pub fields: BTreeSet<FieldType>,
    /// The user-defined field chunks the table qualifies on
    pub udf_chunk_ids: BTreeSet<u32>,
}

/// For a counter, this contains the number of bytes and packets that were
/// counted.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
pub struct Counter {
    pub bytes: u64,
    pub packets: u64,
}

/// The counters attached to a single ACL flow.  Flows created without color
/// awareness only carry totals.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AclStats {
    pub total: Option<Counter>,
    pub green: Option<Counter>,
    pub red: Option<Counter>,
}

/// Which field processor stages are enabled for a class of ports.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize,
)]
pub struct StageFlags {
    pub vfp_enable: bool,
    pub ifp_enable: bool,
    pub efp_enable: bool,
    pub apply: bool,
}

/// Global ACL control flags.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize,
)]
pub struct AclControl {
    pub extern_port_flags: StageFlags,
    pub intern_port_flags: StageFlags,
    pub cpu_port_flags: StageFlags,
    pub intra_double_wide_enable: Option<bool>,
    pub stats_read_through_enable: Option<bool>,
}

/// The portion of a packet a user-defined field offset is relative to.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
)]
pub enum PacketLayer {
    #[default]
    Unknown,
    L2,
    L3,
    L4,
}

/// A single user-defined field chunk, as programmed into the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UdfChunk {
    pub id: u32,
    pub layer: PacketLayer,
    /// Offset from the start of `layer`, in bytes
    pub offset: u32,
}

/// The complete user-defined field configuration of a unit.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UdfChunkConfig {
    /// Size of every chunk, in bytes
    pub chunk_size: u32,
    pub chunks: Vec<UdfChunk>,
}
