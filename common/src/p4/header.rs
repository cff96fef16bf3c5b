// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use serde::Deserialize;
use serde::Serialize;

/// The semantic type of a P4 header field, as assigned by the table mapping
/// annotations.  This is what lets the switch decide which hardware qualifier
/// or action a field corresponds to.
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
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum P4FieldType {
    #[default]
    Unknown,
    Annotated,
    EthSrc,
    EthDst,
    EthType,
    VlanVid,
    VlanPcp,
    Ipv4Src,
    Ipv4Dst,
    Ipv4Proto,
    Ipv4Diffserv,
    Ipv4Ihl,
    Ipv4TotalLength,
    NwTtl,
    IpVersion,
    Ipv6Src,
    Ipv6Dst,
    Ipv6NextHdr,
    Ipv6TrafficClass,
    Ipv6PayloadSize,
    IcmpType,
    IcmpCode,
    L4SrcPort,
    L4DstPort,
    ArpTpa,
    Vrf,
    ClassId,
    Color,
    EgressPort,
    EgressTrunk,
    IngressPort,
    IngressTrunk,
    InMeter,
    Cos,
    GreCflags,
    GreRecursion,
    GreFlags,
    GreVersion,
    GreProtocol,
    GreChecksum,
    CpuQueueId,
    EncapType,
    L3ClassId,
    MetadataMatch,
    Sliced,
    McastGroupId,
    L3Admit,
    ClonePort,
    Dscp,
    Ecn,
    UdfValueSet,
    UdpPayloadData,
}

/// Headers a field can live in.  Also used for header-validity conditions.
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
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum P4HeaderType {
    #[default]
    Unknown,
    Ethernet,
    Vlan,
    Arp,
    Ipv4,
    Ipv6,
    Gre,
    Icmp,
    Tcp,
    Udp,
    UdpPayload,
    PacketIn,
    PacketOut,
}

/// The pipeline stage a table is annotated with.
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
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Default,
    VlanAcl,
    IngressAcl,
    EgressAcl,
    L2,
    L3Lpm,
    L3Mpls,
    Decap,
    Encap,
}

/// The semantic type of a table, as assigned by the table mapping
/// annotations.
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
pub enum P4TableType {
    #[default]
    Unknown,
    L3Ip,
    L2Unicast,
    L2Multicast,
    L2MyStation,
    Acl,
}

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
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MeterColor {
    Green,
    Yellow,
    Red,
}

/// Operations an action function may perform beyond assigning fields.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ActionOp {
    Drop,
    Clone,
    Nop,
}
