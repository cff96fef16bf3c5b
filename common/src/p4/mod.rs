// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The P4Runtime objects exchanged with the controller, in the shape the
//! switch stack consumes them.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

mod control;
mod header;
mod mapped;

pub use control::*;
pub use header::*;
pub use mapped::*;

/// How a single match field of a table entry is matched.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldMatchKind {
    Exact { value: Vec<u8> },
    Ternary { value: Vec<u8>, mask: Vec<u8> },
    Lpm { value: Vec<u8>, prefix_len: u32 },
    Range { low: Vec<u8>, high: Vec<u8> },
    Optional { value: Vec<u8> },
}

#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
)]
pub struct FieldMatch {
    pub field_id: u32,
    pub kind: FieldMatchKind,
}

impl FieldMatch {
    pub fn exact(field_id: u32, value: &[u8]) -> Self {
        FieldMatch {
            field_id,
            kind: FieldMatchKind::Exact {
                value: value.to_vec(),
            },
        }
    }

    pub fn ternary(field_id: u32, value: &[u8], mask: &[u8]) -> Self {
        FieldMatch {
            field_id,
            kind: FieldMatchKind::Ternary {
                value: value.to_vec(),
                mask: mask.to_vec(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ActionParam {
    pub param_id: u32,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Action {
    pub action_id: u32,
    #[serde(default)]
    pub params: Vec<ActionParam>,
}

/// The action half of a table entry: either a direct action, or a reference
/// to an action profile member or group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableAction {
    Action(Action),
    ActionProfileMemberId(u32),
    ActionProfileGroupId(u32),
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
pub struct MeterConfig {
    /// Committed information rate
    pub cir: i64,
    /// Committed burst size
    pub cburst: i64,
    /// Peak information rate
    pub pir: i64,
    /// Peak burst size
    pub pburst: i64,
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
pub struct CounterData {
    pub byte_count: i64,
    pub packet_count: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TableEntry {
    pub table_id: u32,
    #[serde(default)]
    pub matches: Vec<FieldMatch>,
    #[serde(default)]
    pub action: Option<TableAction>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub is_default_action: bool,
    #[serde(default)]
    pub meter_config: Option<MeterConfig>,
    #[serde(default)]
    pub counter_data: Option<CounterData>,
    #[serde(default)]
    pub metadata: u64,
}

/// The portion of a table entry that identifies it within its table.  Two
/// entries with equal keys collide, regardless of their actions, meters, or
/// counters.  Match fields are compared without regard to order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchKey {
    pub table_id: u32,
    pub priority: i32,
    pub is_default_action: bool,
    pub matches: BTreeSet<FieldMatch>,
}

impl TableEntry {
    pub fn match_key(&self) -> MatchKey {
        MatchKey {
            table_id: self.table_id,
            priority: self.priority,
            is_default_action: self.is_default_action,
            matches: self.matches.iter().cloned().collect(),
        }
    }

    /// Return the member id this entry points at, if any.
    pub fn member_id(&self) -> Option<u32> {
        match self.action {
            Some(TableAction::ActionProfileMemberId(id)) => Some(id),
            _ => None,
        }
    }

    /// Return the group id this entry points at, if any.
    pub fn group_id(&self) -> Option<u32> {
        match self.action {
            Some(TableAction::ActionProfileGroupId(id)) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionProfileMember {
    pub action_profile_id: u32,
    pub member_id: u32,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GroupMember {
    pub member_id: u32,
    #[serde(default)]
    pub weight: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionProfileGroup {
    pub action_profile_id: u32,
    pub group_id: u32,
    #[serde(default)]
    pub members: Vec<GroupMember>,
    #[serde(default)]
    pub max_size: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Replica {
    pub egress_port: u32,
    pub instance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MulticastGroupEntry {
    pub multicast_group_id: u32,
    #[serde(default)]
    pub replicas: Vec<Replica>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CloneSessionEntry {
    pub session_id: u32,
    #[serde(default)]
    pub replicas: Vec<Replica>,
    #[serde(default)]
    pub class_of_service: u32,
    #[serde(default)]
    pub packet_length_bytes: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketReplicationEngineEntry {
    MulticastGroup(MulticastGroupEntry),
    CloneSession(CloneSessionEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DirectMeterEntry {
    pub table_entry: TableEntry,
    #[serde(default)]
    pub config: Option<MeterConfig>,
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UpdateType {
    Insert,
    Modify,
    Delete,
}

/// Every object a controller write can carry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    TableEntry(TableEntry),
    ActionProfileMember(ActionProfileMember),
    ActionProfileGroup(ActionProfileGroup),
    PacketReplicationEngineEntry(PacketReplicationEngineEntry),
    DirectMeterEntry(DirectMeterEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Update {
    pub update_type: UpdateType,
    pub entity: Entity,
}

/// A forwarding pipeline push.  The device config is an opaque blob: two
/// pushes carrying the same bytes describe the same pipeline.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ForwardingPipelineConfig {
    #[serde(default)]
    pub p4_device_config: Vec<u8>,
}

impl ForwardingPipelineConfig {
    pub fn from_pipeline(
        pipeline: &P4PipelineConfig,
    ) -> Result<Self, serde_json::Error> {
        Ok(ForwardingPipelineConfig {
            p4_device_config: serde_json::to_vec(pipeline)?,
        })
    }

    /// Decode the pipeline description carried in the device config blob.
    pub fn pipeline(&self) -> Result<P4PipelineConfig, serde_json::Error> {
        serde_json::from_slice(&self.p4_device_config)
    }
}

/// The declared schema of a table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct P4TableDef {
    pub id: u32,
    pub name: String,
    /// Match field ids, in declaration order
    #[serde(default)]
    pub match_fields: Vec<u32>,
    /// Maximum number of entries
    pub size: usize,
    /// Entries are installed by the switch itself, never the controller
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub table_type: P4TableType,
    #[serde(default)]
    pub stage: PipelineStage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_key_ignores_order_and_action() {
        let a = TableEntry {
            table_id: 1,
            priority: 10,
            matches: vec![
                FieldMatch::exact(1, &[1]),
                FieldMatch::ternary(2, &[2], &[0xff]),
            ],
            action: Some(TableAction::ActionProfileMemberId(3)),
            ..Default::default()
        };
        let b = TableEntry {
            matches: vec![
                FieldMatch::ternary(2, &[2], &[0xff]),
                FieldMatch::exact(1, &[1]),
            ],
            action: None,
            metadata: 7,
            ..a.clone()
        };
        assert_eq!(a.match_key(), b.match_key());

        let c = TableEntry {
            priority: 11,
            ..a.clone()
        };
        assert_ne!(a.match_key(), c.match_key());
    }

    #[test]
    fn test_pipeline_blob() {
        let pipeline = P4PipelineConfig {
            controls: vec![P4Control {
                name: "ingress".to_string(),
                main: P4ControlBlock::default(),
            }],
        };
        let config = ForwardingPipelineConfig::from_pipeline(&pipeline)
            .expect("encode");
        assert_eq!(config.pipeline().expect("decode"), pipeline);
        let garbage = ForwardingPipelineConfig {
            p4_device_config: b"not json".to_vec(),
        };
        assert!(garbage.pipeline().is_err());
    }
}
