// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The platform-independent ("common") form of a table entry.  The table
//! mapper resolves P4Runtime ids into field and header semantics and
//! produces these; the platform layer translates them into vendor
//! structures.

use serde::Deserialize;
use serde::Serialize;

use super::ActionOp;
use super::MeterColor;
use super::P4FieldType;
use super::P4HeaderType;
use super::P4TableType;
use super::PipelineStage;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappedValue {
    U32(u32),
    U64(u64),
    Bytes(Vec<u8>),
}

impl MappedValue {
    /// A value is "zero" if every bit of it is clear.
    pub fn is_zero(&self) -> bool {
        match self {
            MappedValue::U32(v) => *v == 0,
            MappedValue::U64(v) => *v == 0,
            MappedValue::Bytes(b) => b.iter().all(|x| *x == 0),
        }
    }

    /// Return the value as a u64, if it is an integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            MappedValue::U32(v) => Some(*v as u64),
            MappedValue::U64(v) => Some(*v),
            MappedValue::Bytes(_) => None,
        }
    }
}

/// A match field with its semantic type and position in the packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MappedField {
    /// The P4Runtime match field id within its table
    pub field_id: u32,
    pub field_type: P4FieldType,
    pub header_type: P4HeaderType,
    /// Offset of the field within its header, in bits
    pub bit_offset: u32,
    pub bit_width: u32,
    #[serde(default)]
    pub value: Option<MappedValue>,
    #[serde(default)]
    pub mask: Option<MappedValue>,
}

/// An assignment of a value to a field, made by an action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldAction {
    pub field_type: P4FieldType,
    pub value: MappedValue,
    /// Meter colors the assignment applies to.  Empty means all of them.
    #[serde(default)]
    pub meter_colors: Vec<MeterColor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionPrimitive {
    pub op: ActionOp,
    /// Meter colors the primitive applies to.  Empty means all of them.
    #[serde(default)]
    pub meter_colors: Vec<MeterColor>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionFunction {
    #[serde(default)]
    pub modify_fields: Vec<FieldAction>,
    #[serde(default)]
    pub primitives: Vec<ActionPrimitive>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappedAction {
    Function(ActionFunction),
    ProfileMemberId(u32),
    ProfileGroupId(u32),
}

impl Default for MappedAction {
    fn default() -> Self {
        MappedAction::Function(ActionFunction::default())
    }
}

/// What the platform needs to know about the table an entry belongs to.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TableInfo {
    pub id: u32,
    pub name: String,
    pub table_type: P4TableType,
    pub pipeline_stage: PipelineStage,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommonFlowEntry {
    pub table_info: TableInfo,
    pub fields: Vec<MappedField>,
    pub action: MappedAction,
    pub priority: i32,
}
