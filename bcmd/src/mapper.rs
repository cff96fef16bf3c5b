// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Resolution of P4Runtime ids into field, header and action semantics.
//!
//! The `P4TableMapper` trait is the boundary with the service that owns the
//! P4 program description.  `StaticTableMapper` implements it from a
//! serialized description of the program's tables and actions, which is
//! enough for the daemon harness and for tests.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use common::p4::{
    Action, ActionFunction, ActionPrimitive, ActionProfileGroup,
    ActionProfileMember, CommonFlowEntry, FieldAction, FieldMatch,
    FieldMatchKind, MappedAction, MappedField, MappedValue, MeterColor,
    P4FieldType, P4HeaderType, P4TableDef, P4TableType, PipelineStage,
    TableAction, TableEntry, TableInfo, UpdateType,
};

use crate::types::*;

/// Translates P4Runtime objects into their platform-independent form.
pub trait P4TableMapper {
    /// Return the declared schema of a table.
    fn lookup_table(&self, table_id: u32) -> BcmdResult<P4TableDef>;

    /// Describe a match field of a table, without any value.
    fn map_match_field(
        &self,
        table_id: u32,
        field_id: u32,
    ) -> BcmdResult<MappedField>;

    fn map_flow_entry(
        &self,
        entry: &TableEntry,
        update_type: UpdateType,
    ) -> BcmdResult<CommonFlowEntry>;

    fn map_action_profile_member(
        &self,
        member: &ActionProfileMember,
    ) -> BcmdResult<MappedAction>;

    /// Validate a group against its action profile.
    fn map_action_profile_group(
        &self,
        group: &ActionProfileGroup,
    ) -> BcmdResult<MappedAction>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldDesc {
    pub id: u32,
    pub field_type: P4FieldType,
    pub header_type: P4HeaderType,
    #[serde(default)]
    pub bit_offset: u32,
    pub bit_width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TableDesc {
    pub id: u32,
    pub name: String,
    pub size: usize,
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub table_type: P4TableType,
    #[serde(default)]
    pub stage: PipelineStage,
    #[serde(default)]
    pub fields: Vec<FieldDesc>,
}

impl TableDesc {
    fn def(&self) -> P4TableDef {
        P4TableDef {
            id: self.id,
            name: self.name.clone(),
            match_fields: self.fields.iter().map(|f| f.id).collect(),
            size: self.size,
            is_const: self.is_const,
            table_type: self.table_type,
            stage: self.stage,
        }
    }
}

/// An action parameter assigns its value to a header or metadata field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionParamDesc {
    pub id: u32,
    pub field_type: P4FieldType,
    pub bit_width: u32,
    #[serde(default)]
    pub meter_colors: Vec<MeterColor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionDesc {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub params: Vec<ActionParamDesc>,
    /// Assignments of constant values made by the action body
    #[serde(default)]
    pub modify_fields: Vec<FieldAction>,
    #[serde(default)]
    pub primitives: Vec<ActionPrimitive>,
}

/// The serialized form of a `StaticTableMapper`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MapperDesc {
    #[serde(default)]
    pub tables: Vec<TableDesc>,
    #[serde(default)]
    pub actions: Vec<ActionDesc>,
    #[serde(default)]
    pub action_profiles: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct StaticTableMapper {
    tables: BTreeMap<u32, TableDesc>,
    actions: BTreeMap<u32, ActionDesc>,
    action_profiles: BTreeSet<u32>,
}

impl StaticTableMapper {
    pub fn new(desc: MapperDesc) -> BcmdResult<Self> {
        let mut tables = BTreeMap::new();
        for t in desc.tables {
            if t.id == 0 {
                return Err(BcmdError::Invalid(format!(
                    "table {} has id 0",
                    t.name
                )));
            }
            let id = t.id;
            if tables.insert(id, t).is_some() {
                return Err(BcmdError::Invalid(format!(
                    "table id {id} is described twice"
                )));
            }
        }
        let mut actions = BTreeMap::new();
        for a in desc.actions {
            let id = a.id;
            if actions.insert(id, a).is_some() {
                return Err(BcmdError::Invalid(format!(
                    "action id {id} is described twice"
                )));
            }
        }
        Ok(StaticTableMapper {
            tables,
            actions,
            action_profiles: desc.action_profiles.into_iter().collect(),
        })
    }

    /// Load a JSON description of the program.
    pub fn load(path: impl AsRef<Path>) -> BcmdResult<Self> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)?;
        let desc: MapperDesc = serde_json::from_str(&txt)?;
        Self::new(desc).with_context(|| format!("loading {}", path.display()))
    }

    fn table(&self, table_id: u32) -> BcmdResult<&TableDesc> {
        self.tables.get(&table_id).ok_or_else(|| {
            BcmdError::Missing(format!("unknown table id {table_id}"))
        })
    }

    fn check_profile(&self, action_profile_id: u32) -> BcmdResult<()> {
        if self.action_profiles.contains(&action_profile_id) {
            Ok(())
        } else {
            Err(BcmdError::Invalid(format!(
                "unknown action profile id {action_profile_id}"
            )))
        }
    }

    fn map_action(&self, action: &Action) -> BcmdResult<ActionFunction> {
        let desc = self.actions.get(&action.action_id).ok_or_else(|| {
            BcmdError::Invalid(format!(
                "unknown action id {}",
                action.action_id
            ))
        })?;
        let mut modify_fields = desc.modify_fields.clone();
        for param in &desc.params {
            let value = action
                .params
                .iter()
                .find(|p| p.param_id == param.id)
                .ok_or_else(|| {
                    BcmdError::Invalid(format!(
                        "action {} is missing parameter {}",
                        desc.name, param.id
                    ))
                })?;
            modify_fields.push(FieldAction {
                field_type: param.field_type,
                value: bytes_to_value(&value.value, param.bit_width)
                    .with_context(|| {
                        format!("action {} parameter {}", desc.name, param.id)
                    })?,
                meter_colors: param.meter_colors.clone(),
            });
        }
        if let Some(p) = action
            .params
            .iter()
            .find(|p| !desc.params.iter().any(|d| d.id == p.param_id))
        {
            return Err(BcmdError::Invalid(format!(
                "action {} has no parameter {}",
                desc.name, p.param_id
            )));
        }
        Ok(ActionFunction {
            modify_fields,
            primitives: desc.primitives.clone(),
        })
    }
}

impl P4TableMapper for StaticTableMapper {
    fn lookup_table(&self, table_id: u32) -> BcmdResult<P4TableDef> {
        Ok(self.table(table_id)?.def())
    }

    fn map_match_field(
        &self,
        table_id: u32,
        field_id: u32,
    ) -> BcmdResult<MappedField> {
        let table = self.table(table_id)?;
        let desc =
            table.fields.iter().find(|f| f.id == field_id).ok_or_else(|| {
                BcmdError::Invalid(format!(
                    "table {} has no match field {field_id}",
                    table.name
                ))
            })?;
        Ok(MappedField {
            field_id,
            field_type: desc.field_type,
            header_type: desc.header_type,
            bit_offset: desc.bit_offset,
            bit_width: desc.bit_width,
            value: None,
            mask: None,
        })
    }

    fn map_flow_entry(
        &self,
        entry: &TableEntry,
        update_type: UpdateType,
    ) -> BcmdResult<CommonFlowEntry> {
        let table = self.table(entry.table_id)?;
        let mut fields = Vec::with_capacity(entry.matches.len());
        for m in &entry.matches {
            let mut field = self.map_match_field(entry.table_id, m.field_id)?;
            map_match_value(m, &mut field).with_context(|| {
                format!("table {} field {}", table.name, m.field_id)
            })?;
            fields.push(field);
        }

        let action = match (update_type, &entry.action) {
            (UpdateType::Delete, _) => MappedAction::default(),
            (_, Some(TableAction::Action(a))) => {
                MappedAction::Function(self.map_action(a)?)
            }
            (_, Some(TableAction::ActionProfileMemberId(id))) => {
                MappedAction::ProfileMemberId(*id)
            }
            (_, Some(TableAction::ActionProfileGroupId(id))) => {
                MappedAction::ProfileGroupId(*id)
            }
            (_, None) => {
                return Err(BcmdError::Invalid(format!(
                    "entry for table {} has no action",
                    table.name
                )))
            }
        };

        Ok(CommonFlowEntry {
            table_info: TableInfo {
                id: table.id,
                name: table.name.clone(),
                table_type: table.table_type,
                pipeline_stage: table.stage,
            },
            fields,
            action,
            priority: entry.priority,
        })
    }

    fn map_action_profile_member(
        &self,
        member: &ActionProfileMember,
    ) -> BcmdResult<MappedAction> {
        self.check_profile(member.action_profile_id)?;
        Ok(MappedAction::Function(self.map_action(&member.action)?))
    }

    fn map_action_profile_group(
        &self,
        group: &ActionProfileGroup,
    ) -> BcmdResult<MappedAction> {
        self.check_profile(group.action_profile_id)?;
        Ok(MappedAction::ProfileGroupId(group.group_id))
    }
}

fn map_match_value(m: &FieldMatch, field: &mut MappedField) -> BcmdResult<()> {
    let width = field.bit_width;
    match &m.kind {
        FieldMatchKind::Exact { value } | FieldMatchKind::Optional { value } => {
            field.value = Some(bytes_to_value(value, width)?);
        }
        FieldMatchKind::Ternary { value, mask } => {
            field.value = Some(bytes_to_value(value, width)?);
            field.mask = Some(bytes_to_value(mask, width)?);
        }
        FieldMatchKind::Lpm { value, prefix_len } => {
            field.value = Some(bytes_to_value(value, width)?);
            field.mask = Some(prefix_mask(*prefix_len, width)?);
        }
        FieldMatchKind::Range { .. } => {
            return Err(BcmdError::Unsupported(
                "range matches are not supported".to_string(),
            ))
        }
    }
    Ok(())
}

/// Convert a P4Runtime byte string into a value sized for a field of `width`
/// bits.  Fields of up to 32 bits become `U32`, up to 64 bits `U64`, and
/// anything wider stays a byte string padded to the field size.
pub fn bytes_to_value(bytes: &[u8], width: u32) -> BcmdResult<MappedValue> {
    let len = width.div_ceil(8) as usize;
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    if significant.len() > len
        || (significant.len() == len
            && width % 8 != 0
            && significant[0] >> (width % 8) != 0)
    {
        return Err(BcmdError::Invalid(format!(
            "value {significant:02x?} does not fit in {width} bits"
        )));
    }

    let fold = |acc: u64, b: &u8| (acc << 8) | *b as u64;
    Ok(if width <= 32 {
        MappedValue::U32(significant.iter().fold(0, fold) as u32)
    } else if width <= 64 {
        MappedValue::U64(significant.iter().fold(0, fold))
    } else {
        let mut buf = vec![0u8; len - significant.len()];
        buf.extend_from_slice(significant);
        MappedValue::Bytes(buf)
    })
}

fn prefix_mask(prefix_len: u32, width: u32) -> BcmdResult<MappedValue> {
    if prefix_len > width {
        return Err(BcmdError::Invalid(format!(
            "prefix length {prefix_len} is longer than the {width} bit field"
        )));
    }
    let len = width.div_ceil(8) as usize;
    let mut mask = vec![0u8; len];
    // Bit 0 of the field is the most significant bit of the right-justified
    // buffer.
    let lead = len as u32 * 8 - width;
    for bit in lead..lead + prefix_len {
        mask[(bit / 8) as usize] |= 0x80 >> (bit % 8);
    }
    bytes_to_value(&mask, width)
}
