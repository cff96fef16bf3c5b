// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Reconstruction of mapped entries from the flows read back out of the
//! hardware.

use std::collections::{BTreeMap, BTreeSet};

use aal::{Action, ActionType, Color, Field, FieldType, FlowEntry, ParamType, Value};
use common::p4::{
    ActionFunction, ActionOp, ActionPrimitive, CommonFlowEntry, FieldAction,
    MappedAction, MappedField, MappedValue, MeterColor, P4FieldType,
    TableInfo,
};

use super::translate::{
    const_conditions_to_vendor_fields, mapped_value, p4_field_to_vendor_field,
    ALL_COLORS, SIMPLE_ACTIONS,
};
use super::TableManager;
use crate::mapper::P4TableMapper;
use crate::types::*;
use crate::udf::UdfManager;

fn meter_color(c: Color) -> MeterColor {
    match c {
        Color::Green => MeterColor::Green,
        Color::Yellow => MeterColor::Yellow,
        Color::Red => MeterColor::Red,
    }
}

// The colors a set of color-tagged copies of one action apply to.  An
// untagged copy applies to every color.
fn action_colors(actions: &[&Action]) -> BcmdResult<BTreeSet<MeterColor>> {
    let mut colors = BTreeSet::new();
    for action in actions {
        match action.param(ParamType::Color) {
            None => return Ok(ALL_COLORS.into_iter().collect()),
            Some(v) => {
                let c = v
                    .as_u64()
                    .and_then(|c| u32::try_from(c).ok())
                    .ok_or_else(|| {
                        BcmdError::Internal(format!("invalid color {v:?}"))
                    })?;
                colors.insert(meter_color(Color::try_from(c)?));
            }
        }
    }
    Ok(colors)
}

// Colors as an action records them: all of them is the same as none.
fn color_list(colors: &BTreeSet<MeterColor>) -> Vec<MeterColor> {
    if colors.len() == ALL_COLORS.len() {
        Vec::new()
    } else {
        colors.iter().copied().collect()
    }
}

fn required_param(action: &Action, param: ParamType) -> BcmdResult<&Value> {
    action.param(param).ok_or_else(|| {
        BcmdError::Internal(format!(
            "{} action has no {param} parameter",
            action.action_type
        ))
    })
}

fn param_i32(action: &Action, param: ParamType) -> BcmdResult<i32> {
    let v = required_param(action, param)?;
    // Ports and egress ids are carried as the bits of an i32.
    v.as_u64()
        .and_then(|x| u32::try_from(x).ok())
        .map(|x| x as i32)
        .ok_or_else(|| {
            BcmdError::Internal(format!("invalid {param} value {v:?}"))
        })
}

impl TableManager {
    /// Rebuild the mapped form of an ACL flow read from the hardware.  The
    /// result translates back into the same flow.
    pub fn vendor_flow_to_common_entry(
        &self,
        flow: &FlowEntry,
        table_id: u32,
        mapper: &dyn P4TableMapper,
        udf: Option<&UdfManager>,
    ) -> BcmdResult<CommonFlowEntry> {
        let def = mapper.lookup_table(table_id)?;
        let acl = self.acl_table(table_id)?;

        let conditions = const_conditions_to_vendor_fields(acl.const_conditions())?;
        let Some(fields) = flow.fields.strip_prefix(conditions.as_slice())
        else {
            return Err(BcmdError::Internal(format!(
                "flow read from table {} does not start with the table's \
                 header conditions",
                def.name
            )));
        };

        // Qualifiers are consumed in field id order, the order they were
        // emitted in, so fields sharing a qualifier are not swapped.
        let mut field_ids = def.match_fields.clone();
        field_ids.sort_unstable();

        let mut used = vec![false; fields.len()];
        let mut found_fields = BTreeMap::new();
        for field_id in field_ids {
            let mut field = mapper.map_match_field(table_id, field_id)?;
            let found = if acl.is_udf_field(field_id) {
                let udf = udf.ok_or_else(|| {
                    BcmdError::Internal("udf manager is not initialized".into())
                })?;
                let set_id = acl.udf_set_id().ok_or_else(|| {
                    BcmdError::Internal(format!(
                        "acl table {} has udf fields but no udf set",
                        acl.name()
                    ))
                })?;
                read_udf_field(udf, set_id, &mut field, fields, &mut used)?
            } else {
                self.read_vendor_field(&mut field, fields, &mut used)?
            };
            if found {
                found_fields.insert(field_id, field);
            }
        }
        let mapped = def
            .match_fields
            .iter()
            .filter_map(|id| found_fields.remove(id))
            .collect();

        Ok(CommonFlowEntry {
            table_info: TableInfo {
                id: def.id,
                name: def.name,
                table_type: def.table_type,
                pipeline_stage: def.stage,
            },
            fields: mapped,
            action: self.vendor_actions_to_mapped_action(&flow.actions)?,
            priority: flow.priority,
        })
    }

    // Fill in the value and mask of a natively qualified field.  Returns
    // false if the flow doesn't match on the field.
    fn read_vendor_field(
        &self,
        field: &mut MappedField,
        fields: &[Field],
        used: &mut [bool],
    ) -> BcmdResult<bool> {
        let field_type =
            p4_field_to_vendor_field(field.field_type).ok_or_else(|| {
                BcmdError::Internal(format!(
                    "field type {} has no vendor qualifier",
                    field.field_type
                ))
            })?;
        let Some(idx) = fields
            .iter()
            .enumerate()
            .position(|(i, f)| !used[i] && f.field_type == field_type)
        else {
            return Ok(false);
        };
        used[idx] = true;
        let vendor = &fields[idx];

        let value = match field_type {
            FieldType::InPort | FieldType::ClonePort | FieldType::OutPort => {
                let port = vendor
                    .value
                    .as_u64()
                    .map(|p| p as u32 as i32)
                    .ok_or_else(|| {
                        BcmdError::Internal(format!(
                            "invalid port qualifier {:?}",
                            vendor.value
                        ))
                    })?;
                MappedValue::U32(
                    self.logical_port_to_port_id(
                        port,
                        field_type == FieldType::OutPort,
                    )?,
                )
            }
            _ => mapped_value(&vendor.value),
        };
        field.value = Some(value);
        field.mask = vendor.mask.as_ref().map(mapped_value);
        Ok(true)
    }

    fn logical_port_to_port_id(
        &self,
        port: i32,
        allow_trunk: bool,
    ) -> BcmdResult<u32> {
        if port == CPU_LOGICAL_PORT {
            return Ok(CPU_PORT_ID);
        }
        if let Some((id, _)) =
            self.port_id_to_logical_port.iter().find(|(_, p)| **p == port)
        {
            return Ok(*id);
        }
        if allow_trunk {
            if let Some((id, _)) =
                self.trunk_id_to_trunk_port.iter().find(|(_, t)| **t == port)
            {
                return Ok(*id);
            }
        }
        Err(BcmdError::Internal(format!(
            "no controller port for logical port {port} on unit {}",
            self.unit
        )))
    }

    fn trunk_port_to_port_id(&self, trunk: i32) -> BcmdResult<u32> {
        self.trunk_id_to_trunk_port
            .iter()
            .find(|(_, t)| **t == trunk)
            .map(|(id, _)| *id)
            .ok_or_else(|| {
                BcmdError::Internal(format!(
                    "no controller port for trunk port {trunk} on unit {}",
                    self.unit
                ))
            })
    }

    fn vendor_actions_to_mapped_action(
        &self,
        actions: &[Action],
    ) -> BcmdResult<MappedAction> {
        // A flow pointing at an egress object carries a single action.
        if let [action] = actions {
            if let Some(v) = action.param(ParamType::EgressIntfId) {
                let egress = param_i32(action, ParamType::EgressIntfId)?;
                return if action.action_type == ActionType::OutputL3 {
                    self.group_nexthops
                        .iter()
                        .find(|(_, g)| g.egress_intf_id == egress)
                        .map(|(id, _)| MappedAction::ProfileGroupId(*id))
                        .ok_or_else(|| {
                            BcmdError::Internal(format!(
                                "no group uses egress object {v:?}"
                            ))
                        })
                } else {
                    self.member_nexthops
                        .iter()
                        .find(|(_, m)| m.egress_intf_id == egress)
                        .map(|(id, _)| MappedAction::ProfileMemberId(*id))
                        .ok_or_else(|| {
                            BcmdError::Internal(format!(
                                "no member uses egress object {v:?}"
                            ))
                        })
                };
            }
        }

        let mut function = ActionFunction::default();
        let copies: Vec<&Action> = actions
            .iter()
            .filter(|a| a.action_type == ActionType::CopyToCpu)
            .collect();
        let drops: Vec<&Action> = actions
            .iter()
            .filter(|a| a.action_type == ActionType::Drop)
            .collect();
        let drop_colors = if drops.is_empty() {
            BTreeSet::new()
        } else {
            action_colors(&drops)?
        };

        if let Some(first) = copies.first() {
            let queue = required_param(first, ParamType::Queue)?;
            function.modify_fields.push(FieldAction {
                field_type: P4FieldType::CpuQueueId,
                value: mapped_value(queue),
                meter_colors: Vec::new(),
            });
            let copy_colors = action_colors(&copies)?;
            if copy_colors.is_subset(&drop_colors) {
                // Sent to the cpu: every copied color is also dropped.
                function.modify_fields.push(FieldAction {
                    field_type: P4FieldType::EgressPort,
                    value: MappedValue::U32(CPU_PORT_ID),
                    meter_colors: color_list(&copy_colors),
                });
                let rest: BTreeSet<MeterColor> =
                    drop_colors.difference(&copy_colors).copied().collect();
                if !rest.is_empty() {
                    function.primitives.push(ActionPrimitive {
                        op: ActionOp::Drop,
                        meter_colors: color_list(&rest),
                    });
                }
            } else {
                function.primitives.push(ActionPrimitive {
                    op: ActionOp::Clone,
                    meter_colors: color_list(&copy_colors),
                });
                if !drop_colors.is_empty() {
                    function.primitives.push(ActionPrimitive {
                        op: ActionOp::Drop,
                        meter_colors: color_list(&drop_colors),
                    });
                }
            }
        } else if !drop_colors.is_empty() {
            function.primitives.push(ActionPrimitive {
                op: ActionOp::Drop,
                meter_colors: color_list(&drop_colors),
            });
        }

        for action in actions {
            let field = match action.action_type {
                ActionType::CopyToCpu | ActionType::Drop => continue,
                ActionType::OutputPort => {
                    let port = param_i32(action, ParamType::LogicalPort)?;
                    FieldAction {
                        field_type: P4FieldType::EgressPort,
                        value: MappedValue::U32(
                            self.logical_port_to_port_id(port, false)?,
                        ),
                        meter_colors: Vec::new(),
                    }
                }
                ActionType::OutputTrunk => {
                    let trunk = param_i32(action, ParamType::TrunkPort)?;
                    FieldAction {
                        field_type: P4FieldType::EgressPort,
                        value: MappedValue::U32(
                            self.trunk_port_to_port_id(trunk)?,
                        ),
                        meter_colors: Vec::new(),
                    }
                }
                t => {
                    let (field_type, _, param) = SIMPLE_ACTIONS
                        .iter()
                        .find(|(_, a, _)| *a == t)
                        .ok_or_else(|| {
                            BcmdError::Internal(format!(
                                "cannot read back {t} action"
                            ))
                        })?;
                    FieldAction {
                        field_type: *field_type,
                        value: mapped_value(required_param(action, *param)?),
                        meter_colors: Vec::new(),
                    }
                }
            };
            function.modify_fields.push(field);
        }
        Ok(MappedAction::Function(function))
    }
}

// Reassemble a UDF match field from its chunk qualifiers.  Returns false if
// the flow doesn't match on the field.
fn read_udf_field(
    udf: &UdfManager,
    set_id: u32,
    field: &mut MappedField,
    fields: &[Field],
    used: &mut [bool],
) -> BcmdResult<bool> {
    // Translating a placeholder value tells us which chunks the field uses.
    let probe = MappedField {
        value: Some(MappedValue::U32(0)),
        mask: None,
        ..field.clone()
    };
    let chunk_ids: BTreeSet<u32> = udf
        .mapped_field_to_vendor_fields(set_id, &probe)?
        .iter()
        .filter_map(|f| f.udf_chunk_id)
        .collect();
    let mut found = false;
    for (i, f) in fields.iter().enumerate() {
        if f.field_type == FieldType::Udf
            && f.udf_chunk_id.map(|c| chunk_ids.contains(&c)).unwrap_or(false)
        {
            used[i] = true;
            found = true;
        }
    }
    if !found {
        return Ok(false);
    }
    let (value, mask) = udf.vendor_fields_to_mapped_value(set_id, field, fields)?;
    field.value = Some(value);
    field.mask = Some(mask);
    Ok(true)
}
