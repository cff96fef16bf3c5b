// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Translation of P4 table entries into vendor flows.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use slog::trace;

use aal::{
    Action, ActionType, Color, Field, FieldType, FlowEntry, NexthopType,
    PacketReplication, PacketReplicationEntry, ParamType, TableType, Value,
};
use common::p4::{
    ActionFunction, ActionOp, CommonFlowEntry, FieldAction, MappedAction,
    MappedField, MappedValue, MeterColor, P4FieldType, P4HeaderType,
    P4TableType, PacketReplicationEngineEntry, PipelineStage, TableEntry,
    UpdateType,
};

use super::TableManager;
use crate::mapper::P4TableMapper;
use crate::types::*;
use crate::udf::UdfManager;

/// The vendor qualifier for a P4 match field type, if there is one.
pub fn p4_field_to_vendor_field(field_type: P4FieldType) -> Option<FieldType> {
    use P4FieldType as P;
    Some(match field_type {
        P::EthSrc => FieldType::EthSrc,
        P::EthDst => FieldType::EthDst,
        P::EthType => FieldType::EthType,
        P::VlanVid => FieldType::VlanVid,
        P::VlanPcp => FieldType::VlanPcp,
        P::Ipv4Src => FieldType::Ipv4Src,
        P::Ipv4Dst => FieldType::Ipv4Dst,
        P::Ipv4Proto | P::Ipv6NextHdr => FieldType::IpProtoNextHdr,
        P::Ipv4Diffserv | P::Ipv6TrafficClass => FieldType::IpDscpTrafClass,
        P::NwTtl => FieldType::IpTtlHopLimit,
        P::Ipv6Src => FieldType::Ipv6SrcUpper64,
        P::Ipv6Dst => FieldType::Ipv6DstUpper64,
        P::IcmpType | P::IcmpCode => FieldType::IcmpTypeCode,
        P::L4SrcPort => FieldType::L4Src,
        P::L4DstPort => FieldType::L4Dst,
        P::Vrf => FieldType::Vrf,
        P::ClassId => FieldType::VfpDstClassId,
        P::L3ClassId => FieldType::L3DstClassId,
        P::EgressPort => FieldType::OutPort,
        P::IngressPort => FieldType::InPort,
        P::ClonePort => FieldType::ClonePort,
        _ => return None,
    })
}

/// Field assignments that translate one to one into a vendor action with a
/// single parameter.
pub(super) const SIMPLE_ACTIONS: &[(P4FieldType, ActionType, ParamType)] = &[
    (P4FieldType::EthSrc, ActionType::SetEthSrc, ParamType::EthSrc),
    (P4FieldType::EthDst, ActionType::SetEthDst, ParamType::EthDst),
    (P4FieldType::VlanVid, ActionType::AddOuterVlan, ParamType::VlanVid),
    (P4FieldType::VlanPcp, ActionType::SetVlanPcp, ParamType::VlanPcp),
    (P4FieldType::Ipv4Src, ActionType::SetIpv4Src, ParamType::Ipv4Src),
    (P4FieldType::Ipv4Dst, ActionType::SetIpv4Dst, ParamType::Ipv4Dst),
    (P4FieldType::Ipv6Src, ActionType::SetIpv6Src, ParamType::Ipv6Src),
    (P4FieldType::Ipv6Dst, ActionType::SetIpv6Dst, ParamType::Ipv6Dst),
    (P4FieldType::Vrf, ActionType::SetVrf, ParamType::Vrf),
    (
        P4FieldType::ClassId,
        ActionType::SetVfpDstClassId,
        ParamType::VfpDstClassId,
    ),
    (P4FieldType::Color, ActionType::SetColor, ParamType::Color),
    (
        P4FieldType::McastGroupId,
        ActionType::SetL2McastGroup,
        ParamType::L2McastGroupId,
    ),
    (P4FieldType::Cos, ActionType::SetCos, ParamType::Cos),
];

pub(super) const ALL_COLORS: [MeterColor; 3] =
    [MeterColor::Green, MeterColor::Yellow, MeterColor::Red];

pub(super) fn vendor_value(v: &MappedValue) -> Value {
    match v {
        MappedValue::U32(x) => Value::U32(*x),
        MappedValue::U64(x) => Value::U64(*x),
        MappedValue::Bytes(b) => Value::Bytes(b.clone()),
    }
}

pub(super) fn mapped_value(v: &Value) -> MappedValue {
    match v {
        Value::U32(x) => MappedValue::U32(*x),
        Value::U64(x) => MappedValue::U64(*x),
        Value::Bytes(b) => MappedValue::Bytes(b.clone()),
    }
}

pub(super) fn vendor_color(c: MeterColor) -> Color {
    match c {
        MeterColor::Green => Color::Green,
        MeterColor::Yellow => Color::Yellow,
        MeterColor::Red => Color::Red,
    }
}

fn is_cpu_port(v: &MappedValue) -> bool {
    v.as_u64() == Some(CPU_PORT_ID as u64)
}

fn port_id(v: &MappedValue) -> BcmdResult<u32> {
    v.as_u64()
        .and_then(|p| u32::try_from(p).ok())
        .ok_or_else(|| BcmdError::Invalid(format!("invalid port id {v:?}")))
}

/// Emit `action` once for each color in `colors`, tagged with that color.
/// Naming no colors, or all of them, is the same as not being color aware.
fn fill_color_params(
    colors: &BTreeSet<MeterColor>,
    action: Action,
    out: &mut Vec<Action>,
) {
    if colors.is_empty() || colors.len() == ALL_COLORS.len() {
        out.push(action);
        return;
    }
    for color in colors {
        let c = vendor_color(*color);
        out.push(
            action
                .clone()
                .with_param(ParamType::Color, Value::U32(u32::from(c))),
        );
    }
}

fn color_set(colors: &[MeterColor]) -> BTreeSet<MeterColor> {
    let set: BTreeSet<MeterColor> = colors.iter().copied().collect();
    if set.is_empty() {
        ALL_COLORS.into_iter().collect()
    } else {
        set
    }
}

// Split an action function into the parts consumed by a conversion and the
// parts left for the next one.
fn remaining(
    function: &ActionFunction,
    used_fields: &[Option<usize>],
    used_primitives: &[Option<usize>],
) -> ActionFunction {
    let skip = |used: &[Option<usize>], idx: usize| {
        used.iter().any(|u| *u == Some(idx))
    };
    ActionFunction {
        modify_fields: function
            .modify_fields
            .iter()
            .enumerate()
            .filter(|(i, _)| !skip(used_fields, *i))
            .map(|(_, f)| f.clone())
            .collect(),
        primitives: function
            .primitives
            .iter()
            .enumerate()
            .filter(|(i, _)| !skip(used_primitives, *i))
            .map(|(_, p)| p.clone())
            .collect(),
    }
}

/// Combine the cpu queue, egress-to-cpu, clone and drop parts of an action
/// into copy-to-cpu and drop actions.
///
///   no queue, no egress to cpu, no clone: nothing to do
///   queue, no egress to cpu, no clone: copy to cpu for every color
///   queue, no egress to cpu, clone: copy to cpu
///   queue, egress to cpu, no clone: send to cpu
///
/// An egress to cpu or clone without a queue is an error, as is an egress
/// to cpu together with a clone.  A send to cpu that names no colors applies
/// to the colors the drop does not.
fn convert_send_or_copy_to_cpu(
    function: &ActionFunction,
) -> BcmdResult<(Vec<Action>, ActionFunction)> {
    let fields = &function.modify_fields;
    let primitives = &function.primitives;
    let cpu_queue = fields
        .iter()
        .rposition(|f| f.field_type == P4FieldType::CpuQueueId);
    let egress_to_cpu = fields.iter().rposition(|f| {
        f.field_type == P4FieldType::EgressPort && is_cpu_port(&f.value)
    });
    let clone_port = fields
        .iter()
        .rposition(|f| f.field_type == P4FieldType::ClonePort);
    let drop = primitives.iter().rposition(|p| p.op == ActionOp::Drop);
    let clone = primitives.iter().rposition(|p| p.op == ActionOp::Clone);

    if cpu_queue.is_none() && egress_to_cpu.is_none() && clone.is_none() {
        return Ok((Vec::new(), function.clone()));
    }
    let Some(queue_idx) = cpu_queue else {
        return Err(BcmdError::Invalid(
            "an egress to cpu or clone action requires a cpu queue id"
                .to_string(),
        ));
    };
    if egress_to_cpu.is_some() && clone.is_some() {
        return Err(BcmdError::Invalid(
            "egress to cpu and clone cannot both be present".to_string(),
        ));
    }

    let mut copy_colors = match (clone, egress_to_cpu) {
        (Some(i), _) => color_set(&primitives[i].meter_colors),
        (None, Some(i)) => color_set(&fields[i].meter_colors),
        (None, None) => color_set(&[]),
    };
    let mut drop_colors = match drop {
        Some(i) => color_set(&primitives[i].meter_colors),
        None => BTreeSet::new(),
    };

    let send_to_cpu = egress_to_cpu.is_some();
    if send_to_cpu && copy_colors.len() == ALL_COLORS.len() {
        if drop_colors.len() == ALL_COLORS.len() {
            return Err(BcmdError::Invalid(
                "cannot process overlapping uncolored drop and send to cpu \
                 actions"
                    .to_string(),
            ));
        }
        copy_colors = copy_colors.difference(&drop_colors).copied().collect();
    } else if send_to_cpu {
        if let Some(c) = drop_colors.intersection(&copy_colors).next() {
            return Err(BcmdError::Invalid(format!(
                "cannot process overlapping drop and send to cpu color {c}"
            )));
        }
    }
    if send_to_cpu {
        drop_colors.extend(copy_colors.iter().copied());
    }

    let mut actions = Vec::new();
    let copy = Action::new(ActionType::CopyToCpu)
        .with_param(ParamType::Queue, vendor_value(&fields[queue_idx].value));
    fill_color_params(&copy_colors, copy, &mut actions);
    if !drop_colors.is_empty() {
        fill_color_params(
            &drop_colors,
            Action::new(ActionType::Drop),
            &mut actions,
        );
    }

    let rest = remaining(
        function,
        &[cpu_queue, egress_to_cpu, clone_port],
        &[drop, clone],
    );
    Ok((actions, rest))
}

impl TableManager {
    /// Classify the hardware table an entry belongs in.
    pub fn table_type(&self, entry: &CommonFlowEntry) -> BcmdResult<TableType> {
        let info = &entry.table_info;
        if info.pipeline_stage == PipelineStage::Default {
            return Err(BcmdError::Internal(format!(
                "table {} has no pipeline stage",
                info.name
            )));
        }
        if self.acl_tables.contains_key(&info.id) {
            return Ok(TableType::Acl);
        }
        if info.pipeline_stage == PipelineStage::Decap {
            return Ok(TableType::Tunnel);
        }

        match info.table_type {
            P4TableType::L3Ip => {
                let has = |t| entry.fields.iter().any(|f| f.field_type == t);
                match (has(P4FieldType::Ipv4Dst), has(P4FieldType::Ipv6Dst)) {
                    (true, false) => Ok(TableType::Ipv4Lpm),
                    (false, true) => Ok(TableType::Ipv6Lpm),
                    _ => Err(BcmdError::Internal(format!(
                        "l3 flow for table {} is neither ipv4 nor ipv6",
                        info.name
                    ))),
                }
            }
            P4TableType::L2Multicast => Ok(TableType::L2Multicast),
            P4TableType::L2Unicast => Ok(TableType::L2Unicast),
            P4TableType::L2MyStation => Ok(TableType::MyStation),
            t => Err(BcmdError::Internal(format!(
                "cannot find a hardware table for table {} of type {t:?}",
                info.name
            ))),
        }
    }

    /// Build the vendor flow for a table entry.
    pub fn fill_flow_entry(
        &self,
        entry: &TableEntry,
        update_type: UpdateType,
        mapper: &dyn P4TableMapper,
        udf: Option<&UdfManager>,
    ) -> BcmdResult<FlowEntry> {
        if entry.table_id == 0 {
            return Err(BcmdError::Invalid(
                "table entry has no table id".to_string(),
            ));
        }
        let common = mapper.map_flow_entry(entry, update_type)?;
        let mut flow = self
            .common_to_vendor_flow(&common, update_type, udf)
            .with_context(|| format!("table {}", common.table_info.name))?;

        if entry.counter_data.is_some() {
            return Err(BcmdError::Invalid(
                "initializing flow counters is not supported".to_string(),
            ));
        }
        if let Some(meter) = &entry.meter_config {
            if flow.table_type != TableType::Acl {
                return Err(BcmdError::Invalid(
                    "metering is only supported for acl flows".to_string(),
                ));
            }
            flow.meter = Some(fill_meter_config(meter)?);
        }
        Ok(flow)
    }

    /// Translate a mapped entry into a vendor flow.  The actions are left
    /// empty for a delete.
    pub fn common_to_vendor_flow(
        &self,
        common: &CommonFlowEntry,
        update_type: UpdateType,
        udf: Option<&UdfManager>,
    ) -> BcmdResult<FlowEntry> {
        let table_type = self.table_type(common)?;
        let mut flow = FlowEntry {
            unit: self.unit,
            table_type,
            ..Default::default()
        };

        let acl = if table_type == TableType::Acl {
            let id = common.table_info.id;
            let acl = self.acl_tables.get(&id).ok_or_else(|| {
                BcmdError::Internal(format!(
                    "table {id} was classified as acl but is not an acl table"
                ))
            })?;
            flow.acl_table_id = acl.physical_table_id().ok_or_else(|| {
                BcmdError::Internal(format!(
                    "acl table {} has not been installed",
                    acl.name()
                ))
            })?;
            flow.acl_stage = acl.stage();
            flow.fields = const_conditions_to_vendor_fields(
                acl.const_conditions(),
            )?;
            Some(acl)
        } else {
            None
        };

        // Match fields that share a qualifier are told apart by order, so
        // they are always emitted by field id.
        let mut fields: Vec<&MappedField> = common.fields.iter().collect();
        fields.sort_by_key(|f| f.field_id);

        let mut has_vrf = false;
        for field in fields {
            if field.value.is_none() {
                continue;
            }
            // A zero mask matches everything, so the field does nothing.
            if field.mask.as_ref().map(|m| m.is_zero()).unwrap_or(false) {
                continue;
            }
            if field.field_type == P4FieldType::Vrf {
                has_vrf = true;
            }
            match acl {
                Some(acl) if acl.is_udf_field(field.field_id) => {
                    let udf = udf.ok_or_else(|| {
                        BcmdError::Internal(
                            "udf manager is not initialized".to_string(),
                        )
                    })?;
                    let set_id = acl.udf_set_id().ok_or_else(|| {
                        BcmdError::Internal(format!(
                            "acl table {} has udf fields but no udf set",
                            acl.name()
                        ))
                    })?;
                    flow.fields
                        .extend(udf.mapped_field_to_vendor_fields(set_id, field)?);
                }
                _ => flow
                    .fields
                    .push(self.mapped_field_to_vendor_field(table_type, field)?),
            }
        }

        if matches!(table_type, TableType::Ipv4Lpm | TableType::Ipv6Lpm)
            && !has_vrf
        {
            return Err(BcmdError::Invalid(
                "vrf is not set for an l3 lpm flow".to_string(),
            ));
        }

        if common.priority < 0 {
            return Err(BcmdError::Invalid(format!(
                "priority {} is negative",
                common.priority
            )));
        }
        if acl.is_some() && common.priority >= ACL_TABLE_PRIORITY_RANGE {
            return Err(BcmdError::Invalid(format!(
                "acl priority {} must be less than {ACL_TABLE_PRIORITY_RANGE}",
                common.priority
            )));
        }
        flow.priority = common.priority;

        if update_type == UpdateType::Delete {
            return Ok(flow);
        }
        flow.actions = self.mapped_action_to_vendor_actions(&common.action)?;
        trace!(self.log, "translated flow";
            "table_id" => common.table_info.id,
            "fields" => flow.fields.len(),
            "actions" => flow.actions.len());
        Ok(flow)
    }

    fn mapped_field_to_vendor_field(
        &self,
        table_type: TableType,
        field: &MappedField,
    ) -> BcmdResult<Field> {
        let value = field.value.as_ref().ok_or_else(|| {
            BcmdError::Invalid(format!("field {} has no value", field.field_id))
        })?;
        if field.field_type == P4FieldType::Vrf {
            match value.as_u64() {
                Some(vrf) if (VRF_MIN..=VRF_MAX).contains(&vrf) => {}
                _ => {
                    return Err(BcmdError::Invalid(format!(
                        "vrf {value:?} is out of range [{VRF_MIN}, {VRF_MAX}]"
                    )))
                }
            }
            if table_type != TableType::Acl && field.mask.is_some() {
                return Err(BcmdError::Invalid(
                    "non-acl vrf match fields do not accept a mask".to_string(),
                ));
            }
        }

        let field_type =
            p4_field_to_vendor_field(field.field_type).ok_or_else(|| {
                BcmdError::Invalid(format!(
                    "unsupported p4 field type to match: {}",
                    field.field_type
                ))
            })?;

        let value = match field_type {
            FieldType::InPort | FieldType::ClonePort | FieldType::OutPort => {
                let port_id = port_id(value)?;
                let port = if port_id == CPU_PORT_ID {
                    CPU_LOGICAL_PORT
                } else if let Some(p) = self.port_id_to_logical_port.get(&port_id)
                {
                    *p
                } else if let (FieldType::OutPort, Some(p)) =
                    (field_type, self.trunk_id_to_trunk_port.get(&port_id))
                {
                    *p
                } else {
                    return Err(self.unknown_port(port_id));
                };
                Value::U32(port as u32)
            }
            _ => vendor_value(value),
        };
        Ok(Field {
            field_type,
            value,
            mask: field.mask.as_ref().map(vendor_value),
            udf_chunk_id: None,
        })
    }

    pub(super) fn unknown_port(&self, port_id: u32) -> BcmdError {
        BcmdError::Invalid(format!(
            "could not find logical port or trunk port for port {port_id} on \
             node {} corresponding to unit {}",
            self.node_id, self.unit
        ))
    }

    fn mapped_action_to_vendor_actions(
        &self,
        action: &MappedAction,
    ) -> BcmdResult<Vec<Action>> {
        match action {
            MappedAction::ProfileMemberId(member_id) => {
                let info = self.non_multipath_nexthop_info(*member_id)?;
                let action_type = match info.nexthop_type {
                    NexthopType::Drop => ActionType::Drop,
                    NexthopType::Port => ActionType::OutputPort,
                    NexthopType::Trunk => ActionType::OutputTrunk,
                    NexthopType::Unknown => {
                        return Err(BcmdError::Internal(format!(
                            "member {member_id} has an unknown nexthop type"
                        )))
                    }
                };
                Ok(vec![Action::new(action_type).with_param(
                    ParamType::EgressIntfId,
                    Value::U32(info.egress_intf_id as u32),
                )])
            }
            MappedAction::ProfileGroupId(group_id) => {
                let info = self.multipath_nexthop_info(*group_id)?;
                Ok(vec![Action::new(ActionType::OutputL3).with_param(
                    ParamType::EgressIntfId,
                    Value::U32(info.egress_intf_id as u32),
                )])
            }
            MappedAction::Function(function) => {
                let (mut actions, rest) =
                    self.convert_complex_actions(function)?;
                for primitive in &rest.primitives {
                    // Only drops matter at this point.
                    if primitive.op == ActionOp::Drop {
                        let colors =
                            primitive.meter_colors.iter().copied().collect();
                        fill_color_params(
                            &colors,
                            Action::new(ActionType::Drop),
                            &mut actions,
                        );
                    }
                }
                for field in &rest.modify_fields {
                    if let Some(a) = self.p4_action_field_to_vendor_action(field)?
                    {
                        actions.push(a);
                    }
                }
                Ok(actions)
            }
        }
    }

    // Convert the multi-field actions first.  Each conversion consumes the
    // parts of the action it used.
    fn convert_complex_actions(
        &self,
        function: &ActionFunction,
    ) -> BcmdResult<(Vec<Action>, ActionFunction)> {
        let (mut actions, rest) = convert_send_or_copy_to_cpu(function)?;
        let (nexthop, rest) = self.convert_nexthop_action(&rest)?;
        actions.extend(nexthop);
        Ok((actions, rest))
    }

    // A source mac, destination mac and egress port, and nothing else, form
    // a nexthop.
    fn convert_nexthop_action(
        &self,
        function: &ActionFunction,
    ) -> BcmdResult<(Vec<Action>, ActionFunction)> {
        let unchanged = || Ok((Vec::new(), function.clone()));
        if function.modify_fields.len() != 3 {
            return unchanged();
        }
        let mut src = None;
        let mut dst = None;
        let mut egress = None;
        for field in &function.modify_fields {
            let slot = match field.field_type {
                P4FieldType::EthSrc => &mut src,
                P4FieldType::EthDst => &mut dst,
                P4FieldType::EgressPort => &mut egress,
                _ => continue,
            };
            if slot.is_some() {
                return Err(BcmdError::Invalid(format!(
                    "cannot process multiple {} actions",
                    field.field_type
                )));
            }
            *slot = Some(field);
        }
        let (Some(src), Some(dst), Some(egress)) = (src, dst, egress) else {
            return unchanged();
        };

        if src.value.is_zero() {
            return Err(BcmdError::Invalid(
                "an ethernet source of 0 cannot be used in a nexthop"
                    .to_string(),
            ));
        }
        if dst.value.is_zero() {
            return Err(BcmdError::Invalid(
                "an ethernet destination of 0 cannot be used in a nexthop"
                    .to_string(),
            ));
        }
        if is_cpu_port(&egress.value) {
            return Err(BcmdError::Invalid(
                "cpu is not a valid nexthop destination".to_string(),
            ));
        }

        let mut actions = Vec::with_capacity(3);
        for field in [src, dst, egress] {
            if let Some(a) = self.p4_action_field_to_vendor_action(field)? {
                actions.push(a);
            }
        }
        let rest = ActionFunction {
            modify_fields: Vec::new(),
            primitives: function.primitives.clone(),
        };
        Ok((actions, rest))
    }

    /// Translate a single field assignment.  Some assignments need no
    /// vendor action at all.
    fn p4_action_field_to_vendor_action(
        &self,
        field: &FieldAction,
    ) -> BcmdResult<Option<Action>> {
        if let Some((_, action_type, param_type)) = SIMPLE_ACTIONS
            .iter()
            .find(|(t, _, _)| *t == field.field_type)
        {
            return Ok(Some(
                Action::new(*action_type)
                    .with_param(*param_type, vendor_value(&field.value)),
            ));
        }
        match field.field_type {
            P4FieldType::L3Admit => Ok(None),
            P4FieldType::EgressPort | P4FieldType::EgressTrunk => self
                .create_egress_port_action(port_id(&field.value)?)
                .map(Some),
            P4FieldType::CpuQueueId | P4FieldType::ClonePort => {
                Err(BcmdError::Internal(format!(
                    "{} should have been handled as a complex action",
                    field.field_type
                )))
            }
            t => Err(BcmdError::Unsupported(format!(
                "p4 field type {t} is not supported for actions"
            ))),
        }
    }

    fn create_egress_port_action(&self, port_id: u32) -> BcmdResult<Action> {
        if port_id == CPU_PORT_ID {
            return Err(BcmdError::Internal(
                "cpu egress should have been handled as a complex action"
                    .to_string(),
            ));
        }
        if let Some(port) = self.port_id_to_logical_port.get(&port_id) {
            Ok(Action::new(ActionType::OutputPort)
                .with_param(ParamType::LogicalPort, Value::U32(*port as u32)))
        } else if let Some(trunk) = self.trunk_id_to_trunk_port.get(&port_id) {
            Ok(Action::new(ActionType::OutputTrunk)
                .with_param(ParamType::TrunkPort, Value::U32(*trunk as u32)))
        } else {
            Err(self.unknown_port(port_id))
        }
    }

    /// Validate a packet replication entry and build its vendor form.
    pub fn fill_replication_config(
        &self,
        entry: &PacketReplicationEngineEntry,
    ) -> BcmdResult<PacketReplicationEntry> {
        let replication = match entry {
            PacketReplicationEngineEntry::CloneSession(session) => {
                if session.packet_length_bytes != 0 {
                    return Err(BcmdError::Invalid(
                        "clone truncation is not supported".to_string(),
                    ));
                }
                if session.session_id != CLONE_SESSION_ID {
                    return Err(BcmdError::Invalid(format!(
                        "only clone session {CLONE_SESSION_ID} is supported"
                    )));
                }
                if session.class_of_service != 0 {
                    return Err(BcmdError::Invalid(
                        "cos is not supported on cloned packets".to_string(),
                    ));
                }
                match session.replicas.as_slice() {
                    [r] if r.egress_port == CPU_PORT_ID => {}
                    _ => {
                        return Err(BcmdError::Invalid(format!(
                            "cloning is only supported to the cpu port \
                             ({CPU_PORT_ID})"
                        )))
                    }
                }
                PacketReplication::CloneSession {
                    session_id: session.session_id,
                }
            }
            PacketReplicationEngineEntry::MulticastGroup(group) => {
                let id = group.multicast_group_id;
                if id == 0 || id > MAX_MULTICAST_GROUP_ID {
                    return Err(BcmdError::Invalid(format!(
                        "multicast group id {id} is not in [1, \
                         {MAX_MULTICAST_GROUP_ID}]"
                    )));
                }
                let mut ports = Vec::with_capacity(group.replicas.len());
                for r in &group.replicas {
                    if r.instance != 1 {
                        return Err(BcmdError::Unsupported(format!(
                            "replica instance {} of multicast group {id}",
                            r.instance
                        )));
                    }
                    ports.push(r.egress_port);
                }
                PacketReplication::MulticastGroup {
                    group_id: id,
                    ports,
                }
            }
        };
        Ok(PacketReplicationEntry {
            unit: self.unit,
            replication,
        })
    }
}

/// Check that a P4 meter fits the hardware policer and convert it.
pub fn fill_meter_config(
    meter: &common::p4::MeterConfig,
) -> BcmdResult<aal::MeterConfig> {
    let fit = |v: i64, what: &str| {
        if (0..0xffff_ffff).contains(&v) {
            Ok(v as u32)
        } else {
            Err(BcmdError::Invalid(format!(
                "meter {what} {v} is out of the range supported by the chip"
            )))
        }
    };
    Ok(aal::MeterConfig {
        committed_rate: fit(meter.cir, "cir")?,
        committed_burst: fit(meter.cburst, "cburst")?,
        peak_rate: fit(meter.pir, "pir")?,
        peak_burst: fit(meter.pburst, "pburst")?,
    })
}

/// The qualifiers that implement the header validity conditions an ACL
/// table is applied under.
pub fn const_conditions_to_vendor_fields(
    conditions: &BTreeMap<P4HeaderType, bool>,
) -> BcmdResult<Vec<Field>> {
    let ipv6 = conditions.get(&P4HeaderType::Ipv6).copied().unwrap_or(false);
    let mut fields = Vec::new();
    for (header, valid) in conditions {
        if !valid {
            continue;
        }
        let (field_type, value) = match header {
            P4HeaderType::Arp => (FieldType::IpType, ETHERTYPE_ARP),
            P4HeaderType::Ipv4 => (FieldType::IpType, ETHERTYPE_IPV4),
            P4HeaderType::Ipv6 => (FieldType::IpType, ETHERTYPE_IPV6),
            P4HeaderType::Tcp => (FieldType::IpProtoNextHdr, IP_PROTO_TCP),
            P4HeaderType::Udp | P4HeaderType::UdpPayload => {
                (FieldType::IpProtoNextHdr, IP_PROTO_UDP)
            }
            P4HeaderType::Gre => (FieldType::IpProtoNextHdr, IP_PROTO_GRE),
            P4HeaderType::Icmp if ipv6 => {
                (FieldType::IpProtoNextHdr, IP_PROTO_ICMPV6)
            }
            P4HeaderType::Icmp => (FieldType::IpProtoNextHdr, IP_PROTO_ICMP),
            h => {
                return Err(BcmdError::Unsupported(format!(
                    "header validity condition on {h} cannot be expressed"
                )))
            }
        };
        fields.push(Field::new(field_type, Value::U32(value)));
    }
    Ok(fields)
}
