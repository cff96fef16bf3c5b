// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Egress objects for action profile members and groups.

use std::collections::BTreeMap;

use slog::debug;

use aal::{
    MultipathMember, MultipathNexthop, NexthopType, NonMultipathNexthop,
};
use common::p4::{
    ActionOp, ActionProfileGroup, ActionProfileMember, MappedAction,
    P4FieldType,
};

use super::TableManager;
use crate::chassis::{ChassisRo, PortState, SdkPort};
use crate::mapper::P4TableMapper;
use crate::types::*;

impl TableManager {
    /// Build the egress object an action profile member describes.
    ///
    /// A member either drops, or sets some subset of the source mac,
    /// destination mac, vlan and egress port.
    pub fn fill_non_multipath_nexthop(
        &self,
        member: &ActionProfileMember,
        mapper: &dyn P4TableMapper,
    ) -> BcmdResult<NonMultipathNexthop> {
        let MappedAction::Function(function) =
            mapper.map_action_profile_member(member)?
        else {
            return Err(BcmdError::Invalid(format!(
                "member {} does not map to an action function",
                member.member_id
            )));
        };

        let mut nexthop = NonMultipathNexthop {
            unit: self.unit,
            ..Default::default()
        };

        match function.primitives.as_slice() {
            [] => {
                for field in &function.modify_fields {
                    let value = field.value.as_u64().ok_or_else(|| {
                        BcmdError::Invalid(format!(
                            "{} value {:?} is not an integer",
                            field.field_type, field.value
                        ))
                    })?;
                    match field.field_type {
                        P4FieldType::EthSrc => nexthop.src_mac = value,
                        P4FieldType::EthDst => nexthop.dst_mac = value,
                        P4FieldType::VlanVid => nexthop.vlan = value as u32,
                        P4FieldType::EgressPort => {
                            self.fill_nexthop_port(&mut nexthop, value)?
                        }
                        // Class ids are applied by the L3 tables
                        P4FieldType::L3ClassId => {}
                        t => {
                            return Err(BcmdError::Invalid(format!(
                                "invalid field type {t} in the action of \
                                 member {}",
                                member.member_id
                            )))
                        }
                    }
                }
            }
            [p] if p.op == ActionOp::Drop => {
                nexthop.nexthop_type = NexthopType::Drop;
            }
            _ => {
                return Err(BcmdError::Invalid(format!(
                    "invalid action primitives for member {}",
                    member.member_id
                )))
            }
        }

        check_non_multipath_nexthop(&nexthop)
            .with_context(|| format!("member {}", member.member_id))?;
        Ok(nexthop)
    }

    fn fill_nexthop_port(
        &self,
        nexthop: &mut NonMultipathNexthop,
        port_id: u64,
    ) -> BcmdResult<()> {
        let port_id = u32::try_from(port_id)
            .map_err(|_| BcmdError::Invalid(format!("invalid port {port_id}")))?;
        if port_id == CPU_PORT_ID {
            nexthop.nexthop_type = NexthopType::Port;
            nexthop.logical_port = CPU_LOGICAL_PORT;
        } else if let Some(port) = self.port_id_to_logical_port.get(&port_id) {
            nexthop.nexthop_type = NexthopType::Port;
            nexthop.logical_port = *port;
        } else if let Some(trunk) = self.trunk_id_to_trunk_port.get(&port_id) {
            nexthop.nexthop_type = NexthopType::Trunk;
            nexthop.trunk_port = *trunk;
        } else {
            return Err(self.unknown_port(port_id));
        }
        Ok(())
    }

    /// Build the multipath egress object for a group.  Members egressing
    /// through a port that is not up are left out.
    pub fn fill_multipath_nexthop(
        &self,
        group: &ActionProfileGroup,
        mapper: &dyn P4TableMapper,
        chassis: &dyn ChassisRo,
    ) -> BcmdResult<MultipathNexthop> {
        mapper.map_action_profile_group(group)?;

        let mut nexthop = MultipathNexthop {
            unit: self.unit,
            members: Vec::with_capacity(group.members.len()),
        };
        for member in &group.members {
            let info = self.non_multipath_nexthop_info(member.member_id)?;
            if info.nexthop_type == NexthopType::Port {
                let port = SdkPort {
                    unit: self.unit,
                    logical_port: info.port,
                };
                let state = chassis.port_state(port)?;
                if state != PortState::Up {
                    debug!(self.log, "leaving member out of group";
                        "group_id" => group.group_id,
                        "member_id" => member.member_id,
                        "logical_port" => info.port,
                        "state" => %state);
                    continue;
                }
            }
            nexthop.members.push(MultipathMember {
                egress_intf_id: info.egress_intf_id,
                weight: member.weight.max(1) as u32,
            });
        }
        Ok(nexthop)
    }

    /// Rebuild the multipath egress objects of every group with a member
    /// egressing through the given port, keyed by their egress interface
    /// id.  This is what needs reprogramming after the port changes state.
    pub fn fill_multipath_nexthops_with_port(
        &self,
        port_id: u32,
        mapper: &dyn P4TableMapper,
        chassis: &dyn ChassisRo,
    ) -> BcmdResult<BTreeMap<i32, MultipathNexthop>> {
        let port = self
            .port_id_to_logical_port
            .get(&port_id)
            .ok_or_else(|| self.unknown_port(port_id))?;
        let mut nexthops = BTreeMap::new();
        let Some(group_ids) = self.port_to_group_ids.get(port) else {
            return Ok(nexthops);
        };
        for group_id in group_ids {
            let group = self.groups.get(group_id).ok_or_else(|| {
                BcmdError::Internal(format!(
                    "group {group_id} is indexed by port {port_id} but is \
                     not known"
                ))
            })?;
            let info = self.multipath_nexthop_info(*group_id)?;
            nexthops.insert(
                info.egress_intf_id,
                self.fill_multipath_nexthop(group, mapper, chassis)?,
            );
        }
        Ok(nexthops)
    }
}

/// Check that the fields of a nexthop are consistent with its type.
///
///   port: trap to cpu (nothing set), or forward (both macs set)
///   trunk: trunk port and both macs set
///   drop: nothing set
pub fn check_non_multipath_nexthop(nexthop: &NonMultipathNexthop) -> BcmdResult<()> {
    let NonMultipathNexthop {
        logical_port: lp,
        trunk_port,
        src_mac: src,
        dst_mac: dst,
        ..
    } = *nexthop;
    let ok = match nexthop.nexthop_type {
        NexthopType::Port => {
            (lp == 0 && src == 0 && dst == 0)
                || (lp == 0 && src > 0 && dst > 0)
                || (lp > 0 && src > 0 && dst > 0)
        }
        NexthopType::Trunk => trunk_port > 0 && src > 0 && dst > 0,
        NexthopType::Drop => lp == 0 && trunk_port == 0 && src == 0 && dst == 0,
        NexthopType::Unknown => {
            return Err(BcmdError::Invalid(
                "nexthop type is not known".to_string(),
            ))
        }
    };
    if ok {
        Ok(())
    } else {
        Err(BcmdError::Invalid(format!(
            "invalid {} nexthop: logical port {lp}, trunk port {trunk_port}, \
             src mac {src:#x}, dst mac {dst:#x}",
            nexthop.nexthop_type
        )))
    }
}
