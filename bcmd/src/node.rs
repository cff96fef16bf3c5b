// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The context object for a single node: one hardware unit, the managers
//! that program it, and the lock that serializes every configuration push
//! and entry write against it.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use slog::{debug, info, o, warn};

use aal::{AsicOps, Unit};
use common::chassis::ChassisConfig;
use common::p4::{
    CommonFlowEntry, CounterData, DirectMeterEntry, Entity,
    ForwardingPipelineConfig, TableEntry, Update, UpdateType,
};

use crate::acl_manager::AclManager;
use crate::chassis::ChassisRo;
use crate::mapper::P4TableMapper;
use crate::table_manager::TableManager;
use crate::types::*;

struct NodeState {
    table_manager: TableManager,
    acl_manager: AclManager,
    /// Set by a successful chassis push, cleared by shutdown
    configured: bool,
}

pub struct Node {
    log: slog::Logger,
    unit: Unit,
    asic: Box<dyn AsicOps + Send + Sync>,
    mapper: Box<dyn P4TableMapper + Send + Sync>,
    chassis: Box<dyn ChassisRo + Send + Sync>,
    state: RwLock<NodeState>,
}

impl Node {
    pub fn new(
        log: &slog::Logger,
        unit: Unit,
        hardware_specs_file: &str,
        num_controller_udf_sets: u32,
        asic: Box<dyn AsicOps + Send + Sync>,
        mapper: Box<dyn P4TableMapper + Send + Sync>,
        chassis: Box<dyn ChassisRo + Send + Sync>,
    ) -> Self {
        let state = NodeState {
            table_manager: TableManager::new(log, unit),
            acl_manager: AclManager::new(
                log,
                unit,
                hardware_specs_file,
                num_controller_udf_sets,
            ),
            configured: false,
        };
        Node {
            log: log.new(o!("unit" => "node", "bcm_unit" => unit)),
            unit,
            asic,
            mapper,
            chassis,
            state: RwLock::new(state),
        }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn asic(&self) -> &(dyn AsicOps + Send + Sync) {
        self.asic.as_ref()
    }

    pub fn push_chassis_config(
        &self,
        config: &ChassisConfig,
        node_id: u64,
    ) -> BcmdResult<()> {
        let mut state = self.state.write();
        let NodeState {
            table_manager,
            acl_manager,
            configured,
        } = &mut *state;
        table_manager.verify_chassis_config(node_id)?;
        acl_manager.verify_chassis_config(config, node_id)?;
        table_manager.push_chassis_config(self.chassis.as_ref(), node_id)?;
        acl_manager.push_chassis_config(self.asic.as_ref(), config, node_id)?;
        *configured = true;
        info!(self.log, "pushed chassis config"; "node_id" => node_id);
        Ok(())
    }

    pub fn verify_chassis_config(
        &self,
        config: &ChassisConfig,
        node_id: u64,
    ) -> BcmdResult<()> {
        let state = self.state.read();
        state.table_manager.verify_chassis_config(node_id)?;
        state.acl_manager.verify_chassis_config(config, node_id)
    }

    pub fn push_forwarding_pipeline_config(
        &self,
        config: &ForwardingPipelineConfig,
    ) -> BcmdResult<()> {
        let mut state = self.state.write();
        check_configured(&state)?;
        let NodeState {
            table_manager,
            acl_manager,
            ..
        } = &mut *state;
        acl_manager.push_forwarding_pipeline_config(
            table_manager,
            self.asic.as_ref(),
            self.mapper.as_ref(),
            config,
        )
    }

    pub fn verify_forwarding_pipeline_config(
        &self,
        config: &ForwardingPipelineConfig,
    ) -> BcmdResult<()> {
        let state = self.state.read();
        state.acl_manager.verify_forwarding_pipeline_config(config)
    }

    /// Apply a batch of updates in order.  Every update is attempted and
    /// has its own result; those that succeed stay applied even if others
    /// fail.
    pub fn write_forwarding_entries(
        &self,
        updates: &[Update],
    ) -> Vec<BcmdResult<()>> {
        let mut state = self.state.write();
        if let Err(e) = check_configured(&state) {
            return updates
                .iter()
                .map(|_| Err(BcmdError::from_kind(e.kind(), e.to_string())))
                .collect();
        }
        updates
            .iter()
            .map(|u| {
                let r = self.write_entity(&mut state, u);
                if let Err(e) = &r {
                    debug!(self.log, "update failed";
                        "update_type" => %u.update_type,
                        "error" => %e);
                }
                r
            })
            .collect()
    }

    fn write_entity(
        &self,
        state: &mut NodeState,
        update: &Update,
    ) -> BcmdResult<()> {
        let asic = self.asic.as_ref();
        let mapper = self.mapper.as_ref();
        let NodeState {
            table_manager: tm,
            acl_manager: am,
            ..
        } = state;
        match &update.entity {
            Entity::TableEntry(entry) => {
                self.check_acl_entry(tm, entry)?;
                match update.update_type {
                    UpdateType::Insert => {
                        am.insert_table_entry(tm, asic, mapper, entry)
                    }
                    UpdateType::Modify => {
                        am.modify_table_entry(tm, asic, mapper, entry)
                    }
                    UpdateType::Delete => am.delete_table_entry(tm, asic, entry),
                }
            }
            Entity::DirectMeterEntry(meter) => match update.update_type {
                UpdateType::Modify => {
                    self.check_acl_entry(tm, &meter.table_entry)?;
                    am.update_table_entry_meter(tm, asic, meter)
                }
                t => Err(BcmdError::Invalid(format!(
                    "direct meter entries can only be modified, not {t}"
                ))),
            },
            Entity::ActionProfileMember(_) => Err(BcmdError::Unsupported(
                "action profile members".to_string(),
            )),
            Entity::ActionProfileGroup(_) => Err(BcmdError::Unsupported(
                "action profile groups".to_string(),
            )),
            Entity::PacketReplicationEngineEntry(_) => Err(
                BcmdError::Unsupported("packet replication entries".to_string()),
            ),
        }
    }

    // Only ACL entries are programmed by this node.
    fn check_acl_entry(
        &self,
        tm: &TableManager,
        entry: &TableEntry,
    ) -> BcmdResult<()> {
        if tm.is_acl_table(entry.table_id) {
            return Ok(());
        }
        let def = self.mapper.lookup_table(entry.table_id)?;
        warn!(self.log, "write to a table that is not an acl table";
            "table_id" => entry.table_id,
            "table_type" => %def.table_type);
        Err(BcmdError::Unsupported(format!(
            "entries of {} table {}",
            def.table_type, def.name
        )))
    }

    /// Return the entries of the given tables, or of every table if the set
    /// is empty.
    pub fn read_table_entries(
        &self,
        table_ids: &BTreeSet<u32>,
    ) -> BcmdResult<Vec<TableEntry>> {
        let state = self.state.read();
        check_configured(&state)?;
        Ok(state.table_manager.read_table_entries(table_ids))
    }

    pub fn read_back_entry(
        &self,
        entry: &TableEntry,
    ) -> BcmdResult<CommonFlowEntry> {
        let state = self.state.read();
        check_configured(&state)?;
        state.acl_manager.read_back_entry(
            &state.table_manager,
            self.asic.as_ref(),
            self.mapper.as_ref(),
            entry,
        )
    }

    pub fn update_table_entry_meter(
        &self,
        meter: &DirectMeterEntry,
    ) -> BcmdResult<()> {
        let mut state = self.state.write();
        check_configured(&state)?;
        let NodeState {
            table_manager,
            acl_manager,
            ..
        } = &mut *state;
        acl_manager.update_table_entry_meter(
            table_manager,
            self.asic.as_ref(),
            meter,
        )
    }

    pub fn get_table_entry_stats(
        &self,
        entry: &TableEntry,
    ) -> BcmdResult<CounterData> {
        let state = self.state.read();
        check_configured(&state)?;
        state.acl_manager.get_table_entry_stats(
            &state.table_manager,
            self.asic.as_ref(),
            entry,
        )
    }

    pub fn delete_table(&self, table_id: u32) -> BcmdResult<()> {
        let mut state = self.state.write();
        check_configured(&state)?;
        let NodeState {
            table_manager,
            acl_manager,
            ..
        } = &mut *state;
        acl_manager.delete_table(table_manager, self.asic.as_ref(), table_id)
    }

    /// Forget the chassis and the installed pipeline.  The ACL tables are torn
    /// down by the next pipeline push.  A chassis push is needed before the
    /// node accepts anything else.
    pub fn shutdown(&self) -> BcmdResult<()> {
        let mut state = self.state.write();
        state.acl_manager.shutdown()?;
        state.table_manager.shutdown();
        state.configured = false;
        info!(self.log, "node shut down");
        Ok(())
    }
}

fn check_configured(state: &NodeState) -> BcmdResult<()> {
    if state.configured {
        Ok(())
    } else {
        Err(BcmdError::NotInitialized(
            "no chassis config has been pushed".to_string(),
        ))
    }
}

/// Collapse the per-update results of a batch into a single result.  The
/// batch fails with the kind of its first failure.
pub fn batch_result(results: &[BcmdResult<()>]) -> BcmdResult<()> {
    let failed: Vec<&BcmdError> =
        results.iter().filter_map(|r| r.as_ref().err()).collect();
    match failed.first() {
        None => Ok(()),
        Some(first) => Err(BcmdError::from_kind(
            first.kind(),
            format!(
                "{} of {} updates failed, first: {first}",
                failed.len(),
                results.len()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use common::chassis::Platform;
    use common::p4::{
        ActionProfileMember, FieldMatch, P4TableDef, P4TableType,
        PipelineStage, TableAction,
    };

    use super::*;
    use crate::chassis::SdkPort;
    use crate::test_support::{
        test_log, MockAsic, MockChassis, MockP4TableMapper,
    };

    fn node(asic: MockAsic, mapper: MockP4TableMapper) -> Node {
        let mut chassis = MockChassis::new();
        chassis
            .expect_port_id_to_sdk_port()
            .returning(|_| Ok(BTreeMap::new()));
        chassis
            .expect_trunk_id_to_sdk_trunk()
            .returning(|_| Ok(BTreeMap::new()));
        Node::new(
            &test_log(),
            0,
            "/nonexistent/specs.toml",
            0,
            Box::new(asic),
            Box::new(mapper),
            Box::new(chassis),
        )
    }

    fn l3_entry() -> TableEntry {
        TableEntry {
            table_id: 9,
            matches: vec![FieldMatch::exact(1, &[10, 0, 0, 1])],
            action: Some(TableAction::ActionProfileMemberId(1)),
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_chassis() {
        let n = node(MockAsic::new(), MockP4TableMapper::new());
        let e = n.read_table_entries(&BTreeSet::new()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotInitialized);
        let e = n
            .push_forwarding_pipeline_config(&ForwardingPipelineConfig::default())
            .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotInitialized);

        let updates = vec![
            Update {
                update_type: UpdateType::Insert,
                entity: Entity::TableEntry(l3_entry()),
            };
            2
        ];
        let results = n.write_forwarding_entries(&updates);
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| r.as_ref().unwrap_err().kind()
                == ErrorKind::NotInitialized));

        // The hardware specs file does not exist
        let config = ChassisConfig {
            platform: Platform::GenericTomahawk,
            ..Default::default()
        };
        let e = n.push_chassis_config(&config, 1).unwrap_err();
        assert!(matches!(e, BcmdError::Io(_)));
        let e = n.verify_chassis_config(&config, 0).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_batch_result() {
        assert!(batch_result(&[Ok(()), Ok(())]).is_ok());
        let e = batch_result(&[
            Ok(()),
            Err(BcmdError::Missing("x".to_string())),
            Err(BcmdError::Invalid("y".to_string())),
        ])
        .unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert!(e.to_string().contains("2 of 3 updates failed"));
    }

    #[test]
    fn test_unsupported_entities() {
        let mut mapper = MockP4TableMapper::new();
        mapper.expect_lookup_table().returning(|id| {
            Ok(P4TableDef {
                id,
                name: "ipv4_route".to_string(),
                match_fields: vec![1],
                size: 0,
                is_const: false,
                table_type: P4TableType::L3Ip,
                stage: PipelineStage::L3Lpm,
            })
        });
        let n = node(MockAsic::new(), mapper);
        // Mark the node configured without touching the hardware
        n.state.write().configured = true;

        let member = ActionProfileMember {
            action_profile_id: 1,
            member_id: 1,
            action: common::p4::Action {
                action_id: 1,
                params: vec![],
            },
        };
        let updates = vec![
            Update {
                update_type: UpdateType::Insert,
                entity: Entity::TableEntry(l3_entry()),
            },
            Update {
                update_type: UpdateType::Insert,
                entity: Entity::ActionProfileMember(member),
            },
            Update {
                update_type: UpdateType::Insert,
                entity: Entity::DirectMeterEntry(DirectMeterEntry {
                    table_entry: l3_entry(),
                    config: None,
                }),
            },
        ];
        let results = n.write_forwarding_entries(&updates);
        let kinds: Vec<ErrorKind> = results
            .iter()
            .map(|r| r.as_ref().unwrap_err().kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::Unimplemented,
                ErrorKind::Unimplemented,
                ErrorKind::InvalidArgument
            ]
        );
        assert_eq!(batch_result(&results).unwrap_err().kind(), ErrorKind::Unimplemented);
    }

    // A port on the wrong unit fails the push before the acl manager binds
    // the node id or touches the hardware.
    #[test]
    fn test_chassis_push_failure() {
        let mut chassis = MockChassis::new();
        chassis.expect_port_id_to_sdk_port().returning(|_| {
            Ok(BTreeMap::from([(
                1,
                SdkPort {
                    unit: 1,
                    logical_port: 34,
                },
            )]))
        });
        chassis
            .expect_trunk_id_to_sdk_trunk()
            .returning(|_| Ok(BTreeMap::new()));
        let n = Node::new(
            &test_log(),
            0,
            "/nonexistent/specs.toml",
            0,
            Box::new(MockAsic::new()),
            Box::new(MockP4TableMapper::new()),
            Box::new(chassis),
        );
        let config = ChassisConfig {
            platform: Platform::GenericTomahawk,
            ..Default::default()
        };

        let e = n.push_chassis_config(&config, 1).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Internal);
        n.verify_chassis_config(&config, 2).unwrap();
        let e = n.read_table_entries(&BTreeSet::new()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotInitialized);
    }

    #[test]
    fn test_shutdown() -> anyhow::Result<()> {
        let n = node(MockAsic::new(), MockP4TableMapper::new());
        n.state.write().configured = true;
        assert!(n.read_table_entries(&BTreeSet::new())?.is_empty());
        n.shutdown()?;
        let e = n.read_table_entries(&BTreeSet::new()).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotInitialized);
        Ok(())
    }
}
