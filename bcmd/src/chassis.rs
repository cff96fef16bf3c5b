// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Read-only access to the chassis: the vendor ports and trunks that back
//! each controller-visible id, and the current state of each port.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;

use aal::Unit;
use common::chassis::ChassisConfig;

use crate::types::*;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
pub struct SdkPort {
    pub unit: Unit,
    pub logical_port: i32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
pub struct SdkTrunk {
    pub unit: Unit,
    pub trunk_port: i32,
}

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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PortState {
    #[default]
    Unknown,
    Up,
    Down,
    Failed,
}

/// The chassis state the table manager consults.
pub trait ChassisRo {
    /// Map each controller port id of a node to its vendor port.
    fn port_id_to_sdk_port(
        &self,
        node_id: u64,
    ) -> BcmdResult<BTreeMap<u32, SdkPort>>;

    /// Map each controller trunk id of a node to its vendor trunk.
    fn trunk_id_to_sdk_trunk(
        &self,
        node_id: u64,
    ) -> BcmdResult<BTreeMap<u32, SdkTrunk>>;

    fn port_state(&self, port: SdkPort) -> BcmdResult<PortState>;
}

/// A chassis described entirely by its configuration.  Port states start
/// out `Up` and are changed with `set_port_state`.
#[derive(Debug)]
pub struct StaticChassis {
    config: ChassisConfig,
    port_states: RwLock<BTreeMap<SdkPort, PortState>>,
}

impl StaticChassis {
    pub fn new(config: ChassisConfig) -> BcmdResult<Self> {
        let mut port_states = BTreeMap::new();
        for port in &config.singleton_ports {
            let unit = unit_for_node(&config, port.node)?;
            let sdk = SdkPort {
                unit,
                logical_port: port.logical_port,
            };
            if port_states.insert(sdk, PortState::Up).is_some() {
                return Err(BcmdError::Invalid(format!(
                    "logical port {} of unit {unit} is used twice",
                    port.logical_port
                )));
            }
        }
        Ok(StaticChassis {
            config,
            port_states: RwLock::new(port_states),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> BcmdResult<Self> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)?;
        let config: ChassisConfig = toml::from_str(&txt)?;
        Self::new(config).with_context(|| format!("loading {}", path.display()))
    }

    pub fn config(&self) -> &ChassisConfig {
        &self.config
    }

    pub fn set_port_state(
        &self,
        port: SdkPort,
        state: PortState,
    ) -> BcmdResult<()> {
        match self.port_states.write().get_mut(&port) {
            Some(s) => {
                *s = state;
                Ok(())
            }
            None => Err(BcmdError::Missing(format!(
                "no logical port {} on unit {}",
                port.logical_port, port.unit
            ))),
        }
    }
}

fn unit_for_node(config: &ChassisConfig, node_id: u64) -> BcmdResult<Unit> {
    config.unit_for_node(node_id).ok_or_else(|| {
        BcmdError::Invalid(format!("node {node_id} is not in the chassis"))
    })
}

impl ChassisRo for StaticChassis {
    fn port_id_to_sdk_port(
        &self,
        node_id: u64,
    ) -> BcmdResult<BTreeMap<u32, SdkPort>> {
        let unit = unit_for_node(&self.config, node_id)?;
        Ok(self
            .config
            .singleton_ports
            .iter()
            .filter(|p| p.node == node_id)
            .map(|p| {
                (
                    p.id,
                    SdkPort {
                        unit,
                        logical_port: p.logical_port,
                    },
                )
            })
            .collect())
    }

    fn trunk_id_to_sdk_trunk(
        &self,
        node_id: u64,
    ) -> BcmdResult<BTreeMap<u32, SdkTrunk>> {
        let unit = unit_for_node(&self.config, node_id)?;
        Ok(self
            .config
            .trunk_ports
            .iter()
            .filter(|t| t.node == node_id)
            .map(|t| {
                (
                    t.id,
                    SdkTrunk {
                        unit,
                        trunk_port: t.trunk_port,
                    },
                )
            })
            .collect())
    }

    fn port_state(&self, port: SdkPort) -> BcmdResult<PortState> {
        self.port_states.read().get(&port).copied().ok_or_else(|| {
            BcmdError::Missing(format!(
                "no logical port {} on unit {}",
                port.logical_port, port.unit
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHASSIS: &str = r#"
platform = "generic_tomahawk"

[[nodes]]
id = 1
unit = 0

[[nodes]]
id = 2
unit = 1

[[singleton_ports]]
id = 10
node = 1
logical_port = 34

[[singleton_ports]]
id = 11
node = 1
logical_port = 35

[[singleton_ports]]
id = 20
node = 2
logical_port = 34

[[trunk_ports]]
id = 100
node = 1
trunk_port = 3
"#;

    fn chassis() -> StaticChassis {
        StaticChassis::new(toml::from_str(CHASSIS).unwrap()).unwrap()
    }

    #[test]
    fn test_port_maps() -> anyhow::Result<()> {
        let c = chassis();
        let ports = c.port_id_to_sdk_port(1)?;
        assert_eq!(ports.len(), 2);
        assert_eq!(
            ports[&11],
            SdkPort {
                unit: 0,
                logical_port: 35
            }
        );
        assert_eq!(c.port_id_to_sdk_port(2)?[&20].unit, 1);

        let trunks = c.trunk_id_to_sdk_trunk(1)?;
        assert_eq!(trunks[&100].trunk_port, 3);
        assert!(c.trunk_id_to_sdk_trunk(2)?.is_empty());
        assert!(c.port_id_to_sdk_port(3).is_err());
        Ok(())
    }

    #[test]
    fn test_port_state() -> anyhow::Result<()> {
        let c = chassis();
        let port = SdkPort {
            unit: 1,
            logical_port: 34,
        };
        assert_eq!(c.port_state(port)?, PortState::Up);
        c.set_port_state(port, PortState::Down)?;
        assert_eq!(c.port_state(port)?, PortState::Down);

        // The same logical port on another unit is unaffected
        let other = SdkPort {
            unit: 0,
            logical_port: 34,
        };
        assert_eq!(c.port_state(other)?, PortState::Up);

        let missing = SdkPort {
            unit: 0,
            logical_port: 99,
        };
        assert!(c.port_state(missing).is_err());
        assert!(c.set_port_state(missing, PortState::Up).is_err());
        Ok(())
    }

    #[test]
    fn test_duplicate_port() {
        let mut config: ChassisConfig = toml::from_str(CHASSIS).unwrap();
        config.singleton_ports[1].logical_port = 34;
        assert!(StaticChassis::new(config).is_err());
    }
}
