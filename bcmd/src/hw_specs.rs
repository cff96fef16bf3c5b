// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Per-chip hardware capabilities, read from a TOML description file.

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use common::chassis::Platform;

use crate::types::*;

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
pub enum ChipType {
    #[default]
    Unknown,
    TridentPlus,
    Trident2,
    Tomahawk,
    TomahawkPlus,
}

impl From<Platform> for ChipType {
    fn from(platform: Platform) -> Self {
        match platform {
            Platform::GenericTridentPlus => ChipType::TridentPlus,
            Platform::GenericTrident2 => ChipType::Trident2,
            Platform::GenericTomahawk => ChipType::Tomahawk,
            Platform::GenericTomahawkPlus => ChipType::TomahawkPlus,
            Platform::Unknown => ChipType::Unknown,
        }
    }
}

/// Geometry of the user-defined field banks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct UdfSpec {
    /// Width of a single chunk, in bits
    pub chunk_bits: u32,
    pub chunks_per_set: u32,
    pub set_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChipSpec {
    pub chip_type: ChipType,
    #[serde(default)]
    pub udf: UdfSpec,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HardwareSpecs {
    #[serde(default)]
    pub chips: Vec<ChipSpec>,
}

impl HardwareSpecs {
    pub fn load(path: impl AsRef<Path>) -> BcmdResult<Self> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)?;
        txt.parse::<HardwareSpecs>()
            .with_context(|| format!("parsing {}", path.display()))
    }

    /// Return the spec of the given chip.
    pub fn chip_spec(&self, chip: ChipType) -> BcmdResult<&ChipSpec> {
        self.chips.iter().find(|c| c.chip_type == chip).ok_or_else(|| {
            BcmdError::Internal(format!("no hardware spec for chip {chip}"))
        })
    }
}

impl std::str::FromStr for HardwareSpecs {
    type Err = BcmdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
