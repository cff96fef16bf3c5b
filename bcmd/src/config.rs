// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `bcmd`.

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use structopt::StructOpt;

use asic::AsicConfig;
use common::logging::LogFormat;

use crate::types::*;

#[derive(Debug, Default, StructOpt)]
#[structopt(name = "bcmd", about = "ACL and table manager for broadcom switches")]
pub struct Opt {
    #[structopt(long, about = "configuration file to start from")]
    pub config: Option<String>,

    #[structopt(
        long,
        about = "send log data to the named file rather than stdout"
    )]
    pub log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    pub log_format: Option<LogFormat>,

    #[structopt(long, help = "hardware unit to manage")]
    pub unit: Option<i32>,

    #[structopt(long, help = "id of the node bound to the unit")]
    pub node_id: Option<u64>,

    #[structopt(long, help = "file describing the capabilities of each chip")]
    pub hardware_specs_file: Option<String>,

    #[structopt(long, help = "udf sets reserved for the controller")]
    pub num_controller_udf_sets: Option<u32>,

    #[structopt(long, help = "chassis configuration to push at startup")]
    pub chassis_file: Option<String>,

    #[structopt(long, help = "description of the p4 tables and actions")]
    pub mapper_file: Option<String>,

    #[structopt(long, help = "p4 pipeline to push at startup")]
    pub pipeline_file: Option<String>,

    #[cfg(feature = "chaos")]
    #[structopt(long, about = "path to the the chaos testing configuration")]
    pub chaos_config: Option<String>,
}

/// The run-time settings of the daemon.  They come from an optional TOML
/// file, overridden by command-line options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    pub unit: i32,

    pub node_id: u64,

    /// Where to find the per-chip hardware descriptions.
    pub hardware_specs_file: String,

    /// How many of the unit's UDF sets the controller may allocate at run
    /// time.  The rest are used for static allocation at pipeline push.
    pub num_controller_udf_sets: u32,

    pub chassis_file: Option<String>,

    pub mapper_file: Option<String>,

    pub pipeline_file: Option<String>,

    /// Asic/platform-specific config settings.
    pub asic_config: AsicConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Json,
            unit: 0,
            node_id: 1,
            hardware_specs_file: "/etc/bcmd/hardware_specs.toml".to_string(),
            num_controller_udf_sets: 0,
            chassis_file: None,
            mapper_file: None,
            pipeline_file: None,
            asic_config: AsicConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> BcmdResult<Self> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)?;
        toml::from_str::<Config>(&txt)
            .map_err(BcmdError::from)
            .with_context(|| format!("parsing {}", path.display()))
    }
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(opts: &Opt, config: &mut Config) -> BcmdResult<()> {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    if let Some(unit) = opts.unit {
        config.unit = unit;
    }

    if let Some(node_id) = opts.node_id {
        config.node_id = node_id;
    }

    if let Some(specs) = &opts.hardware_specs_file {
        config.hardware_specs_file = specs.to_string();
    }

    if let Some(n) = opts.num_controller_udf_sets {
        config.num_controller_udf_sets = n;
    }

    if let Some(chassis_file) = &opts.chassis_file {
        config.chassis_file = Some(chassis_file.to_string());
    }

    if let Some(mapper_file) = &opts.mapper_file {
        config.mapper_file = Some(mapper_file.to_string());
    }

    if let Some(pipeline_file) = &opts.pipeline_file {
        config.pipeline_file = Some(pipeline_file.to_string());
    }

    #[cfg(feature = "chaos")]
    {
        if let Some(path) = &opts.chaos_config {
            let txt = std::fs::read_to_string(path)?;
            config.asic_config = toml::from_str(&txt)?;
        }
    }

    Ok(())
}

/// Build the Config used to run the daemon: the defaults, overridden by the
/// config file if one was named, overridden by any other command-line
/// options.
pub fn build_config(opts: &Opt) -> BcmdResult<Config> {
    let mut config = match &opts.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    update_from_cli(opts, &mut config)?;

    if config.node_id == 0 {
        return Err(BcmdError::Invalid("node id must be non-zero".to_string()));
    }
    Ok(config)
}
