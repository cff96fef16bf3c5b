// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use anyhow::Context;
use slog::{debug, info};
use structopt::StructOpt;

use bcmd::chassis::StaticChassis;
use bcmd::config::{build_config, Opt};
use bcmd::mapper::{MapperDesc, StaticTableMapper};
use bcmd::node::Node;
use bcmd::pipeline::{physical_pipeline_string, PipelineProcessor};
use common::p4::{ForwardingPipelineConfig, P4PipelineConfig};

cfg_if::cfg_if! {
    if #[cfg(feature = "chaos")] {
        const ASIC_BACKEND: &str = "chaos";
    } else {
        const ASIC_BACKEND: &str = "bcm_stub";
    }
}

fn load_pipeline(path: &str) -> anyhow::Result<ForwardingPipelineConfig> {
    let txt = std::fs::read_to_string(path)
        .with_context(|| format!("reading pipeline {path}"))?;
    let pipeline: P4PipelineConfig = serde_json::from_str(&txt)
        .with_context(|| format!("parsing pipeline {path}"))?;
    Ok(ForwardingPipelineConfig::from_pipeline(&pipeline)?)
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let config = build_config(&opt)?;

    let log =
        common::logging::init("bcmd", &config.log_file, config.log_format)?;
    info!(log, "bcmd config: {config:#?}");

    let asic = asic::Handle::new(&log, &config.asic_config)
        .context("initializing the asic")?;
    info!(log, "initialized asic"; "backend" => ASIC_BACKEND);

    let chassis_file = config
        .chassis_file
        .as_ref()
        .context("no chassis file configured")?;
    let chassis = StaticChassis::load(chassis_file)?;
    let chassis_config = chassis.config().clone();
    let mapper = match &config.mapper_file {
        Some(path) => StaticTableMapper::load(path)?,
        None => StaticTableMapper::new(MapperDesc::default())?,
    };

    let node = Node::new(
        &log,
        config.unit,
        &config.hardware_specs_file,
        config.num_controller_udf_sets,
        Box::new(asic),
        Box::new(mapper),
        Box::new(chassis),
    );
    node.push_chassis_config(&chassis_config, config.node_id)
        .context("pushing chassis config")?;

    if let Some(path) = &config.pipeline_file {
        let fwd = load_pipeline(path)?;
        for control in &fwd.pipeline()?.controls {
            let processor = PipelineProcessor::new(&log, &control.main)?;
            info!(log, "physical pipeline";
                "control" => &control.name,
                "pipeline" => physical_pipeline_string(
                    processor.physical_pipeline()
                ));
        }
        node.push_forwarding_pipeline_config(&fwd)
            .context("pushing forwarding pipeline config")?;
        let tables = node.read_table_entries(&Default::default())?;
        debug!(log, "pipeline installed"; "entries" => tables.len());
    }

    node.shutdown()?;
    info!(log, "done");
    Ok(())
}
