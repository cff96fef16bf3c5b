// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use slog::Drain;

/// How log records should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Unstructured, terminal-friendly text
    Human,
    /// Bunyan-style json, one record per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            x => Err(format!("invalid log format: {x}")),
        }
    }
}

fn build<W>(name: &'static str, out: W, format: LogFormat) -> slog::Logger
where
    W: Write + Send + 'static,
{
    match format {
        LogFormat::Human => {
            let decorator = slog_term::PlainDecorator::new(out);
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain)
                .chan_size(0x2000)
                .build()
                .fuse();
            slog::Logger::root(drain, slog::o!("name" => name))
        }
        LogFormat::Json => {
            let drain = slog_bunyan::with_name(name, out).build().fuse();
            let drain = slog_async::Async::new(drain)
                .chan_size(0x2000)
                .build()
                .fuse();
            slog::Logger::root(drain, slog::o!())
        }
    }
}

/// Construct the root logger for a daemon or test.  If a log file is
/// provided, records are appended to it.  Otherwise they are written to
/// stdout.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            Ok(build(name, file, format))
        }
        None => Ok(build(name, std::io::stdout(), format)),
    }
}
