// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The control flow of a compiled P4 program: which tables are applied, in
//! which order, and under which conditions.

use serde::Deserialize;
use serde::Serialize;

use super::P4HeaderType;
use super::PipelineStage;

/// A reference to a table from within a control block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct TableRef {
    pub table_id: u32,
    pub table_name: String,
    #[serde(default)]
    pub stage: PipelineStage,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchCondition {
    /// `if (table.apply().hit)`, or its negation
    Hit {
        table: TableRef,
        #[serde(default)]
        not: bool,
    },
    /// `if (hdr.x.isValid())`, or its negation
    IsValid {
        header: P4HeaderType,
        #[serde(default)]
        not: bool,
    },
}

impl BranchCondition {
    pub fn not_operator(&self) -> bool {
        match self {
            BranchCondition::Hit { not, .. } => *not,
            BranchCondition::IsValid { not, .. } => *not,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IfStatement {
    pub condition: BranchCondition,
    #[serde(default)]
    pub true_block: P4ControlBlock,
    #[serde(default)]
    pub false_block: P4ControlBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum P4ControlStatement {
    Apply(TableRef),
    Branch(IfStatement),
    Drop,
    Return,
    Exit,
    FixedPipeline,
    Other(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct P4ControlBlock {
    #[serde(default)]
    pub statements: Vec<P4ControlStatement>,
}

impl P4ControlBlock {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// One independent control (e.g. ingress or egress).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct P4Control {
    pub name: String,
    pub main: P4ControlBlock,
}

/// The switch-relevant portion of a compiled pipeline.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct P4PipelineConfig {
    #[serde(default)]
    pub controls: Vec<P4Control>,
}
