// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Partitioning of a P4 control block into physical tables.
//!
//! A table applied only when another table misses can share a physical
//! table with it, with a lower priority: a packet hitting the first table
//! never reaches the second.  Tables applied one after another at the top
//! level need separate physical tables, since a packet may hit both.
//! Header validity branches don't nest tables, but restrict the packets a
//! table sees; those restrictions are carried along as valid conditions.

use std::collections::BTreeMap;

use slog::{debug, warn};

use common::p4::{
    BranchCondition, IfStatement, P4ControlBlock, P4ControlStatement,
    P4HeaderType, TableRef,
};

use crate::types::*;

/// Header validity requirements, keyed by header.
pub type ValidConditions = BTreeMap<P4HeaderType, bool>;

const L3_HEADERS: [P4HeaderType; 3] =
    [P4HeaderType::Arp, P4HeaderType::Ipv4, P4HeaderType::Ipv6];
const L4_HEADERS: [P4HeaderType; 5] = [
    P4HeaderType::Gre,
    P4HeaderType::Icmp,
    P4HeaderType::Tcp,
    P4HeaderType::Udp,
    P4HeaderType::UdpPayload,
];

fn is_udp_pair(a: P4HeaderType, b: P4HeaderType) -> bool {
    matches!(
        (a, b),
        (P4HeaderType::Udp, P4HeaderType::UdpPayload)
            | (P4HeaderType::UdpPayload, P4HeaderType::Udp)
    )
}

/// Check a set of conditions for contradictions, and drop conditions made
/// redundant by another.  If one header of a layer is valid, every other
/// header in that layer is implicitly invalid.
fn collapse_valid_conditions(conditions: &mut ValidConditions) -> BcmdResult<()> {
    if let (Some(payload), Some(udp)) = (
        conditions.get(&P4HeaderType::UdpPayload),
        conditions.get(&P4HeaderType::Udp),
    ) {
        if payload != udp {
            return Err(BcmdError::Invalid(
                "inconsistent udp header and udp payload expectations"
                    .to_string(),
            ));
        }
    }

    let mut l3 = None;
    let mut l4 = None;
    for (header, valid) in conditions.iter() {
        if !valid {
            continue;
        }
        if L3_HEADERS.contains(header) {
            if let Some(prev) = l3 {
                return Err(BcmdError::Invalid(format!(
                    "conflicting l3 headers ({prev}, {header}) cannot be \
                     valid at once"
                )));
            }
            l3 = Some(*header);
        } else if L4_HEADERS.contains(header) {
            if let Some(prev) = l4 {
                if is_udp_pair(prev, *header) {
                    continue;
                }
                return Err(BcmdError::Invalid(format!(
                    "conflicting l4 headers ({prev}, {header}) cannot be \
                     valid at once"
                )));
            }
            l4 = Some(*header);
        }
    }

    if let Some(keep) = l3 {
        conditions.retain(|h, _| *h == keep || !L3_HEADERS.contains(h));
    }
    if let Some(keep) = l4 {
        conditions.retain(|h, _| *h == keep || !L4_HEADERS.contains(h));
    }
    Ok(())
}

/// Add a condition to a set, unless it contradicts the conditions already
/// present.  On failure the set is left unchanged.
fn insert_if_not_conflicting(
    conditions: &mut ValidConditions,
    header: P4HeaderType,
    valid: bool,
) -> BcmdResult<()> {
    if let Some(existing) = conditions.get(&header) {
        if *existing != valid {
            return Err(BcmdError::Invalid(format!(
                "conflicting value for header type {header} already exists"
            )));
        }
    }
    let mut updated = conditions.clone();
    updated.insert(header, valid);
    collapse_valid_conditions(&mut updated)?;
    *conditions = updated;
    Ok(())
}

/// A logical table as placed within a physical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTable {
    pub table: TableRef,
    pub valid_conditions: ValidConditions,
    /// Relative priority within the physical table.  Higher wins.
    pub priority: i32,
}

/// The logical tables sharing one physical table, highest priority first.
pub type PhysicalTable = Vec<PipelineTable>;

// Where a statement sits: the table whose miss leads to it, if any, and the
// validity conditions accumulated on the way.
#[derive(Debug, Clone, Default)]
struct Context {
    parent: Option<TableRef>,
    valid_conditions: ValidConditions,
}

#[derive(Debug)]
struct Node {
    table: Option<TableRef>,
    parent: Option<u32>,
    valid_conditions: ValidConditions,
    priority: i32,
    subtables: Vec<usize>,
}

const ROOT: usize = 0;

pub struct PipelineProcessor {
    log: slog::Logger,
    // Index 0 is the root; every other node is an applied table.
    nodes: Vec<Node>,
    table_to_node: BTreeMap<u32, usize>,
    physical_pipeline: Vec<PhysicalTable>,
}

impl PipelineProcessor {
    /// Build the physical pipeline for a control block.
    pub fn new(log: &slog::Logger, block: &P4ControlBlock) -> BcmdResult<Self> {
        let mut p = PipelineProcessor {
            log: log.clone(),
            nodes: vec![Node {
                table: None,
                parent: None,
                valid_conditions: ValidConditions::new(),
                priority: 0,
                subtables: Vec::new(),
            }],
            table_to_node: BTreeMap::new(),
            physical_pipeline: Vec::new(),
        };
        p.process_control_block(block, &Context::default())?;
        p.set_priorities()?;
        p.populate_physical_pipeline();
        Ok(p)
    }

    pub fn physical_pipeline(&self) -> &[PhysicalTable] {
        &self.physical_pipeline
    }

    pub fn into_physical_pipeline(self) -> Vec<PhysicalTable> {
        self.physical_pipeline
    }

    fn process_control_block(
        &mut self,
        block: &P4ControlBlock,
        ctx: &Context,
    ) -> BcmdResult<()> {
        for statement in &block.statements {
            let result = match statement {
                P4ControlStatement::Apply(table) => self.apply_table(table, ctx),
                P4ControlStatement::Branch(branch) => match &branch.condition {
                    BranchCondition::Hit { .. } => {
                        self.process_hit_branch(branch, ctx)
                    }
                    BranchCondition::IsValid { .. } => self
                        .process_is_valid_branch(branch, true, ctx)
                        .and_then(|_| {
                            self.process_is_valid_branch(branch, false, ctx)
                        }),
                },
                P4ControlStatement::Drop
                | P4ControlStatement::Return
                | P4ControlStatement::Exit
                | P4ControlStatement::FixedPipeline => Ok(()),
                P4ControlStatement::Other(s) => {
                    warn!(self.log, "ignoring unknown control statement";
                        "statement" => s);
                    Ok(())
                }
            };
            result.with_context(|| {
                format!("failed to process statement {statement:?}")
            })?;
        }
        Ok(())
    }

    fn apply_table(&mut self, table: &TableRef, ctx: &Context) -> BcmdResult<()> {
        let parent_idx = match &ctx.parent {
            None => ROOT,
            Some(p) => {
                *self.table_to_node.get(&p.table_id).ok_or_else(|| {
                    BcmdError::Internal(format!(
                        "failed to find parent table {} while applying table",
                        p.table_name
                    ))
                })?
            }
        };
        if let Some(parent) = &ctx.parent {
            if parent.stage != table.stage {
                return Err(BcmdError::Invalid(format!(
                    "pipeline stage mismatch with parent table {}",
                    parent.table_name
                )));
            }
        }

        let mut conditions = ctx.valid_conditions.clone();
        for (header, valid) in &self.nodes[parent_idx].valid_conditions {
            if let Err(e) =
                insert_if_not_conflicting(&mut conditions, *header, *valid)
            {
                warn!(self.log,
                    "conflicting header valid conditions between a table \
                     and its parent, skipping table";
                    "table" => &table.table_name,
                    "error" => %e);
                return Ok(());
            }
        }

        if self.table_to_node.contains_key(&table.table_id) {
            return Err(BcmdError::Invalid(format!(
                "cannot apply table {} more than once",
                table.table_name
            )));
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            table: Some(table.clone()),
            parent: ctx.parent.as_ref().map(|p| p.table_id),
            valid_conditions: conditions,
            priority: 0,
            subtables: Vec::new(),
        });
        self.table_to_node.insert(table.table_id, idx);
        self.nodes[parent_idx].subtables.push(idx);
        Ok(())
    }

    fn process_hit_branch(
        &mut self,
        branch: &IfStatement,
        ctx: &Context,
    ) -> BcmdResult<()> {
        let BranchCondition::Hit { table, not } = &branch.condition else {
            return Err(BcmdError::Internal(
                "expected a hit condition".to_string(),
            ));
        };
        let hit_idx =
            *self.table_to_node.get(&table.table_id).ok_or_else(|| {
                BcmdError::Invalid(format!(
                    "cannot branch on table {} before it is applied",
                    table.table_name
                ))
            })?;
        if let Some(parent) = &ctx.parent {
            if self.nodes[hit_idx].parent != Some(parent.table_id) {
                return Err(BcmdError::Invalid(
                    "inconsistent dependency between table apply and \
                     on-miss conditional"
                        .to_string(),
                ));
            }
        }
        let on_hit = if *not {
            &branch.false_block
        } else {
            &branch.true_block
        };
        if !on_hit.is_empty() {
            return Err(BcmdError::Invalid(
                "on-hit actions are not supported".to_string(),
            ));
        }

        let on_miss = if *not {
            &branch.true_block
        } else {
            &branch.false_block
        };
        let branch_ctx = Context {
            parent: Some(table.clone()),
            valid_conditions: ctx.valid_conditions.clone(),
        };
        self.process_control_block(on_miss, &branch_ctx)
    }

    fn process_is_valid_branch(
        &mut self,
        branch: &IfStatement,
        is_valid: bool,
        ctx: &Context,
    ) -> BcmdResult<()> {
        let BranchCondition::IsValid { header, not } = &branch.condition else {
            return Err(BcmdError::Internal(
                "expected an is_valid condition".to_string(),
            ));
        };
        let block = if is_valid == *not {
            &branch.false_block
        } else {
            &branch.true_block
        };
        if block.is_empty() {
            return Ok(());
        }
        if *header == P4HeaderType::Unknown {
            warn!(self.log, "skipping unknown is_valid condition");
            return Ok(());
        }

        let mut branch_ctx = ctx.clone();
        if let Err(e) = insert_if_not_conflicting(
            &mut branch_ctx.valid_conditions,
            *header,
            is_valid,
        ) {
            warn!(self.log, "skipping unreachable branch";
                "header" => %header,
                "valid" => is_valid,
                "error" => %e);
            return Ok(());
        }
        self.process_control_block(block, &branch_ctx)
    }

    // Priorities run from the number of tables down to 1, latest first.  A
    // node is above all of its subtables.
    fn set_priorities(&mut self) -> BcmdResult<()> {
        let mut priority = self.table_to_node.len() as i32;
        let top: Vec<usize> =
            self.nodes[ROOT].subtables.iter().rev().copied().collect();
        for idx in top {
            self.set_priority(&mut priority, idx)?;
        }
        Ok(())
    }

    fn set_priority(&mut self, priority: &mut i32, idx: usize) -> BcmdResult<()> {
        if *priority <= 0 {
            return Err(BcmdError::Internal(
                "more tables in the pipeline graph than were applied"
                    .to_string(),
            ));
        }
        self.nodes[idx].priority = *priority;
        *priority -= 1;
        let subtables: Vec<usize> =
            self.nodes[idx].subtables.iter().rev().copied().collect();
        for sub in subtables {
            self.set_priority(priority, sub)?;
        }
        Ok(())
    }

    fn populate_physical_pipeline(&mut self) {
        let mut pipeline = Vec::new();
        for idx in &self.nodes[ROOT].subtables {
            let mut physical = Vec::new();
            self.append_to_physical_table(*idx, &mut physical);
            pipeline.push(physical);
        }
        debug!(self.log, "built physical pipeline";
            "physical_tables" => pipeline.len(),
            "logical_tables" => self.table_to_node.len());
        self.physical_pipeline = pipeline;
    }

    fn append_to_physical_table(&self, idx: usize, physical: &mut PhysicalTable) {
        let node = &self.nodes[idx];
        if let Some(table) = &node.table {
            physical.push(PipelineTable {
                table: table.clone(),
                valid_conditions: node.valid_conditions.clone(),
                priority: node.priority,
            });
        }
        for sub in node.subtables.iter().rev() {
            self.append_to_physical_table(*sub, physical);
        }
    }
}

/// Render a physical pipeline as a grid: one column per physical table, with
/// its logical tables stacked below each other and each name followed by its
/// priority.
///
/// ```text
/// table1 --> table2
/// (   3)     (   4)
///     |
/// table5
/// (   1)
/// ```
pub fn physical_pipeline_string(pipeline: &[PhysicalTable]) -> String {
    let widths: Vec<usize> = pipeline
        .iter()
        .map(|stage| {
            stage
                .iter()
                .map(|t| {
                    t.table
                        .table_name
                        .len()
                        .max(format!("({})", t.priority).len())
                })
                .max()
                .unwrap_or(2)
                .max(2)
        })
        .collect();

    let mut lines = Vec::new();
    for depth in 0.. {
        let mut divs = Vec::new();
        let mut names = Vec::new();
        let mut priorities = Vec::new();
        let mut found = false;
        for (stage, width) in pipeline.iter().zip(widths.iter().copied()) {
            match stage.get(depth) {
                Some(t) => {
                    found = true;
                    divs.push(format!("{:>width$}", "| "));
                    names.push(format!("{:>width$}", t.table.table_name));
                    priorities.push(format!(
                        "({:>w$})",
                        t.priority,
                        w = width - 2
                    ));
                }
                None => {
                    let blank = " ".repeat(width);
                    divs.push(blank.clone());
                    names.push(blank.clone());
                    priorities.push(blank);
                }
            }
        }
        if !found {
            break;
        }
        if depth == 0 {
            lines.push(names.join(" --> "));
        } else {
            lines.push(divs.join("     "));
            lines.push(names.join("     "));
        }
        lines.push(priorities.join("     "));
    }

    lines
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}
