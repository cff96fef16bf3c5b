// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;

use aal::{
    AclControl, AclStats, AclTableSpec, AsicError, AsicResult, FlowEntry,
    UdfChunkConfig,
};

pub(super) struct StubFlow {
    pub flow: FlowEntry,
    pub stats: Option<AclStats>,
}

impl StubFlow {
    /// Two flows collide if they land in the same table with the same
    /// priority and qualifiers.
    pub fn same_match(&self, other: &FlowEntry) -> bool {
        let f = &self.flow;
        f.acl_table_id == other.acl_table_id
            && f.priority == other.priority
            && f.fields.len() == other.fields.len()
            && f.fields.iter().all(|x| other.fields.contains(x))
    }
}

/// Field processor state of a single unit
pub(super) struct UnitState {
    pub control: Option<AclControl>,
    pub udfs: Option<UdfChunkConfig>,
    pub tables: BTreeMap<i32, AclTableSpec>,
    pub flows: BTreeMap<i32, StubFlow>,
    pub next_table_id: i32,
    pub next_flow_id: i32,
}

impl UnitState {
    pub fn new() -> Self {
        UnitState {
            control: None,
            udfs: None,
            tables: BTreeMap::new(),
            flows: BTreeMap::new(),
            next_table_id: 1,
            next_flow_id: 1,
        }
    }

    pub fn has_udf_chunk(&self, id: u32) -> bool {
        self.udfs
            .as_ref()
            .map(|u| u.chunks.iter().any(|c| c.id == id))
            .unwrap_or(false)
    }

    pub fn flow_mut(&mut self, flow_id: i32) -> AsicResult<&mut StubFlow> {
        self.flows
            .get_mut(&flow_id)
            .ok_or_else(|| AsicError::Missing(format!("ACL flow {flow_id}")))
    }
}
