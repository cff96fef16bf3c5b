// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! ACL and table management for Broadcom switch units driven by a P4Runtime
//! controller.

pub mod acl_manager;
pub mod acl_table;
pub mod chassis;
pub mod config;
pub mod flow_table;
pub mod hw_specs;
pub mod mapper;
pub mod node;
pub mod pipeline;
pub mod table_manager;
pub mod types;
pub mod udf;

#[cfg(test)]
mod test_support;
