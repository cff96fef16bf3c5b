// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use thiserror::Error;

mod flow;
pub use flow::*;

mod nexthop;
pub use nexthop::*;

/// Identifies a single hardware unit (chip) managed by the SDK.
pub type Unit = i32;

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug)]
pub enum AsicError {
    /// Error reported by the vendor SDK.  This will report both the location
    /// in the ASIC layer that detected the error, as well as the detailed
    /// error message from the SDK.
    #[error("SDK error at {ctx}: {err}")]
    SdkError { ctx: String, err: String },
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// An Asic function was called before the ASIC layer was properly
    /// initialized.  Indicates misbehavior from the caller.
    #[error("ASIC layer uninitialized: {}", .0)]
    Uninitialized(String),
    /// This operation is unsupported by the ASIC model being used
    #[error("Operation unsupported by the ASIC")]
    OperationUnsupported,
    /// A hardware table has no room for another entry
    #[error("Table full: {}", .0)]
    TableFull(String),
    /// The ASIC layer detected some internal inconsistency
    #[error("Internal error: {}", .0)]
    Internal(String),
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic ASIC error: {}", .0)]
    Synthetic(String),
    /// A general indication that a caller is trying to create something that
    /// already exists.
    #[error("Already exists")]
    Exists,
    /// A general indication that a caller is trying to modify something that
    /// is not present.
    #[error("Missing: {}", .0)]
    Missing(String),
}

/// The `AsicOps` trait contains the field-processor (ACL) operations the
/// switch daemon requires from the vendor SDK.  Every call is synchronous.
pub trait AsicOps {
    /// Initialize the ACL hardware of a unit.  Called once, before any other
    /// ACL operation on that unit.
    fn init_acl_hardware(&self, unit: Unit) -> AsicResult<()>;

    /// Program the global ACL control flags of a unit.
    fn set_acl_control(&self, unit: Unit, control: &AclControl)
        -> AsicResult<()>;

    /// Configure the user-defined field chunks available as qualifiers in
    /// VFP and IFP tables.
    fn set_acl_udf_chunks(
        &self,
        unit: Unit,
        udfs: &UdfChunkConfig,
    ) -> AsicResult<()>;

    /// Create a physical ACL table with the given qualifier set, returning
    /// the id assigned by the SDK.
    fn create_acl_table(
        &self,
        unit: Unit,
        table: &AclTableSpec,
    ) -> AsicResult<i32>;

    /// Destroy a physical ACL table.
    fn destroy_acl_table(&self, unit: Unit, table_id: i32) -> AsicResult<()>;

    /// Insert a flow into an ACL table, returning the id assigned by the SDK.
    /// If `add_stats` is set, a stat object is attached to the flow: red and
    /// green counters when `color_aware` is set, total counters otherwise.
    fn insert_acl_flow(
        &self,
        flow: &FlowEntry,
        add_stats: bool,
        color_aware: bool,
    ) -> AsicResult<i32>;

    /// Replace the actions and meter configuration of an existing flow.
    fn modify_acl_flow(
        &self,
        unit: Unit,
        flow_id: i32,
        flow: &FlowEntry,
    ) -> AsicResult<()>;

    /// Remove a flow, along with any stat object attached to it.
    fn remove_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<()>;

    /// Read a flow back from the hardware.
    fn get_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<FlowEntry>;

    /// Read the counters attached to a flow.
    fn get_acl_stats(&self, unit: Unit, flow_id: i32) -> AsicResult<AclStats>;

    /// Create or update the policer attached to a flow.
    fn set_acl_policer(
        &self,
        unit: Unit,
        flow_id: i32,
        meter: &MeterConfig,
    ) -> AsicResult<()>;
}

// A shared handle lets the owner of an ASIC keep inspecting it after handing
// it to the daemon.
impl<T: AsicOps + ?Sized> AsicOps for std::sync::Arc<T> {
    fn init_acl_hardware(&self, unit: Unit) -> AsicResult<()> {
        (**self).init_acl_hardware(unit)
    }

    fn set_acl_control(
        &self,
        unit: Unit,
        control: &AclControl,
    ) -> AsicResult<()> {
        (**self).set_acl_control(unit, control)
    }

    fn set_acl_udf_chunks(
        &self,
        unit: Unit,
        udfs: &UdfChunkConfig,
    ) -> AsicResult<()> {
        (**self).set_acl_udf_chunks(unit, udfs)
    }

    fn create_acl_table(
        &self,
        unit: Unit,
        table: &AclTableSpec,
    ) -> AsicResult<i32> {
        (**self).create_acl_table(unit, table)
    }

    fn destroy_acl_table(&self, unit: Unit, table_id: i32) -> AsicResult<()> {
        (**self).destroy_acl_table(unit, table_id)
    }

    fn insert_acl_flow(
        &self,
        flow: &FlowEntry,
        add_stats: bool,
        color_aware: bool,
    ) -> AsicResult<i32> {
        (**self).insert_acl_flow(flow, add_stats, color_aware)
    }

    fn modify_acl_flow(
        &self,
        unit: Unit,
        flow_id: i32,
        flow: &FlowEntry,
    ) -> AsicResult<()> {
        (**self).modify_acl_flow(unit, flow_id, flow)
    }

    fn remove_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<()> {
        (**self).remove_acl_flow(unit, flow_id)
    }

    fn get_acl_flow(&self, unit: Unit, flow_id: i32) -> AsicResult<FlowEntry> {
        (**self).get_acl_flow(unit, flow_id)
    }

    fn get_acl_stats(&self, unit: Unit, flow_id: i32) -> AsicResult<AclStats> {
        (**self).get_acl_stats(unit, flow_id)
    }

    fn set_acl_policer(
        &self,
        unit: Unit,
        flow_id: i32,
        meter: &MeterConfig,
    ) -> AsicResult<()> {
        (**self).set_acl_policer(unit, flow_id, meter)
    }
}
