// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout bcmd.

use std::convert;
use std::fmt;

use aal::AsicError;

pub type BcmdResult<T> = Result<T, BcmdError>;

#[derive(Debug, thiserror::Error)]
pub enum BcmdError {
    #[error("I/O error: {0:?}")]
    Io(std::io::Error),
    #[error("ASIC error: {0}")]
    Switch(AsicError),
    #[error("Invalid argument: {0}")]
    Invalid(String),
    #[error("Resource is missing: {0}")]
    Missing(String),
    #[error("Resource already exists: {0}")]
    Exists(String),
    #[error("Resource exhausted: {0}")]
    NoResource(String),
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("Reboot required: {0}")]
    RebootRequired(String),
    #[error("Not initialized: {0}")]
    NotInitialized(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Unwind: initial: {initial}, unwind: {unwind}")]
    Unwind {
        initial: Box<BcmdError>,
        unwind: Box<BcmdError>,
    },
}

/// The class of a failure, independent of where it was detected.  Callers
/// use this to decide how to report a failure without inspecting its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    FailedPrecondition,
    RebootRequired,
    NotInitialized,
    Unimplemented,
    Internal,
}

impl BcmdError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BcmdError::Io(_) => ErrorKind::Internal,
            BcmdError::Switch(e) => match e {
                AsicError::Exists => ErrorKind::AlreadyExists,
                AsicError::Missing(_) => ErrorKind::NotFound,
                AsicError::TableFull(_) => ErrorKind::ResourceExhausted,
                AsicError::InvalidArg(_) => ErrorKind::InvalidArgument,
                _ => ErrorKind::Internal,
            },
            BcmdError::Invalid(_) => ErrorKind::InvalidArgument,
            BcmdError::Missing(_) => ErrorKind::NotFound,
            BcmdError::Exists(_) => ErrorKind::AlreadyExists,
            BcmdError::NoResource(_) => ErrorKind::ResourceExhausted,
            BcmdError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
            BcmdError::RebootRequired(_) => ErrorKind::RebootRequired,
            BcmdError::NotInitialized(_) => ErrorKind::NotInitialized,
            BcmdError::Unsupported(_) => ErrorKind::Unimplemented,
            BcmdError::Internal(_) => ErrorKind::Internal,
            BcmdError::Unwind { initial, .. } => initial.kind(),
        }
    }

    /// Build an error of the given kind.
    pub fn from_kind(kind: ErrorKind, msg: String) -> Self {
        match kind {
            ErrorKind::InvalidArgument => BcmdError::Invalid(msg),
            ErrorKind::NotFound => BcmdError::Missing(msg),
            ErrorKind::AlreadyExists => BcmdError::Exists(msg),
            ErrorKind::ResourceExhausted => BcmdError::NoResource(msg),
            ErrorKind::FailedPrecondition => {
                BcmdError::FailedPrecondition(msg)
            }
            ErrorKind::RebootRequired => BcmdError::RebootRequired(msg),
            ErrorKind::NotInitialized => BcmdError::NotInitialized(msg),
            ErrorKind::Unimplemented => BcmdError::Unsupported(msg),
            ErrorKind::Internal => BcmdError::Internal(msg),
        }
    }

    /// Prefix the error with some context, keeping its kind.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        match self {
            BcmdError::Invalid(m) => BcmdError::Invalid(format!("{ctx}: {m}")),
            BcmdError::Missing(m) => BcmdError::Missing(format!("{ctx}: {m}")),
            BcmdError::Exists(m) => BcmdError::Exists(format!("{ctx}: {m}")),
            BcmdError::NoResource(m) => {
                BcmdError::NoResource(format!("{ctx}: {m}"))
            }
            BcmdError::FailedPrecondition(m) => {
                BcmdError::FailedPrecondition(format!("{ctx}: {m}"))
            }
            BcmdError::RebootRequired(m) => {
                BcmdError::RebootRequired(format!("{ctx}: {m}"))
            }
            BcmdError::NotInitialized(m) => {
                BcmdError::NotInitialized(format!("{ctx}: {m}"))
            }
            BcmdError::Unsupported(m) => {
                BcmdError::Unsupported(format!("{ctx}: {m}"))
            }
            BcmdError::Internal(m) => BcmdError::Internal(format!("{ctx}: {m}")),
            BcmdError::Unwind { initial, unwind } => BcmdError::Unwind {
                initial: Box::new(initial.with_context(ctx)),
                unwind,
            },
            e @ (BcmdError::Io(_) | BcmdError::Switch(_)) => {
                BcmdError::from_kind(e.kind(), format!("{ctx}: {e}"))
            }
        }
    }
}

/// Attach context to the error of a failed `BcmdResult`.
pub trait ResultExt<T> {
    fn context(self, ctx: impl fmt::Display) -> BcmdResult<T>;

    fn with_context<C, F>(self, f: F) -> BcmdResult<T>
    where
        C: fmt::Display,
        F: FnOnce() -> C;
}

impl<T> ResultExt<T> for BcmdResult<T> {
    fn context(self, ctx: impl fmt::Display) -> BcmdResult<T> {
        self.map_err(|e| e.with_context(ctx))
    }

    fn with_context<C, F>(self, f: F) -> BcmdResult<T>
    where
        C: fmt::Display,
        F: FnOnce() -> C,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl convert::From<std::io::Error> for BcmdError {
    fn from(err: std::io::Error) -> Self {
        BcmdError::Io(err)
    }
}

impl convert::From<AsicError> for BcmdError {
    fn from(err: AsicError) -> Self {
        BcmdError::Switch(err)
    }
}

impl convert::From<toml::de::Error> for BcmdError {
    fn from(err: toml::de::Error) -> Self {
        BcmdError::Invalid(err.to_string())
    }
}

impl convert::From<serde_json::Error> for BcmdError {
    fn from(err: serde_json::Error) -> Self {
        BcmdError::Invalid(err.to_string())
    }
}

/// Controller-visible id of the CPU port
pub const CPU_PORT_ID: u32 = 0xFFFF_FFFD;
/// Vendor logical port of the CPU
pub const CPU_LOGICAL_PORT: i32 = 0;
pub const VRF_MIN: u64 = 0;
pub const VRF_MAX: u64 = 0x7FF;
/// ACL entry priorities must be below this
pub const ACL_TABLE_PRIORITY_RANGE: i32 = 0x10000;
/// The only clone session the hardware can express
pub const CLONE_SESSION_ID: u32 = 511;
pub const MAX_MULTICAST_GROUP_ID: u32 = u8::MAX as u32;

pub const ETHERTYPE_ARP: u32 = 0x0806;
pub const ETHERTYPE_IPV4: u32 = 0x0800;
pub const ETHERTYPE_IPV6: u32 = 0x86DD;

pub const IP_PROTO_ICMP: u32 = 1;
pub const IP_PROTO_TCP: u32 = 6;
pub const IP_PROTO_UDP: u32 = 17;
pub const IP_PROTO_GRE: u32 = 47;
pub const IP_PROTO_ICMPV6: u32 = 58;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_kind() {
        let e = BcmdError::Missing("member 3".to_string())
            .with_context("adding group 7");
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert_eq!(
            e.to_string(),
            "Resource is missing: adding group 7: member 3"
        );

        let e: BcmdResult<()> = Err(AsicError::Exists.into());
        let e = e.context("inserting flow").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::AlreadyExists);
        assert!(matches!(e, BcmdError::Exists(_)));
    }

    #[test]
    fn test_switch_kinds() {
        let cases = [
            (AsicError::Exists, ErrorKind::AlreadyExists),
            (AsicError::Missing("x".into()), ErrorKind::NotFound),
            (AsicError::TableFull("x".into()), ErrorKind::ResourceExhausted),
            (AsicError::InvalidArg("x".into()), ErrorKind::InvalidArgument),
            (AsicError::Synthetic("x".into()), ErrorKind::Internal),
        ];
        for (asic, kind) in cases {
            assert_eq!(BcmdError::from(asic).kind(), kind);
        }
    }

    #[test]
    fn test_unwind_kind() {
        let e = BcmdError::Unwind {
            initial: Box::new(BcmdError::NoResource("full".into())),
            unwind: Box::new(BcmdError::Internal("oops".into())),
        };
        assert_eq!(e.kind(), ErrorKind::ResourceExhausted);
    }
}
