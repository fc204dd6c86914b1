// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the link session error kinds and errno mapping.
// Author: Lukas Bower

//! Error kinds surfaced by link sessions.
//!
//! Every error carries the string tag of the operation that raised it plus a
//! posix errno, so host tooling can render both. Device errors preserve the
//! target's errno verbatim; transport errors are the protocol-level failures
//! that the client retries before surfacing.

use heliolink_wire::{errno, WireError};
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = core::result::Result<T, LinkError>;

/// Errors raised by link sessions and the proxies built on them.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The operation requires an open connection.
    #[error("not connected ({tag})")]
    NotConnected {
        /// Originating operation.
        tag: String,
    },
    /// An OS-only operation was issued in bootloader mode, or vice versa.
    #[error("wrong connection mode ({tag})")]
    WrongMode {
        /// Originating operation.
        tag: String,
    },
    /// A malformed path, identity mismatch, or incompatible image.
    #[error("invalid argument ({tag})")]
    InvalidArgument {
        /// Originating operation.
        tag: String,
    },
    /// The file is not a recognized application image.
    #[error("not an application image ({tag})")]
    NotExecutable {
        /// Originating operation.
        tag: String,
    },
    /// An install stream was appended past its declared size.
    #[error("no space left in install stream ({tag})")]
    NoSpace {
        /// Originating operation.
        tag: String,
    },
    /// The requested entity does not exist.
    #[error("not found ({tag})")]
    NotFound {
        /// Originating operation.
        tag: String,
    },
    /// The target returned a negative result; its errno is preserved and the
    /// call is never retried.
    #[error("device errno {errno} ({tag})")]
    Device {
        /// Errno reported by the target.
        errno: i32,
        /// Originating operation.
        tag: String,
    },
    /// A protocol-level wire failure that survived the retry budget.
    #[error("transport failure ({tag}): {message}")]
    Transport {
        /// Originating operation.
        tag: String,
        /// Underlying pipe or codec failure.
        message: String,
    },
}

impl LinkError {
    /// The posix errno equivalent of this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            LinkError::NotConnected { .. } => errno::EBADF,
            LinkError::WrongMode { .. } => errno::EIO,
            LinkError::InvalidArgument { .. } => errno::EINVAL,
            LinkError::NotExecutable { .. } => errno::ENOEXEC,
            LinkError::NoSpace { .. } => errno::ENOSPC,
            LinkError::NotFound { .. } => errno::ENOENT,
            LinkError::Device { errno, .. } => *errno,
            LinkError::Transport { .. } => errno::EIO,
        }
    }

    /// The operation tag attached when the error was raised.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            LinkError::NotConnected { tag }
            | LinkError::WrongMode { tag }
            | LinkError::InvalidArgument { tag }
            | LinkError::NotExecutable { tag }
            | LinkError::NoSpace { tag }
            | LinkError::NotFound { tag }
            | LinkError::Device { tag, .. }
            | LinkError::Transport { tag, .. } => tag,
        }
    }

    pub(crate) fn not_connected(tag: &str) -> Self {
        LinkError::NotConnected { tag: tag.into() }
    }

    pub(crate) fn wrong_mode(tag: &str) -> Self {
        LinkError::WrongMode { tag: tag.into() }
    }

    pub(crate) fn invalid_argument(tag: &str) -> Self {
        LinkError::InvalidArgument { tag: tag.into() }
    }

    pub(crate) fn device(errno: i32, tag: &str) -> Self {
        LinkError::Device {
            errno,
            tag: tag.into(),
        }
    }

    pub(crate) fn transport(tag: &str, message: impl ToString) -> Self {
        LinkError::Transport {
            tag: tag.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn from_wire(tag: &str, error: WireError) -> Self {
        Self::transport(tag, error)
    }
}

/// Map a raw RPC result word: negative values become [`LinkError::Device`].
pub(crate) fn check_result(result: i32, tag: &str) -> Result<i32> {
    if result < 0 {
        Err(LinkError::device(-result, tag))
    } else {
        Ok(result)
    }
}

impl From<LinkError> for std::io::Error {
    fn from(error: LinkError) -> Self {
        std::io::Error::other(error)
    }
}
