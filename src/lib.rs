// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host-side control library for Helio OS devices.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! heliolink — host-side control of Helio OS devices.
//!
//! Helio OS exposes its posix-like system calls, filesystems, and
//! bootloader over a serialized link RPC carried on a USB or serial byte
//! pipe. This crate is the desktop side of that wire: enumerate devices,
//! classify and connect ([`Link`]), drive remote files and directories
//! ([`fs`]), install applications into the application filesystem
//! ([`appfs`]), update firmware through the bootloader or a running OS
//! ([`UpdateOptions`]), and handle signed images and root authentication
//! ([`auth`]).
//!
//! Physical transports plug in through [`driver::DeviceDriver`]; the wire
//! layouts live in `heliolink-wire` and are re-exported as [`wire`].
//!
//! A session is synchronous and single-threaded. The only state another
//! thread may observe is the pair of progress counters on [`Link`].

pub use heliolink_wire as wire;

pub mod appfs;
pub mod auth;
pub mod driver;
mod error;
pub mod fs;
mod link;
mod path;
pub mod progress;
pub mod sys;
pub mod task;
mod transport;
mod update;

pub use error::{LinkError, Result};
pub use link::{ConnectionKind, Link, LinkInfo};
pub use path::{DriverPath, UsbPath};
pub use progress::{NullProgress, ProgressSink};
pub use transport::Transport;
pub use update::UpdateOptions;
