// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide link wire types and frame codec primitives for host and target code.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![no_std]

//! Wire types and codec primitives for the Helio OS link protocol.
//!
//! The link protocol is a half-duplex, length-prefixed RPC carried over an
//! opaque byte pipe (USB bulk or serial tty). Each request frame is answered
//! by exactly one response frame that echoes the request opcode. All
//! integers are little-endian. This crate is `no_std` so target-side test
//! harnesses can share the exact record layouts with host tooling.

extern crate alloc;

#[cfg(test)]
extern crate std;

mod codec;
mod records;
mod types;

pub use codec::{decode_frame, encode_frame, Cursor, Request, Response};
pub use records::{
    make_fixed_str, serial_to_string, AppfsCreateAttr, AppfsFileHeader, BootloaderAttrs, FileStat,
    FlashPageWrite, LinkTime, OsFlashInfo, SignatureMarker, SysInfo, TaskAttr,
};
pub use types::*;
