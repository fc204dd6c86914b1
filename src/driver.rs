// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the byte-pipe boundary between the link client and physical transports.
// Author: Lukas Bower

//! The physical transport boundary.
//!
//! The link client is transport-agnostic: USB bulk pipes, serial ttys, and
//! in-process test fixtures all plug in through [`DeviceDriver`] and
//! [`DevicePipe`]. A driver enumerates candidate device addresses and opens
//! a pipe to one of them; a pipe moves raw bytes and owns the I/O timeout
//! that the updater stretches around multi-second erase operations.

use std::io;
use std::time::Duration;

/// An open byte pipe to one device.
pub trait DevicePipe {
    /// Receive up to `buf.len()` bytes; zero means the peer is gone.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send up to `buf.len()` bytes; returns the count accepted.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Discard any bytes already buffered on the receive side.
    fn flush_input(&mut self) -> io::Result<()>;

    /// Replace the master I/O timeout and return the previous value.
    fn set_timeout(&mut self, timeout: Duration) -> Duration;

    /// The current master I/O timeout.
    fn timeout(&self) -> Duration;
}

/// A factory for pipes, addressed by driver-path text.
pub trait DeviceDriver {
    /// The pipe type this driver opens.
    type Pipe: DevicePipe;

    /// Enumerate candidate device addresses, in discovery order.
    fn scan(&mut self) -> Vec<String>;

    /// Open a pipe to the device at `path`.
    fn open(&mut self, path: &str) -> io::Result<Self::Pipe>;
}

/// Receive exactly `buf.len()` bytes or fail.
pub(crate) fn recv_exact(pipe: &mut impl DevicePipe, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let count = pipe.recv(&mut buf[filled..])?;
        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "pipe closed mid-frame",
            ));
        }
        filled += count;
    }
    Ok(())
}

/// Send all of `buf` or fail.
pub(crate) fn send_all(pipe: &mut impl DevicePipe, buf: &[u8]) -> io::Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        let count = pipe.send(&buf[sent..])?;
        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "pipe refused bytes",
            ));
        }
        sent += count;
    }
    Ok(())
}
