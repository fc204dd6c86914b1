// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Connection state machine for one link session to a device.
// Author: Lukas Bower

//! The link session.
//!
//! A [`Link`] owns one pipe to one device and tracks how the peer was
//! classified: nothing, a running OS, or its bootloader. The session is
//! single-threaded by contract; only the progress counters are meant to be
//! observed from another thread.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use heliolink_wire::{BootloaderAttrs, LinkTime, PATH_ARG_MAX};

use crate::driver::DeviceDriver;
use crate::error::{LinkError, Result};
use crate::fs::RemoteFileSystem;
use crate::progress::ProgressCounters;
use crate::sys::{SerialNumber, SystemInfo};
use crate::transport::{SharedTransport, Transport};

/// How the peer answered the classification probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionKind {
    /// No pipe is open.
    #[default]
    None,
    /// The peer is a bootloader.
    Bootloader,
    /// The peer is a running OS.
    Os,
}

/// Identity snapshot of an enumerated or connected device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkInfo {
    /// Driver path the device was reached through.
    pub path: String,
    /// System info snapshot captured at connect time.
    pub system: SystemInfo,
}

impl LinkInfo {
    /// The device serial number from the captured snapshot.
    #[must_use]
    pub fn serial_number(&self) -> SerialNumber {
        self.system.serial
    }
}

/// One session against one device.
pub struct Link<D: DeviceDriver> {
    transport: SharedTransport<D>,
    info: LinkInfo,
    kind: ConnectionKind,
    is_legacy: bool,
    bootloader_attrs: BootloaderAttrs,
    progress: Arc<ProgressCounters>,
}

impl<D: DeviceDriver> Link<D> {
    /// Build a session over `driver`; nothing is opened yet.
    pub fn new(driver: D) -> Self {
        Self {
            transport: Rc::new(RefCell::new(Transport::new(driver))),
            info: LinkInfo::default(),
            kind: ConnectionKind::None,
            is_legacy: false,
            bootloader_attrs: BootloaderAttrs::default(),
            progress: Arc::new(ProgressCounters::default()),
        }
    }

    pub(crate) fn transport(&self) -> SharedTransport<D> {
        self.transport.clone()
    }

    /// Path-level filesystem operations on the connected device.
    #[must_use]
    pub fn fs(&self) -> RemoteFileSystem<D> {
        RemoteFileSystem::new(self.transport.clone())
    }

    /// Progress counters for UI threads; read with relaxed loads.
    #[must_use]
    pub fn progress(&self) -> Arc<ProgressCounters> {
        self.progress.clone()
    }

    /// Driver path of the current (or last) connection.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.info.path
    }

    /// Serial number captured at connect time. Survives a failed reconnect
    /// so callers can still report which device was lost.
    #[must_use]
    pub fn serial_number(&self) -> SerialNumber {
        self.info.serial_number()
    }

    /// System info snapshot captured at connect time.
    #[must_use]
    pub fn sys_info(&self) -> &SystemInfo {
        &self.info.system
    }

    /// Identity snapshot of the current connection.
    #[must_use]
    pub fn info(&self) -> &LinkInfo {
        &self.info
    }

    /// Bootloader attributes; meaningful only in bootloader mode.
    #[must_use]
    pub fn bootloader_attrs(&self) -> &BootloaderAttrs {
        &self.bootloader_attrs
    }

    /// Whether a pipe is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.borrow().is_open()
    }

    /// Whether the peer was classified as a bootloader.
    #[must_use]
    pub fn is_bootloader(&self) -> bool {
        self.kind == ConnectionKind::Bootloader
    }

    /// Whether the legacy probe opcode was selected at connect time.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.is_legacy
    }

    /// How the current connection is classified.
    #[must_use]
    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    // --- discovery ----------------------------------------------------------

    /// Drain the driver's enumeration into an ordered path list.
    pub fn get_path_list(&mut self) -> Vec<String> {
        self.transport.borrow_mut().scan()
    }

    /// Transiently connect to each enumerated device and capture its
    /// identity. Unreachable devices are skipped; the sweep itself never
    /// fails because one device is unreachable.
    pub fn get_info_list(&mut self) -> Vec<LinkInfo> {
        let paths = self.get_path_list();
        let _ = self.disconnect();

        let mut result = Vec::new();
        for path in paths {
            match self.connect(&path, self.is_legacy) {
                Ok(()) => {
                    result.push(self.info.clone());
                    let _ = self.disconnect();
                }
                Err(error) => {
                    debug!("info sweep: skipping {path}: {error}");
                    let _ = self.disconnect();
                }
            }
        }
        result
    }

    // --- connection state machine -------------------------------------------

    /// Open and classify the pipe at `path`, leaving it open on success.
    fn classify(&mut self, path: &str) -> Result<ConnectionKind> {
        let mut transport = self.transport.borrow_mut();
        transport.open_pipe(path)?;
        let result = match transport.probe_bootloader(self.is_legacy) {
            Ok(result) => result,
            Err(error) => {
                transport.close_pipe();
                return Err(error);
            }
        };
        if result > 0 {
            Ok(ConnectionKind::Bootloader)
        } else if result == 0 {
            Ok(ConnectionKind::Os)
        } else {
            transport.close_pipe();
            Err(LinkError::device(-result, "probe"))
        }
    }

    /// Connect to the device at `path`.
    ///
    /// Reconnecting to a different path while connected is an error; the
    /// caller must disconnect first. `is_legacy` selects the probe opcode
    /// for pre-release bootloaders.
    pub fn connect(&mut self, path: &str, is_legacy: bool) -> Result<()> {
        if self.is_connected() && self.info.path != path {
            return Err(LinkError::invalid_argument("connect: session already bound"));
        }

        self.progress.reset();
        self.is_legacy = is_legacy;

        let kind = self.classify(path)?;
        self.kind = kind;

        let system = match kind {
            ConnectionKind::Bootloader => {
                let fetched = self.transport.borrow_mut().bootloader_attr(is_legacy);
                let attrs = match fetched {
                    Ok(attrs) => attrs,
                    Err(error) => {
                        self.drop_connection();
                        return Err(error);
                    }
                };
                self.bootloader_attrs = attrs;
                SystemInfo {
                    name: "bootloader".to_string(),
                    serial: SerialNumber::new(attrs.serialno),
                    hardware_id: attrs.hardware_id,
                    ..SystemInfo::default()
                }
            }
            ConnectionKind::Os => {
                let fetched = self.transport.borrow_mut().get_sys_info();
                match fetched {
                    Ok(info) => SystemInfo::from(&info),
                    Err(error) => {
                        self.drop_connection();
                        return Err(error);
                    }
                }
            }
            ConnectionKind::None => unreachable!("classify never returns None"),
        };

        self.info = LinkInfo {
            path: path.to_string(),
            system,
        };
        info!(
            "connected to {} as {:?} (serial {})",
            path,
            self.kind,
            self.info.serial_number()
        );
        Ok(())
    }

    /// Reconnect to the same path, re-running classification.
    pub fn reinitialize(&mut self) -> Result<()> {
        let path = self.info.path.clone();
        self.connect(&path, self.is_legacy)
    }

    /// Chase a device that re-enumerated: try the last-known path, then
    /// every enumerated path, sleeping `delay` between rounds. Success
    /// requires both a connect and a serial-number match. On total failure
    /// the last-known identity is restored so callers can still report it.
    pub fn reconnect(&mut self, retries: u32, delay: Duration) -> Result<()> {
        let last = self.info.clone();
        let expected = last.serial_number();
        let _ = self.disconnect();

        for round in 0..retries {
            if self.try_reconnect_path(&last.path, expected) {
                return Ok(());
            }
            for path in self.get_path_list() {
                if self.try_reconnect_path(&path, expected) {
                    return Ok(());
                }
            }
            debug!("reconnect round {round} failed; sleeping {delay:?}");
            thread::sleep(delay);
        }

        warn!("reconnect failed; lost device {expected}");
        self.info = last;
        Err(LinkError::not_connected("reconnect"))
    }

    fn try_reconnect_path(&mut self, path: &str, expected: SerialNumber) -> bool {
        match self.connect(path, self.is_legacy) {
            Ok(()) => {
                if self.serial_number() == expected {
                    return true;
                }
                let _ = self.disconnect();
                false
            }
            Err(_) => {
                self.drop_connection();
                false
            }
        }
    }

    /// Classify the device at `path` without capturing identity. With
    /// `keep` the pipe is left open; otherwise it is closed immediately.
    /// Returns `false` when the path cannot be opened or classified.
    pub fn ping(&mut self, path: &str, keep: bool) -> bool {
        match self.classify(path) {
            Ok(kind) => {
                if keep {
                    self.kind = kind;
                } else {
                    let _ = self.disconnect();
                }
                true
            }
            Err(error) => {
                debug!("ping {path}: {error}");
                false
            }
        }
    }

    /// Close the pipe; idempotent.
    pub fn disconnect(&mut self) -> Result<()> {
        self.drop_connection();
        Ok(())
    }

    /// Drop the pipe handle without touching the wire; used after a reset
    /// when the peer has already vanished mid-request.
    pub fn disregard(&mut self) {
        self.transport.borrow_mut().disregard();
        self.kind = ConnectionKind::None;
    }

    fn drop_connection(&mut self) {
        self.transport.borrow_mut().close_pipe();
        self.kind = ConnectionKind::None;
    }

    /// Reset the device into its OS. The peer vanishes mid-exchange, so the
    /// expected transport error is swallowed and the pipe disregarded.
    pub fn reset(&mut self) -> Result<()> {
        self.require_connected("reset")?;
        self.transport.borrow_mut().send_reset(false)?;
        self.disregard();
        Ok(())
    }

    /// Reset the device into its bootloader.
    pub fn reset_bootloader(&mut self) -> Result<()> {
        self.require_connected("reset-bootloader")?;
        self.transport.borrow_mut().send_reset(true)?;
        self.disregard();
        Ok(())
    }

    pub(crate) fn require_connected(&self, tag: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(LinkError::not_connected(tag));
        }
        Ok(())
    }

    fn require_os(&self, tag: &str) -> Result<()> {
        self.require_connected(tag)?;
        if self.is_bootloader() {
            return Err(LinkError::wrong_mode(tag));
        }
        Ok(())
    }

    // --- OS-mode operations -------------------------------------------------

    /// Launch an installed application on the device.
    pub fn run_app(&mut self, path: &str) -> Result<()> {
        self.require_os("run-app")?;
        if path.len() >= PATH_ARG_MAX - 1 {
            return Err(LinkError::invalid_argument("run-app: path too long"));
        }
        self.transport.borrow_mut().exec(path)
    }

    /// Format a filesystem on the device.
    pub fn format(&mut self, path: &str) -> Result<()> {
        self.require_os("format")?;
        self.transport.borrow_mut().mkfs(path)
    }

    /// Fetch the device's calendar time.
    pub fn get_time(&mut self) -> Result<LinkTime> {
        self.require_os("get-time")?;
        self.transport.borrow_mut().get_time()
    }

    /// Set the device's calendar time.
    pub fn set_time(&mut self, time: &LinkTime) -> Result<()> {
        self.require_connected("set-time")?;
        if self.is_bootloader() {
            return Err(LinkError::invalid_argument("set-time: bootloader mode"));
        }
        self.transport.borrow_mut().set_time(time)
    }

    // --- bootloader-mode operations -----------------------------------------

    /// Fetch the bootloader attributes from a bootloader-classified peer.
    pub fn get_bootloader_attr(&mut self) -> Result<BootloaderAttrs> {
        self.require_connected("bootloader-attr")?;
        if !self.is_bootloader() {
            return Err(LinkError::wrong_mode("bootloader-attr"));
        }
        let attrs = self
            .transport
            .borrow_mut()
            .bootloader_attr(self.is_legacy)?;
        self.bootloader_attrs = attrs;
        Ok(attrs)
    }

    /// Read back device flash.
    pub fn read_flash(&mut self, addr: u32, nbyte: u32) -> Result<Vec<u8>> {
        self.require_connected("read-flash")?;
        self.transport.borrow_mut().read_flash(addr, nbyte)
    }

    /// Program device flash.
    pub fn write_flash(&mut self, addr: u32, data: &[u8]) -> Result<usize> {
        self.require_connected("write-flash")?;
        self.transport.borrow_mut().write_flash(addr, data)
    }
}

impl<D: DeviceDriver> Drop for Link<D> {
    fn drop(&mut self) {
        self.drop_connection();
    }
}
