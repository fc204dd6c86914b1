// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drive the length-prefixed link RPC over a device pipe with retry.
// Author: Lukas Bower

//! The link RPC client.
//!
//! One request frame out, one response frame back, strictly serialized.
//! Protocol-level failures (truncated or mis-framed replies, opcode echo
//! mismatches) are retried up to three attempts with the receive buffer
//! flushed in between; device errors (negative result words) surface
//! immediately with the target errno preserved.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, warn};

use heliolink_wire::{
    BootloaderAttrs, FileStat, LinkTime, Opcode, Request, Response, SysInfo, PUBLIC_KEY_SIZE,
    SIGNATURE_SIZE,
};

use crate::driver::{recv_exact, send_all, DeviceDriver, DevicePipe};
use crate::error::{check_result, LinkError, Result};

/// Attempt budget for protocol-level errors.
const MAX_TRIES: usize = 3;

/// Upper bound accepted for a reply frame; anything larger is treated as a
/// framing error and resynchronized by flushing the pipe.
const MAX_REPLY_LEN: u32 = 1 << 20;

/// Shared handle through which the session and its proxies issue RPCs.
///
/// A session is single-threaded by contract, so a `Rc<RefCell<_>>` is the
/// whole ownership story: remote file handles clone the handle and borrow it
/// for exactly one RPC at a time.
pub(crate) type SharedTransport<D> = Rc<RefCell<Transport<D>>>;

/// The RPC client over one device pipe.
pub struct Transport<D: DeviceDriver> {
    driver: D,
    pipe: Option<D::Pipe>,
    version: u16,
}

impl<D: DeviceDriver> Transport<D> {
    /// Wrap a physical driver; no pipe is opened yet.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            pipe: None,
            version: 0,
        }
    }

    /// Enumerate candidate device addresses.
    pub fn scan(&mut self) -> Vec<String> {
        self.driver.scan()
    }

    /// Transport protocol version reported by the last probe.
    #[must_use]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Whether a pipe is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.pipe.is_some()
    }

    /// Open the pipe to `path` if none is open. Resets the negotiated
    /// version so the peer can renegotiate.
    pub fn open_pipe(&mut self, path: &str) -> Result<()> {
        if self.pipe.is_none() {
            self.version = 0;
            let pipe = self
                .driver
                .open(path)
                .map_err(|error| LinkError::transport("connect", error))?;
            self.pipe = Some(pipe);
        }
        Ok(())
    }

    /// Close the pipe; safe to call repeatedly.
    pub fn close_pipe(&mut self) {
        self.pipe = None;
    }

    /// Drop the pipe without touching the wire, as after a reset where the
    /// peer has already vanished.
    pub fn disregard(&mut self) {
        self.version = 0;
        self.pipe = None;
    }

    /// Discard any stale bytes buffered on the receive side.
    pub fn flush(&mut self) -> Result<()> {
        let pipe = self.pipe_mut("flush")?;
        pipe.flush_input()
            .map_err(|error| LinkError::transport("flush", error))
    }

    /// Replace the master I/O timeout, returning the previous value.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<Duration> {
        Ok(self.pipe_mut("timeout")?.set_timeout(timeout))
    }

    fn pipe_mut(&mut self, tag: &str) -> Result<&mut D::Pipe> {
        self.pipe
            .as_mut()
            .ok_or_else(|| LinkError::not_connected(tag))
    }

    /// One request/response exchange with the protocol-error retry budget.
    fn roundtrip(&mut self, request: &Request, tag: &str) -> Result<Response> {
        let opcode = request.opcode();
        let frame = request
            .encode()
            .map_err(|error| LinkError::from_wire(tag, error))?;

        let mut last_error = None;
        for attempt in 1..=MAX_TRIES {
            let pipe = self.pipe_mut(tag)?;
            send_all(pipe, &frame).map_err(|error| LinkError::transport(tag, error))?;

            match read_reply(pipe, opcode) {
                Ok(response) => {
                    if let Response::Probe {
                        transport_version, ..
                    } = response
                    {
                        self.version = transport_version;
                    }
                    return Ok(response);
                }
                Err(error) => {
                    warn!("{tag}: protocol error on attempt {attempt}/{MAX_TRIES}: {error}");
                    let _ = pipe.flush_input();
                    last_error = Some(error);
                }
            }
        }
        Err(LinkError::transport(
            tag,
            last_error.map_or_else(|| "retries exhausted".to_string(), |error| error.to_string()),
        ))
    }

    /// Exchange and map a negative result word to a device error.
    fn call(&mut self, request: &Request, tag: &str) -> Result<Response> {
        let response = self.roundtrip(request, tag)?;
        check_result(response.result(), tag)?;
        Ok(response)
    }

    // --- posix operations ---------------------------------------------------

    /// Open a remote file; returns the descriptor.
    pub fn posix_open(&mut self, path: &str, flags: u32, mode: u32) -> Result<i32> {
        let response = self.call(
            &Request::Open {
                path: path.to_string(),
                flags,
                mode,
            },
            "open",
        )?;
        Ok(response.result())
    }

    /// Close a remote descriptor.
    pub fn posix_close(&mut self, fd: i32) -> Result<()> {
        self.call(&Request::Close { fd }, "close")?;
        Ok(())
    }

    /// Read up to `nbyte` bytes; an empty vector marks end of file.
    pub fn posix_read(&mut self, fd: i32, nbyte: u32) -> Result<Vec<u8>> {
        match self.call(&Request::Read { fd, nbyte }, "read")? {
            Response::Read { data, .. } => Ok(data),
            _ => Err(LinkError::transport("read", "unexpected response body")),
        }
    }

    /// Write `data`; returns the count accepted by the target.
    pub fn posix_write(&mut self, fd: i32, data: &[u8]) -> Result<usize> {
        let response = self.call(
            &Request::Write {
                fd,
                data: data.to_vec(),
            },
            "write",
        )?;
        Ok(response.result() as usize)
    }

    /// Reposition a descriptor; returns the new offset.
    pub fn posix_lseek(&mut self, fd: i32, offset: i32, whence: u8) -> Result<i32> {
        let response = self.call(
            &Request::Lseek { fd, offset, whence },
            "lseek",
        )?;
        Ok(response.result())
    }

    /// Issue an ioctl; returns the result word and the (possibly rewritten)
    /// argument bytes.
    pub fn posix_ioctl(&mut self, fd: i32, request: u32, arg: &[u8]) -> Result<(i32, Vec<u8>)> {
        match self.call(
            &Request::Ioctl {
                fd,
                request,
                arg: arg.to_vec(),
            },
            "ioctl",
        )? {
            Response::Ioctl { result, arg } => Ok((result, arg)),
            _ => Err(LinkError::transport("ioctl", "unexpected response body")),
        }
    }

    /// Stat a remote path.
    pub fn posix_stat(&mut self, path: &str) -> Result<FileStat> {
        match self.call(
            &Request::Stat {
                path: path.to_string(),
            },
            "stat",
        )? {
            Response::Stat { stat, .. } => Ok(stat),
            _ => Err(LinkError::transport("stat", "unexpected response body")),
        }
    }

    /// Stat an open descriptor.
    pub fn posix_fstat(&mut self, fd: i32) -> Result<FileStat> {
        match self.call(&Request::Fstat { fd }, "fstat")? {
            Response::Stat { stat, .. } => Ok(stat),
            _ => Err(LinkError::transport("fstat", "unexpected response body")),
        }
    }

    /// Create a remote directory.
    pub fn posix_mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        self.call(
            &Request::Mkdir {
                path: path.to_string(),
                mode,
            },
            "mkdir",
        )?;
        Ok(())
    }

    /// Remove an empty remote directory.
    pub fn posix_rmdir(&mut self, path: &str) -> Result<()> {
        self.call(
            &Request::Rmdir {
                path: path.to_string(),
            },
            "rmdir",
        )?;
        Ok(())
    }

    /// Unlink a remote file.
    pub fn posix_unlink(&mut self, path: &str) -> Result<()> {
        self.call(
            &Request::Unlink {
                path: path.to_string(),
            },
            "unlink",
        )?;
        Ok(())
    }

    /// Rename a remote file or directory.
    pub fn posix_rename(&mut self, old: &str, new: &str) -> Result<()> {
        self.call(
            &Request::Rename {
                old: old.to_string(),
                new: new.to_string(),
            },
            "rename",
        )?;
        Ok(())
    }

    /// Open a remote directory stream.
    pub fn posix_opendir(&mut self, path: &str) -> Result<u32> {
        match self.call(
            &Request::Opendir {
                path: path.to_string(),
            },
            "opendir",
        )? {
            Response::Opendir { dirp, .. } => Ok(dirp),
            _ => Err(LinkError::transport("opendir", "unexpected response body")),
        }
    }

    /// Read the next directory entry; `None` marks the end of the stream.
    pub fn posix_readdir(&mut self, dirp: u32) -> Result<Option<String>> {
        match self.call(&Request::Readdir { dirp }, "readdir")? {
            Response::Readdir { entry, .. } => Ok(entry),
            _ => Err(LinkError::transport("readdir", "unexpected response body")),
        }
    }

    /// Close a remote directory stream.
    pub fn posix_closedir(&mut self, dirp: u32) -> Result<()> {
        self.call(&Request::Closedir { dirp }, "closedir")?;
        Ok(())
    }

    /// Report the position of a directory stream.
    pub fn posix_telldir(&mut self, dirp: u32) -> Result<u32> {
        match self.call(&Request::Telldir { dirp }, "telldir")? {
            Response::Telldir { location, .. } => Ok(location),
            _ => Err(LinkError::transport("telldir", "unexpected response body")),
        }
    }

    /// Reposition a directory stream.
    pub fn posix_seekdir(&mut self, dirp: u32, location: u32) -> Result<()> {
        self.call(&Request::Seekdir { dirp, location }, "seekdir")?;
        Ok(())
    }

    /// Rewind a directory stream.
    pub fn posix_rewinddir(&mut self, dirp: u32) -> Result<()> {
        self.call(&Request::Rewinddir { dirp }, "rewinddir")?;
        Ok(())
    }

    /// Fetch the target's calendar time.
    pub fn get_time(&mut self) -> Result<LinkTime> {
        match self.call(&Request::GetTime, "get-time")? {
            Response::Time { time, .. } => Ok(time),
            _ => Err(LinkError::transport("get-time", "unexpected response body")),
        }
    }

    /// Set the target's calendar time.
    pub fn set_time(&mut self, time: &LinkTime) -> Result<()> {
        self.call(&Request::SetTime { time: *time }, "set-time")?;
        Ok(())
    }

    /// Launch an installed application.
    pub fn exec(&mut self, path: &str) -> Result<()> {
        self.call(
            &Request::Exec {
                path: path.to_string(),
            },
            "exec",
        )?;
        Ok(())
    }

    /// Format a remote filesystem.
    pub fn mkfs(&mut self, path: &str) -> Result<()> {
        self.call(
            &Request::Mkfs {
                path: path.to_string(),
            },
            "mkfs",
        )?;
        Ok(())
    }

    // --- system and bootloader operations -----------------------------------

    /// Fetch the system info record.
    pub fn get_sys_info(&mut self) -> Result<SysInfo> {
        match self.call(&Request::GetSysInfo, "sys-info")? {
            Response::SysInfo { info, .. } => Ok(info),
            _ => Err(LinkError::transport("sys-info", "unexpected response body")),
        }
    }

    /// Classify the peer. Positive means bootloader, zero means OS, negative
    /// carries the target errno; the caller interprets the sign.
    pub fn probe_bootloader(&mut self, legacy: bool) -> Result<i32> {
        let request = if legacy {
            Request::IsBootloaderLegacy
        } else {
            Request::IsBootloader
        };
        let response = self.roundtrip(&request, "probe")?;
        Ok(response.result())
    }

    /// Fetch the bootloader attribute record.
    pub fn bootloader_attr(&mut self, legacy: bool) -> Result<BootloaderAttrs> {
        let request = if legacy {
            Request::BootloaderAttrLegacy
        } else {
            Request::BootloaderAttr
        };
        match self.call(&request, "bootloader-attr")? {
            Response::BootloaderAttrs { attrs, .. } => Ok(attrs),
            _ => Err(LinkError::transport(
                "bootloader-attr",
                "unexpected response body",
            )),
        }
    }

    /// Read back `nbyte` bytes of flash at `addr`.
    pub fn read_flash(&mut self, addr: u32, nbyte: u32) -> Result<Vec<u8>> {
        match self.call(&Request::ReadFlash { addr, nbyte }, "read-flash")? {
            Response::ReadFlash { data, .. } => Ok(data),
            _ => Err(LinkError::transport(
                "read-flash",
                "unexpected response body",
            )),
        }
    }

    /// Program `data` at flash address `addr`; returns the accepted count.
    pub fn write_flash(&mut self, addr: u32, data: &[u8]) -> Result<usize> {
        let response = self.call(
            &Request::WriteFlash {
                addr,
                data: data.to_vec(),
            },
            "write-flash",
        )?;
        Ok(response.result() as usize)
    }

    /// Start a full flash erase. Completion is observed by polling
    /// [`Transport::bootloader_attr`].
    pub fn erase_flash(&mut self) -> Result<()> {
        self.call(&Request::EraseFlash, "erase-flash")?;
        Ok(())
    }

    /// Post an image signature. Returns the raw result word: positive when
    /// the target performed a signed commit, zero when signatures are not
    /// enforced.
    pub fn verify_signature(&mut self, signature: &[u8; SIGNATURE_SIZE]) -> Result<i32> {
        let response = self.call(
            &Request::VerifySignature {
                signature: *signature,
            },
            "verify-signature",
        )?;
        Ok(response.result())
    }

    /// Fetch the device public key.
    pub fn get_public_key(&mut self) -> Result<[u8; PUBLIC_KEY_SIZE]> {
        match self.call(&Request::GetPublicKey, "public-key")? {
            Response::PublicKey { key, .. } => Ok(key),
            _ => Err(LinkError::transport(
                "public-key",
                "unexpected response body",
            )),
        }
    }

    /// Send a reset opcode. The peer vanishes mid-exchange, so exactly one
    /// transport failure is expected and swallowed here.
    pub fn send_reset(&mut self, bootloader: bool) -> Result<()> {
        let request = if bootloader {
            Request::ResetBootloader
        } else {
            Request::Reset
        };
        let tag = if bootloader { "reset-bootloader" } else { "reset" };
        let frame = request
            .encode()
            .map_err(|error| LinkError::from_wire(tag, error))?;
        let pipe = self.pipe_mut(tag)?;
        if let Err(error) = send_all(pipe, &frame) {
            debug!("{tag}: send failed as the peer dropped: {error}");
            return Ok(());
        }
        match read_reply(pipe, request.opcode()) {
            Ok(_) => {}
            Err(error) => debug!("{tag}: expected reply loss: {error}"),
        }
        Ok(())
    }
}

/// Read one complete reply frame and decode it against `expected`.
fn read_reply<P: DevicePipe>(
    pipe: &mut P,
    expected: Opcode,
) -> core::result::Result<Response, String> {
    let mut prelude = [0u8; 4];
    recv_exact(pipe, &mut prelude).map_err(|error| error.to_string())?;
    let declared = u32::from_le_bytes(prelude);
    if declared < 5 || declared > MAX_REPLY_LEN {
        return Err(format!("implausible frame length {declared}"));
    }
    let mut frame = vec![0u8; declared as usize];
    frame[..4].copy_from_slice(&prelude);
    recv_exact(pipe, &mut frame[4..]).map_err(|error| error.to_string())?;
    Response::decode(expected, &frame).map_err(|error| error.to_string())
}
