// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Stream application images and data files into the target's appfs.
// Author: Lukas Bower

//! The application filesystem installer.
//!
//! Appfs stores applications in `/app/flash` (persistent) and `/app/ram`
//! (volatile). Installation streams page-sized chunks into the target-side
//! `/app/.install` endpoint: a *create* writes raw data pages behind a
//! synthesized header, an *install* writes an executable image whose first
//! bytes already form a header and whose tail may carry a signature that
//! the target verifies after the last page.

mod attributes;
mod log;

pub use attributes::{AppfsFlags, FileAttributes, MINIMUM_RAM_SIZE};
pub use log::{AppfsLog, AppfsLogOptions};

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use ::log::{debug, warn};
use serde::Serialize;

use heliolink_wire::{
    errno, requests, AppfsCreateAttr, AppfsFileHeader, SignatureMarker, CREATE_SIGNATURE,
    NAME_MAX, PAGE_SIZE,
};

use crate::auth;
use crate::driver::DeviceDriver;
use crate::error::{LinkError, Result};
use crate::fs::{OpenMode, RemoteDir, RemoteFile};
use crate::link::Link;
use crate::progress::{ProgressCounters, ProgressSink};

/// Stream overhead of a data create: the synthesized header.
pub const OVERHEAD: u32 = AppfsFileHeader::SIZE as u32;

/// Construction options for an appfs stream.
#[derive(Debug, Clone)]
pub struct AppfsOptions {
    name: String,
    mount: String,
    size: u32,
    executable: bool,
    overwrite: bool,
}

impl AppfsOptions {
    /// Options for the appfs entry called `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mount: "/app".to_string(),
            size: 0,
            executable: false,
            overwrite: false,
        }
    }

    /// Override the appfs mount point (default `/app`).
    #[must_use]
    pub fn with_mount(mut self, mount: &str) -> Self {
        self.mount = mount.to_string();
        self
    }

    /// Payload size of a data create; ignored for installs.
    #[must_use]
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    /// Select the executable install request instead of a data create.
    #[must_use]
    pub fn with_executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    /// Delete an existing entry of the same name before streaming.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// A page-oriented install stream into `/app/.install`.
pub struct Appfs<D: DeviceDriver> {
    file: RemoteFile<D>,
    request: u32,
    attr: AppfsCreateAttr,
    bytes_written: u32,
    data_size: u32,
    counters: Arc<ProgressCounters>,
}

impl<D: DeviceDriver> std::fmt::Debug for Appfs<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appfs")
            .field("file", &self.file)
            .field("request", &self.request)
            .field("attr", &self.attr)
            .field("bytes_written", &self.bytes_written)
            .field("data_size", &self.data_size)
            .finish()
    }
}

impl<D: DeviceDriver> Appfs<D> {
    /// Open an install stream on the connected device.
    ///
    /// A data create (`executable = false`) requires a nonzero `size` and
    /// synthesizes the leading header; an install defers its size to the
    /// first [`Appfs::append`].
    pub fn new(link: &Link<D>, options: &AppfsOptions) -> Result<Self> {
        if options.name.is_empty() || options.name.len() > NAME_MAX - 1 {
            return Err(LinkError::invalid_argument("appfs: bad name"));
        }
        if !options.executable && options.size == 0 {
            return Err(LinkError::invalid_argument("appfs: create needs a size"));
        }

        let target = format!("{}/flash/{}", options.mount, options.name);
        let filesystem = link.fs();
        if options.overwrite && filesystem.exists(&target) {
            filesystem.remove(&target)?;
        }

        let file = RemoteFile::open(link, "/app/.install", OpenMode::write_only())?;

        let mut appfs = Self {
            file,
            request: if options.executable {
                requests::APPFS_INSTALL
            } else {
                requests::APPFS_CREATE
            },
            attr: AppfsCreateAttr::zeroed(),
            bytes_written: 0,
            data_size: 0,
            counters: link.progress(),
        };

        if !options.executable {
            let mut header = AppfsFileHeader::zeroed();
            header.name = heliolink_wire::make_fixed_str(&options.name)
                .map_err(|error| LinkError::from_wire("appfs", error))?;
            header.mode = 0o444;
            header.code_size = options.size + OVERHEAD;
            header.signature = CREATE_SIGNATURE;
            appfs.attr.buffer[..AppfsFileHeader::SIZE].copy_from_slice(&header.to_bytes());
            appfs.bytes_written = OVERHEAD;
            appfs.data_size = options.size + OVERHEAD;
        }

        Ok(appfs)
    }

    /// Whether more payload is expected.
    #[must_use]
    pub fn is_append_ready(&self) -> bool {
        self.bytes_written < self.data_size || self.data_size == 0
    }

    /// Stream bytes accepted so far, including any synthesized header.
    #[must_use]
    pub fn bytes_written(&self) -> u32 {
        self.bytes_written
    }

    /// Stream bytes still outstanding.
    #[must_use]
    pub fn bytes_available(&self) -> u32 {
        self.data_size.saturating_sub(self.bytes_written)
    }

    /// Payload capacity of the stream, excluding the header overhead.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.data_size.saturating_sub(OVERHEAD)
    }

    /// Stream `source` to the device.
    ///
    /// For an install the effective size is fixed on first append: the
    /// source length minus a trailing signature marker when one is present
    /// (the marker itself is never streamed; it is posted through the
    /// verify-signature ioctl after the last page). The progress sink sees
    /// one update per page and the terminal `(0, 0)` sentinel.
    pub fn append<R: Read + Seek>(
        &mut self,
        source: &mut R,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        const TAG: &str = "appfs-append";
        if self.data_size != 0 && self.bytes_written >= self.data_size {
            return Err(LinkError::NoSpace { tag: TAG.into() });
        }

        // trailing-marker probe; failures here only mean "unsigned"
        let marker = auth::get_signature(source).unwrap_or_else(|error| {
            debug!("{TAG}: signature probe suppressed: {error}");
            None
        });

        // older targets lack the query opcode; treat errors as "unknown"
        let signature_required =
            match self.file.ioctl(requests::APPFS_IS_SIGNATURE_REQUIRED, &[]) {
                Ok((result, _)) => Some(result > 0),
                Err(error) => {
                    debug!("{TAG}: signature-required probe suppressed: {error}");
                    None
                }
            };

        let source_len = source
            .seek(SeekFrom::End(0))
            .map_err(|e| LinkError::transport(TAG, e))? as u32;
        source
            .seek(SeekFrom::Start(0))
            .map_err(|e| LinkError::transport(TAG, e))?;

        if self.request == requests::APPFS_INSTALL && self.data_size == 0 {
            let marker_len = if marker.is_some() {
                SignatureMarker::SIZE as u32
            } else {
                0
            };
            self.data_size = source_len - marker_len;
            if signature_required == Some(true) && marker.is_none() {
                warn!("{TAG}: target requires signed installs but the image is unsigned");
            }
        }

        self.counters.set_maximum(self.data_size);

        let mut chunk = [0u8; PAGE_SIZE];
        while self.bytes_written < self.data_size {
            let want = PAGE_SIZE.min((self.data_size - self.bytes_written) as usize);
            read_fully(source, &mut chunk[..want], TAG)?;
            if self.push_blob(&chunk[..want], progress)? {
                // aborted by the sink; the stream stays incomplete
                progress.update(0, 0);
                return Ok(());
            }
        }

        if self.request == requests::APPFS_INSTALL {
            if let Some(signature) = marker {
                self.file.ioctl(requests::APPFS_VERIFY_SIGNATURE, &signature)?;
            }
        }

        progress.update(0, 0);
        Ok(())
    }

    /// Buffer `blob` into the page stream, issuing the per-page ioctl at
    /// every page boundary and at the end of the stream. Returns whether
    /// the sink requested an abort.
    pub(crate) fn push_blob(
        &mut self,
        blob: &[u8],
        progress: &mut dyn ProgressSink,
    ) -> Result<bool> {
        let mut consumed = 0;
        while self.bytes_written < self.data_size && consumed < blob.len() {
            let page_offset = (self.bytes_written as usize) % PAGE_SIZE;
            let available = PAGE_SIZE - page_offset;
            let take = available
                .min(blob.len() - consumed)
                .min((self.data_size - self.bytes_written) as usize);

            self.attr.buffer[page_offset..page_offset + take]
                .copy_from_slice(&blob[consumed..consumed + take]);
            self.bytes_written += take as u32;
            consumed += take;

            let at_boundary = self.bytes_written % PAGE_SIZE as u32 == 0;
            let at_end = self.bytes_written == self.data_size;
            if at_boundary || at_end {
                let fill = self.bytes_written % PAGE_SIZE as u32;
                self.attr.nbyte = if fill == 0 { PAGE_SIZE as u32 } else { fill };
                // the device rewrites loc in its reply; always send our own
                let attr_bytes = self.attr.to_bytes();
                self.file.ioctl(self.request, &attr_bytes)?;
                self.attr.loc += self.attr.nbyte;

                self.counters.set_current(self.bytes_written);
                if progress.update(self.bytes_written, self.data_size) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn read_fully<R: Read>(source: &mut R, buf: &mut [u8], tag: &str) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let count = source
            .read(&mut buf[filled..])
            .map_err(|e| LinkError::transport(tag, e))?;
        if count == 0 {
            return Err(LinkError::invalid_argument("appfs: source shorter than declared"));
        }
        filled += count;
    }
    Ok(())
}

/// Info record for an installed or buildable application file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppfsInfo {
    /// Application name from the header.
    pub name: String,
    /// Project id from the header.
    pub id: String,
    /// Access mode bits.
    pub mode: u16,
    /// Version word, major in the high byte.
    pub version: u16,
    /// Declared RAM size.
    pub ram_size: u32,
    /// Raw option flag word.
    pub o_flags: u32,
    /// ABI signature.
    pub signature: u32,
}

impl AppfsInfo {
    /// Valid records carry a nonzero ABI signature.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.signature != 0
    }

    /// Whether any execute bit is set.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }

    /// The option flags as a typed set.
    #[must_use]
    pub fn flags(&self) -> AppfsFlags {
        AppfsFlags::from_bits_truncate(self.o_flags)
    }

    /// Whether the application launches at startup.
    #[must_use]
    pub fn is_startup(&self) -> bool {
        self.flags().contains(AppfsFlags::STARTUP)
    }

    /// Whether the application installs into flash.
    #[must_use]
    pub fn is_flash(&self) -> bool {
        self.flags().contains(AppfsFlags::FLASH)
    }

    /// Whether the application runs detached from its parent.
    #[must_use]
    pub fn is_orphan(&self) -> bool {
        self.flags().contains(AppfsFlags::ORPHAN)
    }

    /// Whether each installed instance gets a unique name.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.flags().contains(AppfsFlags::UNIQUE)
    }
}

/// Read the appfs info of the file at `path`.
///
/// Fails with `NotExecutable` when the file is too short for a header or
/// its stored name does not match the path basename (a basename prefix
/// match is accepted to tolerate orphan-rename suffixes), and with
/// `InvalidArgument` for the reserved `.sys` / `.free` entries.
pub fn get_info<D: DeviceDriver>(link: &Link<D>, path: &str) -> Result<AppfsInfo> {
    let basename = path.rsplit('/').next().unwrap_or(path);
    if basename.starts_with(".sys") || basename.starts_with(".free") {
        return Err(LinkError::invalid_argument("appfs-info: reserved entry"));
    }

    let mut file = RemoteFile::open(link, path, OpenMode::read_only())?;
    let mut bytes = [0u8; AppfsFileHeader::SIZE];
    match file.read_exact_at_current(&mut bytes) {
        Ok(()) => {}
        Err(LinkError::Device { errno: code, .. }) if code == errno::ENOENT => {
            return Err(LinkError::NotExecutable {
                tag: "appfs-info: short file".into(),
            });
        }
        Err(error) => return Err(error),
    }

    let header = AppfsFileHeader::from_bytes(&bytes)
        .map_err(|error| LinkError::from_wire("appfs-info", error))?;

    if !basename.starts_with(header.name_str()) || header.name_str().is_empty() {
        return Err(LinkError::NotExecutable {
            tag: "appfs-info: name mismatch".into(),
        });
    }

    Ok(AppfsInfo {
        name: header.name_str().to_string(),
        id: header.id_str().to_string(),
        mode: header.mode,
        version: header.version,
        ram_size: header.ram_size,
        o_flags: header.o_flags,
        signature: header.signature,
    })
}

fn first_entry_exists<D: DeviceDriver>(link: &Link<D>, path: &str) -> bool {
    match RemoteDir::open(link, path) {
        Ok(mut directory) => loop {
            match directory.read() {
                Ok(Some(entry)) if entry == "." || entry == ".." => continue,
                Ok(Some(_)) => break true,
                Ok(None) => break false,
                Err(error) => {
                    debug!("availability probe on {path}: {error}");
                    break false;
                }
            }
        },
        Err(error) => {
            debug!("availability probe on {path}: {error}");
            false
        }
    }
}

/// Whether the persistent appfs root holds at least one entry.
pub fn is_flash_available<D: DeviceDriver>(link: &Link<D>) -> bool {
    first_entry_exists(link, "/app/flash")
}

/// Whether the volatile appfs root holds at least one entry.
pub fn is_ram_available<D: DeviceDriver>(link: &Link<D>) -> bool {
    first_entry_exists(link, "/app/ram")
}
