// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Fixed-entry rotating log stored as an appfs data file.
// Author: Lukas Bower

//! A fixed-entry log over an appfs data file.
//!
//! Appfs pages are written once, so the log is an append-only sequence of
//! page-aligned records: a start marker word, the caller's fixed-size entry,
//! and zero fill up to the next page boundary. The region between the
//! synthesized header and the first page boundary is reserved so entry 0
//! always starts page-aligned. Entries are found by scanning marker words;
//! the first missing marker is the end of the log.

use std::io::{Read, Seek, SeekFrom};

use log::debug;

use heliolink_wire::{AppfsFileHeader, LOG_ENTRY_START, PAGE_SIZE};

use crate::appfs::{Appfs, AppfsOptions};
use crate::driver::DeviceDriver;
use crate::error::{LinkError, Result};
use crate::fs::{OpenMode, RemoteFile};
use crate::link::Link;
use crate::progress::NullProgress;
use crate::transport::SharedTransport;

/// Reserved bytes between the synthesized header and the first entry.
const RESERVED: usize = PAGE_SIZE - AppfsFileHeader::SIZE;

/// Construction options for an appfs log.
#[derive(Debug, Clone)]
pub struct AppfsLogOptions {
    name: String,
    entry_size: usize,
    maximum_size: usize,
    overwrite: bool,
}

impl AppfsLogOptions {
    /// Options for the log called `name` with fixed `entry_size` payloads.
    #[must_use]
    pub fn new(name: &str, entry_size: usize) -> Self {
        Self {
            name: name.to_string(),
            entry_size,
            maximum_size: 4096,
            overwrite: true,
        }
    }

    /// Total payload budget of the backing appfs file (default 4096).
    #[must_use]
    pub fn with_maximum_size(mut self, maximum_size: usize) -> Self {
        self.maximum_size = maximum_size;
        self
    }

    /// Keep an existing log instead of recreating it (default recreates).
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// A fixed-entry log stored under `/app/flash`.
pub struct AppfsLog<D: DeviceDriver> {
    transport: SharedTransport<D>,
    path: String,
    entry_size: usize,
    maximum_size: usize,
    writer: Option<Appfs<D>>,
}

impl<D: DeviceDriver> AppfsLog<D> {
    /// Create (or overwrite) the log and reserve its header region.
    pub fn new(link: &Link<D>, options: &AppfsLogOptions) -> Result<Self> {
        if options.entry_size == 0 {
            return Err(LinkError::invalid_argument("appfs-log: zero entry size"));
        }
        let mut writer = Appfs::new(
            link,
            &AppfsOptions::new(&options.name)
                .with_size(options.maximum_size as u32)
                .with_overwrite(options.overwrite),
        )?;
        // align entry 0 to the first page boundary
        writer.push_blob(&vec![0u8; RESERVED], &mut NullProgress)?;

        Ok(Self {
            transport: link.transport(),
            path: format!("/app/flash/{}", options.name),
            entry_size: options.entry_size,
            maximum_size: options.maximum_size,
            writer: Some(writer),
        })
    }

    /// Attach to an existing log for reading only.
    pub fn attach(link: &Link<D>, options: &AppfsLogOptions) -> Result<Self> {
        if options.entry_size == 0 {
            return Err(LinkError::invalid_argument("appfs-log: zero entry size"));
        }
        Ok(Self {
            transport: link.transport(),
            path: format!("/app/flash/{}", options.name),
            entry_size: options.entry_size,
            maximum_size: options.maximum_size,
            writer: None,
        })
    }

    /// Bytes one entry occupies on flash: marker word plus payload, rounded
    /// up to whole pages.
    #[must_use]
    pub fn effective_entry_size(&self) -> usize {
        (self.entry_size + 4).div_ceil(PAGE_SIZE) * PAGE_SIZE
    }

    /// Upper bound on stored entries given the payload budget.
    #[must_use]
    pub fn maximum_entry_count(&self) -> usize {
        self.maximum_size.saturating_sub(RESERVED) / self.effective_entry_size()
    }

    /// Append one entry; its length must equal the configured entry size.
    pub fn save_entry(&mut self, entry: &[u8]) -> Result<()> {
        if entry.len() != self.entry_size {
            return Err(LinkError::invalid_argument("appfs-log: entry size mismatch"));
        }
        let fill = self.effective_entry_size() - self.entry_size - 4;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| LinkError::invalid_argument("appfs-log: attached read-only"))?;
        if (writer.bytes_available() as usize) < self.entry_size + 4 + fill {
            return Err(LinkError::NoSpace {
                tag: "appfs-log".into(),
            });
        }
        writer.push_blob(&LOG_ENTRY_START.to_le_bytes(), &mut NullProgress)?;
        writer.push_blob(entry, &mut NullProgress)?;
        writer.push_blob(&vec![0u8; fill], &mut NullProgress)?;
        Ok(())
    }

    fn open_reader(&self) -> Result<RemoteFile<D>> {
        RemoteFile::open_with(
            self.transport.clone(),
            &self.path,
            OpenMode::read_only(),
            crate::fs::Permissions::default(),
        )
    }

    /// Number of entries currently stored.
    pub fn entry_count(&self) -> Result<usize> {
        let mut reader = self.open_reader()?;
        let effective = self.effective_entry_size();
        for count in 0..self.maximum_entry_count() {
            let offset = (PAGE_SIZE + count * effective) as u64;
            if reader
                .seek(SeekFrom::Start(offset))
                .is_err()
            {
                return Ok(count);
            }
            let mut marker = [0u8; 4];
            match reader.read_exact(&mut marker) {
                Ok(()) => {}
                Err(error) => {
                    debug!("appfs-log: scan stopped at entry {count}: {error}");
                    return Ok(count);
                }
            }
            if u32::from_le_bytes(marker) != LOG_ENTRY_START {
                return Ok(count);
            }
        }
        Ok(self.maximum_entry_count())
    }

    /// Read the entry at `index`.
    pub fn read_entry(&self, index: usize) -> Result<Vec<u8>> {
        let mut reader = self.open_reader()?;
        let offset = (PAGE_SIZE + index * self.effective_entry_size() + 4) as u64;
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| LinkError::transport("appfs-log", e))?;
        let mut entry = vec![0u8; self.entry_size];
        reader
            .read_exact(&mut entry)
            .map_err(|e| LinkError::transport("appfs-log", e))?;
        Ok(entry)
    }

    /// Read the most recent entry; `NotFound` when the log is empty.
    pub fn read_newest(&self) -> Result<Vec<u8>> {
        let count = self.entry_count()?;
        if count == 0 {
            return Err(LinkError::NotFound {
                tag: "appfs-log: log is empty".into(),
            });
        }
        self.read_entry(count - 1)
    }
}
