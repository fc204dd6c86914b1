// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Read and patch the executable header baked into application images.
// Author: Lukas Bower

//! Application image attribute patching.
//!
//! The compiler allocates space for the name, id, version, and option flags
//! at the front of every application binary but cannot fill them in.
//! [`FileAttributes`] reads that header, patches the caller-supplied fields,
//! and writes it back without disturbing the rest of the image.

use std::io::{Read, Seek, SeekFrom, Write};

use bitflags::bitflags;

use heliolink_wire::{appfs_flags, AppfsFileHeader, NAME_MAX};

use crate::error::{LinkError, Result};

bitflags! {
    /// Option flags stored in `exec.o_flags` of an application header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AppfsFlags: u32 {
        /// Install into flash rather than RAM.
        const FLASH = appfs_flags::IS_FLASH;
        /// Launch at system startup.
        const STARTUP = appfs_flags::IS_STARTUP;
        /// Run with root privileges after authentication.
        const AUTHENTICATED = appfs_flags::IS_AUTHENTICATED;
        /// Replace an existing install of the same name.
        const REPLACE = appfs_flags::IS_REPLACE;
        /// Keep running after the parent exits.
        const ORPHAN = appfs_flags::IS_ORPHAN;
        /// Assign a unique name per installed instance.
        const UNIQUE = appfs_flags::IS_UNIQUE;
        /// Place code in external memory.
        const CODE_EXTERNAL = appfs_flags::IS_CODE_EXTERNAL;
        /// Place data in external memory.
        const DATA_EXTERNAL = appfs_flags::IS_DATA_EXTERNAL;
        /// Place code in tightly coupled memory.
        const CODE_TIGHTLY_COUPLED = appfs_flags::IS_CODE_TIGHTLY_COUPLED;
        /// Place data in tightly coupled memory.
        const DATA_TIGHTLY_COUPLED = appfs_flags::IS_DATA_TIGHTLY_COUPLED;
    }
}

/// Minimum RAM an application may declare; smaller values are clamped.
pub const MINIMUM_RAM_SIZE: u32 = 4096;

/// Patchable attributes of an application image header.
///
/// Empty `name`/`id` leave the stored field untouched; a zero `version` or
/// `access_mode` likewise; `ram_size` below [`MINIMUM_RAM_SIZE`] leaves the
/// stored value alone, and whatever ends up stored is clamped up to the
/// minimum. Flags are always written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    name: String,
    id: String,
    version: u16,
    access_mode: u16,
    ram_size: u32,
    flags: AppfsFlags,
}

impl FileAttributes {
    /// Read the attributes stored in the header of `file`.
    pub fn from_file<F: Read + Seek>(file: &mut F) -> Result<Self> {
        const TAG: &str = "attributes-read";
        let saved = file
            .stream_position()
            .map_err(|e| LinkError::transport(TAG, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| LinkError::transport(TAG, e))?;
        let mut bytes = [0u8; AppfsFileHeader::SIZE];
        let read = file.read_exact(&mut bytes);
        file.seek(SeekFrom::Start(saved))
            .map_err(|e| LinkError::transport(TAG, e))?;
        read.map_err(|e| LinkError::transport(TAG, e))?;

        let header = AppfsFileHeader::from_bytes(&bytes)
            .map_err(|error| LinkError::from_wire(TAG, error))?;
        Ok(Self::from(&header))
    }

    /// The application name to write, empty to keep the stored one.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the application name.
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// The project id to write, empty to keep the stored one.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the project id.
    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    /// The version to write; zero keeps the stored one.
    #[must_use]
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Replace the version word (major in the high byte).
    #[must_use]
    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// The access mode to write; zero keeps the stored one.
    #[must_use]
    pub fn access_mode(&self) -> u16 {
        self.access_mode
    }

    /// Replace the access mode bits.
    #[must_use]
    pub fn with_access_mode(mut self, access_mode: u16) -> Self {
        self.access_mode = access_mode;
        self
    }

    /// The RAM size to write; values below the minimum keep the stored one.
    #[must_use]
    pub fn ram_size(&self) -> u32 {
        self.ram_size
    }

    /// Replace the declared RAM size.
    #[must_use]
    pub fn with_ram_size(mut self, ram_size: u32) -> Self {
        self.ram_size = ram_size;
        self
    }

    /// The option flags to write.
    #[must_use]
    pub fn flags(&self) -> AppfsFlags {
        self.flags
    }

    /// Replace the option flags wholesale.
    #[must_use]
    pub fn with_flags(mut self, flags: AppfsFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set or clear one option flag.
    #[must_use]
    pub fn with_flag(mut self, flag: AppfsFlags, value: bool) -> Self {
        self.flags.set(flag, value);
        self
    }

    /// Patch the header of `file` in place.
    ///
    /// The file position is saved and restored. A file shorter than a full
    /// header is treated as a bare attribute block and grows to exactly the
    /// header size; longer files keep their size.
    pub fn apply<F: Read + Write + Seek>(&self, file: &mut F) -> Result<()> {
        const TAG: &str = "attributes-apply";
        if self.name.len() > NAME_MAX - 1 {
            return Err(LinkError::invalid_argument("attributes: name too long"));
        }
        if self.id.len() > NAME_MAX - 1 {
            return Err(LinkError::invalid_argument("attributes: id too long"));
        }

        let saved = file
            .stream_position()
            .map_err(|e| LinkError::transport(TAG, e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| LinkError::transport(TAG, e))?;

        // partial reads leave the tail zeroed: the bare-attributes case
        let mut bytes = [0u8; AppfsFileHeader::SIZE];
        let mut filled = 0;
        loop {
            let count = file
                .read(&mut bytes[filled..])
                .map_err(|e| LinkError::transport(TAG, e))?;
            if count == 0 {
                break;
            }
            filled += count;
            if filled == bytes.len() {
                break;
            }
        }

        let mut header = AppfsFileHeader::from_bytes(&bytes)
            .map_err(|error| LinkError::from_wire(TAG, error))?;

        if !self.name.is_empty() {
            header.name = heliolink_wire::make_fixed_str(&self.name)
                .map_err(|error| LinkError::from_wire(TAG, error))?;
        }
        if !self.id.is_empty() {
            header.id = heliolink_wire::make_fixed_str(&self.id)
                .map_err(|error| LinkError::from_wire(TAG, error))?;
        }
        if self.version != 0 {
            header.version = self.version;
        }
        if self.access_mode != 0 {
            header.mode = self.access_mode;
        }
        if self.ram_size >= MINIMUM_RAM_SIZE {
            header.ram_size = self.ram_size;
        }
        if header.ram_size < MINIMUM_RAM_SIZE {
            header.ram_size = MINIMUM_RAM_SIZE;
        }
        header.o_flags = self.flags.bits();

        file.seek(SeekFrom::Start(0))
            .map_err(|e| LinkError::transport(TAG, e))?;
        file.write_all(&header.to_bytes())
            .map_err(|e| LinkError::transport(TAG, e))?;
        file.seek(SeekFrom::Start(saved))
            .map_err(|e| LinkError::transport(TAG, e))?;
        Ok(())
    }
}

impl From<&AppfsFileHeader> for FileAttributes {
    fn from(header: &AppfsFileHeader) -> Self {
        Self {
            name: header.name_str().to_string(),
            id: header.id_str().to_string(),
            version: header.version,
            access_mode: header.mode,
            ram_size: header.ram_size,
            flags: AppfsFlags::from_bits_truncate(header.o_flags),
        }
    }
}
