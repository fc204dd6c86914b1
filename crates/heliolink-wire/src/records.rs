// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Encode and decode the fixed-layout records carried by link payloads.
// Author: Lukas Bower

//! Bit-exact record layouts shared with the target ABI.
//!
//! Every record encodes to a fixed number of little-endian bytes. Text
//! fields are NUL-padded to their fixed width and NUL-terminated on read.

use alloc::string::String;
use alloc::vec::Vec;

use crate::codec::Cursor;
use crate::types::{
    WireError, FLASH_WRITE_PAGE_SIZE, NAME_MAX, PAGE_SIZE, SERIAL_WORD_COUNT, SIGNATURE_MARKER_LEN,
    SIGNATURE_SIZE,
};

fn put_fixed_str(buffer: &mut Vec<u8>, value: &[u8; NAME_MAX]) {
    buffer.extend_from_slice(value);
}

fn fixed_str(value: &[u8]) -> &str {
    let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
    core::str::from_utf8(&value[..end]).unwrap_or("")
}

/// Copy `text` into a NUL-padded fixed-width field.
///
/// Text longer than `N - 1` bytes is rejected so the field always keeps a
/// terminating NUL.
pub fn make_fixed_str<const N: usize>(text: &str) -> Result<[u8; N], WireError> {
    let bytes = text.as_bytes();
    if bytes.len() > N - 1 {
        return Err(WireError::FieldRange("fixed string"));
    }
    let mut out = [0u8; N];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// System info record served by `GetSysInfo` and the `/dev/sys` info ioctl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysInfo {
    /// Board name, or `"bootloader"` for a synthesized bootloader record.
    pub name: [u8; NAME_MAX],
    /// Kernel version string.
    pub kernel_version: [u8; 16],
    /// Board support package version string.
    pub sys_version: [u8; 16],
    /// CPU architecture tag.
    pub arch: [u8; 8],
    /// Core clock in Hz; zero marks the record invalid.
    pub cpu_freq: u32,
    /// Application ABI signature.
    pub signature: u32,
    /// Hardware family id.
    pub hardware_id: u32,
    /// Device serial number words.
    pub serial: [u32; SERIAL_WORD_COUNT],
    /// System option flags.
    pub o_flags: u32,
}

impl SysInfo {
    /// Serialized size in bytes.
    pub const SIZE: usize = NAME_MAX + 16 + 16 + 8 + 4 + 4 + 4 + 4 * SERIAL_WORD_COUNT + 4;

    /// An all-zero, invalid record.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            name: [0; NAME_MAX],
            kernel_version: [0; 16],
            sys_version: [0; 16],
            arch: [0; 8],
            cpu_freq: 0,
            signature: 0,
            hardware_id: 0,
            serial: [0; SERIAL_WORD_COUNT],
            o_flags: 0,
        }
    }

    /// A record is valid when the device reported a core clock.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cpu_freq != 0
    }

    /// Board name with the NUL padding stripped.
    #[must_use]
    pub fn name_str(&self) -> &str {
        fixed_str(&self.name)
    }

    /// Kernel version with the NUL padding stripped.
    #[must_use]
    pub fn kernel_version_str(&self) -> &str {
        fixed_str(&self.kernel_version)
    }

    /// BSP version with the NUL padding stripped.
    #[must_use]
    pub fn sys_version_str(&self) -> &str {
        fixed_str(&self.sys_version)
    }

    /// Architecture tag with the NUL padding stripped.
    #[must_use]
    pub fn arch_str(&self) -> &str {
        fixed_str(&self.arch)
    }

    /// Append the serialized record to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        put_fixed_str(buffer, &self.name);
        buffer.extend_from_slice(&self.kernel_version);
        buffer.extend_from_slice(&self.sys_version);
        buffer.extend_from_slice(&self.arch);
        buffer.extend_from_slice(&self.cpu_freq.to_le_bytes());
        buffer.extend_from_slice(&self.signature.to_le_bytes());
        buffer.extend_from_slice(&self.hardware_id.to_le_bytes());
        for word in &self.serial {
            buffer.extend_from_slice(&word.to_le_bytes());
        }
        buffer.extend_from_slice(&self.o_flags.to_le_bytes());
    }

    /// Decode one record from `cursor`.
    pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        let mut info = Self::zeroed();
        cursor.read_exact(&mut info.name)?;
        cursor.read_exact(&mut info.kernel_version)?;
        cursor.read_exact(&mut info.sys_version)?;
        cursor.read_exact(&mut info.arch)?;
        info.cpu_freq = cursor.read_u32()?;
        info.signature = cursor.read_u32()?;
        info.hardware_id = cursor.read_u32()?;
        for word in &mut info.serial {
            *word = cursor.read_u32()?;
        }
        info.o_flags = cursor.read_u32()?;
        Ok(info)
    }
}

/// Bootloader attribute record served by `BootloaderAttr[Legacy]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootloaderAttrs {
    /// Bootloader protocol version.
    pub version: u16,
    /// Flash address where the OS image starts.
    pub start_address: u32,
    /// Hardware family id; the low bit is a build-variant flag.
    pub hardware_id: u32,
    /// Device serial number words.
    pub serialno: [u32; SERIAL_WORD_COUNT],
}

impl BootloaderAttrs {
    /// Serialized size in bytes (version is padded to a word boundary).
    pub const SIZE: usize = 4 + 4 + 4 + 4 * SERIAL_WORD_COUNT;

    /// Append the serialized record to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.version.to_le_bytes());
        buffer.extend_from_slice(&[0u8; 2]);
        buffer.extend_from_slice(&self.start_address.to_le_bytes());
        buffer.extend_from_slice(&self.hardware_id.to_le_bytes());
        for word in &self.serialno {
            buffer.extend_from_slice(&word.to_le_bytes());
        }
    }

    /// Decode one record from `cursor`.
    pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        let version = cursor.read_u16()?;
        let _pad = cursor.read_u16()?;
        let start_address = cursor.read_u32()?;
        let hardware_id = cursor.read_u32()?;
        let mut serialno = [0u32; SERIAL_WORD_COUNT];
        for word in &mut serialno {
            *word = cursor.read_u32()?;
        }
        Ok(Self {
            version,
            start_address,
            hardware_id,
            serialno,
        })
    }
}

/// Executable header at the front of every appfs file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppfsFileHeader {
    /// Application name, NUL-padded.
    pub name: [u8; NAME_MAX],
    /// Access mode bits.
    pub mode: u16,
    /// Version, major in the high byte and minor in the low byte.
    pub version: u16,
    /// Project id, NUL-padded.
    pub id: [u8; NAME_MAX],
    /// Entry point address.
    pub startup: u32,
    /// Code load address.
    pub code_start: u32,
    /// Total byte count of the file including this header.
    pub code_size: u32,
    /// RAM region start address.
    pub ram_start: u32,
    /// RAM region size in bytes.
    pub ram_size: u32,
    /// Initialized data size in bytes.
    pub data_size: u32,
    /// Appfs option flags.
    pub o_flags: u32,
    /// ABI signature, or [`crate::CREATE_SIGNATURE`] for data files.
    pub signature: u32,
}

impl AppfsFileHeader {
    /// Serialized size in bytes; also the stream overhead of a data create.
    pub const SIZE: usize = NAME_MAX + 2 + 2 + NAME_MAX + 8 * 4;

    /// An all-zero header.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            name: [0; NAME_MAX],
            mode: 0,
            version: 0,
            id: [0; NAME_MAX],
            startup: 0,
            code_start: 0,
            code_size: 0,
            ram_start: 0,
            ram_size: 0,
            data_size: 0,
            o_flags: 0,
            signature: 0,
        }
    }

    /// Application name with the NUL padding stripped.
    #[must_use]
    pub fn name_str(&self) -> &str {
        fixed_str(&self.name)
    }

    /// Project id with the NUL padding stripped.
    #[must_use]
    pub fn id_str(&self) -> &str {
        fixed_str(&self.id)
    }

    /// Append the serialized header to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        put_fixed_str(buffer, &self.name);
        buffer.extend_from_slice(&self.mode.to_le_bytes());
        buffer.extend_from_slice(&self.version.to_le_bytes());
        put_fixed_str(buffer, &self.id);
        buffer.extend_from_slice(&self.startup.to_le_bytes());
        buffer.extend_from_slice(&self.code_start.to_le_bytes());
        buffer.extend_from_slice(&self.code_size.to_le_bytes());
        buffer.extend_from_slice(&self.ram_start.to_le_bytes());
        buffer.extend_from_slice(&self.ram_size.to_le_bytes());
        buffer.extend_from_slice(&self.data_size.to_le_bytes());
        buffer.extend_from_slice(&self.o_flags.to_le_bytes());
        buffer.extend_from_slice(&self.signature.to_le_bytes());
    }

    /// Serialize the header to its exact byte form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::SIZE);
        self.encode_into(&mut buffer);
        buffer
    }

    /// Decode one header from `cursor`.
    pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        let mut header = Self::zeroed();
        cursor.read_exact(&mut header.name)?;
        header.mode = cursor.read_u16()?;
        header.version = cursor.read_u16()?;
        cursor.read_exact(&mut header.id)?;
        header.startup = cursor.read_u32()?;
        header.code_start = cursor.read_u32()?;
        header.code_size = cursor.read_u32()?;
        header.ram_start = cursor.read_u32()?;
        header.ram_size = cursor.read_u32()?;
        header.data_size = cursor.read_u32()?;
        header.o_flags = cursor.read_u32()?;
        header.signature = cursor.read_u32()?;
        Ok(header)
    }

    /// Decode a header from an exact byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        Self::decode(&mut cursor)
    }
}

/// Argument of the appfs create/install ioctls: one page of stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppfsCreateAttr {
    /// Byte offset of this page within the stream; always page-aligned.
    pub loc: u32,
    /// Number of valid bytes in `buffer`.
    pub nbyte: u32,
    /// Page payload.
    pub buffer: [u8; PAGE_SIZE],
}

impl AppfsCreateAttr {
    /// Serialized size in bytes.
    pub const SIZE: usize = 4 + 4 + PAGE_SIZE;

    /// An empty page at offset zero.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            loc: 0,
            nbyte: 0,
            buffer: [0; PAGE_SIZE],
        }
    }

    /// Append the serialized record to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.loc.to_le_bytes());
        buffer.extend_from_slice(&self.nbyte.to_le_bytes());
        buffer.extend_from_slice(&self.buffer);
    }

    /// Serialize the record to its exact byte form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::SIZE);
        self.encode_into(&mut buffer);
        buffer
    }

    /// Decode one record from `cursor`.
    pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        let mut attr = Self::zeroed();
        attr.loc = cursor.read_u32()?;
        attr.nbyte = cursor.read_u32()?;
        cursor.read_exact(&mut attr.buffer)?;
        if attr.nbyte as usize > PAGE_SIZE {
            return Err(WireError::FieldRange("create attr nbyte"));
        }
        Ok(attr)
    }
}

/// Trailing signature marker appended to signed images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureMarker {
    /// First magic word; must equal [`crate::SIGNATURE_MARKER_START`].
    pub start: u32,
    /// Second magic word; must equal [`crate::SIGNATURE_MARKER_NEXT`].
    pub next: u32,
    /// Must equal [`crate::SIGNATURE_MARKER_SIZE`].
    pub size: u32,
    /// Detached signature over the bytes preceding the marker.
    pub signature: [u8; SIGNATURE_SIZE],
    /// Reserved; written as zero.
    pub reserved: u32,
}

impl SignatureMarker {
    /// Serialized size in bytes.
    pub const SIZE: usize = SIGNATURE_MARKER_LEN;

    /// Build a well-formed marker around `signature`.
    #[must_use]
    pub fn new(signature: [u8; SIGNATURE_SIZE]) -> Self {
        Self {
            start: crate::SIGNATURE_MARKER_START,
            next: crate::SIGNATURE_MARKER_NEXT,
            size: crate::SIGNATURE_MARKER_SIZE,
            signature,
            reserved: 0,
        }
    }

    /// Whether the magic words and size field all hold their fixed values.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.start == crate::SIGNATURE_MARKER_START
            && self.next == crate::SIGNATURE_MARKER_NEXT
            && self.size == crate::SIGNATURE_MARKER_SIZE
    }

    /// Serialize the marker to its exact byte form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::SIZE);
        buffer.extend_from_slice(&self.start.to_le_bytes());
        buffer.extend_from_slice(&self.next.to_le_bytes());
        buffer.extend_from_slice(&self.size.to_le_bytes());
        buffer.extend_from_slice(&self.signature);
        buffer.extend_from_slice(&self.reserved.to_le_bytes());
        buffer
    }

    /// Decode a marker from an exact byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let start = cursor.read_u32()?;
        let next = cursor.read_u32()?;
        let size = cursor.read_u32()?;
        let mut signature = [0u8; SIGNATURE_SIZE];
        cursor.read_exact(&mut signature)?;
        let reserved = cursor.read_u32()?;
        Ok(Self {
            start,
            next,
            size,
            signature,
            reserved,
        })
    }
}

/// Task attribute slot served by the `/dev/sys` task ioctl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskAttr {
    /// Task id; also the requested slot on input.
    pub tid: u32,
    /// Owning process id.
    pub pid: u32,
    /// Accumulated scheduler timer ticks.
    pub timer: u64,
    /// Memory region start address.
    pub mem_loc: u32,
    /// Memory region size in bytes.
    pub mem_size: u32,
    /// Current heap break address.
    pub malloc_loc: u32,
    /// Current stack pointer.
    pub stack_ptr: u32,
    /// Scheduling priority.
    pub prio: u8,
    /// Priority ceiling while holding a mutex.
    pub prio_ceiling: u8,
    /// Nonzero while the task is runnable.
    pub is_active: u8,
    /// Nonzero for threads, zero for processes.
    pub is_thread: u8,
    /// Nonzero while the slot is assigned.
    pub is_enabled: u8,
    /// Task name, NUL-padded.
    pub name: [u8; NAME_MAX],
}

impl TaskAttr {
    /// Serialized size in bytes (flag bytes are padded to a word boundary).
    pub const SIZE: usize = 4 + 4 + 8 + 4 + 4 + 4 + 4 + 8 + NAME_MAX;

    /// An all-zero slot for the requested `tid`.
    #[must_use]
    pub fn request(tid: u32) -> Self {
        Self {
            tid,
            pid: 0,
            timer: 0,
            mem_loc: 0,
            mem_size: 0,
            malloc_loc: 0,
            stack_ptr: 0,
            prio: 0,
            prio_ceiling: 0,
            is_active: 0,
            is_thread: 0,
            is_enabled: 0,
            name: [0; NAME_MAX],
        }
    }

    /// Task name with the NUL padding stripped.
    #[must_use]
    pub fn name_str(&self) -> &str {
        fixed_str(&self.name)
    }

    /// Serialize the record to its exact byte form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::SIZE);
        buffer.extend_from_slice(&self.tid.to_le_bytes());
        buffer.extend_from_slice(&self.pid.to_le_bytes());
        buffer.extend_from_slice(&self.timer.to_le_bytes());
        buffer.extend_from_slice(&self.mem_loc.to_le_bytes());
        buffer.extend_from_slice(&self.mem_size.to_le_bytes());
        buffer.extend_from_slice(&self.malloc_loc.to_le_bytes());
        buffer.extend_from_slice(&self.stack_ptr.to_le_bytes());
        buffer.push(self.prio);
        buffer.push(self.prio_ceiling);
        buffer.push(self.is_active);
        buffer.push(self.is_thread);
        buffer.push(self.is_enabled);
        buffer.extend_from_slice(&[0u8; 3]);
        buffer.extend_from_slice(&self.name);
        buffer
    }

    /// Decode a record from an exact byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let mut attr = Self::request(0);
        attr.tid = cursor.read_u32()?;
        attr.pid = cursor.read_u32()?;
        attr.timer = cursor.read_u64()?;
        attr.mem_loc = cursor.read_u32()?;
        attr.mem_size = cursor.read_u32()?;
        attr.malloc_loc = cursor.read_u32()?;
        attr.stack_ptr = cursor.read_u32()?;
        attr.prio = cursor.read_u8()?;
        attr.prio_ceiling = cursor.read_u8()?;
        attr.is_active = cursor.read_u8()?;
        attr.is_thread = cursor.read_u8()?;
        attr.is_enabled = cursor.read_u8()?;
        let mut pad = [0u8; 3];
        cursor.read_exact(&mut pad)?;
        cursor.read_exact(&mut attr.name)?;
        Ok(attr)
    }
}

/// Result of `Stat`/`Fstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    /// Mode bits including the file type.
    pub mode: u32,
    /// Size in bytes.
    pub size: u32,
    /// Modification time in epoch seconds.
    pub mtime: u32,
}

impl FileStat {
    /// Serialized size in bytes.
    pub const SIZE: usize = 12;

    /// Whether the mode marks a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.mode & crate::mode::S_IFMT == crate::mode::S_IFDIR
    }

    /// Permission bits without the file type.
    #[must_use]
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Append the serialized record to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.mode.to_le_bytes());
        buffer.extend_from_slice(&self.size.to_le_bytes());
        buffer.extend_from_slice(&self.mtime.to_le_bytes());
    }

    /// Decode one record from `cursor`.
    pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        Ok(Self {
            mode: cursor.read_u32()?,
            size: cursor.read_u32()?,
            mtime: cursor.read_u32()?,
        })
    }
}

/// Broken-down calendar time carried by `GetTime`/`SetTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkTime {
    /// Seconds `[0, 60]`.
    pub sec: i32,
    /// Minutes `[0, 59]`.
    pub min: i32,
    /// Hours `[0, 23]`.
    pub hour: i32,
    /// Day of month `[1, 31]`.
    pub mday: i32,
    /// Months since January.
    pub mon: i32,
    /// Years since 1900.
    pub year: i32,
    /// Days since Sunday.
    pub wday: i32,
    /// Days since January 1.
    pub yday: i32,
    /// Daylight saving flag.
    pub isdst: i32,
}

impl LinkTime {
    /// Serialized size in bytes.
    pub const SIZE: usize = 9 * 4;

    /// Append the serialized record to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        for field in [
            self.sec, self.min, self.hour, self.mday, self.mon, self.year, self.wday, self.yday,
            self.isdst,
        ] {
            buffer.extend_from_slice(&field.to_le_bytes());
        }
    }

    /// Decode one record from `cursor`.
    pub fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        Ok(Self {
            sec: cursor.read_i32()?,
            min: cursor.read_i32()?,
            hour: cursor.read_i32()?,
            mday: cursor.read_i32()?,
            mon: cursor.read_i32()?,
            year: cursor.read_i32()?,
            wday: cursor.read_i32()?,
            yday: cursor.read_i32()?,
            isdst: cursor.read_i32()?,
        })
    }
}

/// OS image region reported by the flash device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OsFlashInfo {
    /// Flash address where the OS image starts.
    pub start: u32,
    /// Region size in bytes.
    pub size: u32,
}

impl OsFlashInfo {
    /// Serialized size in bytes.
    pub const SIZE: usize = 8;

    /// Serialize the record to its exact byte form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::SIZE);
        buffer.extend_from_slice(&self.start.to_le_bytes());
        buffer.extend_from_slice(&self.size.to_le_bytes());
        buffer
    }

    /// Decode a record from an exact byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        Ok(Self {
            start: cursor.read_u32()?,
            size: cursor.read_u32()?,
        })
    }
}

/// Argument of the flash-device `WritePage` ioctl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPageWrite {
    /// Absolute flash address of this chunk.
    pub addr: u32,
    /// Number of valid bytes in `buf`.
    pub nbyte: u32,
    /// Chunk payload.
    pub buf: [u8; FLASH_WRITE_PAGE_SIZE],
}

impl FlashPageWrite {
    /// Serialized size in bytes.
    pub const SIZE: usize = 4 + 4 + FLASH_WRITE_PAGE_SIZE;

    /// An empty chunk at address zero.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            addr: 0,
            nbyte: 0,
            buf: [0; FLASH_WRITE_PAGE_SIZE],
        }
    }

    /// Serialize the record to its exact byte form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::SIZE);
        buffer.extend_from_slice(&self.addr.to_le_bytes());
        buffer.extend_from_slice(&self.nbyte.to_le_bytes());
        buffer.extend_from_slice(&self.buf);
        buffer
    }

    /// Decode a record from an exact byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let mut page = Self::zeroed();
        page.addr = cursor.read_u32()?;
        page.nbyte = cursor.read_u32()?;
        cursor.read_exact(&mut page.buf)?;
        if page.nbyte as usize > FLASH_WRITE_PAGE_SIZE {
            return Err(WireError::FieldRange("flash page nbyte"));
        }
        Ok(page)
    }
}

/// Render a serial number as the canonical 32-hex-digit string, most
/// significant word first.
#[must_use]
pub fn serial_to_string(serial: &[u32; SERIAL_WORD_COUNT]) -> String {
    use core::fmt::Write;
    let mut out = String::with_capacity(SERIAL_WORD_COUNT * 8);
    for word in serial.iter().rev() {
        let _ = write!(out, "{word:08X}");
    }
    out
}
