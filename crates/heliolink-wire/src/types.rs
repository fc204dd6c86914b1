// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define link protocol opcodes, ioctl requests, and shared ABI constants.
// Author: Lukas Bower

//! Opcodes, ioctl request words, and ABI constants shared with the target.

use thiserror::Error;

/// Fixed width of `name` and `id` fields in headers and info records.
pub const NAME_MAX: usize = 24;

/// Appfs page size; create/install ioctls carry at most one page of payload.
pub const PAGE_SIZE: usize = 256;

/// Number of 32-bit words in a device serial number.
pub const SERIAL_WORD_COUNT: usize = 4;

/// Detached image signature size in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Device public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Authentication token size in bytes.
pub const TOKEN_SIZE: usize = 32;

/// Device secret key size in bytes.
pub const SECRET_KEY_SIZE: usize = 32;

/// Fixed width of the project id buffer served by the sys id ioctl.
pub const SYS_ID_LEN: usize = 64;

/// Longest path accepted by the remote `Exec` opcode, including the NUL.
pub const PATH_ARG_MAX: usize = 256;

/// Maximum payload of one flash-device `WritePage` ioctl.
pub const FLASH_WRITE_PAGE_SIZE: usize = 1024;

/// Byte offset of the 32-bit hardware id inside a bootloader image.
pub const BOOTLOADER_HARDWARE_ID_OFFSET: u64 = 0x24;

/// Bootloader versions at or above this value cache the first flash page on
/// the target; older bootloaders rely on the host writing it last.
pub const BOOTLOADER_TARGET_CACHES_FIRST_PAGE: u16 = 0x400;

/// First magic word of a trailing signature marker.
pub const SIGNATURE_MARKER_START: u32 = 0x5349_474E;

/// Second magic word of a trailing signature marker.
pub const SIGNATURE_MARKER_NEXT: u32 = 0x4E45_5854;

/// Serialized size of a trailing signature marker.
pub const SIGNATURE_MARKER_LEN: usize = 80;

/// Value of the marker `size` field; anything else invalidates the marker.
pub const SIGNATURE_MARKER_SIZE: u32 = SIGNATURE_MARKER_LEN as u32 + 512;

/// Magic placed in the `exec.signature` slot of a synthesized data header so
/// the target recognizes a host-created data file.
pub const CREATE_SIGNATURE: u32 = 0x6170_7066;

/// Marker word at the start of each appfs log entry.
pub const LOG_ENTRY_START: u32 = 0x1122_3344;

/// Target errno values surfaced through negative RPC results.
pub mod errno {
    /// No such file or directory.
    pub const ENOENT: i32 = 2;
    /// No such process.
    pub const ESRCH: i32 = 3;
    /// I/O error.
    pub const EIO: i32 = 5;
    /// Exec format error.
    pub const ENOEXEC: i32 = 8;
    /// Bad file descriptor.
    pub const EBADF: i32 = 9;
    /// Invalid argument.
    pub const EINVAL: i32 = 22;
    /// File exists.
    pub const EEXIST: i32 = 17;
    /// Not a directory.
    pub const ENOTDIR: i32 = 20;
    /// No space left on device.
    pub const ENOSPC: i32 = 28;
}

/// Open flags understood by the remote `Open` opcode.
pub mod open_flags {
    /// Open read-only.
    pub const O_RDONLY: u32 = 0x0000;
    /// Open write-only.
    pub const O_WRONLY: u32 = 0x0001;
    /// Open read-write.
    pub const O_RDWR: u32 = 0x0002;
    /// Append on each write.
    pub const O_APPEND: u32 = 0x0008;
    /// Create if missing.
    pub const O_CREAT: u32 = 0x0200;
    /// Truncate to zero length.
    pub const O_TRUNC: u32 = 0x0400;
    /// Fail if the file already exists.
    pub const O_EXCL: u32 = 0x0800;
}

/// File mode bits used by `Stat`/`Fstat` results.
pub mod mode {
    /// File-type mask.
    pub const S_IFMT: u32 = 0o170000;
    /// Directory.
    pub const S_IFDIR: u32 = 0o040000;
    /// Character device.
    pub const S_IFCHR: u32 = 0o020000;
    /// Block device.
    pub const S_IFBLK: u32 = 0o060000;
    /// Regular file.
    pub const S_IFREG: u32 = 0o100000;
    /// Symbolic link.
    pub const S_IFLNK: u32 = 0o120000;
}

/// Seek anchors for the remote `Lseek` opcode.
pub mod whence {
    /// Seek from the start of the file.
    pub const SEEK_SET: u8 = 0;
    /// Seek from the current location.
    pub const SEEK_CUR: u8 = 1;
    /// Seek from the end of the file.
    pub const SEEK_END: u8 = 2;
}

/// Ioctl request words agreed with the target drivers.
pub mod requests {
    /// Appfs: write one page of a data create stream.
    pub const APPFS_CREATE: u32 = 0x0A01;
    /// Appfs: write one page of an executable install stream.
    pub const APPFS_INSTALL: u32 = 0x0A02;
    /// Appfs: query whether installs must carry a signature.
    pub const APPFS_IS_SIGNATURE_REQUIRED: u32 = 0x0A03;
    /// Appfs: verify the signature of the just-installed image.
    pub const APPFS_VERIFY_SIGNATURE: u32 = 0x0A04;

    /// Sys: fetch the system info record.
    pub const SYS_GET_INFO: u32 = 0x0B01;
    /// Sys: fetch one task attribute slot.
    pub const SYS_GET_TASK: u32 = 0x0B02;
    /// Sys: deliver a signal to a process.
    pub const SYS_KILL: u32 = 0x0B03;
    /// Sys: fetch the project id string.
    pub const SYS_GET_ID: u32 = 0x0B04;
    /// Sys: fetch the device secret key.
    pub const SYS_GET_SECRET_KEY: u32 = 0x0B05;
    /// Sys: query whether the session is authenticated.
    pub const SYS_IS_AUTHENTICATED: u32 = 0x0B06;

    /// Auth: first handshake exchange.
    pub const AUTH_START: u32 = 0x0C01;
    /// Auth: second handshake exchange.
    pub const AUTH_FINISH: u32 = 0x0C02;
    /// Auth: fetch the device public key.
    pub const AUTH_GET_PUBLIC_KEY: u32 = 0x0C03;

    /// Flash device: fetch the OS image region.
    pub const FLASH_GET_OS_INFO: u32 = 0x0D01;
    /// Flash device: erase the page containing an address.
    pub const FLASH_ERASE_PAGE: u32 = 0x0D02;
    /// Flash device: program one page-sized chunk.
    pub const FLASH_WRITE_PAGE: u32 = 0x0D03;
    /// Flash device: query whether installs must carry a signature.
    pub const FLASH_IS_SIGNATURE_REQUIRED: u32 = 0x0D04;
    /// Flash device: verify the signature of the just-programmed image.
    pub const FLASH_VERIFY_SIGNATURE: u32 = 0x0D05;
}

/// Appfs `o_flags` bit values stored in `exec.o_flags`.
pub mod appfs_flags {
    /// Install into flash rather than RAM.
    pub const IS_FLASH: u32 = 0x0001;
    /// Launch at system startup.
    pub const IS_STARTUP: u32 = 0x0002;
    /// Run with root privileges after authentication.
    pub const IS_AUTHENTICATED: u32 = 0x0004;
    /// Replace an existing install of the same name.
    pub const IS_REPLACE: u32 = 0x0008;
    /// Keep running after the parent exits.
    pub const IS_ORPHAN: u32 = 0x0010;
    /// Assign a unique name per installed instance.
    pub const IS_UNIQUE: u32 = 0x0020;
    /// Place code in external memory.
    pub const IS_CODE_EXTERNAL: u32 = 0x0040;
    /// Place data in external memory.
    pub const IS_DATA_EXTERNAL: u32 = 0x0080;
    /// Place code in tightly coupled memory.
    pub const IS_CODE_TIGHTLY_COUPLED: u32 = 0x0100;
    /// Place data in tightly coupled memory.
    pub const IS_DATA_TIGHTLY_COUPLED: u32 = 0x0200;
}

/// Link protocol opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Opcode {
    Open = 0x01,
    Close = 0x02,
    Read = 0x03,
    Write = 0x04,
    Lseek = 0x05,
    Ioctl = 0x06,
    Stat = 0x07,
    Fstat = 0x08,
    Mkdir = 0x09,
    Rmdir = 0x0A,
    Unlink = 0x0B,
    Rename = 0x0C,
    Opendir = 0x0D,
    Readdir = 0x0E,
    Closedir = 0x0F,
    Telldir = 0x10,
    Seekdir = 0x11,
    Rewinddir = 0x12,
    GetTime = 0x13,
    SetTime = 0x14,
    Exec = 0x15,
    Mkfs = 0x16,
    GetSysInfo = 0x20,
    IsBootloader = 0x30,
    IsBootloaderLegacy = 0x31,
    BootloaderAttr = 0x32,
    BootloaderAttrLegacy = 0x33,
    ReadFlash = 0x34,
    WriteFlash = 0x35,
    EraseFlash = 0x36,
    VerifySignature = 0x37,
    GetPublicKey = 0x38,
    Reset = 0x3A,
    ResetBootloader = 0x3B,
}

impl TryFrom<u8> for Opcode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        Ok(match value {
            0x01 => Open,
            0x02 => Close,
            0x03 => Read,
            0x04 => Write,
            0x05 => Lseek,
            0x06 => Ioctl,
            0x07 => Stat,
            0x08 => Fstat,
            0x09 => Mkdir,
            0x0A => Rmdir,
            0x0B => Unlink,
            0x0C => Rename,
            0x0D => Opendir,
            0x0E => Readdir,
            0x0F => Closedir,
            0x10 => Telldir,
            0x11 => Seekdir,
            0x12 => Rewinddir,
            0x13 => GetTime,
            0x14 => SetTime,
            0x15 => Exec,
            0x16 => Mkfs,
            0x20 => GetSysInfo,
            0x30 => IsBootloader,
            0x31 => IsBootloaderLegacy,
            0x32 => BootloaderAttr,
            0x33 => BootloaderAttrLegacy,
            0x34 => ReadFlash,
            0x35 => WriteFlash,
            0x36 => EraseFlash,
            0x37 => VerifySignature,
            0x38 => GetPublicKey,
            0x3A => Reset,
            0x3B => ResetBootloader,
            other => return Err(WireError::UnknownOpcode(other)),
        })
    }
}

/// Errors produced while encoding or decoding wire frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// Frame ended before the declared payload was complete.
    #[error("frame truncated")]
    Truncated,
    /// Declared frame length disagrees with the received byte count.
    #[error("length mismatch: declared {declared}, actual {actual}")]
    LengthMismatch {
        /// Length carried in the frame prelude.
        declared: u32,
        /// Bytes actually available.
        actual: usize,
    },
    /// Opcode byte is not part of the protocol.
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    /// A string field held invalid UTF-8 or an embedded NUL.
    #[error("invalid string field")]
    InvalidString,
    /// A field value exceeded its protocol limit.
    #[error("field out of range: {0}")]
    FieldRange(&'static str),
}
