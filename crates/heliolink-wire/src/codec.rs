// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Encode and decode link protocol frames without std dependencies.
// Author: Lukas Bower

//! Length-prefixed frame codec for link requests and responses.
//!
//! Frame form: `u32 len (LE, total including the 5-byte prelude) | u8 opcode
//! | payload`. A response frame echoes the opcode of the request it answers
//! and its payload always begins with an `i32` result word; negative results
//! carry the target errno as `-result`.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::records::{BootloaderAttrs, FileStat, LinkTime, SysInfo};
use crate::types::{Opcode, WireError, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

/// Borrowed byte reader used by record and frame decoders.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Wrap `buf` starting at offset zero.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fill `out` from the buffer or fail with [`WireError::Truncated`].
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<(), WireError> {
        let end = self.pos.saturating_add(out.len());
        if end > self.buf.len() {
            return Err(WireError::Truncated);
        }
        out.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a `u16`-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| WireError::InvalidString)
    }

    /// Read a length-prefixed byte blob.
    pub fn read_blob(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.read_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

fn put_string(buffer: &mut Vec<u8>, value: &str) -> Result<(), WireError> {
    let len: u16 = value
        .len()
        .try_into()
        .map_err(|_| WireError::FieldRange("string length"))?;
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_blob(buffer: &mut Vec<u8>, value: &[u8]) -> Result<(), WireError> {
    let len: u32 = value
        .len()
        .try_into()
        .map_err(|_| WireError::FieldRange("blob length"))?;
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(value);
    Ok(())
}

/// Wrap `payload` in a frame prelude for `opcode`.
#[must_use]
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let size = payload.len() + 5;
    let mut frame = Vec::with_capacity(size);
    frame.extend_from_slice(&(size as u32).to_le_bytes());
    frame.push(opcode as u8);
    frame.extend_from_slice(payload);
    frame
}

/// Split a complete frame into its opcode and payload.
pub fn decode_frame(bytes: &[u8]) -> Result<(Opcode, &[u8]), WireError> {
    if bytes.len() < 5 {
        return Err(WireError::Truncated);
    }
    let declared = u32::from_le_bytes(bytes[..4].try_into().expect("slice length checked"));
    if declared as usize != bytes.len() {
        return Err(WireError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }
    let opcode = Opcode::try_from(bytes[4])?;
    Ok((opcode, &bytes[5..]))
}

/// A request frame sent from the host to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Request {
    Open { path: String, flags: u32, mode: u32 },
    Close { fd: i32 },
    Read { fd: i32, nbyte: u32 },
    Write { fd: i32, data: Vec<u8> },
    Lseek { fd: i32, offset: i32, whence: u8 },
    Ioctl { fd: i32, request: u32, arg: Vec<u8> },
    Stat { path: String },
    Fstat { fd: i32 },
    Mkdir { path: String, mode: u32 },
    Rmdir { path: String },
    Unlink { path: String },
    Rename { old: String, new: String },
    Opendir { path: String },
    Readdir { dirp: u32 },
    Closedir { dirp: u32 },
    Telldir { dirp: u32 },
    Seekdir { dirp: u32, location: u32 },
    Rewinddir { dirp: u32 },
    GetTime,
    SetTime { time: LinkTime },
    Exec { path: String },
    Mkfs { path: String },
    GetSysInfo,
    IsBootloader,
    IsBootloaderLegacy,
    BootloaderAttr,
    BootloaderAttrLegacy,
    ReadFlash { addr: u32, nbyte: u32 },
    WriteFlash { addr: u32, data: Vec<u8> },
    EraseFlash,
    VerifySignature { signature: [u8; SIGNATURE_SIZE] },
    GetPublicKey,
    Reset,
    ResetBootloader,
}

impl Request {
    /// Opcode carried in this request's frame prelude.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Open { .. } => Opcode::Open,
            Request::Close { .. } => Opcode::Close,
            Request::Read { .. } => Opcode::Read,
            Request::Write { .. } => Opcode::Write,
            Request::Lseek { .. } => Opcode::Lseek,
            Request::Ioctl { .. } => Opcode::Ioctl,
            Request::Stat { .. } => Opcode::Stat,
            Request::Fstat { .. } => Opcode::Fstat,
            Request::Mkdir { .. } => Opcode::Mkdir,
            Request::Rmdir { .. } => Opcode::Rmdir,
            Request::Unlink { .. } => Opcode::Unlink,
            Request::Rename { .. } => Opcode::Rename,
            Request::Opendir { .. } => Opcode::Opendir,
            Request::Readdir { .. } => Opcode::Readdir,
            Request::Closedir { .. } => Opcode::Closedir,
            Request::Telldir { .. } => Opcode::Telldir,
            Request::Seekdir { .. } => Opcode::Seekdir,
            Request::Rewinddir { .. } => Opcode::Rewinddir,
            Request::GetTime => Opcode::GetTime,
            Request::SetTime { .. } => Opcode::SetTime,
            Request::Exec { .. } => Opcode::Exec,
            Request::Mkfs { .. } => Opcode::Mkfs,
            Request::GetSysInfo => Opcode::GetSysInfo,
            Request::IsBootloader => Opcode::IsBootloader,
            Request::IsBootloaderLegacy => Opcode::IsBootloaderLegacy,
            Request::BootloaderAttr => Opcode::BootloaderAttr,
            Request::BootloaderAttrLegacy => Opcode::BootloaderAttrLegacy,
            Request::ReadFlash { .. } => Opcode::ReadFlash,
            Request::WriteFlash { .. } => Opcode::WriteFlash,
            Request::EraseFlash => Opcode::EraseFlash,
            Request::VerifySignature { .. } => Opcode::VerifySignature,
            Request::GetPublicKey => Opcode::GetPublicKey,
            Request::Reset => Opcode::Reset,
            Request::ResetBootloader => Opcode::ResetBootloader,
        }
    }

    /// Encode the request into its wire frame.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut payload = Vec::new();
        match self {
            Request::Open { path, flags, mode } => {
                put_string(&mut payload, path)?;
                payload.extend_from_slice(&flags.to_le_bytes());
                payload.extend_from_slice(&mode.to_le_bytes());
            }
            Request::Close { fd } | Request::Fstat { fd } => {
                payload.extend_from_slice(&fd.to_le_bytes());
            }
            Request::Read { fd, nbyte } => {
                payload.extend_from_slice(&fd.to_le_bytes());
                payload.extend_from_slice(&nbyte.to_le_bytes());
            }
            Request::Write { fd, data } => {
                payload.extend_from_slice(&fd.to_le_bytes());
                put_blob(&mut payload, data)?;
            }
            Request::Lseek { fd, offset, whence } => {
                payload.extend_from_slice(&fd.to_le_bytes());
                payload.extend_from_slice(&offset.to_le_bytes());
                payload.push(*whence);
            }
            Request::Ioctl { fd, request, arg } => {
                payload.extend_from_slice(&fd.to_le_bytes());
                payload.extend_from_slice(&request.to_le_bytes());
                put_blob(&mut payload, arg)?;
            }
            Request::Stat { path }
            | Request::Rmdir { path }
            | Request::Unlink { path }
            | Request::Opendir { path }
            | Request::Exec { path }
            | Request::Mkfs { path } => {
                put_string(&mut payload, path)?;
            }
            Request::Mkdir { path, mode } => {
                put_string(&mut payload, path)?;
                payload.extend_from_slice(&mode.to_le_bytes());
            }
            Request::Rename { old, new } => {
                put_string(&mut payload, old)?;
                put_string(&mut payload, new)?;
            }
            Request::Readdir { dirp }
            | Request::Closedir { dirp }
            | Request::Telldir { dirp }
            | Request::Rewinddir { dirp } => {
                payload.extend_from_slice(&dirp.to_le_bytes());
            }
            Request::Seekdir { dirp, location } => {
                payload.extend_from_slice(&dirp.to_le_bytes());
                payload.extend_from_slice(&location.to_le_bytes());
            }
            Request::SetTime { time } => time.encode_into(&mut payload),
            Request::ReadFlash { addr, nbyte } => {
                payload.extend_from_slice(&addr.to_le_bytes());
                payload.extend_from_slice(&nbyte.to_le_bytes());
            }
            Request::WriteFlash { addr, data } => {
                payload.extend_from_slice(&addr.to_le_bytes());
                put_blob(&mut payload, data)?;
            }
            Request::VerifySignature { signature } => {
                payload.extend_from_slice(signature);
            }
            Request::GetTime
            | Request::GetSysInfo
            | Request::IsBootloader
            | Request::IsBootloaderLegacy
            | Request::BootloaderAttr
            | Request::BootloaderAttrLegacy
            | Request::EraseFlash
            | Request::GetPublicKey
            | Request::Reset
            | Request::ResetBootloader => {}
        }
        Ok(encode_frame(self.opcode(), &payload))
    }

    /// Decode a request from a complete wire frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (opcode, payload) = decode_frame(bytes)?;
        let mut cursor = Cursor::new(payload);
        let request = match opcode {
            Opcode::Open => Request::Open {
                path: cursor.read_string()?,
                flags: cursor.read_u32()?,
                mode: cursor.read_u32()?,
            },
            Opcode::Close => Request::Close {
                fd: cursor.read_i32()?,
            },
            Opcode::Read => Request::Read {
                fd: cursor.read_i32()?,
                nbyte: cursor.read_u32()?,
            },
            Opcode::Write => Request::Write {
                fd: cursor.read_i32()?,
                data: cursor.read_blob()?,
            },
            Opcode::Lseek => Request::Lseek {
                fd: cursor.read_i32()?,
                offset: cursor.read_i32()?,
                whence: cursor.read_u8()?,
            },
            Opcode::Ioctl => Request::Ioctl {
                fd: cursor.read_i32()?,
                request: cursor.read_u32()?,
                arg: cursor.read_blob()?,
            },
            Opcode::Stat => Request::Stat {
                path: cursor.read_string()?,
            },
            Opcode::Fstat => Request::Fstat {
                fd: cursor.read_i32()?,
            },
            Opcode::Mkdir => Request::Mkdir {
                path: cursor.read_string()?,
                mode: cursor.read_u32()?,
            },
            Opcode::Rmdir => Request::Rmdir {
                path: cursor.read_string()?,
            },
            Opcode::Unlink => Request::Unlink {
                path: cursor.read_string()?,
            },
            Opcode::Rename => Request::Rename {
                old: cursor.read_string()?,
                new: cursor.read_string()?,
            },
            Opcode::Opendir => Request::Opendir {
                path: cursor.read_string()?,
            },
            Opcode::Readdir => Request::Readdir {
                dirp: cursor.read_u32()?,
            },
            Opcode::Closedir => Request::Closedir {
                dirp: cursor.read_u32()?,
            },
            Opcode::Telldir => Request::Telldir {
                dirp: cursor.read_u32()?,
            },
            Opcode::Seekdir => Request::Seekdir {
                dirp: cursor.read_u32()?,
                location: cursor.read_u32()?,
            },
            Opcode::Rewinddir => Request::Rewinddir {
                dirp: cursor.read_u32()?,
            },
            Opcode::GetTime => Request::GetTime,
            Opcode::SetTime => Request::SetTime {
                time: LinkTime::decode(&mut cursor)?,
            },
            Opcode::Exec => Request::Exec {
                path: cursor.read_string()?,
            },
            Opcode::Mkfs => Request::Mkfs {
                path: cursor.read_string()?,
            },
            Opcode::GetSysInfo => Request::GetSysInfo,
            Opcode::IsBootloader => Request::IsBootloader,
            Opcode::IsBootloaderLegacy => Request::IsBootloaderLegacy,
            Opcode::BootloaderAttr => Request::BootloaderAttr,
            Opcode::BootloaderAttrLegacy => Request::BootloaderAttrLegacy,
            Opcode::ReadFlash => Request::ReadFlash {
                addr: cursor.read_u32()?,
                nbyte: cursor.read_u32()?,
            },
            Opcode::WriteFlash => Request::WriteFlash {
                addr: cursor.read_u32()?,
                data: cursor.read_blob()?,
            },
            Opcode::EraseFlash => Request::EraseFlash,
            Opcode::VerifySignature => {
                let mut signature = [0u8; SIGNATURE_SIZE];
                cursor.read_exact(&mut signature)?;
                Request::VerifySignature { signature }
            }
            Opcode::GetPublicKey => Request::GetPublicKey,
            Opcode::Reset => Request::Reset,
            Opcode::ResetBootloader => Request::ResetBootloader,
        };
        Ok(request)
    }
}

/// A response frame sent from the device to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Response {
    /// Bare result word; used by every opcode without a typed body.
    Status { result: i32 },
    Read { result: i32, data: Vec<u8> },
    Ioctl { result: i32, arg: Vec<u8> },
    Stat { result: i32, stat: FileStat },
    Opendir { result: i32, dirp: u32 },
    Readdir { result: i32, entry: Option<String> },
    Telldir { result: i32, location: u32 },
    Time { result: i32, time: LinkTime },
    SysInfo { result: i32, info: SysInfo },
    Probe { result: i32, transport_version: u16 },
    BootloaderAttrs { result: i32, attrs: BootloaderAttrs },
    ReadFlash { result: i32, data: Vec<u8> },
    PublicKey { result: i32, key: [u8; PUBLIC_KEY_SIZE] },
}

impl Response {
    /// Result word carried by any response variant.
    #[must_use]
    pub fn result(&self) -> i32 {
        match self {
            Response::Status { result }
            | Response::Read { result, .. }
            | Response::Ioctl { result, .. }
            | Response::Stat { result, .. }
            | Response::Opendir { result, .. }
            | Response::Readdir { result, .. }
            | Response::Telldir { result, .. }
            | Response::Time { result, .. }
            | Response::SysInfo { result, .. }
            | Response::Probe { result, .. }
            | Response::BootloaderAttrs { result, .. }
            | Response::ReadFlash { result, .. }
            | Response::PublicKey { result, .. } => *result,
        }
    }

    /// Encode the response into a wire frame echoing `opcode`.
    pub fn encode(&self, opcode: Opcode) -> Result<Vec<u8>, WireError> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&self.result().to_le_bytes());
        match self {
            Response::Status { .. } => {}
            Response::Read { data, .. } | Response::ReadFlash { data, .. } => {
                put_blob(&mut payload, data)?;
            }
            Response::Ioctl { arg, .. } => put_blob(&mut payload, arg)?,
            Response::Stat { stat, .. } => stat.encode_into(&mut payload),
            Response::Opendir { dirp, .. } => payload.extend_from_slice(&dirp.to_le_bytes()),
            Response::Readdir { entry, .. } => match entry {
                Some(name) => {
                    payload.push(1);
                    put_string(&mut payload, name)?;
                }
                None => payload.push(0),
            },
            Response::Telldir { location, .. } => {
                payload.extend_from_slice(&location.to_le_bytes());
            }
            Response::Time { time, .. } => time.encode_into(&mut payload),
            Response::SysInfo { info, .. } => info.encode_into(&mut payload),
            Response::Probe {
                transport_version, ..
            } => payload.extend_from_slice(&transport_version.to_le_bytes()),
            Response::BootloaderAttrs { attrs, .. } => attrs.encode_into(&mut payload),
            Response::PublicKey { key, .. } => payload.extend_from_slice(key),
        }
        Ok(encode_frame(opcode, &payload))
    }

    /// Decode the response to a request carrying `expected` from a complete
    /// wire frame. An opcode-echo mismatch is a protocol error.
    pub fn decode(expected: Opcode, bytes: &[u8]) -> Result<Self, WireError> {
        let (opcode, payload) = decode_frame(bytes)?;
        if opcode != expected {
            return Err(WireError::UnknownOpcode(opcode as u8));
        }
        let mut cursor = Cursor::new(payload);
        let result = cursor.read_i32()?;
        if result < 0 {
            // error replies carry no body regardless of opcode
            return Ok(Response::Status { result });
        }
        let response = match opcode {
            Opcode::Read => Response::Read {
                result,
                data: cursor.read_blob()?,
            },
            Opcode::Ioctl => Response::Ioctl {
                result,
                arg: cursor.read_blob()?,
            },
            Opcode::Stat | Opcode::Fstat => Response::Stat {
                result,
                stat: FileStat::decode(&mut cursor)?,
            },
            Opcode::Opendir => Response::Opendir {
                result,
                dirp: cursor.read_u32()?,
            },
            Opcode::Readdir => {
                let entry = if cursor.read_u8()? != 0 {
                    Some(cursor.read_string()?)
                } else {
                    None
                };
                Response::Readdir { result, entry }
            }
            Opcode::Telldir => Response::Telldir {
                result,
                location: cursor.read_u32()?,
            },
            Opcode::GetTime => Response::Time {
                result,
                time: LinkTime::decode(&mut cursor)?,
            },
            Opcode::GetSysInfo => Response::SysInfo {
                result,
                info: SysInfo::decode(&mut cursor)?,
            },
            Opcode::IsBootloader | Opcode::IsBootloaderLegacy => Response::Probe {
                result,
                transport_version: cursor.read_u16()?,
            },
            Opcode::BootloaderAttr | Opcode::BootloaderAttrLegacy => Response::BootloaderAttrs {
                result,
                attrs: BootloaderAttrs::decode(&mut cursor)?,
            },
            Opcode::ReadFlash => Response::ReadFlash {
                result,
                data: cursor.read_blob()?,
            },
            Opcode::GetPublicKey => {
                let mut key = [0u8; PUBLIC_KEY_SIZE];
                cursor.read_exact(&mut key)?;
                Response::PublicKey { result, key }
            }
            _ => Response::Status { result },
        };
        Ok(response)
    }
}
