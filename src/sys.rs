// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: System inspector over /dev/sys and serial number handling.
// Author: Lukas Bower

//! System identity and the `/dev/sys` inspector.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use heliolink_wire::{requests, SysInfo as WireSysInfo, SECRET_KEY_SIZE, SERIAL_WORD_COUNT, SYS_ID_LEN};

use crate::driver::DeviceDriver;
use crate::error::{LinkError, Result};
use crate::fs::{OpenMode, RemoteFile};
use crate::link::Link;

/// A device serial number: four 32-bit words, rendered most significant
/// word first as 32 hex digits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialNumber([u32; SERIAL_WORD_COUNT]);

impl SerialNumber {
    /// Wrap raw serial words.
    #[must_use]
    pub fn new(words: [u32; SERIAL_WORD_COUNT]) -> Self {
        Self(words)
    }

    /// Parse the canonical 32-hex-digit form; anything else yields the
    /// empty serial.
    #[must_use]
    pub fn from_string(text: &str) -> Self {
        let text = text.trim();
        if text.len() != SERIAL_WORD_COUNT * 8 {
            return Self::default();
        }
        let mut words = [0u32; SERIAL_WORD_COUNT];
        for (index, chunk) in (0..SERIAL_WORD_COUNT).zip(text.as_bytes().chunks(8)) {
            let Ok(chunk) = core::str::from_utf8(chunk) else {
                return Self::default();
            };
            let Ok(word) = u32::from_str_radix(chunk, 16) else {
                return Self::default();
            };
            // text is most significant word first; storage is the reverse
            words[SERIAL_WORD_COUNT - 1 - index] = word;
        }
        Self(words)
    }

    /// The raw serial words.
    #[must_use]
    pub fn words(&self) -> [u32; SERIAL_WORD_COUNT] {
        self.0
    }

    /// A serial number is valid when any word is nonzero.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.0.iter().any(|&word| word != 0)
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&heliolink_wire::serial_to_string(&self.0))
    }
}

impl Serialize for SerialNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SerialNumber {
    fn deserialize<E: Deserializer<'de>>(deserializer: E) -> core::result::Result<Self, E::Error> {
        let text = String::deserialize(deserializer)?;
        let serial = SerialNumber::from_string(&text);
        if !serial.is_valid() && !text.chars().all(|c| c == '0') {
            return Err(E::Error::custom("malformed serial number"));
        }
        Ok(serial)
    }
}

/// Host-facing snapshot of a device's system info record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Board name, or `"bootloader"` for bootloader connections.
    pub name: String,
    /// Device serial number.
    pub serial: SerialNumber,
    /// Hardware family id.
    pub hardware_id: u32,
    /// Core clock in Hz; zero marks the snapshot invalid.
    pub cpu_freq: u32,
    /// Application ABI signature.
    pub signature: u32,
    /// Kernel version string.
    pub kernel_version: String,
    /// Board support package version string.
    pub sys_version: String,
    /// CPU architecture tag.
    pub arch: String,
    /// System option flags.
    pub o_flags: u32,
}

impl SystemInfo {
    /// A snapshot is valid when the device reported a core clock.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cpu_freq != 0
    }
}

impl From<&WireSysInfo> for SystemInfo {
    fn from(info: &WireSysInfo) -> Self {
        Self {
            name: info.name_str().to_string(),
            serial: SerialNumber::new(info.serial),
            hardware_id: info.hardware_id,
            cpu_freq: info.cpu_freq,
            signature: info.signature,
            kernel_version: info.kernel_version_str().to_string(),
            sys_version: info.sys_version_str().to_string(),
            arch: info.arch_str().to_string(),
            o_flags: info.o_flags,
        }
    }
}

/// Inspector for the `/dev/sys` device node.
pub struct Sys<D: DeviceDriver> {
    file: RemoteFile<D>,
}

impl<D: DeviceDriver> Sys<D> {
    /// Open `/dev/sys` on the connected device.
    pub fn new(link: &Link<D>) -> Result<Self> {
        let file = RemoteFile::open(link, "/dev/sys", OpenMode::read_write())?;
        Ok(Self { file })
    }

    /// Fetch the system info record.
    pub fn get_info(&mut self) -> Result<SystemInfo> {
        let arg = vec![0u8; WireSysInfo::SIZE];
        let (_, reply) = self.file.ioctl(requests::SYS_GET_INFO, &arg)?;
        let mut cursor = heliolink_wire::Cursor::new(&reply);
        let info = WireSysInfo::decode(&mut cursor)
            .map_err(|error| LinkError::from_wire("sys-info", error))?;
        Ok(SystemInfo::from(&info))
    }

    /// Fetch the device serial number.
    pub fn get_serial_number(&mut self) -> Result<SerialNumber> {
        Ok(self.get_info()?.serial)
    }

    /// Fetch the project id string.
    pub fn get_id(&mut self) -> Result<String> {
        let arg = vec![0u8; SYS_ID_LEN];
        let (_, reply) = self.file.ioctl(requests::SYS_GET_ID, &arg)?;
        let end = reply.iter().position(|&b| b == 0).unwrap_or(reply.len());
        String::from_utf8(reply[..end].to_vec())
            .map_err(|_| LinkError::transport("sys-id", "non-utf8 id"))
    }

    /// Fetch the device secret key.
    pub fn get_secret_key(&mut self) -> Result<[u8; SECRET_KEY_SIZE]> {
        let arg = vec![0u8; SECRET_KEY_SIZE];
        let (_, reply) = self.file.ioctl(requests::SYS_GET_SECRET_KEY, &arg)?;
        let mut key = [0u8; SECRET_KEY_SIZE];
        let len = reply.len().min(SECRET_KEY_SIZE);
        key[..len].copy_from_slice(&reply[..len]);
        Ok(key)
    }

    /// Whether the current session holds root authentication.
    pub fn is_authenticated(&mut self) -> Result<bool> {
        let (result, _) = self.file.ioctl(requests::SYS_IS_AUTHENTICATED, &[])?;
        Ok(result > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_number_round_trips_through_text() {
        let serial = SerialNumber::new([0xdddd_0004, 0xcccc_0003, 0xbbbb_0002, 0xaaaa_0001]);
        let text = serial.to_string();
        assert_eq!(text, "AAAA0001BBBB0002CCCC0003DDDD0004");
        assert_eq!(SerialNumber::from_string(&text), serial);
    }

    #[test]
    fn malformed_serial_text_is_invalid() {
        assert!(!SerialNumber::from_string("not-a-serial").is_valid());
        assert!(!SerialNumber::from_string("").is_valid());
        assert!(!SerialNumber::from_string("1234").is_valid());
    }

    #[test]
    fn snapshot_validity_follows_cpu_clock() {
        let mut info = SystemInfo::default();
        assert!(!info.is_valid());
        info.cpu_freq = 96_000_000;
        assert!(info.is_valid());
    }

    #[test]
    fn snapshot_copies_wire_fields() {
        let mut wire = WireSysInfo::zeroed();
        wire.name = heliolink_wire::make_fixed_str("helio-dev").unwrap();
        wire.cpu_freq = 120_000_000;
        wire.hardware_id = 0x4100_0001;
        wire.serial = [4, 3, 2, 1];
        let snapshot = SystemInfo::from(&wire);
        assert_eq!(snapshot.name, "helio-dev");
        assert_eq!(snapshot.serial, SerialNumber::new([4, 3, 2, 1]));
        assert!(snapshot.is_valid());
    }
}
