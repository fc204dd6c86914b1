// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: In-process mock driver and device for link integration tests.
// Author: Lukas Bower

//! A mock device that speaks the real link wire protocol.
//!
//! The mock decodes genuine request frames and produces genuine response
//! frames, so everything from the retry discipline to the appfs page
//! arithmetic is exercised against real bytes. Tests configure a
//! [`MockDevice`] per emulated unit, register it with a [`MockDriver`]
//! under a driver path, and inspect the device state afterwards.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use heliolink::driver::{DeviceDriver, DevicePipe};
use heliolink::wire::{
    errno, mode, open_flags, requests, whence, AppfsCreateAttr, AppfsFileHeader, BootloaderAttrs,
    FileStat, FlashPageWrite, LinkTime, Opcode, OsFlashInfo, Request, Response, SysInfo, TaskAttr,
    PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE, TOKEN_SIZE,
};

/// How the mock answers the classification probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockKind {
    Os,
    Bootloader,
}

#[derive(Debug, Clone)]
struct OpenFile {
    path: String,
    pos: usize,
}

#[derive(Debug, Clone)]
struct DirStream {
    entries: Vec<String>,
    pos: usize,
}

/// One emulated device behind a [`MockDriver`] path.
pub struct MockDevice {
    pub kind: MockKind,
    pub sys_info: SysInfo,
    pub bootloader_attrs: BootloaderAttrs,
    pub transport_version: u16,
    pub alive: bool,

    // posix filesystem: path -> content, plus an explicit directory set
    pub files: BTreeMap<String, Vec<u8>>,
    pub file_modes: BTreeMap<String, u32>,
    pub dirs: Vec<String>,
    open_files: BTreeMap<i32, OpenFile>,
    open_dirs: BTreeMap<u32, DirStream>,
    next_fd: i32,
    next_dirp: u32,
    pub mkdir_calls: Vec<(String, u32)>,
    pub exec_calls: Vec<String>,
    pub mkfs_calls: Vec<String>,
    pub time: LinkTime,

    // appfs install endpoint
    pub appfs_pages: Vec<(u32, u32, u32)>, // (request, loc, nbyte)
    pub appfs_page_payloads: Vec<Vec<u8>>,
    pub appfs_signature_required: Option<bool>, // None: opcode unsupported
    pub appfs_verify_calls: Vec<[u8; SIGNATURE_SIZE]>,
    appfs_stream_path: Option<String>,

    // bootloader flash
    pub flash: Vec<u8>,
    pub flash_base: u32,
    pub erase_count: u32,
    pub erase_poll_failures: u32,
    pending_poll_failures: u32,
    pub signed_target: bool,
    pub bootloader_verify_calls: Vec<[u8; SIGNATURE_SIZE]>,

    // OS flash device node
    pub os_flash_node: String,
    pub os_flash_region: OsFlashInfo,
    pub os_flash: Vec<u8>,
    pub os_flash_page_size: u32,
    pub os_flash_signature_required: bool,
    pub os_flash_erases: Vec<u32>,
    pub os_flash_writes: Vec<(u32, u32)>,
    pub os_flash_verify_calls: Vec<[u8; SIGNATURE_SIZE]>,

    // /dev/sys extras
    pub tasks: Vec<TaskAttr>,
    pub sys_id: String,
    pub secret_key: [u8; SECRET_KEY_SIZE],
    pub authenticated: bool,
    pub kill_calls: Vec<(u32, u32)>,

    // /dev/auth
    pub auth_key: [u8; TOKEN_SIZE],
    pub auth_fill: u8,
    pub tamper_auth_nonce: bool,
    pub tamper_auth_proof: bool,
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    last_auth_token: [u8; TOKEN_SIZE],

    // protocol-error injection: answer this many requests with a mis-framed
    // reply before behaving again
    pub protocol_error_budget: u32,
}

impl MockDevice {
    pub fn os(name: &str, serial: [u32; 4]) -> Self {
        let mut sys_info = SysInfo::zeroed();
        sys_info.name = heliolink::wire::make_fixed_str(name).expect("name fits");
        sys_info.kernel_version = heliolink::wire::make_fixed_str("1.4.0").expect("fits");
        sys_info.sys_version = heliolink::wire::make_fixed_str("0.9.2").expect("fits");
        sys_info.arch = heliolink::wire::make_fixed_str("armv7m").expect("fits");
        sys_info.cpu_freq = 120_000_000;
        sys_info.signature = 0x184;
        sys_info.hardware_id = 0x4100_0001;
        sys_info.serial = serial;

        let mut device = Self::blank(MockKind::Os);
        device.sys_info = sys_info;
        device
            .dirs
            .extend(["/", "/app", "/app/flash", "/app/ram", "/dev", "/home"].map(String::from));
        device
    }

    pub fn bootloader(version: u16, hardware_id: u32, serial: [u32; 4]) -> Self {
        let mut device = Self::blank(MockKind::Bootloader);
        device.bootloader_attrs = BootloaderAttrs {
            version,
            start_address: 0x4000_0000,
            hardware_id,
            serialno: serial,
        };
        device.flash_base = 0x4000_0000;
        device.flash = vec![0xFF; 256 * 1024];
        device
    }

    fn blank(kind: MockKind) -> Self {
        Self {
            kind,
            sys_info: SysInfo::zeroed(),
            bootloader_attrs: BootloaderAttrs::default(),
            transport_version: 0x0110,
            alive: true,
            files: BTreeMap::new(),
            file_modes: BTreeMap::new(),
            dirs: Vec::new(),
            open_files: BTreeMap::new(),
            open_dirs: BTreeMap::new(),
            next_fd: 3,
            next_dirp: 1,
            mkdir_calls: Vec::new(),
            exec_calls: Vec::new(),
            mkfs_calls: Vec::new(),
            time: LinkTime::default(),
            appfs_pages: Vec::new(),
            appfs_page_payloads: Vec::new(),
            appfs_signature_required: Some(false),
            appfs_verify_calls: Vec::new(),
            appfs_stream_path: None,
            flash: Vec::new(),
            flash_base: 0,
            erase_count: 0,
            erase_poll_failures: 0,
            pending_poll_failures: 0,
            signed_target: false,
            bootloader_verify_calls: Vec::new(),
            os_flash_node: "/dev/drive0".to_string(),
            os_flash_region: OsFlashInfo {
                start: 0x0800_0000,
                size: 128 * 1024,
            },
            os_flash: vec![0xFF; 128 * 1024],
            os_flash_page_size: 2048,
            os_flash_signature_required: false,
            os_flash_erases: Vec::new(),
            os_flash_writes: Vec::new(),
            os_flash_verify_calls: Vec::new(),
            tasks: Vec::new(),
            sys_id: "io.helio.dev".to_string(),
            secret_key: [0x42; SECRET_KEY_SIZE],
            authenticated: false,
            kill_calls: Vec::new(),
            auth_key: [0; TOKEN_SIZE],
            auth_fill: 0xA5,
            tamper_auth_nonce: false,
            tamper_auth_proof: false,
            public_key: [0; PUBLIC_KEY_SIZE],
            last_auth_token: [0; TOKEN_SIZE],
            protocol_error_budget: 0,
        }
    }

    pub fn add_file(&mut self, path: &str, content: &[u8]) {
        self.files.insert(path.to_string(), content.to_vec());
    }

    pub fn add_dir(&mut self, path: &str) {
        self.dirs.push(path.to_string());
    }

    /// Written flash relative to the bootloader base.
    pub fn flash_slice(&self, len: usize) -> &[u8] {
        &self.flash[..len]
    }

    /// Descriptors and directory streams still open on the device.
    pub fn open_handle_count(&self) -> usize {
        self.open_files.len() + self.open_dirs.len()
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        if self.protocol_error_budget > 0 {
            self.protocol_error_budget -= 1;
            // a well-formed frame for the wrong opcode: an echo mismatch
            let reply = Response::Status { result: 0 }
                .encode(Opcode::Rewinddir)
                .expect("encode mock garbage");
            return Some(reply);
        }

        let request = match Request::decode(frame) {
            Ok(request) => request,
            Err(_) => {
                return Some(
                    Response::Status {
                        result: -errno::EINVAL,
                    }
                    .encode(Opcode::Reset)
                    .expect("encode decode-failure reply"),
                )
            }
        };
        let opcode = request.opcode();

        if matches!(request, Request::Reset | Request::ResetBootloader) {
            // the peer vanishes mid-request
            self.alive = false;
            return None;
        }

        let response = self.dispatch(request);
        Some(response.encode(opcode).expect("encode mock reply"))
    }

    fn dispatch(&mut self, request: Request) -> Response {
        match request {
            Request::IsBootloader | Request::IsBootloaderLegacy => Response::Probe {
                result: if self.kind == MockKind::Bootloader { 1 } else { 0 },
                transport_version: self.transport_version,
            },
            Request::GetSysInfo => Response::SysInfo {
                result: 0,
                info: self.sys_info.clone(),
            },
            Request::BootloaderAttr | Request::BootloaderAttrLegacy => {
                if self.pending_poll_failures > 0 {
                    self.pending_poll_failures -= 1;
                    Response::Status {
                        result: -errno::EIO,
                    }
                } else {
                    Response::BootloaderAttrs {
                        result: 0,
                        attrs: self.bootloader_attrs,
                    }
                }
            }
            Request::EraseFlash => {
                self.erase_count += 1;
                self.flash.fill(0xFF);
                self.pending_poll_failures = self.erase_poll_failures;
                Response::Status { result: 0 }
            }
            Request::WriteFlash { addr, data } => {
                let offset = (addr - self.flash_base) as usize;
                if offset + data.len() > self.flash.len() {
                    return Response::Status {
                        result: -errno::EINVAL,
                    };
                }
                self.flash[offset..offset + data.len()].copy_from_slice(&data);
                Response::Status {
                    result: data.len() as i32,
                }
            }
            Request::ReadFlash { addr, nbyte } => {
                if self.signed_target {
                    return Response::Status {
                        result: -errno::EIO,
                    };
                }
                let offset = (addr - self.flash_base) as usize;
                let end = (offset + nbyte as usize).min(self.flash.len());
                Response::ReadFlash {
                    result: (end - offset) as i32,
                    data: self.flash[offset..end].to_vec(),
                }
            }
            Request::VerifySignature { signature } => {
                self.bootloader_verify_calls.push(signature);
                Response::Status {
                    result: if self.signed_target { 1 } else { 0 },
                }
            }
            Request::GetPublicKey => Response::PublicKey {
                result: 0,
                key: self.public_key,
            },
            Request::Open { path, flags, .. } => self.do_open(&path, flags),
            Request::Close { fd } => {
                if self.open_files.remove(&fd).is_some() {
                    Response::Status { result: 0 }
                } else {
                    Response::Status {
                        result: -errno::EBADF,
                    }
                }
            }
            Request::Read { fd, nbyte } => self.do_read(fd, nbyte),
            Request::Write { fd, data } => self.do_write(fd, &data),
            Request::Lseek { fd, offset, whence: anchor } => self.do_lseek(fd, offset, anchor),
            Request::Ioctl { fd, request, arg } => self.do_ioctl(fd, request, &arg),
            Request::Stat { path } => self.do_stat(&path),
            Request::Fstat { fd } => match self.open_files.get(&fd) {
                Some(open) => {
                    let path = open.path.clone();
                    self.do_stat(&path)
                }
                None => Response::Status {
                    result: -errno::EBADF,
                },
            },
            Request::Mkdir { path, mode } => {
                self.mkdir_calls.push((path.clone(), mode));
                if self.dirs.iter().any(|dir| dir == &path) {
                    Response::Status {
                        result: -errno::EEXIST,
                    }
                } else {
                    self.dirs.push(path);
                    Response::Status { result: 0 }
                }
            }
            Request::Rmdir { path } => self.do_rmdir(&path),
            Request::Unlink { path } => {
                if self.files.remove(&path).is_some() {
                    Response::Status { result: 0 }
                } else {
                    Response::Status {
                        result: -errno::ENOENT,
                    }
                }
            }
            Request::Rename { old, new } => match self.files.remove(&old) {
                Some(content) => {
                    self.files.insert(new, content);
                    Response::Status { result: 0 }
                }
                None => Response::Status {
                    result: -errno::ENOENT,
                },
            },
            Request::Opendir { path } => self.do_opendir(&path),
            Request::Readdir { dirp } => match self.open_dirs.get_mut(&dirp) {
                Some(stream) => {
                    let entry = stream.entries.get(stream.pos).cloned();
                    if entry.is_some() {
                        stream.pos += 1;
                    }
                    Response::Readdir { result: 0, entry }
                }
                None => Response::Status {
                    result: -errno::EBADF,
                },
            },
            Request::Closedir { dirp } => {
                if self.open_dirs.remove(&dirp).is_some() {
                    Response::Status { result: 0 }
                } else {
                    Response::Status {
                        result: -errno::EBADF,
                    }
                }
            }
            Request::Telldir { dirp } => match self.open_dirs.get(&dirp) {
                Some(stream) => Response::Telldir {
                    result: 0,
                    location: stream.pos as u32,
                },
                None => Response::Status {
                    result: -errno::EBADF,
                },
            },
            Request::Seekdir { dirp, location } => match self.open_dirs.get_mut(&dirp) {
                Some(stream) => {
                    stream.pos = location as usize;
                    Response::Status { result: 0 }
                }
                None => Response::Status {
                    result: -errno::EBADF,
                },
            },
            Request::Rewinddir { dirp } => match self.open_dirs.get_mut(&dirp) {
                Some(stream) => {
                    stream.pos = 0;
                    Response::Status { result: 0 }
                }
                None => Response::Status {
                    result: -errno::EBADF,
                },
            },
            Request::GetTime => Response::Time {
                result: 0,
                time: self.time,
            },
            Request::SetTime { time } => {
                self.time = time;
                Response::Status { result: 0 }
            }
            Request::Exec { path } => {
                self.exec_calls.push(path);
                Response::Status { result: 0 }
            }
            Request::Mkfs { path } => {
                self.mkfs_calls.push(path);
                Response::Status { result: 0 }
            }
            Request::Reset | Request::ResetBootloader => unreachable!("handled in handle_frame"),
        }
    }

    fn do_open(&mut self, path: &str, flags: u32) -> Response {
        let special = path == "/dev/sys"
            || path == "/dev/auth"
            || path == "/app/.install"
            || path == self.os_flash_node;
        if !special {
            let exists = self.files.contains_key(path);
            if !exists && flags & open_flags::O_CREAT == 0 {
                return Response::Status {
                    result: -errno::ENOENT,
                };
            }
            if exists && flags & open_flags::O_EXCL != 0 {
                return Response::Status {
                    result: -errno::EEXIST,
                };
            }
            if !exists {
                self.files.insert(path.to_string(), Vec::new());
            }
            if flags & open_flags::O_TRUNC != 0 {
                self.files.insert(path.to_string(), Vec::new());
            }
        }
        let fd = self.next_fd;
        self.next_fd += 1;
        self.open_files.insert(
            fd,
            OpenFile {
                path: path.to_string(),
                pos: 0,
            },
        );
        Response::Status { result: fd }
    }

    fn do_read(&mut self, fd: i32, nbyte: u32) -> Response {
        let Some(open) = self.open_files.get_mut(&fd) else {
            return Response::Status {
                result: -errno::EBADF,
            };
        };
        let Some(content) = self.files.get(&open.path) else {
            // device nodes have no byte stream
            return Response::Read {
                result: 0,
                data: Vec::new(),
            };
        };
        let start = open.pos.min(content.len());
        let end = (start + nbyte as usize).min(content.len());
        open.pos = end;
        Response::Read {
            result: (end - start) as i32,
            data: content[start..end].to_vec(),
        }
    }

    fn do_write(&mut self, fd: i32, data: &[u8]) -> Response {
        let Some(open) = self.open_files.get_mut(&fd) else {
            return Response::Status {
                result: -errno::EBADF,
            };
        };
        let path = open.path.clone();
        let pos = open.pos;
        let Some(content) = self.files.get_mut(&path) else {
            return Response::Status {
                result: data.len() as i32,
            };
        };
        if content.len() < pos + data.len() {
            content.resize(pos + data.len(), 0);
        }
        content[pos..pos + data.len()].copy_from_slice(data);
        if let Some(open) = self.open_files.get_mut(&fd) {
            open.pos += data.len();
        }
        Response::Status {
            result: data.len() as i32,
        }
    }

    fn do_lseek(&mut self, fd: i32, offset: i32, anchor: u8) -> Response {
        let size = self
            .open_files
            .get(&fd)
            .and_then(|open| self.files.get(&open.path))
            .map_or(0, Vec::len);
        let Some(open) = self.open_files.get_mut(&fd) else {
            return Response::Status {
                result: -errno::EBADF,
            };
        };
        let base = match anchor {
            whence::SEEK_SET => 0i64,
            whence::SEEK_CUR => open.pos as i64,
            whence::SEEK_END => size as i64,
            _ => {
                return Response::Status {
                    result: -errno::EINVAL,
                }
            }
        };
        let next = base + offset as i64;
        if next < 0 {
            return Response::Status {
                result: -errno::EINVAL,
            };
        }
        open.pos = next as usize;
        Response::Status {
            result: next as i32,
        }
    }

    fn do_stat(&mut self, path: &str) -> Response {
        if self.dirs.iter().any(|dir| dir == path) {
            return Response::Stat {
                result: 0,
                stat: FileStat {
                    mode: mode::S_IFDIR | 0o755,
                    size: 0,
                    mtime: 0,
                },
            };
        }
        match self.files.get(path) {
            Some(content) => Response::Stat {
                result: 0,
                stat: FileStat {
                    mode: self
                        .file_modes
                        .get(path)
                        .copied()
                        .unwrap_or(mode::S_IFREG | 0o666),
                    size: content.len() as u32,
                    mtime: 0,
                },
            },
            None => Response::Status {
                result: -errno::ENOENT,
            },
        }
    }

    fn do_rmdir(&mut self, path: &str) -> Response {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let has_children = self.files.keys().any(|file| file.starts_with(&prefix))
            || self
                .dirs
                .iter()
                .any(|dir| dir.starts_with(&prefix) && dir != path);
        if has_children {
            return Response::Status {
                result: -errno::EINVAL,
            };
        }
        match self.dirs.iter().position(|dir| dir == path) {
            Some(index) => {
                self.dirs.remove(index);
                Response::Status { result: 0 }
            }
            None => Response::Status {
                result: -errno::ENOENT,
            },
        }
    }

    fn do_opendir(&mut self, path: &str) -> Response {
        if !self.dirs.iter().any(|dir| dir == path) {
            return Response::Status {
                result: -errno::ENOENT,
            };
        }
        let normalized = path.trim_end_matches('/');
        let prefix = format!("{normalized}/");
        let mut entries = vec![".".to_string(), "..".to_string()];
        for dir in &self.dirs {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(rest.to_string());
                }
            }
        }
        for file in self.files.keys() {
            if let Some(rest) = file.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(rest.to_string());
                }
            }
        }
        let dirp = self.next_dirp;
        self.next_dirp += 1;
        self.open_dirs.insert(dirp, DirStream { entries, pos: 0 });
        Response::Opendir { result: 0, dirp }
    }

    fn do_ioctl(&mut self, fd: i32, request: u32, arg: &[u8]) -> Response {
        let Some(open) = self.open_files.get(&fd) else {
            return Response::Status {
                result: -errno::EBADF,
            };
        };
        let node = open.path.clone();
        match (node.as_str(), request) {
            ("/app/.install", requests::APPFS_CREATE | requests::APPFS_INSTALL) => {
                self.do_appfs_page(request, arg)
            }
            ("/app/.install", requests::APPFS_IS_SIGNATURE_REQUIRED) => {
                match self.appfs_signature_required {
                    Some(required) => Response::Ioctl {
                        result: i32::from(required),
                        arg: Vec::new(),
                    },
                    None => Response::Status {
                        result: -errno::EINVAL,
                    },
                }
            }
            ("/app/.install", requests::APPFS_VERIFY_SIGNATURE) => {
                let mut signature = [0u8; SIGNATURE_SIZE];
                if arg.len() != SIGNATURE_SIZE {
                    return Response::Status {
                        result: -errno::EINVAL,
                    };
                }
                signature.copy_from_slice(arg);
                self.appfs_verify_calls.push(signature);
                Response::Ioctl {
                    result: 0,
                    arg: Vec::new(),
                }
            }
            ("/dev/sys", requests::SYS_GET_INFO) => {
                let mut reply = Vec::new();
                self.sys_info.encode_into(&mut reply);
                Response::Ioctl {
                    result: 0,
                    arg: reply,
                }
            }
            ("/dev/sys", requests::SYS_GET_TASK) => {
                let Ok(attr) = TaskAttr::from_bytes(arg) else {
                    return Response::Status {
                        result: -errno::EINVAL,
                    };
                };
                match self.tasks.get(attr.tid as usize) {
                    Some(slot) => {
                        let mut slot = *slot;
                        slot.tid = attr.tid;
                        Response::Ioctl {
                            result: 1,
                            arg: slot.to_bytes(),
                        }
                    }
                    None => Response::Status {
                        result: -errno::ESRCH,
                    },
                }
            }
            ("/dev/sys", requests::SYS_KILL) => {
                if arg.len() != 8 {
                    return Response::Status {
                        result: -errno::EINVAL,
                    };
                }
                let pid = u32::from_le_bytes(arg[0..4].try_into().expect("length checked"));
                let signal = u32::from_le_bytes(arg[4..8].try_into().expect("length checked"));
                self.kill_calls.push((pid, signal));
                Response::Ioctl {
                    result: 0,
                    arg: Vec::new(),
                }
            }
            ("/dev/sys", requests::SYS_GET_ID) => {
                let mut reply = vec![0u8; arg.len().max(self.sys_id.len() + 1)];
                reply[..self.sys_id.len()].copy_from_slice(self.sys_id.as_bytes());
                Response::Ioctl {
                    result: 0,
                    arg: reply,
                }
            }
            ("/dev/sys", requests::SYS_GET_SECRET_KEY) => Response::Ioctl {
                result: 0,
                arg: self.secret_key.to_vec(),
            },
            ("/dev/sys", requests::SYS_IS_AUTHENTICATED) => Response::Ioctl {
                result: i32::from(self.authenticated),
                arg: Vec::new(),
            },
            ("/dev/auth", requests::AUTH_START) => {
                if arg.len() != TOKEN_SIZE {
                    return Response::Status {
                        result: -errno::EINVAL,
                    };
                }
                let mut token = [0u8; TOKEN_SIZE];
                token[..16].copy_from_slice(&arg[..16]);
                token[16..].fill(self.auth_fill);
                if self.tamper_auth_nonce {
                    token[0] ^= 0x80;
                }
                self.last_auth_token = token;
                Response::Ioctl {
                    result: 0,
                    arg: token.to_vec(),
                }
            }
            ("/dev/auth", requests::AUTH_FINISH) => {
                let mut hasher = Sha256::new();
                hasher.update(self.last_auth_token);
                hasher.update(self.auth_key);
                let mut proof: [u8; 32] = hasher.finalize().into();
                if self.tamper_auth_proof {
                    proof[31] ^= 0x01;
                }
                self.authenticated = true;
                Response::Ioctl {
                    result: 0,
                    arg: proof.to_vec(),
                }
            }
            ("/dev/auth", requests::AUTH_GET_PUBLIC_KEY) => Response::Ioctl {
                result: 0,
                arg: self.public_key.to_vec(),
            },
            (node, requests::FLASH_GET_OS_INFO) if node == self.os_flash_node => Response::Ioctl {
                result: 0,
                arg: self.os_flash_region.to_bytes(),
            },
            (node, requests::FLASH_IS_SIGNATURE_REQUIRED) if node == self.os_flash_node => {
                Response::Ioctl {
                    result: i32::from(self.os_flash_signature_required),
                    arg: Vec::new(),
                }
            }
            (node, requests::FLASH_ERASE_PAGE) if node == self.os_flash_node => {
                if arg.len() != 4 {
                    return Response::Status {
                        result: -errno::EINVAL,
                    };
                }
                let addr = u32::from_le_bytes(arg.try_into().expect("length checked"));
                self.os_flash_erases.push(addr);
                let page = self.os_flash_page_size;
                let offset = (addr - self.os_flash_region.start) / page * page;
                let start = offset as usize;
                let end = (start + page as usize).min(self.os_flash.len());
                self.os_flash[start..end].fill(0xFF);
                Response::Ioctl {
                    result: page as i32,
                    arg: Vec::new(),
                }
            }
            (node, requests::FLASH_WRITE_PAGE) if node == self.os_flash_node => {
                let Ok(page) = FlashPageWrite::from_bytes(arg) else {
                    return Response::Status {
                        result: -errno::EINVAL,
                    };
                };
                self.os_flash_writes.push((page.addr, page.nbyte));
                let offset = (page.addr - self.os_flash_region.start) as usize;
                let end = offset + page.nbyte as usize;
                if end > self.os_flash.len() {
                    return Response::Status {
                        result: -errno::EINVAL,
                    };
                }
                self.os_flash[offset..end].copy_from_slice(&page.buf[..page.nbyte as usize]);
                Response::Ioctl {
                    result: page.nbyte as i32,
                    arg: Vec::new(),
                }
            }
            (node, requests::FLASH_VERIFY_SIGNATURE) if node == self.os_flash_node => {
                let mut signature = [0u8; SIGNATURE_SIZE];
                if arg.len() != SIGNATURE_SIZE {
                    return Response::Status {
                        result: -errno::EINVAL,
                    };
                }
                signature.copy_from_slice(arg);
                self.os_flash_verify_calls.push(signature);
                Response::Ioctl {
                    result: 0,
                    arg: Vec::new(),
                }
            }
            _ => Response::Status {
                result: -errno::EINVAL,
            },
        }
    }

    /// Appfs page stream: pages are committed to a backing file as they
    /// arrive, the way erased flash fills in, so partially written streams
    /// are readable with 0xFF in the unwritten pages.
    fn do_appfs_page(&mut self, request: u32, arg: &[u8]) -> Response {
        let Ok(attr) = AppfsCreateAttr::decode(&mut heliolink::wire::Cursor::new(arg)) else {
            return Response::Status {
                result: -errno::EINVAL,
            };
        };
        self.appfs_pages.push((request, attr.loc, attr.nbyte));
        self.appfs_page_payloads
            .push(attr.buffer[..attr.nbyte as usize].to_vec());

        if attr.loc == 0 {
            let Ok(header) = AppfsFileHeader::from_bytes(&attr.buffer[..AppfsFileHeader::SIZE])
            else {
                return Response::Status {
                    result: -errno::EINVAL,
                };
            };
            let path = format!("/app/flash/{}", header.name_str());
            if request == requests::APPFS_CREATE && self.files.contains_key(&path) {
                return Response::Status {
                    result: -errno::EEXIST,
                };
            }
            self.files.insert(path.clone(), vec![0xFF; header.code_size as usize]);
            self.file_modes
                .insert(path.clone(), mode::S_IFREG | u32::from(header.mode));
            self.appfs_stream_path = Some(path);
        }

        if let Some(path) = &self.appfs_stream_path {
            if let Some(content) = self.files.get_mut(path) {
                let start = attr.loc as usize;
                let end = start + attr.nbyte as usize;
                if end <= content.len() {
                    content[start..end].copy_from_slice(&attr.buffer[..attr.nbyte as usize]);
                }
            }
        }

        // the driver rewrites loc in its reply; the client must not trust it
        let mut scribbled = attr.clone();
        scribbled.loc = 0xDEAD_BEEF;
        Response::Ioctl {
            result: attr.nbyte as i32,
            arg: scribbled.to_bytes(),
        }
    }
}

type SharedDevice = Rc<RefCell<MockDevice>>;

/// Pipe endpoint bound to one mock device.
pub struct MockPipe {
    device: SharedDevice,
    pending: Vec<u8>,
    rx: Vec<u8>,
    timeout: Duration,
}

impl MockPipe {
    fn new(device: SharedDevice) -> Self {
        Self {
            device,
            pending: Vec::new(),
            rx: Vec::new(),
            timeout: Duration::from_secs(1),
        }
    }
}

impl DevicePipe for MockPipe {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock pipe empty"));
        }
        let count = buf.len().min(self.rx.len());
        buf[..count].copy_from_slice(&self.rx[..count]);
        self.rx.drain(..count);
        Ok(count)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.device.borrow().alive {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        self.pending.extend_from_slice(buf);
        loop {
            if self.pending.len() < 4 {
                break;
            }
            let declared =
                u32::from_le_bytes(self.pending[..4].try_into().expect("length checked")) as usize;
            if self.pending.len() < declared {
                break;
            }
            let frame: Vec<u8> = self.pending.drain(..declared).collect();
            if let Some(reply) = self.device.borrow_mut().handle_frame(&frame) {
                self.rx.extend_from_slice(&reply);
            }
        }
        Ok(buf.len())
    }

    fn flush_input(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Duration {
        std::mem::replace(&mut self.timeout, timeout)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Driver serving a fixed set of mock devices by exact path.
pub struct MockDriver {
    devices: Vec<(String, SharedDevice)>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Register `device` under `path`; returns the shared handle for
    /// post-test inspection.
    pub fn register(&mut self, path: &str, device: MockDevice) -> SharedDevice {
        let shared = Rc::new(RefCell::new(device));
        self.devices.push((path.to_string(), shared.clone()));
        shared
    }

    pub fn single(path: &str, device: MockDevice) -> (Self, SharedDevice) {
        let mut driver = Self::new();
        let shared = driver.register(path, device);
        (driver, shared)
    }
}

impl DeviceDriver for MockDriver {
    type Pipe = MockPipe;

    fn scan(&mut self) -> Vec<String> {
        self.devices.iter().map(|(path, _)| path.clone()).collect()
    }

    fn open(&mut self, path: &str) -> io::Result<Self::Pipe> {
        for (candidate, device) in &self.devices {
            if candidate == path {
                if !device.borrow().alive {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "device gone"));
                }
                return Ok(MockPipe::new(device.clone()));
            }
        }
        Err(io::Error::new(io::ErrorKind::NotFound, "no such device"))
    }
}

/// A progress sink that records every update and key change.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub updates: Vec<(u32, u32)>,
    pub keys: Vec<String>,
    pub current_key: String,
    pub abort_after: Option<usize>,
}

impl heliolink::ProgressSink for RecordingProgress {
    fn update(&mut self, current: u32, total: u32) -> bool {
        self.updates.push((current, total));
        matches!(self.abort_after, Some(limit) if self.updates.len() >= limit)
    }

    fn set_key(&mut self, key: &str) {
        self.keys.push(key.to_string());
        self.current_key = key.to_string();
    }

    fn current_key(&self) -> &str {
        &self.current_key
    }
}
