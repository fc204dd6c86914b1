// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Remote file, directory, and filesystem proxies over the link RPC.
// Author: Lukas Bower

//! Remote filesystem access.
//!
//! Each proxy method is a single RPC. Remote files implement the standard
//! [`std::io::Read`]/[`Write`](std::io::Write)/[`Seek`](std::io::Seek)
//! traits so host code that works on local files works on remote ones.
//! Every descriptor and directory stream is owned by exactly one proxy and
//! released when it drops.

use std::io;
use std::io::{Read, Seek, SeekFrom, Write};

use heliolink_wire::{mode, open_flags, whence, FileStat};

use crate::driver::DeviceDriver;
use crate::error::{LinkError, Result};
use crate::link::Link;
use crate::transport::SharedTransport;

/// Open flags for remote files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode(u32);

impl OpenMode {
    /// Open for reading only.
    #[must_use]
    pub fn read_only() -> Self {
        Self(open_flags::O_RDONLY)
    }

    /// Open for writing only.
    #[must_use]
    pub fn write_only() -> Self {
        Self(open_flags::O_WRONLY)
    }

    /// Open for reading and writing.
    #[must_use]
    pub fn read_write() -> Self {
        Self(open_flags::O_RDWR)
    }

    /// Append on each write.
    #[must_use]
    pub fn append(mut self) -> Self {
        self.0 |= open_flags::O_APPEND;
        self
    }

    /// Create the file if it is missing.
    #[must_use]
    pub fn create(mut self) -> Self {
        self.0 |= open_flags::O_CREAT;
        self
    }

    /// Truncate to zero length on open.
    #[must_use]
    pub fn truncate(mut self) -> Self {
        self.0 |= open_flags::O_TRUNC;
        self
    }

    /// Fail if the file already exists.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.0 |= open_flags::O_EXCL;
        self
    }

    /// The raw flag word sent on the wire.
    #[must_use]
    pub fn o_flags(&self) -> u32 {
        self.0
    }
}

/// Permission bits for created files and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u32);

impl Permissions {
    /// Wrap raw permission bits.
    #[must_use]
    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw permission bits.
    #[must_use]
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self(0o666)
    }
}

/// Render a mode word the way `ls -l` does: one type character followed by
/// user, group, and other permission triplets.
#[must_use]
pub fn mode_string(mode_bits: u32) -> String {
    let type_char = match mode_bits & mode::S_IFMT {
        mode::S_IFDIR => 'd',
        mode::S_IFCHR => 'c',
        mode::S_IFBLK => 'b',
        mode::S_IFLNK => 'l',
        mode::S_IFREG => '-',
        _ => 'x',
    };
    let mut out = String::with_capacity(10);
    out.push(type_char);
    for shift in [6u32, 3, 0] {
        let triplet = (mode_bits >> shift) & 0o7;
        out.push(if triplet & 0o4 != 0 { 'r' } else { '-' });
        out.push(if triplet & 0o2 != 0 { 'w' } else { '-' });
        out.push(if triplet & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// An open remote file descriptor with scoped release.
pub struct RemoteFile<D: DeviceDriver> {
    transport: SharedTransport<D>,
    fd: i32,
    path: String,
}

impl<D: DeviceDriver> std::fmt::Debug for RemoteFile<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("fd", &self.fd)
            .field("path", &self.path)
            .finish()
    }
}

impl<D: DeviceDriver> RemoteFile<D> {
    /// Open the remote file at `path`.
    pub fn open(link: &Link<D>, path: &str, open_mode: OpenMode) -> Result<Self> {
        Self::open_with(link.transport(), path, open_mode, Permissions::default())
    }

    /// Open `path`, creating it first. With `overwrite` the file is
    /// truncated; without it an existing file makes the open fail.
    pub fn create(
        link: &Link<D>,
        path: &str,
        overwrite: bool,
        perms: Permissions,
    ) -> Result<Self> {
        let open_mode = if overwrite {
            OpenMode::read_write().create().truncate()
        } else {
            OpenMode::read_write().create().exclusive()
        };
        Self::open_with(link.transport(), path, open_mode, perms)
    }

    pub(crate) fn open_with(
        transport: SharedTransport<D>,
        path: &str,
        open_mode: OpenMode,
        perms: Permissions,
    ) -> Result<Self> {
        let fd = transport
            .borrow_mut()
            .posix_open(path, open_mode.o_flags(), perms.bits())?;
        Ok(Self {
            transport,
            fd,
            path: path.to_string(),
        })
    }

    /// The remote path this descriptor was opened with.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw remote descriptor.
    #[must_use]
    pub fn fileno(&self) -> i32 {
        self.fd
    }

    /// Stat the open descriptor.
    pub fn fstat(&mut self) -> Result<FileStat> {
        self.transport.borrow_mut().posix_fstat(self.fd)
    }

    /// Size of the file in bytes.
    pub fn size(&mut self) -> Result<u32> {
        Ok(self.fstat()?.size)
    }

    /// Issue an ioctl on the descriptor; returns the result word and the
    /// argument bytes as rewritten by the device.
    pub fn ioctl(&mut self, request: u32, arg: &[u8]) -> Result<(i32, Vec<u8>)> {
        self.transport
            .borrow_mut()
            .posix_ioctl(self.fd, request, arg)
    }

    /// Read exactly `buffer.len()` bytes or fail.
    pub fn read_exact_at_current(&mut self, buffer: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buffer.len() {
            let chunk = self
                .transport
                .borrow_mut()
                .posix_read(self.fd, (buffer.len() - filled) as u32)?;
            if chunk.is_empty() {
                return Err(LinkError::device(
                    heliolink_wire::errno::ENOENT,
                    "read-exact",
                ));
            }
            buffer[filled..filled + chunk.len()].copy_from_slice(&chunk);
            filled += chunk.len();
        }
        Ok(())
    }

    /// Seek to an absolute offset.
    pub fn seek_set(&mut self, offset: u32) -> Result<u32> {
        let position = self
            .transport
            .borrow_mut()
            .posix_lseek(self.fd, offset as i32, whence::SEEK_SET)?;
        Ok(position as u32)
    }
}

impl<D: DeviceDriver> Read for RemoteFile<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self
            .transport
            .borrow_mut()
            .posix_read(self.fd, buf.len() as u32)?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl<D: DeviceDriver> Write for RemoteFile<D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.transport.borrow_mut().posix_write(self.fd, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<D: DeviceDriver> Seek for RemoteFile<D> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (offset, anchor) = match pos {
            SeekFrom::Start(offset) => (
                i32::try_from(offset)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?,
                whence::SEEK_SET,
            ),
            SeekFrom::Current(offset) => (
                i32::try_from(offset)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?,
                whence::SEEK_CUR,
            ),
            SeekFrom::End(offset) => (
                i32::try_from(offset)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?,
                whence::SEEK_END,
            ),
        };
        let position = self
            .transport
            .borrow_mut()
            .posix_lseek(self.fd, offset, anchor)?;
        Ok(position as u64)
    }
}

impl<D: DeviceDriver> Drop for RemoteFile<D> {
    fn drop(&mut self) {
        if self.fd >= 0 {
            if let Ok(mut transport) = self.transport.try_borrow_mut() {
                let _ = transport.posix_close(self.fd);
            }
            self.fd = -1;
        }
    }
}

/// An open remote directory stream with scoped release.
pub struct RemoteDir<D: DeviceDriver> {
    transport: SharedTransport<D>,
    dirp: u32,
    path: String,
    open: bool,
}

impl<D: DeviceDriver> RemoteDir<D> {
    /// Open the remote directory at `path`.
    pub fn open(link: &Link<D>, path: &str) -> Result<Self> {
        Self::open_with(link.transport(), path)
    }

    pub(crate) fn open_with(transport: SharedTransport<D>, path: &str) -> Result<Self> {
        let dirp = transport.borrow_mut().posix_opendir(path)?;
        Ok(Self {
            transport,
            dirp,
            path: path.to_string(),
            open: true,
        })
    }

    /// The remote path this stream was opened with.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read the next entry name; `None` marks the end of the directory.
    pub fn read(&mut self) -> Result<Option<String>> {
        self.transport.borrow_mut().posix_readdir(self.dirp)
    }

    /// Report the stream position.
    pub fn tell(&mut self) -> Result<u32> {
        self.transport.borrow_mut().posix_telldir(self.dirp)
    }

    /// Reposition the stream to a location from [`RemoteDir::tell`].
    pub fn seek(&mut self, location: u32) -> Result<()> {
        self.transport.borrow_mut().posix_seekdir(self.dirp, location)
    }

    /// Rewind the stream to its first entry.
    pub fn rewind(&mut self) -> Result<()> {
        self.transport.borrow_mut().posix_rewinddir(self.dirp)
    }
}

impl<D: DeviceDriver> Drop for RemoteDir<D> {
    fn drop(&mut self) {
        if self.open {
            if let Ok(mut transport) = self.transport.try_borrow_mut() {
                let _ = transport.posix_closedir(self.dirp);
            }
            self.open = false;
        }
    }
}

/// Path-level filesystem operations on the connected device.
pub struct RemoteFileSystem<D: DeviceDriver> {
    transport: SharedTransport<D>,
}

impl<D: DeviceDriver> RemoteFileSystem<D> {
    pub(crate) fn new(transport: SharedTransport<D>) -> Self {
        Self { transport }
    }

    /// Stat a remote path.
    pub fn get_info(&self, path: &str) -> Result<FileStat> {
        self.transport.borrow_mut().posix_stat(path)
    }

    /// Whether `path` exists at all.
    pub fn exists(&self, path: &str) -> bool {
        self.get_info(path).is_ok()
    }

    /// Whether `path` exists and is a directory.
    pub fn directory_exists(&self, path: &str) -> bool {
        self.get_info(path).map(|stat| stat.is_directory()).unwrap_or(false)
    }

    /// Unlink a remote file.
    pub fn remove(&self, path: &str) -> Result<()> {
        self.transport.borrow_mut().posix_unlink(path)
    }

    /// Rename a remote file or directory.
    pub fn rename(&self, source: &str, destination: &str) -> Result<()> {
        self.transport.borrow_mut().posix_rename(source, destination)
    }

    /// Re-write the first byte of `path` to bump its modification time.
    pub fn touch(&self, path: &str) -> Result<()> {
        let mut file = RemoteFile::open_with(
            self.transport.clone(),
            path,
            OpenMode::read_write(),
            Permissions::default(),
        )?;
        let mut byte = [0u8; 1];
        file.read_exact_at_current(&mut byte)?;
        file.seek_set(0)?;
        file.write_all(&byte).map_err(io_to_link)?;
        Ok(())
    }

    /// Permissions a new child of `path` should inherit: the parent's, or
    /// the working directory's when `path` has no parent.
    pub fn get_permissions(&self, path: &str) -> Result<Permissions> {
        let parent = match path.rsplit_once('/') {
            Some(("", _)) => "/",
            Some((parent, _)) => parent,
            None => ".",
        };
        Ok(Permissions::new(self.get_info(parent)?.permissions()))
    }

    /// Create one directory. Zero `perms` inherit the parent's permissions.
    pub fn create_directory(&self, path: &str, perms: Permissions) -> Result<()> {
        if self.directory_exists(path) {
            return Ok(());
        }
        let use_perms = if perms.bits() == 0 {
            self.get_permissions(path)?
        } else {
            perms
        };
        self.transport.borrow_mut().posix_mkdir(path, use_perms.bits())
    }

    /// Create a directory and, when `recursive`, every missing prefix.
    /// Existing prefixes are ignored so the operation is idempotent.
    pub fn create_directory_recursive(&self, path: &str, perms: Permissions) -> Result<()> {
        let mut base = String::new();
        if path.starts_with('/') {
            base.push('/');
        }
        for component in path.split('/').filter(|component| !component.is_empty()) {
            if !base.is_empty() && !base.ends_with('/') {
                base.push('/');
            }
            base.push_str(component);
            match self.create_directory(&base, perms) {
                Ok(()) => {}
                Err(error) if error.errno() == heliolink_wire::errno::EEXIST => {}
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    /// List a directory. With `recursive`, subdirectory entries are returned
    /// as `child/grandchild` relative paths. `exclude` filters entry names
    /// before any descent; `.` and `..` are always skipped. Ordering equals
    /// the target's traversal order.
    pub fn read_directory(
        &self,
        path: &str,
        recursive: bool,
        exclude: Option<&dyn Fn(&str) -> bool>,
    ) -> Result<Vec<String>> {
        let mut result = Vec::new();
        let mut directory = RemoteDir::open_with(self.transport.clone(), path)?;
        while let Some(entry) = directory.read()? {
            if entry == "." || entry == ".." {
                continue;
            }
            if exclude.is_some_and(|predicate| predicate(&entry)) {
                continue;
            }
            if recursive {
                let entry_path = join(path, &entry);
                if self.get_info(&entry_path)?.is_directory() {
                    for child in self.read_directory(&entry_path, recursive, exclude)? {
                        result.push(format!("{entry}/{child}"));
                    }
                    continue;
                }
            }
            result.push(entry);
        }
        Ok(result)
    }

    /// Remove a directory. With `recursive`, children are removed first:
    /// files are unlinked, directories recurse, then the now-empty target is
    /// removed. The first failure aborts the walk.
    pub fn remove_directory(&self, path: &str, recursive: bool) -> Result<()> {
        if recursive {
            let entries = {
                let mut directory = RemoteDir::open_with(self.transport.clone(), path)?;
                let mut entries = Vec::new();
                while let Some(entry) = directory.read()? {
                    if entry != "." && entry != ".." {
                        entries.push(entry);
                    }
                }
                entries
            };
            for entry in entries {
                let entry_path = join(path, &entry);
                if self.get_info(&entry_path)?.is_directory() {
                    self.remove_directory(&entry_path, recursive)?;
                } else {
                    self.remove(&entry_path)?;
                }
            }
        }
        self.transport.borrow_mut().posix_rmdir(path)
    }
}

fn join(base: &str, entry: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{entry}")
    } else {
        format!("{base}/{entry}")
    }
}

fn io_to_link(error: io::Error) -> LinkError {
    LinkError::transport("io", error)
}
