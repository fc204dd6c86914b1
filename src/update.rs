// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Firmware update flows against the bootloader or a running OS flash device.
// Author: Lukas Bower

//! Firmware update.
//!
//! Two paths share one entry point. Connected to a **bootloader**, the image
//! id is validated against the bootloader's hardware id (low bit masked),
//! flash is erased and polled back to life, the body is streamed in 1 KiB
//! chunks, and on legacy bootloaders the first 256 bytes are written last so
//! a power loss never leaves a half-valid image. Connected to a running
//! **OS**, the caller names a flash device node and the same image flows
//! through page erase/program ioctls instead.
//!
//! Failures while programming or committing trigger an explicit erase: a
//! device that is deterministically not bootable beats one that half-boots.

use std::io::{Read, Seek, SeekFrom};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use heliolink_wire::{
    errno, requests, FlashPageWrite, OsFlashInfo, SignatureMarker,
    BOOTLOADER_HARDWARE_ID_OFFSET, BOOTLOADER_TARGET_CACHES_FIRST_PAGE,
    FLASH_WRITE_PAGE_SIZE, SIGNATURE_SIZE,
};

use crate::auth;
use crate::driver::DeviceDriver;
use crate::error::{LinkError, Result};
use crate::fs::{OpenMode, Permissions, RemoteFile};
use crate::link::{ConnectionKind, Link};
use crate::progress::{ProgressSink, INDETERMINATE};

/// Bytes streamed per bootloader `write_flash` call.
const PROGRAM_CHUNK: usize = 1024;

/// The image prefix the bootloader checks before booting.
const FIRST_PAGE: usize = 256;

/// Delay between bootloader-attribute polls while flash erases.
const ERASE_POLL: Duration = Duration::from_millis(500);

/// Settle time after the erase poll succeeds.
const ERASE_SETTLE: Duration = Duration::from_millis(250);

/// Master timeout applied around each OS-path page erase.
const OS_ERASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for [`Link::update_os`].
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    bootloader_retry_count: u32,
    verify: bool,
    flash_path: Option<String>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            bootloader_retry_count: 20,
            verify: false,
            flash_path: None,
        }
    }
}

impl UpdateOptions {
    /// Attribute-poll budget while waiting out the flash erase.
    #[must_use]
    pub fn with_bootloader_retry_count(mut self, count: u32) -> Self {
        self.bootloader_retry_count = count;
        self
    }

    /// Read back and compare programmed flash (skipped on signed targets).
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Flash device node to program through when connected to a running OS.
    #[must_use]
    pub fn with_flash_path(mut self, path: &str) -> Self {
        self.flash_path = Some(path.to_string());
        self
    }
}

impl<D: DeviceDriver> Link<D> {
    /// Install a firmware image on the connected device.
    ///
    /// The progress sink sees the `"erasing"` / `"installing"` /
    /// `"verifying"` phase keys and a terminal `(0, 0)`; its previous key is
    /// restored on exit.
    pub fn update_os<F, P>(
        &mut self,
        image: &mut F,
        options: &UpdateOptions,
        progress: &mut P,
    ) -> Result<()>
    where
        F: Read + Seek,
        P: ProgressSink,
    {
        self.require_connected("update-os")?;
        let previous_key = progress.current_key().to_string();
        let result = match self.kind() {
            ConnectionKind::Bootloader => self.update_via_bootloader(image, options, progress),
            ConnectionKind::Os => match &options.flash_path {
                Some(path) => {
                    let path = path.clone();
                    self.update_via_os_flash(image, &path, options, progress)
                }
                None => Err(LinkError::invalid_argument(
                    "update-os: OS mode needs a flash path",
                )),
            },
            ConnectionKind::None => Err(LinkError::not_connected("update-os")),
        };
        progress.set_key(&previous_key);
        result
    }

    // --- bootloader path ----------------------------------------------------

    fn update_via_bootloader<F, P>(
        &mut self,
        image: &mut F,
        options: &UpdateOptions,
        progress: &mut P,
    ) -> Result<()>
    where
        F: Read + Seek,
        P: ProgressSink,
    {
        let image_id = self.validate_image_id(image)?;
        info!(
            "updating over bootloader v{:#06x}, image id {image_id:#010x}",
            self.bootloader_attrs().version
        );
        self.erase_os(options, progress)?;
        self.install_os(image, image_id, options, progress)
    }

    /// Accept the image only when its hardware id matches the bootloader's
    /// with the build-variant bit masked out.
    fn validate_image_id<F: Read + Seek>(&mut self, image: &mut F) -> Result<u32> {
        const TAG: &str = "update-validate";
        let counters = self.progress();
        counters.reset();

        image
            .seek(SeekFrom::Start(BOOTLOADER_HARDWARE_ID_OFFSET))
            .map_err(|e| LinkError::transport(TAG, e))?;
        let mut id_bytes = [0u8; 4];
        image
            .read_exact(&mut id_bytes)
            .map_err(|e| LinkError::transport(TAG, e))?;
        let image_id = u32::from_le_bytes(id_bytes);

        let size = image
            .seek(SeekFrom::End(0))
            .map_err(|e| LinkError::transport(TAG, e))?;
        image
            .seek(SeekFrom::Start(0))
            .map_err(|e| LinkError::transport(TAG, e))?;
        counters.set_maximum(size as u32);

        let hardware_id = self.bootloader_attrs().hardware_id;
        if image_id & !1 != hardware_id & !1 {
            warn!("{TAG}: image id {image_id:#010x} vs hardware id {hardware_id:#010x}");
            return Err(LinkError::invalid_argument("update-os: invalid image id"));
        }
        Ok(image_id)
    }

    /// Erase flash and poll the bootloader back to responsiveness.
    fn erase_os<P: ProgressSink>(&mut self, options: &UpdateOptions, progress: &mut P) -> Result<()> {
        progress.set_key("erasing");
        self.transport().borrow_mut().erase_flash()?;
        progress.update(0, INDETERMINATE);

        let legacy = self.is_legacy();
        let mut responsive = false;
        let mut retry = 0;
        loop {
            thread::sleep(ERASE_POLL);
            let poll = self.transport().borrow_mut().bootloader_attr(legacy);
            match poll {
                Ok(_) => {
                    responsive = true;
                    break;
                }
                Err(error) => {
                    debug!("erase poll {retry}: {error}");
                    // a failed poll can leave half a reply buffered
                    let _ = self.transport().borrow_mut().flush();
                }
            }
            progress.update(retry, INDETERMINATE);
            retry += 1;
            if retry >= options.bootloader_retry_count {
                break;
            }
        }

        thread::sleep(ERASE_SETTLE);
        let _ = self.transport().borrow_mut().flush();
        progress.update(0, 0);

        if !responsive {
            return Err(LinkError::device(
                errno::EIO,
                "erase-flash: bootloader unresponsive",
            ));
        }
        Ok(())
    }

    /// Erase after a programming/committing failure so the device is
    /// deterministically not bootable, then hand the error back.
    fn fail_erase<P: ProgressSink>(&mut self, error: LinkError, progress: &mut P) -> LinkError {
        warn!("programming failed, erasing to a known state: {error}");
        let _ = self.transport().borrow_mut().erase_flash();
        progress.update(0, 0);
        error
    }

    fn install_os<F, P>(
        &mut self,
        image: &mut F,
        image_id: u32,
        options: &UpdateOptions,
        progress: &mut P,
    ) -> Result<()>
    where
        F: Read + Seek,
        P: ProgressSink,
    {
        const TAG: &str = "update-install";
        let attrs = *self.bootloader_attrs();
        let start_address = attrs.start_address;
        let host_caches_first_page = attrs.version < BOOTLOADER_TARGET_CACHES_FIRST_PAGE;
        let counters = self.progress();

        progress.set_key("installing");
        progress.update(0, 100);

        let marker = auth::get_signature(image).unwrap_or_else(|error| {
            debug!("{TAG}: signature probe suppressed: {error}");
            None
        });
        let image_size = image
            .seek(SeekFrom::End(0))
            .map_err(|e| LinkError::transport(TAG, e))? as u32;
        let body_len = image_size
            - marker.map_or(0, |_| SignatureMarker::SIZE as u32);
        image
            .seek(SeekFrom::Start(0))
            .map_err(|e| LinkError::transport(TAG, e))?;

        let mut first_page = [0xFFu8; FIRST_PAGE];
        let mut cached = false;
        let mut chunk = [0u8; PROGRAM_CHUNK];
        let mut loc = start_address;
        let mut remaining = body_len;
        counters.set_current(0);

        while remaining > 0 {
            let want = PROGRAM_CHUNK.min(remaining as usize);
            read_fully(image, &mut chunk[..want], TAG)?;

            if host_caches_first_page && loc == start_address {
                // the bootloader treats a valid first page as "image ready",
                // so it is held back and written last
                let head = want.min(FIRST_PAGE);
                first_page[..head].copy_from_slice(&chunk[..head]);
                cached = true;
                chunk[..head].fill(0xFF);
            }

            let write = self.transport().borrow_mut().write_flash(loc, &chunk[..want]);
            let written = match write {
                Ok(written) => written,
                Err(error) => return Err(self.fail_erase(error, progress)),
            };
            if written != want {
                let error = LinkError::device(errno::EIO, "write-flash: short write");
                return Err(self.fail_erase(error, progress));
            }

            loc += want as u32;
            remaining -= want as u32;
            counters.add(want as u32);
            if progress.update(counters.current(), counters.maximum()) {
                // leave a deterministic non-bootable device behind
                let _ = self.transport().borrow_mut().erase_flash();
                progress.update(0, 0);
                return Ok(());
            }
        }

        if cached && image_id != attrs.hardware_id {
            // cross-variant image: heal the id slot before the commit
            let offset = BOOTLOADER_HARDWARE_ID_OFFSET as usize;
            first_page[offset..offset + 4].copy_from_slice(&attrs.hardware_id.to_le_bytes());
        }

        // unconditional: a no-op on unsigned targets, the final commit on
        // signed ones
        let signature = marker.unwrap_or([0u8; SIGNATURE_SIZE]);
        let posted = self.transport().borrow_mut().verify_signature(&signature);
        let signed = match posted {
            Ok(result) => result > 0,
            Err(error) => return Err(self.fail_erase(error, progress)),
        };

        let mut written_len = body_len;
        if !signed {
            if let Some(signature) = marker {
                // unsigned target: the marker is plain padding
                let bytes = SignatureMarker::new(signature).to_bytes();
                let write = self
                    .transport()
                    .borrow_mut()
                    .write_flash(start_address + body_len, &bytes);
                match write {
                    Ok(count) if count == bytes.len() => written_len = image_size,
                    Ok(_) => {
                        let error = LinkError::device(errno::EIO, "write-flash: short write");
                        return Err(self.fail_erase(error, progress));
                    }
                    Err(error) => return Err(self.fail_erase(error, progress)),
                }
            }
        }

        if options.verify && !signed {
            self.verify_flash(image, written_len, start_address, host_caches_first_page, progress)?;
        }

        if cached {
            self.commit_first_page(&first_page, start_address, options, progress)?;
        }

        progress.update(0, 0);
        Ok(())
    }

    /// Read back and compare the programmed region. Signed targets forbid
    /// flash read-back, so the caller skips this for them.
    fn verify_flash<F, P>(
        &mut self,
        image: &mut F,
        written_len: u32,
        start_address: u32,
        mask_first_page: bool,
        progress: &mut P,
    ) -> Result<()>
    where
        F: Read + Seek,
        P: ProgressSink,
    {
        const TAG: &str = "update-verify";
        progress.set_key("verifying");
        let counters = self.progress();
        counters.set_current(0);

        image
            .seek(SeekFrom::Start(0))
            .map_err(|e| LinkError::transport(TAG, e))?;
        let mut chunk = [0u8; PROGRAM_CHUNK];
        let mut loc = start_address;
        let mut remaining = written_len;

        while remaining > 0 {
            let want = PROGRAM_CHUNK.min(remaining as usize);
            read_fully(image, &mut chunk[..want], TAG)?;
            if mask_first_page && loc == start_address {
                // the first page is still blank until the final commit
                chunk[..want.min(FIRST_PAGE)].fill(0xFF);
            }
            let device = self.transport().borrow_mut().read_flash(loc, want as u32)?;
            if device != chunk[..want] {
                return Err(LinkError::invalid_argument("update-verify: mismatch"));
            }
            loc += want as u32;
            remaining -= want as u32;
            counters.add(want as u32);
            if progress.update(counters.current(), counters.maximum()) {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Write the held-back first page, making the image bootable. This is
    /// the last step, and a failure here erases the device.
    fn commit_first_page<P: ProgressSink>(
        &mut self,
        first_page: &[u8; FIRST_PAGE],
        start_address: u32,
        options: &UpdateOptions,
        progress: &mut P,
    ) -> Result<()> {
        let write = self
            .transport()
            .borrow_mut()
            .write_flash(start_address, first_page);
        match write {
            Ok(count) if count == FIRST_PAGE => {}
            Ok(_) | Err(_) => {
                let error = LinkError::device(errno::EIO, "update-commit: first page write failed");
                return Err(self.fail_erase(error, progress));
            }
        }

        if options.verify {
            let read = self
                .transport()
                .borrow_mut()
                .read_flash(start_address, FIRST_PAGE as u32);
            let device = match read {
                Ok(device) => device,
                Err(_) => {
                    progress.update(0, 0);
                    return Err(LinkError::device(
                        errno::EIO,
                        "update-commit: first page read back failed",
                    ));
                }
            };
            if device != first_page[..] {
                let error = LinkError::device(errno::EIO, "update-commit: first page mismatch");
                return Err(self.fail_erase(error, progress));
            }
        }
        Ok(())
    }

    // --- OS flash-device path -----------------------------------------------

    fn update_via_os_flash<F, P>(
        &mut self,
        image: &mut F,
        flash_path: &str,
        _options: &UpdateOptions,
        progress: &mut P,
    ) -> Result<()>
    where
        F: Read + Seek,
        P: ProgressSink,
    {
        const TAG: &str = "update-os-flash";
        let counters = self.progress();
        counters.reset();

        let mut flash = RemoteFile::open_with(
            self.transport(),
            flash_path,
            OpenMode::read_write(),
            Permissions::default(),
        )?;

        let (_, arg) = flash.ioctl(requests::FLASH_GET_OS_INFO, &vec![0u8; OsFlashInfo::SIZE])?;
        let region = OsFlashInfo::from_bytes(&arg)
            .map_err(|error| LinkError::from_wire(TAG, error))?;

        let signature_required = match flash.ioctl(requests::FLASH_IS_SIGNATURE_REQUIRED, &[]) {
            Ok((result, _)) => result > 0,
            Err(error) => {
                debug!("{TAG}: signature-required probe suppressed: {error}");
                false
            }
        };
        let marker = auth::get_signature(image).unwrap_or_else(|error| {
            debug!("{TAG}: signature probe suppressed: {error}");
            None
        });

        let image_size = image
            .seek(SeekFrom::End(0))
            .map_err(|e| LinkError::transport(TAG, e))? as u32;
        image
            .seek(SeekFrom::Start(0))
            .map_err(|e| LinkError::transport(TAG, e))?;
        let install_size = if signature_required && marker.is_some() {
            image_size - SignatureMarker::SIZE as u32
        } else {
            image_size
        };
        if install_size > region.size {
            return Err(LinkError::invalid_argument(
                "update-os-flash: image exceeds the OS region",
            ));
        }
        info!("programming {install_size} bytes at {:#010x} via {flash_path}", region.start);

        // page-erase from the first page containing the region start until
        // the image fits; each erase runs under a stretched master timeout
        progress.set_key("erasing");
        let mut erased = 0u32;
        let mut address = region.start;
        let mut pages = 0u32;
        while erased < install_size {
            let previous = self.transport().borrow_mut().set_timeout(OS_ERASE_TIMEOUT)?;
            let outcome = flash.ioctl(requests::FLASH_ERASE_PAGE, &address.to_le_bytes());
            let _ = self.transport().borrow_mut().set_timeout(previous);
            let (result, _) = outcome?;
            if result <= 0 {
                return Err(LinkError::device(errno::EIO, "erase-page: no progress"));
            }
            erased += result as u32;
            address += result as u32;
            pages += 1;
            progress.update(pages, INDETERMINATE);
        }
        progress.update(0, 0);

        progress.set_key("installing");
        counters.set_maximum(install_size);
        let mut offset = 0u32;
        let mut chunk = [0u8; FLASH_WRITE_PAGE_SIZE];
        while offset < install_size {
            let want = FLASH_WRITE_PAGE_SIZE.min((install_size - offset) as usize);
            read_fully(image, &mut chunk[..want], TAG)?;
            let mut page = FlashPageWrite::zeroed();
            page.addr = region.start + offset;
            page.nbyte = want as u32;
            page.buf[..want].copy_from_slice(&chunk[..want]);
            if let Err(error) = flash.ioctl(requests::FLASH_WRITE_PAGE, &page.to_bytes()) {
                // knock out the first page so the half-image cannot boot
                let _ = flash.ioctl(requests::FLASH_ERASE_PAGE, &region.start.to_le_bytes());
                progress.update(0, 0);
                return Err(error);
            }
            offset += want as u32;
            counters.add(want as u32);
            if progress.update(counters.current(), counters.maximum()) {
                let _ = flash.ioctl(requests::FLASH_ERASE_PAGE, &region.start.to_le_bytes());
                progress.update(0, 0);
                return Ok(());
            }
        }

        if signature_required {
            let signature = marker.ok_or_else(|| {
                LinkError::invalid_argument("update-os-flash: target requires a signed image")
            })?;
            flash.ioctl(requests::FLASH_VERIFY_SIGNATURE, &signature)?;
        }

        progress.update(0, 0);
        Ok(())
    }
}

fn read_fully<R: Read>(source: &mut R, buf: &mut [u8], tag: &str) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let count = source
            .read(&mut buf[filled..])
            .map_err(|e| LinkError::transport(tag, e))?;
        if count == 0 {
            return Err(LinkError::transport(tag, "image shrank while streaming"));
        }
        filled += count;
    }
    Ok(())
}
