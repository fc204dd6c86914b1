// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Header patching and image signing against real files on disk.
// Author: Lukas Bower

use std::io::{Seek, SeekFrom, Write};

use anyhow::Result;
use ed25519_dalek::SigningKey;

use heliolink::appfs::{AppfsFlags, FileAttributes};
use heliolink::auth;
use heliolink::wire::{AppfsFileHeader, SignatureMarker};

/// A zeroed header followed by `body`, the shape the build tooling hands us.
fn scratch_image(body: &[u8]) -> Result<std::fs::File> {
    let mut file = tempfile::tempfile()?;
    file.write_all(&AppfsFileHeader::zeroed().to_bytes())?;
    file.write_all(body)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

#[test]
fn attributes_patch_a_file_on_disk() -> Result<()> {
    let mut image = scratch_image(&[0xC3; 600])?;
    let attrs = FileAttributes::default()
        .with_name("gateway")
        .with_id("io.helio.gateway")
        .with_version(0x0104)
        .with_ram_size(8192)
        .with_flags(AppfsFlags::FLASH | AppfsFlags::STARTUP);
    attrs.apply(&mut image)?;

    let read_back = FileAttributes::from_file(&mut image)?;
    assert_eq!(read_back, attrs);
    // patching never changes the image size
    assert_eq!(image.metadata()?.len(), (AppfsFileHeader::SIZE + 600) as u64);
    Ok(())
}

#[test]
fn signing_a_file_on_disk_round_trips() -> Result<()> {
    let mut image = scratch_image(&[0x3C; 900])?;
    let key = SigningKey::from_bytes(&[11u8; 32]);
    auth::sign(&mut image, &key)?;
    assert_eq!(
        image.metadata()?.len(),
        (AppfsFileHeader::SIZE + 900 + SignatureMarker::SIZE) as u64
    );
    assert!(auth::verify(&mut image, &key.verifying_key())?);

    // one flipped body byte and the signature no longer holds
    image.seek(SeekFrom::Start(200))?;
    image.write_all(&[0xFF])?;
    assert!(!auth::verify(&mut image, &key.verifying_key())?);
    Ok(())
}
