// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The read-only template image and the copy boundary in front of it.
//!
//! A [`MasterImage`] is loaded and verified once. It hands out no mutable
//! access: every provisioning request works on its own copy, so any number
//! of threads can share one master.

use crate::patch::{patch, PatchReport, PatchValues};
use crate::rewrite::recompute;
use crate::verify::verify;
use crate::{Error, REGIONS};
use log::info;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct MasterImage {
    bytes: Arc<[u8]>,
}

/// A patched, self-verifying copy of the master.
#[derive(Clone, Debug)]
pub struct Provisioned {
    pub image: Vec<u8>,
    pub report: PatchReport,
    pub checksum: u8,
}

impl MasterImage {
    /// Reads and verifies the template. Any error here means the service
    /// has nothing to hand out and should not start.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let bytes = std::fs::read(path)?;
        info!(
            "loaded firmware template {} ({} bytes)",
            path.display(),
            bytes.len()
        );
        Self::from_bytes(bytes)
    }

    /// Verifies both fixed regions before accepting `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error> {
        Self::with_regions(bytes, &REGIONS)
    }

    /// Like [`MasterImage::from_bytes`] for images with a different region
    /// map.
    pub fn with_regions(bytes: Vec<u8>, regions: &[usize]) -> Result<Self, Error> {
        for &region_offset in regions {
            if !verify(&bytes, region_offset) {
                return Err(Error::IntegrityCheckFailed { region_offset });
            }
        }
        Ok(Self {
            bytes: bytes.into(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// A private copy that may be patched freely.
    pub fn fresh_copy(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Copies the master, patches `values` into the region at
    /// `region_offset` and rewrites its checksum. The result is verified
    /// before it is returned.
    pub fn provision(
        &self,
        region_offset: usize,
        values: &PatchValues,
    ) -> Result<Provisioned, Error> {
        let mut image = self.fresh_copy();
        let report = patch(&mut image, region_offset, values)?;
        let rewritten = recompute(&mut image, region_offset)?;
        if !verify(&image, region_offset) {
            return Err(Error::IntegrityCheckFailed { region_offset });
        }

        info!(
            "provisioned region {region_offset:#x}: {} slot(s) patched, checksum {:02x}",
            report.patched.len(),
            rewritten.checksum
        );
        Ok(Provisioned {
            image,
            report,
            checksum: rewritten.checksum,
        })
    }
}
