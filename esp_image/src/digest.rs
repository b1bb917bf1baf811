// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{layout, Error};
use serde::Serialize;
use sha2::{Digest as _, Sha256};

pub const DIGEST_LEN: usize = 32;

/// SHA2-256 over `[0, checksum_offset]` of a region.
pub type Digest = [u8; DIGEST_LEN];

/// Outcome of checking the digest appended after the checksum byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestStatus {
    /// The digest flag is clear, there is nothing to check.
    NotAppended,
    Valid,
    Mismatch,
    /// The 32 digest bytes would run past the end of the buffer.
    Truncated,
    /// The region could not be parsed far enough to look.
    Unchecked,
}

impl DigestStatus {
    /// Whether this status allows the region to be considered valid.
    pub fn is_acceptable(self) -> bool {
        matches!(self, DigestStatus::NotAppended | DigestStatus::Valid)
    }
}

pub fn compute_digest(
    buffer: &[u8],
    region_offset: usize,
    checksum_offset: usize,
) -> Result<Digest, Error> {
    let region = layout::region(buffer, region_offset)?;
    let covered = region
        .get(..=checksum_offset)
        .ok_or(Error::TruncatedImage {
            region_offset,
            needed: checksum_offset.saturating_add(1),
            available: region.len(),
        })?;
    Ok(Sha256::digest(covered).into())
}

/// Digest the region would have with `checksum` stored at `checksum_offset`,
/// leaving the buffer as it is.
pub fn digest_with_checksum(
    buffer: &[u8],
    region_offset: usize,
    checksum_offset: usize,
    checksum: u8,
) -> Result<Digest, Error> {
    let region = layout::region(buffer, region_offset)?;
    if checksum_offset >= region.len() {
        return Err(Error::TruncatedImage {
            region_offset,
            needed: checksum_offset.saturating_add(1),
            available: region.len(),
        });
    }

    let mut sha = Sha256::new();
    sha.update(&region[..checksum_offset]);
    sha.update([checksum]);
    Ok(sha.finalize().into())
}

/// Compares the stored digest against a freshly computed one.
pub fn check_digest(buffer: &[u8], region_offset: usize, checksum_offset: usize) -> DigestStatus {
    let Some(region) = buffer.get(region_offset..) else {
        return DigestStatus::Truncated;
    };
    let Some(start) = checksum_offset.checked_add(1) else {
        return DigestStatus::Truncated;
    };
    let Some(stored) = region.get(start..start.saturating_add(DIGEST_LEN)) else {
        return DigestStatus::Truncated;
    };

    match compute_digest(buffer, region_offset, checksum_offset) {
        Ok(computed) if computed[..] == *stored => DigestStatus::Valid,
        Ok(_) => DigestStatus::Mismatch,
        Err(_) => DigestStatus::Truncated,
    }
}

/// Fails closed: a digest that does not fit in the buffer never verifies.
pub fn verify_digest(buffer: &[u8], region_offset: usize, checksum_offset: usize) -> bool {
    check_digest(buffer, region_offset, checksum_offset) == DigestStatus::Valid
}
