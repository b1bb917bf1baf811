// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::checksum::compute_checksum;
use crate::digest::{digest_with_checksum, Digest, DIGEST_LEN};
use crate::layout::ImageLayout;
use crate::Error;
use hex::ToHex as _;
use log::trace;

/// What [`recompute`] wrote back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rewritten {
    /// Absolute offset of the checksum byte.
    pub checksum_offset: usize,
    pub checksum: u8,
    pub digest: Option<Digest>,
}

/// Makes a region self-verifying again after patching: writes the fresh
/// checksum byte and, when the digest flag is set, the SHA-256 that follows
/// it. Running it twice changes nothing the second time.
///
/// Everything is computed and bounds-checked before the first write, so an
/// error leaves the buffer unchanged.
pub fn recompute(buffer: &mut [u8], region_offset: usize) -> Result<Rewritten, Error> {
    let layout = ImageLayout::parse(buffer, region_offset)?;
    let checksum_offset = region_offset + layout.checksum_offset;
    let checksum = compute_checksum(buffer, region_offset, &layout.segments);

    let digest = if layout.hash_appended() {
        let range = layout.digest_range();
        let available = buffer.len() - region_offset;
        if range.end > available {
            return Err(Error::TruncatedImage {
                region_offset,
                needed: range.end,
                available,
            });
        }
        // Hashed over the new checksum byte, not the stale one in the buffer.
        let digest =
            digest_with_checksum(buffer, region_offset, layout.checksum_offset, checksum)?;
        Some((region_offset + range.start, digest))
    } else {
        None
    };

    buffer[checksum_offset] = checksum;
    trace!("wrote checksum {checksum:02x} at {checksum_offset:#x}");
    if let Some((start, digest)) = &digest {
        buffer[*start..*start + DIGEST_LEN].copy_from_slice(digest);
        trace!("wrote digest {} at {start:#x}", digest.encode_hex::<String>());
    }

    Ok(Rewritten {
        checksum_offset,
        checksum,
        digest: digest.map(|(_, digest)| digest),
    })
}
