// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::layout::{ImageLayout, SegmentDescriptor};
use crc_any::CRCu32;

/// Seed of the segment XOR fold, fixed by the boot ROM.
pub const CHECKSUM_SEED: u8 = 0xEF;

/// Computes the single-byte integrity value of a region: every payload byte
/// of every segment, in table order, XOR-ed into [`CHECKSUM_SEED`].
///
/// Only payloads count. Headers, descriptors and padding are not covered.
///
/// # Panics
///
/// `segments` must come from [`ImageLayout::parse`] on the same buffer and
/// region offset; a descriptor pointing past the buffer panics.
pub fn compute_checksum(
    buffer: &[u8],
    region_offset: usize,
    segments: &[SegmentDescriptor],
) -> u8 {
    let region = &buffer[region_offset..];
    segments
        .iter()
        .flat_map(|segment| &region[segment.data_range()])
        .fold(CHECKSUM_SEED, |checksum, byte| checksum ^ byte)
}

/// CRC-32 (IEEE) over `[0, checksum_offset]` of the region.
///
/// This is what the older inspection tooling printed. It is reported for
/// comparison only; nothing writes it into an image and it has no say in
/// whether a region is valid.
pub fn crc32_informational(buffer: &[u8], layout: &ImageLayout) -> u32 {
    let mut crc = CRCu32::crc32();
    crc.digest(&buffer[layout.covered_range()]);
    crc.get_crc()
}
