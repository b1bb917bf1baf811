// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::digest::DIGEST_LEN;
use crate::layout::{checksum_offset_for, RegionHeaderRaw, ESP_IMAGE_MAGIC, SEGMENT_DESCRIPTOR_LEN};
use crate::rewrite::recompute;
use crate::Error;
use byteorder::{ByteOrder, LittleEndian};
use zerocopy::{
    byteorder::{U16, U32},
    AsBytes,
};

/// Fill value between regions of a merged image, as left by a flash erase.
pub const ERASED: u8 = 0xFF;

/// Assembles a self-verifying region from a list of segments.
///
/// The checksum padding is zero-filled and the checksum (and digest, if
/// requested) are written by [`recompute`], so the result is exactly what
/// a patched image looks like after rewriting.
#[derive(Clone, Debug, Default)]
pub struct RegionBuilder {
    entry_addr: u32,
    chip_id: u16,
    append_digest: bool,
    segments: Vec<(u32, Vec<u8>)>,
}

impl RegionBuilder {
    pub fn new(entry_addr: u32) -> Self {
        Self {
            entry_addr,
            ..Self::default()
        }
    }

    pub fn chip_id(mut self, chip_id: u16) -> Self {
        self.chip_id = chip_id;
        self
    }

    /// Sets the digest flag at 0x17 and reserves room for the digest.
    pub fn append_digest(mut self, append: bool) -> Self {
        self.append_digest = append;
        self
    }

    pub fn segment(mut self, load_addr: u32, data: impl Into<Vec<u8>>) -> Self {
        self.segments.push((load_addr, data.into()));
        self
    }

    pub fn build(self) -> Result<Vec<u8>, Error> {
        let segment_count = u8::try_from(self.segments.len())
            .map_err(|_| Error::TooManySegments(self.segments.len()))?;

        let header = RegionHeaderRaw {
            magic: ESP_IMAGE_MAGIC,
            segment_count,
            entry_addr: U32::new(self.entry_addr),
            chip_id: U16::new(self.chip_id),
            hash_appended: u8::from(self.append_digest),
            ..RegionHeaderRaw::default()
        };
        let mut bytes = header.as_bytes().to_vec();

        for (load_addr, data) in &self.segments {
            let data_len = u32::try_from(data.len()).map_err(|_| Error::SegmentLengthOverflow)?;
            let mut descriptor = [0u8; SEGMENT_DESCRIPTOR_LEN];
            LittleEndian::write_u32(&mut descriptor[0..4], *load_addr);
            LittleEndian::write_u32(&mut descriptor[4..8], data_len);
            bytes.extend_from_slice(&descriptor);
            bytes.extend_from_slice(data);
        }

        bytes.resize(checksum_offset_for(bytes.len()) + 1, 0);
        if self.append_digest {
            bytes.resize(bytes.len() + DIGEST_LEN, 0);
        }

        recompute(&mut bytes, 0)?;
        Ok(bytes)
    }
}

/// Lays regions out in one image at their base offsets. Gaps are filled
/// with [`ERASED`]; a later region overwrites an earlier one it overlaps.
pub fn merge_regions(regions: &[(usize, &[u8])]) -> Vec<u8> {
    let len = regions
        .iter()
        .map(|(offset, bytes)| offset + bytes.len())
        .max()
        .unwrap_or(0);
    let mut image = vec![ERASED; len];
    for (offset, bytes) in regions {
        image[*offset..*offset + bytes.len()].copy_from_slice(bytes);
    }
    image
}
