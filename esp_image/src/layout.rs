// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Error;
use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::ops::Range;
use zerocopy::{
    byteorder::{U16, U32},
    AsBytes, FromBytes, LayoutVerified, Unaligned,
};

/// Byte 0 of every region. Only the inspector looks at it; patching and
/// verification work without it.
pub const ESP_IMAGE_MAGIC: u8 = 0xE9;

/// Chip ID the provisioning templates are built for (ESP32-C6).
pub const ESP32C6_CHIP_ID: u16 = 0x000D;

pub const HEADER_LEN: usize = 8;
pub const EXTENDED_HEADER_LEN: usize = 16;

/// Region-relative offset of the first segment descriptor.
pub const SEGMENTS_START: usize = HEADER_LEN + EXTENDED_HEADER_LEN;

pub const SEGMENT_DESCRIPTOR_LEN: usize = 8;

/// Region-relative offset of the digest flag byte.
pub const HASH_APPENDED_OFFSET: usize = 0x17;

type Le = zerocopy::byteorder::LittleEndian;

/// On-disk layout of the fixed and extended header.
#[derive(Clone, Copy, Debug, Default, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub(crate) struct RegionHeaderRaw {
    pub magic: u8,                  // 0x00
    pub segment_count: u8,          // 0x01
    pub spi_mode: u8,               // 0x02
    pub spi_speed_size: u8,         // 0x03
    pub entry_addr: U32<Le>,        // 0x04
    pub wp_pin: u8,                 // 0x08
    pub spi_pin_drv: [u8; 3],       // 0x09
    pub chip_id: U16<Le>,           // 0x0C
    pub min_chip_rev: u8,           // 0x0E
    pub min_chip_rev_full: U16<Le>, // 0x0F
    pub max_chip_rev_full: U16<Le>, // 0x11
    pub reserved: [u8; 4],          // 0x13
    pub hash_appended: u8,          // 0x17
}

/// Decoded region header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RegionHeader {
    pub magic: u8,
    pub segment_count: u8,
    pub spi_mode: u8,
    pub spi_speed_size: u8,
    pub entry_addr: u32,
    pub wp_pin: u8,
    pub chip_id: u16,
    pub min_chip_rev: u8,
    pub min_chip_rev_full: u16,
    pub max_chip_rev_full: u16,
    pub hash_appended: u8,
}

impl RegionHeader {
    pub(crate) fn from_raw(raw: &RegionHeaderRaw) -> Self {
        Self {
            magic: raw.magic,
            segment_count: raw.segment_count,
            spi_mode: raw.spi_mode,
            spi_speed_size: raw.spi_speed_size,
            entry_addr: raw.entry_addr.get(),
            wp_pin: raw.wp_pin,
            chip_id: raw.chip_id.get(),
            min_chip_rev: raw.min_chip_rev,
            min_chip_rev_full: raw.min_chip_rev_full.get(),
            max_chip_rev_full: raw.max_chip_rev_full.get(),
            hash_appended: raw.hash_appended,
        }
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == ESP_IMAGE_MAGIC
    }

    pub fn is_esp32c6(&self) -> bool {
        self.chip_id == ESP32C6_CHIP_ID
    }
}

/// One entry of the segment table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SegmentDescriptor {
    pub load_addr: u32,
    pub data_len: u32,
    /// Region-relative offset of the first payload byte.
    pub data_offset: usize,
}

impl SegmentDescriptor {
    /// Region-relative range covered by the payload.
    pub fn data_range(&self) -> Range<usize> {
        self.data_offset..self.data_offset + self.data_len as usize
    }
}

/// Structural facts about one region, derived fresh from a buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageLayout {
    pub region_offset: usize,
    pub header: RegionHeader,
    pub segments: Vec<SegmentDescriptor>,
    /// Region-relative offset just past the last payload byte.
    pub data_end: usize,
    /// Region-relative offset of the XOR checksum byte.
    pub checksum_offset: usize,
}

/// Returns the bytes from `region_offset` to the end of `buffer`.
pub fn region(buffer: &[u8], region_offset: usize) -> Result<&[u8], Error> {
    buffer.get(region_offset..).ok_or(Error::RegionOutOfBounds {
        region_offset,
        len: buffer.len(),
    })
}

/// The checksum sits in the last byte of the 16-byte block following the
/// data. A data area that already ends on a boundary gets a whole block of
/// padding, which is what `| 0xF` gives in both cases.
pub const fn checksum_offset_for(data_end: usize) -> usize {
    data_end | 0xF
}

impl ImageLayout {
    pub fn parse(buffer: &[u8], region_offset: usize) -> Result<Self, Error> {
        let region = region(buffer, region_offset)?;
        let truncated = |needed: usize| Error::TruncatedImage {
            region_offset,
            needed,
            available: region.len(),
        };

        let (raw, _) = LayoutVerified::<_, RegionHeaderRaw>::new_unaligned_from_prefix(region)
            .ok_or_else(|| truncated(SEGMENTS_START))?;
        let header = RegionHeader::from_raw(&raw);

        let mut segments = Vec::with_capacity(header.segment_count.into());
        let mut offset = SEGMENTS_START;
        for _ in 0..header.segment_count {
            let data_offset = offset + SEGMENT_DESCRIPTOR_LEN;
            let descriptor = region
                .get(offset..data_offset)
                .ok_or_else(|| truncated(data_offset))?;
            let load_addr = LittleEndian::read_u32(&descriptor[0..4]);
            let data_len = LittleEndian::read_u32(&descriptor[4..8]);

            let needed = data_offset.saturating_add(data_len as usize);
            if needed > region.len() {
                return Err(truncated(needed));
            }

            segments.push(SegmentDescriptor {
                load_addr,
                data_len,
                data_offset,
            });
            offset = needed;
        }

        let checksum_offset = checksum_offset_for(offset);
        if checksum_offset >= region.len() {
            return Err(truncated(checksum_offset + 1));
        }

        Ok(Self {
            region_offset,
            header,
            segments,
            data_end: offset,
            checksum_offset,
        })
    }

    pub fn hash_appended(&self) -> bool {
        self.header.hash_appended == 0x01
    }

    /// Region-relative range of the appended digest, whether or not the
    /// flag says one is present.
    pub fn digest_range(&self) -> Range<usize> {
        let start = self.checksum_offset + 1;
        start..start + crate::digest::DIGEST_LEN
    }

    /// Absolute range of the region's checksummed area, `[0, checksum_offset]`.
    pub fn covered_range(&self) -> Range<usize> {
        self.region_offset..self.region_offset + self.checksum_offset + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RegionBuilder;

    #[test]
    fn checksum_offset_rounds_up_to_block_end() {
        assert_eq!(checksum_offset_for(0x18), 0x1f);
        assert_eq!(checksum_offset_for(0x21), 0x2f);
        assert_eq!(checksum_offset_for(0x2f), 0x2f);
        // Aligned data still gets a full padding block.
        assert_eq!(checksum_offset_for(0x20), 0x2f);
        assert_eq!(checksum_offset_for(0x30), 0x3f);
    }

    #[test]
    fn parses_segment_table() {
        let image = RegionBuilder::new(0x4080_0000)
            .chip_id(0x000d)
            .segment(0x4080_0000, vec![0xAA; 5])
            .segment(0x4200_0000, vec![0x55; 12])
            .build()
            .unwrap();

        let layout = ImageLayout::parse(&image, 0).unwrap();
        assert!(layout.header.has_valid_magic());
        assert_eq!(layout.header.segment_count, 2);
        assert_eq!(layout.header.entry_addr, 0x4080_0000);
        assert_eq!(layout.header.chip_id, 0x000d);
        assert!(layout.header.is_esp32c6());
        assert_eq!(
            layout.segments,
            vec![
                SegmentDescriptor {
                    load_addr: 0x4080_0000,
                    data_len: 5,
                    data_offset: 32,
                },
                SegmentDescriptor {
                    load_addr: 0x4200_0000,
                    data_len: 12,
                    data_offset: 45,
                },
            ]
        );
        assert_eq!(layout.data_end, 57);
        assert_eq!(layout.checksum_offset, 63);
        assert!(!layout.hash_appended());
    }

    #[test]
    fn parses_region_at_offset() {
        let region = RegionBuilder::new(0)
            .segment(0, b"abc".to_vec())
            .build()
            .unwrap();
        let mut image = vec![0xFF; 0x100];
        image.extend_from_slice(&region);

        let layout = ImageLayout::parse(&image, 0x100).unwrap();
        assert_eq!(layout.region_offset, 0x100);
        assert_eq!(layout.segments[0].data_offset, 32);
        assert_eq!(layout.covered_range(), 0x100..0x100 + 0x30);
    }

    #[test]
    fn empty_segment_table() {
        let image = RegionBuilder::new(0).build().unwrap();
        let layout = ImageLayout::parse(&image, 0).unwrap();
        assert!(layout.segments.is_empty());
        assert!(!layout.header.is_esp32c6());
        assert_eq!(layout.data_end, SEGMENTS_START);
        assert_eq!(layout.checksum_offset, 0x1f);
    }

    #[test]
    fn rejects_short_header() {
        let image = [ESP_IMAGE_MAGIC, 0, 0, 0];
        assert!(matches!(
            ImageLayout::parse(&image, 0),
            Err(Error::TruncatedImage { needed: 24, available: 4, .. })
        ));
    }

    #[test]
    fn rejects_truncated_descriptor() {
        let mut image = RegionBuilder::new(0)
            .segment(0, vec![1, 2, 3])
            .build()
            .unwrap();
        // Claim a second segment whose descriptor would start past the end.
        image[1] = 2;
        image.truncate(40);
        assert!(matches!(
            ImageLayout::parse(&image, 0),
            Err(Error::TruncatedImage { needed: 43, .. })
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut image = RegionBuilder::new(0)
            .segment(0, vec![1, 2, 3])
            .build()
            .unwrap();
        LittleEndian::write_u32(&mut image[28..32], 0xFFFF_FFFF);
        assert!(matches!(
            ImageLayout::parse(&image, 0),
            Err(Error::TruncatedImage { .. })
        ));
    }

    #[test]
    fn rejects_missing_checksum_byte() {
        let mut image = RegionBuilder::new(0)
            .segment(0, vec![7; 8])
            .build()
            .unwrap();
        image.truncate(0x2f);
        assert!(matches!(
            ImageLayout::parse(&image, 0),
            Err(Error::TruncatedImage { needed: 0x30, .. })
        ));
    }

    #[test]
    fn rejects_region_past_end() {
        assert!(matches!(
            ImageLayout::parse(&[0; 16], 32),
            Err(Error::RegionOutOfBounds {
                region_offset: 32,
                len: 16
            })
        ));
    }
}
