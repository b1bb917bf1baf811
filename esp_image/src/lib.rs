// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsing, verification and placeholder patching of ESP-style boot images.
//!
//! A physical image file carries two independently checksummed regions, the
//! bootloader at [`BOOTLOADER_REGION`] and the application at [`APP_REGION`].
//! Every function here takes a caller-owned buffer plus a region offset and
//! keeps nothing between calls.

pub mod builder;
pub mod checksum;
pub mod digest;
pub mod dump;
pub mod layout;
pub mod master;
pub mod patch;
pub mod rewrite;
pub mod verify;

pub use layout::{ImageLayout, RegionHeader, SegmentDescriptor};
pub use master::MasterImage;
pub use patch::{PatchReport, PatchValues, SlotName};
pub use verify::{diagnose, verify, Diagnostic, DigestStatus};

/// Base offset of the bootloader region within a merged image.
pub const BOOTLOADER_REGION: usize = 0x0;

/// Base offset of the application region within a merged image.
pub const APP_REGION: usize = 0x20000;

/// Both regions, in file order.
pub const REGIONS: [usize; 2] = [BOOTLOADER_REGION, APP_REGION];

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(
        "image region at {region_offset:#x} is truncated: \
         needed {needed} bytes, only {available} available"
    )]
    TruncatedImage {
        region_offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("region offset {region_offset:#x} lies outside a {len}-byte image")]
    RegionOutOfBounds { region_offset: usize, len: usize },

    #[error("value for {slot} is {len} bytes; the slot only holds {width}")]
    ValueTooLong {
        slot: SlotName,
        len: usize,
        width: usize,
    },

    #[error("too many segments: a region holds at most 255, got {0}")]
    TooManySegments(usize),

    #[error("could not fit segment length in a `u32`")]
    SegmentLengthOverflow,

    #[error("integrity check failed for region at {region_offset:#x}; see log for details")]
    IntegrityCheckFailed { region_offset: usize },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
