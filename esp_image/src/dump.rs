// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hex listings for looking at the bytes around a region's checksum.

use crate::layout::ImageLayout;
use std::fmt::Write as _;
use std::ops::Range;

pub const BYTES_PER_ROW: usize = 16;

/// Bytes shown on each side of the checksum byte.
pub const CHECKSUM_CONTEXT: usize = 16;

/// Absolute range of `2 * CHECKSUM_CONTEXT` bytes starting `CHECKSUM_CONTEXT`
/// before the checksum byte, clipped to the buffer.
pub fn checksum_window(layout: &ImageLayout, buffer_len: usize) -> Range<usize> {
    let checksum = layout.region_offset + layout.checksum_offset;
    let start = checksum.saturating_sub(CHECKSUM_CONTEXT).min(buffer_len);
    let end = start.saturating_add(2 * CHECKSUM_CONTEXT).min(buffer_len);
    start..end
}

/// Renders `buffer[range]` as rows of `OFFSET: hex bytes  ascii`, with the
/// absolute offset of each row. A short last row is padded so the ASCII
/// column lines up.
pub fn hex_dump(buffer: &[u8], range: Range<usize>) -> String {
    let start = range.start.min(buffer.len());
    let end = range.end.clamp(start, buffer.len());

    let mut out = String::new();
    for (row, chunk) in buffer[start..end].chunks(BYTES_PER_ROW).enumerate() {
        let _ = write!(out, "{:08X}: ", start + row * BYTES_PER_ROW);
        for byte in chunk {
            let _ = write!(out, "{byte:02X} ");
        }
        out.push_str(&"   ".repeat(BYTES_PER_ROW - chunk.len()));
        out.push(' ');
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push('\n');
    }
    out
}
