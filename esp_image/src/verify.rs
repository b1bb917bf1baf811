// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::checksum::{compute_checksum, crc32_informational};
use crate::digest::check_digest;
pub use crate::digest::DigestStatus;
use crate::layout::{ImageLayout, HASH_APPENDED_OFFSET};
use hex::ToHex as _;
use log::{debug as okay, error, info, trace, warn};
use serde::Serialize;
use std::io::Write as _;

/// Separates the module path from the region offset in the targets used by
/// [`Diagnostic::log`], e.g. `esp_image::verify@0x20000`.
const REGION_TARGET_SEP: char = '@';

fn region_target(region_offset: usize) -> String {
    format!("{}{REGION_TARGET_SEP}{region_offset:#x}", module_path!())
}

/// Region column for a record target; empty for records not about a region.
fn region_column(target: &str) -> &str {
    target
        .rsplit_once(REGION_TARGET_SEP)
        .map_or("", |(_, region)| region)
}

/// Initializes a logger that prints the region reports from
/// [`Diagnostic::log`] as `STATUS | REGION | message` rows.
///
/// `RUST_LOG=esp_image` style filters still apply, since every region target
/// starts with the module path.
pub fn init_verify_logger(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .format(|buf, record| {
            let (status, color) = match record.level() {
                log::Level::Error => ("FAIL", env_logger::fmt::Color::Red),
                log::Level::Warn => ("WARN", env_logger::fmt::Color::Yellow),
                log::Level::Debug => ("OKAY", env_logger::fmt::Color::Green),
                log::Level::Info => ("", env_logger::fmt::Color::Cyan),
                log::Level::Trace => ("", env_logger::fmt::Color::Blue),
            };
            let mut style = buf.style();
            style.set_color(color);

            let region = region_column(record.target());
            let indent = format!("\n{:4} | {:>7} | ", "", "");

            writeln!(
                buf,
                "{:4} | {:>7} | {}",
                style.value(status),
                region,
                record.args().to_string().replace('\n', &indent)
            )
        })
        .filter(
            None,
            if verbose {
                log::LevelFilter::Trace
            } else {
                log::LevelFilter::Debug
            },
        )
        .init();
}

/// Everything learned while checking one region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub region_offset: usize,
    pub layout: Option<ImageLayout>,
    /// Checksum byte found in the image.
    pub stored_checksum: Option<u8>,
    /// Checksum computed from the segment payloads.
    pub computed_checksum: Option<u8>,
    pub digest: DigestStatus,
    /// Whether the header names the ESP32-C6. Reported, never required.
    pub chip_id_valid: Option<bool>,
    /// Informational CRC-32, see [`crc32_informational`].
    pub crc32: Option<u32>,
    /// Why the region could not be parsed at all.
    pub error: Option<String>,
}

impl Diagnostic {
    fn unparsable(region_offset: usize, error: String) -> Self {
        Self {
            region_offset,
            layout: None,
            stored_checksum: None,
            computed_checksum: None,
            digest: DigestStatus::Unchecked,
            chip_id_valid: None,
            crc32: None,
            error: Some(error),
        }
    }

    pub fn checksum_matches(&self) -> bool {
        matches!(
            (self.stored_checksum, self.computed_checksum),
            (Some(stored), Some(computed)) if stored == computed
        )
    }

    /// A mismatching checksum slot that holds 0x00 usually means the image
    /// never had a checksum written, not that its payload changed.
    pub fn checksum_unset(&self) -> bool {
        self.stored_checksum == Some(0x00) && !self.checksum_matches()
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none() && self.checksum_matches() && self.digest.is_acceptable()
    }

    /// Reports the result through `log`; use [`init_verify_logger`] for a
    /// readable rendering.
    pub fn log(&self) {
        let target = region_target(self.region_offset);
        let target = target.as_str();

        info!(target: target, "Checking region at {:#x}", self.region_offset);
        if let Some(e) = &self.error {
            error!(target: target, "{e}");
            return;
        }

        if let Some(layout) = &self.layout {
            let header = &layout.header;
            if header.has_valid_magic() {
                okay!(target: target, "Magic byte is {:#04x}", header.magic);
            } else {
                warn!(target: target, "Unexpected magic byte {:#04x}", header.magic);
            }
            if header.is_esp32c6() {
                okay!(target: target, "Chip id {:#06x} is ESP32-C6", header.chip_id);
            } else {
                warn!(target: target, "Chip id {:#06x} is not ESP32-C6", header.chip_id);
            }
            trace!(target: target, "entry address: {:#010x}", header.entry_addr);
            for (i, segment) in layout.segments.iter().enumerate() {
                trace!(
                    target: target,
                    "segment {i}: load {:#010x}, {} bytes at +{:#x}",
                    segment.load_addr,
                    segment.data_len,
                    segment.data_offset
                );
            }
            trace!(target: target, "checksum offset: +{:#x}", layout.checksum_offset);
        }

        match (self.stored_checksum, self.computed_checksum) {
            (Some(stored), Some(computed)) if stored == computed => {
                okay!(target: target, "Checksum {stored:02x} matches")
            }
            (Some(stored), Some(computed)) => error!(
                target: target,
                "Checksum mismatch: image has {stored:02x}, computed {computed:02x}"
            ),
            _ => {}
        }
        if self.checksum_unset() {
            warn!(
                target: target,
                "Stored checksum is 00; it was probably never written for this image"
            );
        }

        match self.digest {
            DigestStatus::NotAppended => okay!(target: target, "No SHA-256 digest appended"),
            DigestStatus::Valid => okay!(target: target, "Appended SHA-256 digest matches"),
            DigestStatus::Mismatch => {
                error!(target: target, "Appended SHA-256 digest does not match")
            }
            DigestStatus::Truncated => error!(
                target: target,
                "Digest flag is set but the digest runs past the end of the image"
            ),
            DigestStatus::Unchecked => {}
        }

        if let Some(crc) = self.crc32 {
            trace!(target: target, "crc32 (informational): {crc:08x}");
        }
    }
}

/// Inspects one region without touching the buffer.
pub fn diagnose(buffer: &[u8], region_offset: usize) -> Diagnostic {
    if region_offset
        .checked_add(HASH_APPENDED_OFFSET + 1)
        .map_or(true, |end| end > buffer.len())
    {
        return Diagnostic::unparsable(
            region_offset,
            format!(
                "region at {region_offset:#x} does not fit a header in a {}-byte image",
                buffer.len()
            ),
        );
    }

    let layout = match ImageLayout::parse(buffer, region_offset) {
        Ok(layout) => layout,
        Err(e) => return Diagnostic::unparsable(region_offset, e.to_string()),
    };

    let stored = buffer[region_offset + layout.checksum_offset];
    let computed = compute_checksum(buffer, region_offset, &layout.segments);
    let digest = if layout.hash_appended() {
        check_digest(buffer, region_offset, layout.checksum_offset)
    } else {
        DigestStatus::NotAppended
    };
    if digest == DigestStatus::Mismatch {
        let stored: &[u8] = &buffer[region_offset..][layout.digest_range()];
        trace!(
            target: region_target(region_offset).as_str(),
            "stored digest: {}",
            stored.encode_hex::<String>()
        );
    }
    let crc32 = crc32_informational(buffer, &layout);
    let chip_id_valid = layout.header.is_esp32c6();

    Diagnostic {
        region_offset,
        layout: Some(layout),
        stored_checksum: Some(stored),
        computed_checksum: Some(computed),
        digest,
        chip_id_valid: Some(chip_id_valid),
        crc32: Some(crc32),
        error: None,
    }
}

/// A region is valid when its stored checksum matches the payloads and, if
/// the digest flag is set, the appended digest matches too. Never fails; a
/// region that cannot be parsed is simply invalid.
pub fn verify(buffer: &[u8], region_offset: usize) -> bool {
    let diagnostic = diagnose(buffer, region_offset);
    diagnostic.log();
    diagnostic.is_valid()
}
