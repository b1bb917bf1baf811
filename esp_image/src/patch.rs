// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-width substitution of configuration placeholders.
//!
//! The template firmware is built with a 64-byte ASCII marker in place of
//! every run-time setting. Patching overwrites a marker with the value,
//! left-justified and zero-filled, so the image never changes size.
//!
//! If any value is longer than its slot the whole call is rejected before a
//! single byte is written. A marker that cannot be found is only a warning:
//! the slot is reported in [`PatchReport::missing`] and left as it was.

use crate::layout::ImageLayout;
use crate::Error;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

/// Width of every placeholder slot in bytes.
pub const SLOT_WIDTH: usize = 64;

// These bytes are a contract with the firmware build; do not derive them.
const NETWORK_NAME_PATTERN: &[u8; SLOT_WIDTH] =
    b"WIFISSIDWIFISSIDWIFISSIDWIFISSIDWIFISSIDWIFISSIDWIFISSIDWIFISSID";
const NETWORK_CREDENTIAL_PATTERN: &[u8; SLOT_WIDTH] =
    b"WIFIPWDWIFIPWDWIFIPWDWIFIPWDWIFIPWDWIFIPWDWIFIPWDWIFIPWDWIFIPWDW";
const PAYMENT_ADDRESS_PATTERN: &[u8; SLOT_WIDTH] =
    b"PAYADDRPAYADDRPAYADDRPAYADDRPAYADDRPAYADDRPAYADDRPAYADDRPAYADDRP";
const AUTH_TOKEN_PATTERN: &[u8; SLOT_WIDTH] =
    b"AUTHTOKENAUTHTOKENAUTHTOKENAUTHTOKENAUTHTOKENAUTHTOKENAUTHTOKENA";
const SERVICE_URI_PATTERN: &[u8; SLOT_WIDTH] =
    b"SERVICEURISERVICEURISERVICEURISERVICEURISERVICEURISERVICEURISERV";

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SlotName {
    NetworkName,
    NetworkCredential,
    PaymentAddress,
    AuthToken,
    ServiceUri,
}

impl SlotName {
    /// The marker embedded in the template image.
    pub const fn pattern(self) -> &'static [u8; SLOT_WIDTH] {
        match self {
            SlotName::NetworkName => NETWORK_NAME_PATTERN,
            SlotName::NetworkCredential => NETWORK_CREDENTIAL_PATTERN,
            SlotName::PaymentAddress => PAYMENT_ADDRESS_PATTERN,
            SlotName::AuthToken => AUTH_TOKEN_PATTERN,
            SlotName::ServiceUri => SERVICE_URI_PATTERN,
        }
    }

    pub const fn width(self) -> usize {
        self.pattern().len()
    }
}

/// Values to substitute, one optional string per slot. Absent and empty
/// values leave their slot untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PatchValues {
    /// Wi-Fi network name (SSID)
    #[cfg_attr(feature = "clap", arg(long))]
    #[serde(default)]
    pub network_name: Option<String>,

    /// Wi-Fi passphrase
    #[cfg_attr(feature = "clap", arg(long))]
    #[serde(default)]
    pub network_credential: Option<String>,

    /// Address that receives payments for this device
    #[cfg_attr(feature = "clap", arg(long))]
    #[serde(default)]
    pub payment_address: Option<String>,

    /// Token the device presents to the backend
    #[cfg_attr(feature = "clap", arg(long))]
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Backend URI the device connects to
    #[cfg_attr(feature = "clap", arg(long))]
    #[serde(default)]
    pub service_uri: Option<String>,
}

impl PatchValues {
    fn field(&self, slot: SlotName) -> &Option<String> {
        match slot {
            SlotName::NetworkName => &self.network_name,
            SlotName::NetworkCredential => &self.network_credential,
            SlotName::PaymentAddress => &self.payment_address,
            SlotName::AuthToken => &self.auth_token,
            SlotName::ServiceUri => &self.service_uri,
        }
    }

    fn field_mut(&mut self, slot: SlotName) -> &mut Option<String> {
        match slot {
            SlotName::NetworkName => &mut self.network_name,
            SlotName::NetworkCredential => &mut self.network_credential,
            SlotName::PaymentAddress => &mut self.payment_address,
            SlotName::AuthToken => &mut self.auth_token,
            SlotName::ServiceUri => &mut self.service_uri,
        }
    }

    /// Returns the value for `slot` if it is present and non-empty.
    pub fn get(&self, slot: SlotName) -> Option<&str> {
        self.field(slot).as_deref().filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, slot: SlotName, value: impl Into<String>) {
        *self.field_mut(slot) = Some(value.into());
    }

    pub fn with(mut self, slot: SlotName, value: impl Into<String>) -> Self {
        self.set(slot, value);
        self
    }

    /// Fills every slot `overrides` leaves unset from `self`.
    pub fn merge(mut self, overrides: PatchValues) -> PatchValues {
        for slot in SlotName::iter() {
            if let Some(value) = overrides.field(slot).clone() {
                *self.field_mut(slot) = Some(value);
            }
        }
        self
    }

    /// Present, non-empty values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotName, &str)> + '_ {
        SlotName::iter().filter_map(move |slot| self.get(slot).map(|v| (slot, v)))
    }

    /// Every slot set to an empty string, for writing out a values file.
    pub fn template() -> Self {
        SlotName::iter().fold(Self::default(), |values, slot| values.with(slot, ""))
    }

    /// Rejects the whole set if any value is wider than its slot.
    pub fn check_widths(&self) -> Result<(), Error> {
        for (slot, value) in self.iter() {
            if value.len() > slot.width() {
                return Err(Error::ValueTooLong {
                    slot,
                    len: value.len(),
                    width: slot.width(),
                });
            }
        }
        Ok(())
    }
}

/// A slot that was overwritten.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PatchedSlot {
    pub slot: SlotName,
    /// Absolute offset of the slot in the buffer.
    pub offset: usize,
    /// Bytes of the value; the rest of the slot is zero.
    pub len: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    pub patched: Vec<PatchedSlot>,
    /// Slots with a value whose marker was not found.
    pub missing: Vec<SlotName>,
    /// Slots with no value.
    pub skipped: Vec<SlotName>,
}

impl PatchReport {
    /// Whether any byte of the buffer changed.
    pub fn changed(&self) -> bool {
        !self.patched.is_empty()
    }
}

fn find_slot(haystack: &[u8], slot: SlotName) -> Option<usize> {
    haystack
        .windows(slot.width())
        .position(|window| window == &slot.pattern()[..])
}

/// Substitutes `values` into the region at `region_offset`, in place.
///
/// Markers are searched for within the region's data area (header through
/// the last segment payload), first occurrence wins. The checksum is left
/// stale; follow up with [`crate::rewrite::recompute`].
///
/// `buffer` must be a private copy. Patching a buffer other callers read
/// from races with them and corrupts the checksum for everyone.
pub fn patch(
    buffer: &mut [u8],
    region_offset: usize,
    values: &PatchValues,
) -> Result<PatchReport, Error> {
    values.check_widths()?;
    let layout = ImageLayout::parse(buffer, region_offset)?;
    let window = region_offset..region_offset + layout.data_end;

    let mut report = PatchReport::default();
    for slot in SlotName::iter() {
        let Some(value) = values.get(slot) else {
            report.skipped.push(slot);
            continue;
        };

        let Some(position) = find_slot(&buffer[window.clone()], slot) else {
            warn!(
                "placeholder for {slot} not found in region at {region_offset:#x}; \
                 leaving it unpatched"
            );
            report.missing.push(slot);
            continue;
        };

        let mut staging = [0u8; SLOT_WIDTH];
        staging[..value.len()].copy_from_slice(value.as_bytes());
        let offset = window.start + position;
        buffer[offset..offset + SLOT_WIDTH].copy_from_slice(&staging);

        debug!("patched {slot} at {offset:#x} ({} bytes)", value.len());
        report.patched.push(PatchedSlot {
            slot,
            offset,
            len: value.len(),
        });
    }

    Ok(report)
}
