// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use esp_image::builder::{merge_regions, RegionBuilder};
use esp_image::dump::{checksum_window, hex_dump};
use esp_image::patch::{patch, SLOT_WIDTH};
use esp_image::rewrite::recompute;
use esp_image::{
    diagnose, verify, Error, MasterImage, PatchValues, SlotName, APP_REGION, BOOTLOADER_REGION,
};
use strum::IntoEnumIterator;

/// A two-region image shaped like the shipped template: a bootloader with
/// no placeholders, and an application carrying every slot marker between
/// ordinary code and data segments.
fn template_image() -> Vec<u8> {
    let boot = RegionBuilder::new(0x4086_b000)
        .chip_id(0x000d)
        .segment(0x4086_b000, (0..0x300u32).map(|i| (i * 7) as u8).collect::<Vec<_>>())
        .segment(0x4087_0000, vec![0x13; 0x91])
        .build()
        .unwrap();

    let mut rodata = b"\x00\x00cfg\x00".to_vec();
    for slot in SlotName::iter() {
        rodata.extend_from_slice(slot.pattern());
        rodata.push(0);
    }
    let app = RegionBuilder::new(0x4200_0020)
        .chip_id(0x000d)
        .append_digest(true)
        .segment(0x4200_0020, (0..0x1000u32).map(|i| (i ^ (i >> 3)) as u8).collect::<Vec<_>>())
        .segment(0x4080_0000, rodata)
        .segment(0x4080_2000, vec![0xC3; 0x47])
        .build()
        .unwrap();

    merge_regions(&[(BOOTLOADER_REGION, &boot[..]), (APP_REGION, &app[..])])
}

fn wifi_values() -> PatchValues {
    PatchValues::default()
        .with(SlotName::NetworkName, "mynetwork")
        .with(SlotName::NetworkCredential, "mypassword")
}

#[test]
fn pristine_template_verifies() {
    let image = template_image();
    assert!(verify(&image, BOOTLOADER_REGION));
    assert!(verify(&image, APP_REGION));
}

#[test]
fn patch_then_recompute_scenario() {
    let mut image = template_image();
    assert!(verify(&image, APP_REGION));

    let report = patch(&mut image, APP_REGION, &wifi_values()).unwrap();
    assert_eq!(report.patched.len(), 2);
    assert!(!verify(&image, APP_REGION), "checksum should be stale");
    assert!(verify(&image, BOOTLOADER_REGION));

    recompute(&mut image, APP_REGION).unwrap();
    assert!(verify(&image, APP_REGION));
    assert!(verify(&image, BOOTLOADER_REGION));
}

#[test]
fn every_slot_round_trips() {
    let mut values = PatchValues::default();
    for slot in SlotName::iter() {
        values.set(slot, format!("{slot}-value"));
    }

    let mut image = template_image();
    let report = patch(&mut image, APP_REGION, &values).unwrap();
    assert!(report.missing.is_empty());
    assert_eq!(report.patched.len(), SlotName::iter().count());
    recompute(&mut image, APP_REGION).unwrap();
    assert!(verify(&image, APP_REGION));

    for patched in &report.patched {
        let slot = &image[patched.offset..patched.offset + SLOT_WIDTH];
        let expected = format!("{}-value", patched.slot);
        assert_eq!(&slot[..patched.len], expected.as_bytes());
        assert!(slot[patched.len..].iter().all(|&b| b == 0));
    }
}

#[test]
fn recompute_is_idempotent() {
    let mut image = template_image();
    patch(&mut image, APP_REGION, &wifi_values()).unwrap();
    recompute(&mut image, APP_REGION).unwrap();
    let once = image.clone();
    recompute(&mut image, APP_REGION).unwrap();
    assert_eq!(image, once);
}

#[test]
fn width_boundaries() {
    let exact = "n".repeat(SLOT_WIDTH);
    let mut image = template_image();
    patch(
        &mut image,
        APP_REGION,
        &PatchValues::default().with(SlotName::NetworkName, exact.as_str()),
    )
    .unwrap();
    recompute(&mut image, APP_REGION).unwrap();
    assert!(verify(&image, APP_REGION));

    let mut image = template_image();
    let err = patch(
        &mut image,
        APP_REGION,
        &PatchValues::default().with(SlotName::NetworkName, "n".repeat(SLOT_WIDTH + 1)),
    )
    .unwrap_err();
    assert!(matches!(err, Error::ValueTooLong { .. }));

    let mut image = template_image();
    let pristine = image.clone();
    patch(
        &mut image,
        APP_REGION,
        &PatchValues::default().with(SlotName::NetworkName, ""),
    )
    .unwrap();
    assert_eq!(image, pristine);
}

#[test]
fn patching_the_app_leaves_the_bootloader_alone() {
    let mut image = template_image();
    let pristine = image.clone();
    patch(&mut image, APP_REGION, &wifi_values()).unwrap();
    recompute(&mut image, APP_REGION).unwrap();
    assert_eq!(&image[..APP_REGION], &pristine[..APP_REGION]);
}

#[test]
fn bootloader_region_has_no_slots() {
    let mut image = template_image();
    let report = patch(&mut image, BOOTLOADER_REGION, &wifi_values()).unwrap();
    assert_eq!(
        report.missing,
        vec![SlotName::NetworkName, SlotName::NetworkCredential]
    );
    assert!(verify(&image, BOOTLOADER_REGION));
}

#[test]
fn diagnostic_reports_expected_and_actual() {
    let mut image = template_image();
    patch(&mut image, APP_REGION, &wifi_values()).unwrap();
    let before = image.clone();

    let d = diagnose(&image, APP_REGION);
    assert!(!d.is_valid());
    assert!(!d.checksum_matches());
    assert_ne!(d.stored_checksum, d.computed_checksum);
    assert_eq!(image, before);

    let rewritten = recompute(&mut image, APP_REGION).unwrap();
    let d = diagnose(&image, APP_REGION);
    assert!(d.is_valid());
    assert_eq!(d.stored_checksum, Some(rewritten.checksum));
    assert_eq!(d.digest, esp_image::DigestStatus::Valid);
}

#[test]
fn master_image_provisions_verified_copies() {
    let master = MasterImage::from_bytes(template_image()).unwrap();
    let provisioned = master.provision(APP_REGION, &wifi_values()).unwrap();
    assert!(verify(&provisioned.image, APP_REGION));
    assert!(verify(&provisioned.image, BOOTLOADER_REGION));
    assert!(verify(master.as_bytes(), APP_REGION));
    assert_eq!(provisioned.image.len(), master.len());
}

#[test]
fn inspection_details_for_each_region() {
    let mut image = template_image();
    for region_offset in [BOOTLOADER_REGION, APP_REGION] {
        let d = diagnose(&image, region_offset);
        assert_eq!(d.chip_id_valid, Some(true));
        assert!(!d.checksum_unset());

        let layout = d.layout.unwrap();
        let checksum_at = region_offset + layout.checksum_offset;
        let window = checksum_window(&layout, image.len());
        assert_eq!(window, checksum_at - 16..checksum_at + 16);

        let dump = hex_dump(&image, window);
        assert_eq!(dump.lines().count(), 2);
        let second_row = dump.lines().nth(1).unwrap();
        let expected = format!("{checksum_at:08X}: {:02X} ", image[checksum_at]);
        assert!(second_row.starts_with(&expected), "{dump}");
    }

    let layout = diagnose(&image, APP_REGION).layout.unwrap();
    image[APP_REGION + layout.checksum_offset] = 0x00;
    let d = diagnose(&image, APP_REGION);
    assert!(d.checksum_unset());
    assert!(!d.is_valid());
}
