// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use esp_image::dump::{checksum_window, hex_dump};
use esp_image::verify::init_verify_logger;
use esp_image::{diagnose, Diagnostic, MasterImage, PatchValues, APP_REGION, REGIONS};
use hex::ToHex as _;
use log::{info, warn};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
enum Command {
    /// Check the checksum and digest of one or more image regions
    Verify {
        #[clap(short, long)]
        verbose: bool,

        /// Region base offset; may be repeated. Defaults to the bootloader
        /// and application regions.
        #[arg(short, long = "region", value_parser = parse_int::parse::<usize>)]
        regions: Vec<usize>,

        image: PathBuf,
    },
    /// Print the header, segment table and integrity values of regions
    Inspect {
        /// Region base offset; may be repeated
        #[arg(short, long = "region", value_parser = parse_int::parse::<usize>)]
        regions: Vec<usize>,

        /// Emit JSON instead of text
        #[clap(long)]
        json: bool,

        /// Also dump the bytes around each checksum
        #[clap(long)]
        hex: bool,

        image: PathBuf,
    },
    /// Substitute configuration values into a copy of a template image
    Patch {
        /// template image (binary)
        #[clap(short = 'i', long = "in")]
        src_img: PathBuf,

        /// output file (binary)
        #[clap(short = 'o', long = "out")]
        dst_img: PathBuf,

        /// Base offset of the region holding the placeholders
        #[arg(long, value_parser = parse_int::parse::<usize>, default_value_t = APP_REGION)]
        region: usize,

        /// TOML file of slot values; flags below take precedence
        #[clap(long)]
        values: Option<PathBuf>,

        #[clap(flatten)]
        overrides: PatchValues,
    },
    /// Write a values file listing every placeholder slot
    ValuesTemplate {
        /// output file (TOML)
        #[clap(short = 'o', long = "out")]
        dest: PathBuf,
    },
}

#[derive(Debug, Parser)]
#[clap(name = "esp-image")]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,
}

fn main() -> Result<()> {
    let cmd = Opts::parse();

    // Verify has a custom logger; everyone else can use the default
    if !matches!(cmd.cmd, Command::Verify { .. }) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match cmd.cmd {
        Command::Verify {
            verbose,
            regions,
            image,
        } => {
            init_verify_logger(verbose);
            let bytes = read_image(&image)?;
            let mut failed = Vec::new();
            for region_offset in regions_or_default(regions) {
                if !esp_image::verify(&bytes, region_offset) {
                    failed.push(format!("{region_offset:#x}"));
                }
            }
            if !failed.is_empty() {
                bail!("verification failed for region(s) {}", failed.join(", "));
            }
        }
        Command::Inspect {
            regions,
            json,
            hex,
            image,
        } => {
            let bytes = read_image(&image)?;
            let reports: Vec<Diagnostic> = regions_or_default(regions)
                .into_iter()
                .map(|region_offset| diagnose(&bytes, region_offset))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    print_diagnostic(&bytes, report);
                    if hex {
                        print_checksum_dump(&bytes, report);
                    }
                }
            }
        }
        Command::Patch {
            src_img,
            dst_img,
            region,
            values,
            overrides,
        } => {
            let values = match values {
                Some(path) => read_values(&path)?.merge(overrides),
                None => overrides,
            };
            if values.iter().next().is_none() {
                warn!("no values given; output will be an unmodified copy");
            }

            let master = MasterImage::load(&src_img)
                .with_context(|| format!("could not load template {}", src_img.display()))?;
            let provisioned = master.provision(region, &values)?;
            for slot in &provisioned.report.missing {
                println!(
                    "{}: no placeholder for {slot}; slot left unpatched",
                    "WARNING".yellow()
                );
            }

            std::fs::write(&dst_img, &provisioned.image)
                .with_context(|| format!("could not write {}", dst_img.display()))?;
            info!(
                "Patched image written to {} (checksum {:02x})",
                dst_img.display(),
                provisioned.checksum
            );
        }
        Command::ValuesTemplate { dest } => {
            let body = toml::to_string(&PatchValues::template())?;
            let contents = format!(
                "# Placeholder values for `esp-image patch --values`.\n\
                 # Empty values leave their slot untouched; each value holds at most {} bytes.\n\
                 {body}",
                esp_image::patch::SLOT_WIDTH
            );
            std::fs::write(&dest, contents)
                .with_context(|| format!("could not write {}", dest.display()))?;
            info!("Values template written to {}", dest.display());
        }
    }

    Ok(())
}

fn regions_or_default(regions: Vec<usize>) -> Vec<usize> {
    if regions.is_empty() {
        REGIONS.to_vec()
    } else {
        regions
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("could not open {}", path.display()))
}

fn read_values(path: &Path) -> Result<PatchValues> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("could not open {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("could not parse {}", path.display()))
}

fn print_diagnostic(bytes: &[u8], report: &Diagnostic) {
    println!("{}", format!("region {:#x}", report.region_offset).bold());
    if let Some(e) = &report.error {
        println!("  {}: {e}", "ERROR".red());
        return;
    }

    if let Some(layout) = &report.layout {
        let header = &layout.header;
        let magic = format!("{:#04x}", header.magic);
        println!(
            "  magic:           {}",
            if header.has_valid_magic() {
                magic.normal()
            } else {
                magic.yellow()
            }
        );
        println!("  entry address:   {:#010x}", header.entry_addr);
        let chip = format!("{:#06x}", header.chip_id);
        println!(
            "  chip id:         {}",
            if header.is_esp32c6() {
                format!("{} (ESP32-C6)", chip).normal()
            } else {
                format!("{} (not ESP32-C6)", chip).yellow()
            }
        );
        println!("  segments:        {}", layout.segments.len());
        for (i, segment) in layout.segments.iter().enumerate() {
            println!(
                "    [{i}] load {:#010x}  len {:#8x}  at +{:#x}",
                segment.load_addr, segment.data_len, segment.data_offset
            );
        }
        println!("  checksum offset: +{:#x}", layout.checksum_offset);
        if layout.hash_appended() {
            if let Some(stored) = bytes
                .get(layout.region_offset..)
                .and_then(|region| region.get(layout.digest_range()))
            {
                println!("  stored digest:   {}", stored.encode_hex::<String>());
            }
        }
    }

    if let (Some(stored), Some(computed)) = (report.stored_checksum, report.computed_checksum) {
        let line = format!("{stored:02x} (computed {computed:02x})");
        println!(
            "  checksum:        {}",
            if stored == computed {
                line.green()
            } else {
                line.red()
            }
        );
    }
    if report.checksum_unset() {
        println!(
            "  {}: stored checksum is 00; the image may be incomplete or was \
             built without a checksum",
            "NOTE".yellow()
        );
    }
    println!("  digest:          {:?}", report.digest);
    if let Some(crc) = report.crc32 {
        println!("  crc32 (info):    {crc:08x}");
    }
    println!(
        "  status:          {}",
        if report.is_valid() {
            "VALID".green()
        } else {
            "INVALID".red()
        }
    );
}

fn print_checksum_dump(bytes: &[u8], report: &Diagnostic) {
    if let Some(layout) = &report.layout {
        println!("  around checksum:");
        for line in hex_dump(bytes, checksum_window(layout, bytes.len())).lines() {
            println!("    {line}");
        }
    }
}
