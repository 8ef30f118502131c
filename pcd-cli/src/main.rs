//! PCD decoder CLI application.
//!
//! Decodes PCD point cloud files into CSV, raw table dumps, or re-encoded PCD.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use glam::Vec4;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use pcd_core::{output, ColumnSelection, DataEncoding, PcdDecoder};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

/// Payload encoding for `.pcd` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Encoding {
    Ascii,
    Binary,
}

impl From<Encoding> for DataEncoding {
    fn from(value: Encoding) -> Self {
        match value {
            Encoding::Ascii => DataEncoding::Ascii,
            Encoding::Binary => DataEncoding::Binary,
        }
    }
}

/// PCD point cloud decoder.
///
/// Decodes ascii or binary .pcd files into a fixed table of
/// x, y, z, normal_x, normal_y, normal_z, rgba, u, v, curvature.
#[derive(Parser, Debug)]
#[command(name = "pcd-decode")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input .pcd file path
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file path (.csv, .bin, .pcd)
    ///
    /// The output format is determined by the file extension:
    /// - .csv: Comma-separated values (human-readable)
    /// - .bin: Raw little-endian point table
    /// - .pcd: PCD file (see --encoding)
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Columns for CSV output.
    ///
    /// Comma-separated column names, written in the given order.
    ///
    /// Examples:
    /// - "x,y,z"
    /// - "x,y,z,rgba"
    #[arg(short, long, default_value = "x,y,z,normal_x,normal_y,normal_z,rgba,u,v,curvature")]
    columns: String,

    /// Override color applied to every point, as normalized "r,g,b,a"
    #[arg(long, value_name = "RGBA", value_parser = parse_color)]
    color: Option<Vec4>,

    /// Payload encoding for .pcd output
    #[arg(short, long, value_enum, default_value_t = Encoding::Binary)]
    encoding: Encoding,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

/// Parses four comma-separated channels in [0, 1].
fn parse_color(s: &str) -> Result<Vec4, String> {
    let channels = s
        .split(',')
        .map(|c| c.trim().parse::<f32>().map_err(|e| format!("{}: {}", c.trim(), e)))
        .collect::<Result<Vec<_>, _>>()?;

    if channels.len() != 4 {
        return Err(format!("expected 4 channels, got {}", channels.len()));
    }
    if let Some(c) = channels.iter().find(|c| !(0.0..=1.0).contains(*c)) {
        return Err(format!("channel {} is outside [0, 1]", c));
    }

    Ok(Vec4::from_slice(&channels))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let columns = ColumnSelection::from_str(&args.columns)
        .context("Invalid column list. Use comma-separated names: x,y,z,rgba")?;

    // Setup progress bar
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb
    };

    let start_time = Instant::now();

    progress.set_message(format!(
        "Decoding {:?}...",
        args.input.file_name().unwrap_or_default()
    ));

    let mut decoder = PcdDecoder::new();
    if let Some(color) = args.color {
        debug!("Overriding point colors with {}", color);
        decoder = decoder.with_point_color(color);
    }
    let cloud = decoder
        .decode_file(&args.input)
        .context("Failed to decode PCD file")?;

    let decode_duration = start_time.elapsed();

    if !args.quiet {
        progress.set_message(format!(
            "Decoded {} points in {:.2}s",
            cloud.len(),
            decode_duration.as_secs_f64()
        ));
    }

    let output_ext = args
        .output
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("csv");

    progress.set_message(format!(
        "Writing to {:?}...",
        args.output.file_name().unwrap_or_default()
    ));

    match output_ext.to_lowercase().as_str() {
        "csv" => {
            output::write_csv(&args.output, cloud.table(), columns)
                .context("Failed to write CSV output")?;
        }
        "bin" => {
            output::write_table(&args.output, cloud.table())
                .context("Failed to write binary output")?;
        }
        "pcd" => {
            output::write_pcd(&args.output, &cloud, args.encoding.into())
                .context("Failed to write PCD output")?;
        }
        _ => {
            anyhow::bail!(
                "Unsupported output format: .{}. Use .csv, .bin or .pcd",
                output_ext
            );
        }
    }

    let total_duration = start_time.elapsed();

    progress.finish_with_message(format!(
        "Done! Decoded {} points in {:.2}s ({}x{})",
        cloud.len(),
        total_duration.as_secs_f64(),
        cloud.width(),
        cloud.height()
    ));

    if !args.quiet {
        let points_per_sec = cloud.len() as f64 / total_duration.as_secs_f64();
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", args.input);
        eprintln!("  Output:       {:?}", args.output);
        eprintln!("  Points:       {}", cloud.len());
        eprintln!("  Grid:         {}x{}", cloud.width(), cloud.height());
        eprintln!("  Encoding:     {}", cloud.encoding());
        eprintln!("  Fields:       {}", cloud.header().field_names.join(" "));
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
        eprintln!("  Throughput:   {:.0} points/s", points_per_sec);
    }

    Ok(())
}
