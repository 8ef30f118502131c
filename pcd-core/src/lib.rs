//! PCD point cloud loader.
//!
//! This crate decodes Point Cloud Data (`.pcd`) files into a render-ready
//! table of points. Each point is stored as ten `f32` columns: position,
//! normal, packed RGBA color, texture coordinates and curvature.
//!
//! # Example
//!
//! ```no_run
//! use pcd_core::{Column, PcdDecoder};
//!
//! let decoder = PcdDecoder::new();
//! let cloud = decoder.decode_file("scan.pcd").unwrap();
//!
//! println!("Decoded {} points ({}x{})", cloud.len(), cloud.width(), cloud.height());
//! println!("First x: {}", cloud.table().get(0, Column::X));
//! ```
//!
//! # Features
//!
//! - `ascii` and `binary` payloads with arbitrary field order and extra fields
//! - Optional override color applied to every point
//! - Clean rejection of `binary_compressed` payloads
//! - CSV, raw table and PCD re-encoding writers

pub mod cloud;
pub mod decoder;
pub mod fields;
pub mod header;
pub mod output;
pub mod types;

// Re-export commonly used types
pub use cloud::{PointCloud, RenderMode, Renderable};
pub use decoder::{DecodeError, ErrorKind, PcdDecoder};
pub use output::{ColumnSelection, OutputError};
pub use types::{Column, DataEncoding, PackedColor, PcdHeader, PointTable, Viewpoint, COLUMNS};
