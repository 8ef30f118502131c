//! Core types for PCD point cloud data.
//!
//! This module defines the parsed header metadata, the packed color
//! representation and the fixed 10-column point table produced by the decoder.

use glam::{Mat4, Quat, Vec3, Vec4};
use std::fmt;

use crate::decoder::DecodeError;

/// Number of columns in a decoded [`PointTable`].
pub const COLUMNS: usize = 10;

/// Payload encoding declared by the `DATA` header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataEncoding {
    /// Whitespace separated tokens, one point per line
    #[default]
    Ascii,
    /// Fixed-stride little-endian records
    Binary,
    /// LZF compressed column-major records (recognized, not decodable)
    BinaryCompressed,
}

impl DataEncoding {
    /// Parses the value of a `DATA` line. Matching is case-sensitive.
    #[inline]
    pub fn from_keyword(value: &str) -> Option<Self> {
        match value {
            "ascii" => Some(Self::Ascii),
            "binary" => Some(Self::Binary),
            "binary_compressed" => Some(Self::BinaryCompressed),
            _ => None,
        }
    }

    /// Returns the header keyword for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Binary => "binary",
            Self::BinaryCompressed => "binary_compressed",
        }
    }
}

impl fmt::Display for DataEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor acquisition pose from the `VIEWPOINT` line.
///
/// The pose is kept alongside the cloud but never applied to the decoded
/// coordinates, which stay in file-local space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    /// Translation (tx, ty, tz)
    pub origin: Vec3,
    /// Orientation quaternion (qw, qx, qy, qz in the file)
    pub orientation: Quat,
}

impl Default for Viewpoint {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl Viewpoint {
    /// Composes origin and orientation into a single rigid transform.
    ///
    /// A zero quaternion falls back to the identity rotation; any other
    /// quaternion is normalized first.
    pub fn transform(&self) -> Mat4 {
        let rotation = if self.orientation.length_squared() > 0.0 {
            self.orientation.normalize()
        } else {
            Quat::IDENTITY
        };
        Mat4::from_rotation_translation(rotation, self.origin)
    }
}

/// Header metadata parsed from the text prologue of a PCD file.
///
/// The four field sequences are kept exactly as declared; their lengths are
/// only checked once a payload decoder resolves the field layout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PcdHeader {
    /// Value of the `VERSION` line, if any
    pub version: Option<String>,
    /// Field names in declaration order
    pub field_names: Vec<String>,
    /// Byte size of one element of each field
    pub field_sizes: Vec<usize>,
    /// Element type code of each field (`F`, `U`, `I`)
    pub field_types: Vec<char>,
    /// Number of elements packed under each field
    pub field_counts: Vec<usize>,
    /// Declared grid width
    pub width: Option<u32>,
    /// Declared grid height
    pub height: Option<u32>,
    /// Sensor pose
    pub viewpoint: Viewpoint,
    /// Declared number of points
    pub points: u32,
    /// Payload encoding
    pub encoding: DataEncoding,
}

/// One declared field, assembled from the parallel header sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor<'a> {
    pub name: &'a str,
    pub size: usize,
    pub kind: char,
    pub count: usize,
}

impl FieldDescriptor<'_> {
    /// Bytes this field occupies in one binary record.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.size * self.count
    }
}

impl PcdHeader {
    /// Zips the field sequences into descriptors.
    ///
    /// Fails with a format error when `FIELDS`, `SIZE`, `TYPE` and `COUNT`
    /// declare a different number of entries.
    pub fn fields(&self) -> Result<Vec<FieldDescriptor<'_>>, DecodeError> {
        let n = self.field_names.len();
        if self.field_sizes.len() != n || self.field_types.len() != n || self.field_counts.len() != n
        {
            return Err(DecodeError::InvalidFormat(format!(
                "field declarations disagree: {} FIELDS, {} SIZE, {} TYPE, {} COUNT",
                n,
                self.field_sizes.len(),
                self.field_types.len(),
                self.field_counts.len()
            )));
        }

        Ok(self
            .field_names
            .iter()
            .zip(&self.field_sizes)
            .zip(&self.field_types)
            .zip(&self.field_counts)
            .map(|(((name, &size), &kind), &count)| FieldDescriptor {
                name,
                size,
                kind,
                count,
            })
            .collect())
    }
}

/// Four 8-bit color channels stored together as one 32-bit value.
///
/// Byte `i` of the little-endian 32-bit pattern holds channel `i` in
/// r, g, b, a order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(C)]
pub struct PackedColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl PackedColor {
    /// Creates a color from its four channels.
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }

    #[inline]
    pub const fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Unpacks a 32-bit pattern as read from the file.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self::from_bytes(bits.to_le_bytes())
    }

    /// Packs the channels back into a 32-bit pattern.
    #[inline]
    pub const fn to_bits(self) -> u32 {
        u32::from_le_bytes(self.to_bytes())
    }

    /// Stores the bit pattern in an `f32` slot without numeric conversion.
    #[inline]
    pub fn to_f32_bits(self) -> f32 {
        f32::from_bits(self.to_bits())
    }

    /// Recovers a color previously stored with [`PackedColor::to_f32_bits`].
    #[inline]
    pub fn from_f32_bits(value: f32) -> Self {
        Self::from_bits(value.to_bits())
    }

    /// Converts normalized channels to 8 bits by scaling with 255 and truncating.
    pub fn from_normalized(color: Vec4) -> Self {
        let scaled = color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0;
        Self::new(
            scaled.x as u8,
            scaled.y as u8,
            scaled.z as u8,
            scaled.w as u8,
        )
    }
}

/// Columns of the decoded point table, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    X = 0,
    Y = 1,
    Z = 2,
    NormalX = 3,
    NormalY = 4,
    NormalZ = 5,
    /// Packed color bit pattern
    Rgba = 6,
    U = 7,
    V = 8,
    Curvature = 9,
}

impl Column {
    /// All columns in storage order.
    pub const ALL: [Column; COLUMNS] = [
        Self::X,
        Self::Y,
        Self::Z,
        Self::NormalX,
        Self::NormalY,
        Self::NormalZ,
        Self::Rgba,
        Self::U,
        Self::V,
        Self::Curvature,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
            Self::NormalX => "normal_x",
            Self::NormalY => "normal_y",
            Self::NormalZ => "normal_z",
            Self::Rgba => "rgba",
            Self::U => "u",
            Self::V => "v",
            Self::Curvature => "curvature",
        }
    }

    /// Looks up a column by its name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

/// Dense row-major table of decoded points with [`COLUMNS`] fixed columns.
///
/// Columns that the file does not provide stay zero. The texture coordinate
/// columns are always zero for PCD input.
///
/// Equality compares raw bit patterns, since the color column holds packed
/// bytes that may read back as NaN.
#[derive(Debug, Clone, Default)]
pub struct PointTable {
    data: Vec<f32>,
}

impl PartialEq for PointTable {
    fn eq(&self, other: &Self) -> bool {
        self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl PointTable {
    /// Creates an empty table with room for `rows` points.
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            data: Vec::with_capacity(rows.saturating_mul(COLUMNS)),
        }
    }

    /// Appends one decoded point.
    #[inline]
    pub fn push_row(&mut self, row: [f32; COLUMNS]) {
        self.data.extend_from_slice(&row);
    }

    /// Number of points in the table.
    #[inline]
    pub fn rows(&self) -> usize {
        self.data.len() / COLUMNS
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns one point as a slice of [`COLUMNS`] values.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    #[inline]
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * COLUMNS..(row + 1) * COLUMNS]
    }

    /// Iterates over all rows.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(COLUMNS)
    }

    #[inline]
    pub fn get(&self, row: usize, column: Column) -> f32 {
        self.data[row * COLUMNS + column.index()]
    }

    /// Iterates over one column.
    pub fn column(&self, column: Column) -> impl Iterator<Item = f32> + '_ {
        self.iter_rows().map(move |row| row[column.index()])
    }

    /// Decodes the packed color of a row.
    #[inline]
    pub fn color(&self, row: usize) -> PackedColor {
        PackedColor::from_f32_bits(self.get(row, Column::Rgba))
    }

    /// Raw row-major storage.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}
