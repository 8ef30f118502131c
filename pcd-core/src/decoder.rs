//! PCD payload decoder.
//!
//! This module drives a full load: header parsing, field resolution, payload
//! decoding into the fixed point table, and the final grid validation.

use crate::cloud::PointCloud;
use crate::fields::{FieldLayout, VALUE_SIZE};
use crate::header;
use crate::types::{Column, DataEncoding, PackedColor, PcdHeader, PointTable, COLUMNS};
use byteorder::{ByteOrder, LittleEndian};
use glam::Vec4;
use log::info;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while loading a PCD file.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Input PCD file \"{}\" does not exist", .0.display())]
    InputMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported PCD payload encoding \"{0}\": only ascii and binary are supported")]
    UnsupportedEncoding(DataEncoding),

    #[error("Line {line}: invalid value \"{token}\": {reason}")]
    InvalidToken {
        line: usize,
        token: String,
        reason: String,
    },

    #[error("Line {line}: no value at column {index}, line has {available} tokens")]
    MissingToken {
        line: usize,
        index: usize,
        available: usize,
    },

    #[error("Unexpected end of file after {decoded} of {expected} points")]
    UnexpectedEof { decoded: usize, expected: usize },

    #[error("PCD file contains no points")]
    EmptyCloud,

    #[error("height*width ({width}x{height}) != point count ({points})")]
    DimensionMismatch { width: u32, height: u32, points: u32 },

    #[error("{}: {source}", .path.display())]
    InFile {
        path: PathBuf,
        source: Box<DecodeError>,
    },
}

/// Broad classes of [`DecodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input path does not exist
    InputMissing,
    /// Opening or reading the stream failed
    Io,
    /// The header or payload is malformed or unsupported
    Format,
    /// The file declares zero points
    EmptyCloud,
}

impl DecodeError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputMissing(_) => ErrorKind::InputMissing,
            Self::Io(_) | Self::UnexpectedEof { .. } => ErrorKind::Io,
            Self::InvalidFormat(_)
            | Self::UnsupportedEncoding(_)
            | Self::InvalidToken { .. }
            | Self::MissingToken { .. }
            | Self::DimensionMismatch { .. } => ErrorKind::Format,
            Self::EmptyCloud => ErrorKind::EmptyCloud,
            Self::InFile { source, .. } => source.kind(),
        }
    }

    /// Attaches the path of the file being loaded.
    fn in_file(self, path: &Path) -> Self {
        match self {
            Self::InputMissing(_) | Self::InFile { .. } => self,
            other => Self::InFile {
                path: path.to_path_buf(),
                source: Box::new(other),
            },
        }
    }
}

/// Upper bound on rows reserved before any payload has been read.
const MAX_PREALLOCATED_ROWS: usize = 1 << 20;

/// PCD loader.
///
/// Holds the load options; each call decodes an independent stream, so one
/// decoder can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct PcdDecoder {
    point_color: Option<Vec4>,
}

impl PcdDecoder {
    /// Creates a decoder that keeps the colors stored in the file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every point color with `color` (normalized channels).
    pub fn with_point_color(mut self, color: Vec4) -> Self {
        self.point_color = Some(color);
        self
    }

    /// Loads a PCD file from disk.
    ///
    /// Errors other than [`DecodeError::InputMissing`] are wrapped in
    /// [`DecodeError::InFile`] naming `path`.
    pub fn decode_file<P: AsRef<Path>>(&self, path: P) -> Result<PointCloud, DecodeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DecodeError::InputMissing(path.to_path_buf()));
        }

        let file = File::open(path).map_err(|e| DecodeError::from(e).in_file(path))?;
        let mut reader = BufReader::new(file);

        self.decode_reader(&mut reader).map_err(|e| e.in_file(path))
    }

    /// Loads a PCD stream positioned at the start of the header.
    pub fn decode_reader<R: BufRead>(&self, reader: &mut R) -> Result<PointCloud, DecodeError> {
        let (header, header_lines) = header::parse_header(reader)?;

        let table = match header.encoding {
            DataEncoding::Binary => self.decode_binary(reader, &header)?,
            DataEncoding::Ascii => self.decode_ascii(reader, &header, header_lines)?,
            DataEncoding::BinaryCompressed => {
                return Err(DecodeError::UnsupportedEncoding(header.encoding))
            }
        };

        let (width, height) = resolve_dimensions(&header)?;

        info!(
            "Decoded {} points ({}x{}, {})",
            table.rows(),
            width,
            height,
            header.encoding
        );

        Ok(PointCloud::new(header, width, height, table))
    }

    /// Decodes fixed-stride little-endian records.
    fn decode_binary<R: Read>(
        &self,
        reader: &mut R,
        header: &PcdHeader,
    ) -> Result<PointTable, DecodeError> {
        let layout = FieldLayout::binary(header)?;
        let expected = header.points as usize;
        let override_color = self.point_color.map(PackedColor::from_normalized);

        let mut table = PointTable::with_capacity(expected.min(MAX_PREALLOCATED_ROWS));
        let mut record = vec![0u8; layout.record_len];

        for decoded in 0..expected {
            reader.read_exact(&mut record).map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => DecodeError::UnexpectedEof { decoded, expected },
                _ => DecodeError::Io(e),
            })?;

            let mut row = [0.0f32; COLUMNS];
            let value = |offset: usize| LittleEndian::read_f32(&record[offset..offset + VALUE_SIZE]);

            if let Some([x, y, z]) = layout.position {
                row[Column::X.index()] = value(x);
                row[Column::Y.index()] = value(y);
                row[Column::Z.index()] = value(z);
            }
            if let Some([nx, ny, nz]) = layout.normal {
                row[Column::NormalX.index()] = value(nx);
                row[Column::NormalY.index()] = value(ny);
                row[Column::NormalZ.index()] = value(nz);
            }

            let file_color = layout.color.map(|offset| {
                PackedColor::from_bits(LittleEndian::read_u32(&record[offset..offset + VALUE_SIZE]))
            });
            if let Some(color) = override_color.or(file_color) {
                row[Column::Rgba.index()] = color.to_f32_bits();
            }

            if let Some(offset) = layout.curvature {
                row[Column::Curvature.index()] = value(offset);
            }

            table.push_row(row);
        }

        Ok(table)
    }

    /// Decodes one whitespace separated point per line.
    fn decode_ascii<R: BufRead>(
        &self,
        reader: &mut R,
        header: &PcdHeader,
        header_lines: usize,
    ) -> Result<PointTable, DecodeError> {
        let layout = FieldLayout::ascii(header)?;
        let expected = header.points as usize;
        let override_color = self.point_color.map(PackedColor::from_normalized);

        let mut table = PointTable::with_capacity(expected.min(MAX_PREALLOCATED_ROWS));
        let mut raw = Vec::new();

        for decoded in 0..expected {
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                return Err(DecodeError::UnexpectedEof { decoded, expected });
            }
            let line_no = header_lines + decoded + 1;

            let line = std::str::from_utf8(&raw).map_err(|_| {
                DecodeError::InvalidFormat(format!("line {}: payload is not valid UTF-8", line_no))
            })?;
            let tokens: Vec<&str> = line.split_whitespace().collect();

            let mut row = [0.0f32; COLUMNS];

            if let Some([x, y, z]) = layout.position {
                row[Column::X.index()] = parse_token(&tokens, x, line_no)?;
                row[Column::Y.index()] = parse_token(&tokens, y, line_no)?;
                row[Column::Z.index()] = parse_token(&tokens, z, line_no)?;
            }
            if let Some([nx, ny, nz]) = layout.normal {
                row[Column::NormalX.index()] = parse_token(&tokens, nx, line_no)?;
                row[Column::NormalY.index()] = parse_token(&tokens, ny, line_no)?;
                row[Column::NormalZ.index()] = parse_token(&tokens, nz, line_no)?;
            }

            let file_color = match layout.color {
                Some(index) => Some(PackedColor::from_bits(parse_token(&tokens, index, line_no)?)),
                None => None,
            };
            if let Some(color) = override_color.or(file_color) {
                row[Column::Rgba.index()] = color.to_f32_bits();
            }

            if let Some(index) = layout.curvature {
                row[Column::Curvature.index()] = parse_token(&tokens, index, line_no)?;
            }

            table.push_row(row);
        }

        Ok(table)
    }
}

/// Parses the token at `index`, reporting the line on failure.
fn parse_token<T>(tokens: &[&str], index: usize, line: usize) -> Result<T, DecodeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let token = tokens.get(index).ok_or(DecodeError::MissingToken {
        line,
        index,
        available: tokens.len(),
    })?;

    token.parse().map_err(|e: T::Err| DecodeError::InvalidToken {
        line,
        token: token.to_string(),
        reason: e.to_string(),
    })
}

/// Applies the grid defaults and checks them against the point count.
///
/// A missing (or zero) height becomes 1, and then a missing width becomes the
/// point count. A declared height requires a declared width.
pub fn resolve_dimensions(header: &PcdHeader) -> Result<(u32, u32), DecodeError> {
    let points = header.points;
    if points == 0 {
        return Err(DecodeError::EmptyCloud);
    }

    let width = header.width.filter(|&w| w != 0);
    let height = header.height.filter(|&h| h != 0);

    let (width, height) = match (width, height) {
        (width, None) => (width.unwrap_or(points), 1),
        (Some(width), Some(height)) => (width, height),
        (None, Some(_)) => {
            return Err(DecodeError::InvalidFormat(
                "point cloud has height but no width".to_string(),
            ))
        }
    };

    if u64::from(width) * u64::from(height) != u64::from(points) {
        return Err(DecodeError::DimensionMismatch {
            width,
            height,
            points,
        });
    }

    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn binary_file(header: &str, records: &[[f32; 4]]) -> Vec<u8> {
        let mut bytes = header.as_bytes().to_vec();
        for record in records {
            for value in record {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn test_decode_binary_xyz_rgba() {
        let header = "VERSION 0.7\nFIELDS x y z rgba\nSIZE 4 4 4 4\nTYPE F F F U\n\
                      COUNT 1 1 1 1\nWIDTH 2\nHEIGHT 1\nPOINTS 2\nDATA binary\n";
        let mut bytes = header.as_bytes().to_vec();
        for (xyz, rgba) in [([1.0f32, 2.0, 3.0], [10u8, 20, 30, 40]), ([-1.5, 0.25, 8.0], [1, 2, 3, 4])] {
            for v in xyz {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            bytes.extend_from_slice(&rgba);
        }

        let cloud = PcdDecoder::new().decode_reader(&mut Cursor::new(bytes)).unwrap();
        let table = cloud.table();

        assert_eq!(table.rows(), 2);
        assert_eq!(table.row(0)[..3], [1.0, 2.0, 3.0]);
        assert_eq!(table.row(1)[..3], [-1.5, 0.25, 8.0]);
        assert_eq!(table.get(0, Column::Rgba).to_bits(), u32::from_le_bytes([10, 20, 30, 40]));
        assert_eq!(table.color(1), PackedColor::new(1, 2, 3, 4));
        for row in table.iter_rows() {
            assert_eq!(row[3..6], [0.0; 3]);
            assert_eq!(row[7..10], [0.0; 3]);
        }
        assert_eq!(cloud.indices(), &[0, 1]);
        assert_eq!((cloud.width(), cloud.height()), (2, 1));
    }

    #[test]
    fn test_decode_binary_skips_unknown_fields() {
        let header = "FIELDS intensity x y z\nSIZE 4 4 4 4\nTYPE F F F F\nCOUNT 1 1 1 1\n\
                      POINTS 1\nDATA binary\n";
        let bytes = binary_file(header, &[[99.0, 1.0, 2.0, 3.0]]);

        let cloud = PcdDecoder::new().decode_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(cloud.table().row(0)[..3], [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_decode_binary_truncated() {
        let header = "FIELDS x y z w\nSIZE 4 4 4 4\nTYPE F F F F\nCOUNT 1 1 1 1\n\
                      POINTS 3\nDATA binary\n";
        let bytes = binary_file(header, &[[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]]);

        let err = PcdDecoder::new().decode_reader(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { decoded: 2, expected: 3 }));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_decode_ascii_fields_out_of_order() {
        let text = "FIELDS curvature z y x normal_x normal_y normal_z\nPOINTS 2\nDATA ascii\n\
                    0.5 3 2 1 0 0 1\n0.25 6 5 4 0 1 0\n";
        let cloud = PcdDecoder::new().decode_reader(&mut Cursor::new(text)).unwrap();
        let table = cloud.table();

        assert_eq!(table.row(0), &[1.0, 2.0, 3.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.5]);
        assert_eq!(table.row(1), &[4.0, 5.0, 6.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.25]);
    }

    #[test]
    fn test_decode_ascii_rgba_token() {
        let packed = u32::from_le_bytes([200, 100, 50, 255]);
        let text = format!("FIELDS x y z rgba\nPOINTS 1\nDATA ascii\n1 2 3 {}\n", packed);
        let cloud = PcdDecoder::new().decode_reader(&mut Cursor::new(text)).unwrap();
        assert_eq!(cloud.table().color(0), PackedColor::new(200, 100, 50, 255));
    }

    #[test]
    fn test_decode_ascii_short_line() {
        let text = "FIELDS x y z\nPOINTS 2\nDATA ascii\n1 2 3\n4 5\n";
        let err = PcdDecoder::new().decode_reader(&mut Cursor::new(text)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingToken { line: 5, index: 2, available: 2 }
        ));
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_decode_ascii_bad_token() {
        let text = "FIELDS x y z\nPOINTS 1\nDATA ascii\n1 abc 3\n";
        let err = PcdDecoder::new().decode_reader(&mut Cursor::new(text)).unwrap_err();
        match err {
            DecodeError::InvalidToken { line, token, .. } => {
                assert_eq!(line, 4);
                assert_eq!(token, "abc");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_ascii_invalid_utf8() {
        let mut bytes = b"FIELDS x y z\nPOINTS 2\nDATA ascii\n1 2 3\n".to_vec();
        bytes.extend_from_slice(b"1 2 \xFF\xFE\n");

        let err = PcdDecoder::new().decode_reader(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(err, DecodeError::InvalidFormat(ref m) if m.starts_with("line 5:")));
    }

    #[test]
    fn test_decode_binary_zero_stride() {
        let err = PcdDecoder::new()
            .decode_reader(&mut Cursor::new("POINTS 5\nDATA binary\n"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("stride is zero"));
    }

    #[test]
    fn test_decode_ascii_missing_lines() {
        let text = "FIELDS x y z\nPOINTS 3\nDATA ascii\n1 2 3\n";
        let err = PcdDecoder::new().decode_reader(&mut Cursor::new(text)).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { decoded: 1, expected: 3 }));
    }

    #[test]
    fn test_color_override() {
        let text = "FIELDS x y z rgba\nPOINTS 2\nDATA ascii\n1 2 3 12345\n4 5 6 67890\n";
        let decoder = PcdDecoder::new().with_point_color(Vec4::new(1.0, 0.5, 0.0, 1.0));
        let cloud = decoder.decode_reader(&mut Cursor::new(text)).unwrap();

        for row in 0..2 {
            assert_eq!(cloud.table().color(row), PackedColor::new(255, 127, 0, 255));
        }
    }

    #[test]
    fn test_color_override_without_rgba_field() {
        let text = "FIELDS x y z\nPOINTS 1\nDATA ascii\n1 2 3\n";
        let decoder = PcdDecoder::new().with_point_color(Vec4::ONE);
        let cloud = decoder.decode_reader(&mut Cursor::new(text)).unwrap();
        assert_eq!(cloud.table().color(0), PackedColor::new(255, 255, 255, 255));
    }

    #[test]
    fn test_binary_compressed_rejected() {
        let text = "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nPOINTS 1\n\
                    DATA binary_compressed\n\x08\x00\x00\x00\x0c\x00\x00\x00";
        let err = PcdDecoder::new().decode_reader(&mut Cursor::new(text)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnsupportedEncoding(DataEncoding::BinaryCompressed)
        ));
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("binary_compressed"));
    }

    #[test]
    fn test_resolve_dimensions_defaults() {
        let mut header = PcdHeader {
            points: 5,
            ..Default::default()
        };
        assert_eq!(resolve_dimensions(&header).unwrap(), (5, 1));

        header.width = Some(5);
        assert_eq!(resolve_dimensions(&header).unwrap(), (5, 1));

        header.width = Some(4);
        assert!(matches!(
            resolve_dimensions(&header),
            Err(DecodeError::DimensionMismatch { width: 4, height: 1, points: 5 })
        ));
    }

    #[test]
    fn test_resolve_dimensions_grid() {
        let header = PcdHeader {
            width: Some(3),
            height: Some(2),
            points: 6,
            ..Default::default()
        };
        assert_eq!(resolve_dimensions(&header).unwrap(), (3, 2));

        let header = PcdHeader {
            height: Some(2),
            points: 6,
            ..Default::default()
        };
        assert!(matches!(resolve_dimensions(&header), Err(DecodeError::InvalidFormat(_))));
    }

    #[test]
    fn test_empty_cloud() {
        let text = "FIELDS x y z\nPOINTS 0\nDATA ascii\n";
        let err = PcdDecoder::new().decode_reader(&mut Cursor::new(text)).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyCloud));
        assert_eq!(err.kind(), ErrorKind::EmptyCloud);
    }

    #[test]
    fn test_missing_file() {
        let err = PcdDecoder::new()
            .decode_file("definitely/not/here.pcd")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputMissing);
        assert!(err.to_string().contains("here.pcd"));
    }
}
