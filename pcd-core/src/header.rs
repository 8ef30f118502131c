//! Parsing of the PCD text header.
//!
//! The header is a sequence of `KEYWORD value...` lines terminated by the
//! `DATA` line. Each recognized keyword updates one piece of [`PcdHeader`];
//! unknown keywords and `#` comments are skipped so newer files still load.

use crate::decoder::DecodeError;
use crate::types::{DataEncoding, PcdHeader, Viewpoint};
use glam::{Quat, Vec3};
use log::{debug, trace};
use std::io::BufRead;
use std::str::FromStr;

/// Outcome of applying one header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Continue,
    /// The `DATA` line was consumed; the payload follows.
    Payload,
}

/// Reads the header from `reader`, leaving it positioned at the first payload byte.
pub fn read_header<R: BufRead>(reader: &mut R) -> Result<PcdHeader, DecodeError> {
    parse_header(reader).map(|(header, _)| header)
}

/// Reads the header and also returns the number of lines consumed.
pub(crate) fn parse_header<R: BufRead>(reader: &mut R) -> Result<(PcdHeader, usize), DecodeError> {
    let mut header = PcdHeader::default();
    let mut raw = Vec::new();
    let mut line_no = 0usize;

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            return Err(DecodeError::InvalidFormat(
                "header ended without a DATA line".to_string(),
            ));
        }
        line_no += 1;

        let line = std::str::from_utf8(&raw).map_err(|_| {
            DecodeError::InvalidFormat(format!("line {}: header is not valid UTF-8", line_no))
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if apply_line(&mut header, line, line_no)? == Directive::Payload {
            break;
        }
    }

    debug!(
        "PCD header: fields={:?} sizes={:?} types={:?} counts={:?} points={} encoding={}",
        header.field_names,
        header.field_sizes,
        header.field_types,
        header.field_counts,
        header.points,
        header.encoding
    );

    Ok((header, line_no))
}

/// Splits a line into its leading keyword and the remainder.
fn split_keyword(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    }
}

/// Applies a single non-empty, trimmed header line.
fn apply_line(header: &mut PcdHeader, line: &str, line_no: usize) -> Result<Directive, DecodeError> {
    let (keyword, rest) = split_keyword(line);

    match keyword {
        "VERSION" => {
            header.version = Some(rest.to_string());
        }
        "FIELDS" => {
            header.field_names = rest.split_whitespace().map(str::to_string).collect();
        }
        "SIZE" => {
            header.field_sizes = parse_list(rest, line_no)?;
        }
        "TYPE" => {
            header.field_types = rest
                .split_whitespace()
                .filter_map(|token| token.chars().next())
                .collect();
        }
        "COUNT" => {
            header.field_counts = parse_list(rest, line_no)?;
        }
        "WIDTH" => {
            header.width = Some(parse_single(rest, line_no)?);
        }
        "HEIGHT" => {
            header.height = Some(parse_single(rest, line_no)?);
        }
        "VIEWPOINT" => {
            header.viewpoint = parse_viewpoint(rest, line_no)?;
        }
        "POINTS" => {
            header.points = parse_single(rest, line_no)?;
        }
        "DATA" => {
            let mode = rest.split_whitespace().next().unwrap_or("");
            header.encoding = DataEncoding::from_keyword(mode).ok_or_else(|| {
                DecodeError::InvalidFormat(format!(
                    "line {}: invalid PCD file mode \"{}\"",
                    line_no, mode
                ))
            })?;
            return Ok(Directive::Payload);
        }
        _ => {
            trace!("Ignoring header line {}: {}", line_no, line);
        }
    }

    Ok(Directive::Continue)
}

fn parse_token<T>(token: &str, line_no: usize) -> Result<T, DecodeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    token.parse().map_err(|e: T::Err| DecodeError::InvalidToken {
        line: line_no,
        token: token.to_string(),
        reason: e.to_string(),
    })
}

fn parse_single<T>(value: &str, line_no: usize) -> Result<T, DecodeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_token(value, line_no)
}

fn parse_list<T>(value: &str, line_no: usize) -> Result<Vec<T>, DecodeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .split_whitespace()
        .map(|token| parse_token(token, line_no))
        .collect()
}

/// Parses `tx ty tz qw qx qy qz`.
fn parse_viewpoint(value: &str, line_no: usize) -> Result<Viewpoint, DecodeError> {
    let v: Vec<f32> = parse_list(value, line_no)?;
    if v.len() != 7 {
        return Err(DecodeError::InvalidFormat(format!(
            "line {}: VIEWPOINT expects 7 values, found {}",
            line_no,
            v.len()
        )));
    }

    Ok(Viewpoint {
        origin: Vec3::new(v[0], v[1], v[2]),
        orientation: Quat::from_xyzw(v[4], v[5], v[6], v[3]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    const HEADER: &str = "# .PCD v0.7 - Point Cloud Data file format
VERSION 0.7
FIELDS x y z rgba
SIZE 4 4 4 4
TYPE F F F U
COUNT 1 1 1 1
WIDTH 2
HEIGHT 1
VIEWPOINT 1 2 3 1 0 0 0
POINTS 2
DATA binary
";

    #[test]
    fn test_parse_full_header() {
        let mut reader = Cursor::new(HEADER.as_bytes());
        let header = read_header(&mut reader).unwrap();

        assert_eq!(header.version.as_deref(), Some("0.7"));
        assert_eq!(header.field_names, vec!["x", "y", "z", "rgba"]);
        assert_eq!(header.field_sizes, vec![4, 4, 4, 4]);
        assert_eq!(header.field_types, vec!['F', 'F', 'F', 'U']);
        assert_eq!(header.field_counts, vec![1, 1, 1, 1]);
        assert_eq!(header.width, Some(2));
        assert_eq!(header.height, Some(1));
        assert_eq!(header.points, 2);
        assert_eq!(header.encoding, DataEncoding::Binary);
        assert_eq!(header.viewpoint.origin, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(header.viewpoint.orientation, Quat::IDENTITY);
    }

    #[test]
    fn test_header_stops_after_data_line() {
        let mut bytes = HEADER.as_bytes().to_vec();
        bytes.extend_from_slice(&[0xFF, 0x00, 0x10]);
        let mut reader = Cursor::new(bytes);

        let (_, lines) = parse_header(&mut reader).unwrap();
        assert_eq!(lines, 11);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![0xFF, 0x00, 0x10]);
    }

    #[test]
    fn test_blank_and_unknown_lines_ignored() {
        let text = "\nFIELDS x\n\nFOO bar baz\n  \nPOINTS 3\nDATA ascii\n";
        let header = read_header(&mut Cursor::new(text)).unwrap();
        assert_eq!(header.field_names, vec!["x"]);
        assert_eq!(header.points, 3);
        assert_eq!(header.encoding, DataEncoding::Ascii);
        assert_eq!(header.width, None);
        assert_eq!(header.height, None);
    }

    #[test]
    fn test_crlf_line_endings() {
        let text = "FIELDS x y\r\nPOINTS 1\r\nDATA binary_compressed\r\n";
        let header = read_header(&mut Cursor::new(text)).unwrap();
        assert_eq!(header.field_names, vec!["x", "y"]);
        assert_eq!(header.encoding, DataEncoding::BinaryCompressed);
    }

    #[test]
    fn test_invalid_data_mode() {
        let err = read_header(&mut Cursor::new("POINTS 1\nDATA Binary\n")).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFormat(ref m) if m.contains("Binary")));
    }

    #[test]
    fn test_missing_data_line() {
        let err = read_header(&mut Cursor::new("FIELDS x\nPOINTS 1\n")).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFormat(_)));
    }

    #[test]
    fn test_malformed_values() {
        let err = read_header(&mut Cursor::new("SIZE 4 four\nDATA ascii\n")).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidToken { line: 1, ref token, .. } if token == "four"
        ));

        let err = read_header(&mut Cursor::new("POINTS -3\nDATA ascii\n")).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidToken { .. }));

        let err = read_header(&mut Cursor::new("VIEWPOINT 0 0 0 1 0\nDATA ascii\n")).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFormat(_)));
    }

    #[test]
    fn test_split_keyword() {
        assert_eq!(split_keyword("WIDTH 640"), ("WIDTH", "640"));
        assert_eq!(split_keyword("FIELDS\tx  y"), ("FIELDS", "x  y"));
        assert_eq!(split_keyword("DATA"), ("DATA", ""));
    }
}
