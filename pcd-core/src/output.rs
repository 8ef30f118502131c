//! Output writers for decoded point clouds.
//!
//! Supports CSV, a raw little-endian table dump, and re-encoding as PCD.

use crate::cloud::PointCloud;
use crate::types::{Column, DataEncoding, PointTable, COLUMNS};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Ordered set of table columns to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSelection(Vec<Column>);

impl Default for ColumnSelection {
    fn default() -> Self {
        Self(Column::ALL.to_vec())
    }
}

impl std::str::FromStr for ColumnSelection {
    type Err = OutputError;

    /// Parses a selection like "x,y,z" or "rgba, curvature".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut columns = Vec::new();

        for part in s.split(',').map(|p| p.trim().to_lowercase()) {
            if part.is_empty() {
                continue;
            }
            let column = Column::from_name(&part).ok_or_else(|| {
                OutputError::InvalidFormat(format!(
                    "Unknown column: {}. Use x, y, z, normal_x, normal_y, normal_z, rgba, u, v, curvature",
                    part
                ))
            })?;

            if columns.contains(&column) {
                return Err(OutputError::InvalidFormat(format!(
                    "Duplicate column: {}",
                    part
                )));
            }
            columns.push(column);
        }

        if columns.is_empty() {
            return Err(OutputError::InvalidFormat(
                "At least one column must be selected".to_string(),
            ));
        }

        Ok(Self(columns))
    }
}

impl ColumnSelection {
    pub fn columns(&self) -> &[Column] {
        &self.0
    }

    /// Returns the CSV header line for this selection.
    pub fn header(&self) -> String {
        self.0
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// CSV output writer for point tables.
///
/// The rgba column is written as its unsigned 32-bit pattern.
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
    columns: ColumnSelection,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a new CSV writer.
    pub fn new(writer: W, columns: ColumnSelection) -> Self {
        Self {
            writer: BufWriter::new(writer),
            columns,
        }
    }

    /// Writes the column name row.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", self.columns.header())?;
        Ok(())
    }

    /// Writes every row of `table`.
    pub fn write_table(&mut self, table: &PointTable) -> Result<(), OutputError> {
        for row in table.iter_rows() {
            self.write_row(row)?;
        }
        Ok(())
    }

    #[inline]
    fn write_row(&mut self, row: &[f32]) -> Result<(), OutputError> {
        for (i, column) in self.columns.columns().iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b",")?;
            }
            let value = row[column.index()];
            match column {
                Column::Rgba => write!(self.writer, "{}", value.to_bits())?,
                _ => write!(self.writer, "{}", value)?,
            }
        }
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Raw binary dump of a point table.
///
/// Layout:
/// - magic: `PCDTBL\0\0` (8 bytes)
/// - version: u32
/// - rows: u64
/// - columns: u32
/// - rows * columns little-endian f32 values, row-major
pub struct TableWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> TableWriter<W> {
    /// Creates a new table writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_header(&mut self, rows: u64) -> Result<(), OutputError> {
        self.writer.write_all(b"PCDTBL\0\0")?;
        self.writer.write_u32::<LittleEndian>(1)?;
        self.writer.write_u64::<LittleEndian>(rows)?;
        self.writer.write_u32::<LittleEndian>(COLUMNS as u32)?;
        Ok(())
    }

    pub fn write_table(&mut self, table: &PointTable) -> Result<(), OutputError> {
        for &value in table.as_slice() {
            // Raw bits keep packed colors intact.
            self.writer.write_u32::<LittleEndian>(value.to_bits())?;
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Fields written by [`PcdWriter`], with the column each one comes from.
const PCD_FIELDS: [(Column, char); 8] = [
    (Column::X, 'F'),
    (Column::Y, 'F'),
    (Column::Z, 'F'),
    (Column::NormalX, 'F'),
    (Column::NormalY, 'F'),
    (Column::NormalZ, 'F'),
    (Column::Rgba, 'U'),
    (Column::Curvature, 'F'),
];

/// Re-encodes a decoded cloud as a PCD v0.7 file.
pub struct PcdWriter<W: Write> {
    writer: BufWriter<W>,
    encoding: DataEncoding,
}

impl<W: Write> PcdWriter<W> {
    /// Creates a new PCD writer. Only ascii and binary payloads can be written.
    pub fn new(writer: W, encoding: DataEncoding) -> Result<Self, OutputError> {
        if encoding == DataEncoding::BinaryCompressed {
            return Err(OutputError::InvalidFormat(
                "binary_compressed output is not supported".to_string(),
            ));
        }
        Ok(Self {
            writer: BufWriter::new(writer),
            encoding,
        })
    }

    pub fn write_header(&mut self, cloud: &PointCloud) -> Result<(), OutputError> {
        let names: Vec<&str> = PCD_FIELDS.iter().map(|(c, _)| c.name()).collect();
        let types: Vec<String> = PCD_FIELDS.iter().map(|(_, t)| t.to_string()).collect();
        let viewpoint = cloud.viewpoint();
        let (origin, q) = (viewpoint.origin, viewpoint.orientation);

        writeln!(self.writer, "# .PCD v0.7 - Point Cloud Data file format")?;
        writeln!(self.writer, "VERSION 0.7")?;
        writeln!(self.writer, "FIELDS {}", names.join(" "))?;
        writeln!(self.writer, "SIZE {}", vec!["4"; PCD_FIELDS.len()].join(" "))?;
        writeln!(self.writer, "TYPE {}", types.join(" "))?;
        writeln!(self.writer, "COUNT {}", vec!["1"; PCD_FIELDS.len()].join(" "))?;
        writeln!(self.writer, "WIDTH {}", cloud.width())?;
        writeln!(self.writer, "HEIGHT {}", cloud.height())?;
        writeln!(
            self.writer,
            "VIEWPOINT {} {} {} {} {} {} {}",
            origin.x, origin.y, origin.z, q.w, q.x, q.y, q.z
        )?;
        writeln!(self.writer, "POINTS {}", cloud.len())?;
        writeln!(self.writer, "DATA {}", self.encoding)?;
        Ok(())
    }

    pub fn write_points(&mut self, table: &PointTable) -> Result<(), OutputError> {
        for row in table.iter_rows() {
            match self.encoding {
                DataEncoding::Ascii => {
                    for (i, (column, _)) in PCD_FIELDS.iter().enumerate() {
                        if i > 0 {
                            self.writer.write_all(b" ")?;
                        }
                        let value = row[column.index()];
                        match column {
                            Column::Rgba => write!(self.writer, "{}", value.to_bits())?,
                            _ => write!(self.writer, "{}", value)?,
                        }
                    }
                    self.writer.write_all(b"\n")?;
                }
                _ => {
                    for (column, _) in PCD_FIELDS {
                        self.writer
                            .write_u32::<LittleEndian>(row[column.index()].to_bits())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes a point table to a CSV file.
pub fn write_csv<P: AsRef<Path>>(
    path: P,
    table: &PointTable,
    columns: ColumnSelection,
) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = CsvWriter::new(file, columns);
    writer.write_header()?;
    writer.write_table(table)?;
    writer.flush()?;
    Ok(())
}

/// Writes a point table to a raw binary file.
pub fn write_table<P: AsRef<Path>>(path: P, table: &PointTable) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = TableWriter::new(file);
    writer.write_header(table.rows() as u64)?;
    writer.write_table(table)?;
    writer.flush()?;
    Ok(())
}

/// Writes a cloud to a PCD file with the given payload encoding.
pub fn write_pcd<P: AsRef<Path>>(
    path: P,
    cloud: &PointCloud,
    encoding: DataEncoding,
) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = PcdWriter::new(file, encoding)?;
    writer.write_header(cloud)?;
    writer.write_points(cloud.table())?;
    writer.flush()?;
    Ok(())
}
