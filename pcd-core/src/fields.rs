//! Resolution of well-known PCD fields to record positions.
//!
//! Binary payloads locate a field by byte offset inside a fixed-stride
//! record; ascii payloads locate it by token index on the line. Both are
//! resolved once per load into a [`FieldLayout`].

use crate::decoder::DecodeError;
use crate::types::PcdHeader;
use log::{debug, warn};

/// Byte width of every value the decoder extracts.
pub const VALUE_SIZE: usize = 4;

/// Fields the decoder maps into the point table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownField {
    X,
    Y,
    Z,
    NormalX,
    NormalY,
    NormalZ,
    Rgba,
    Curvature,
}

impl KnownField {
    /// Matches a declared field name. Names are case-sensitive.
    #[inline]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" => Some(Self::X),
            "y" => Some(Self::Y),
            "z" => Some(Self::Z),
            "normal_x" => Some(Self::NormalX),
            "normal_y" => Some(Self::NormalY),
            "normal_z" => Some(Self::NormalZ),
            "rgba" => Some(Self::Rgba),
            "curvature" => Some(Self::Curvature),
            _ => None,
        }
    }
}

/// Per-field slots found while scanning the declarations.
#[derive(Debug, Default)]
struct Slots {
    x: Option<usize>,
    y: Option<usize>,
    z: Option<usize>,
    normal_x: Option<usize>,
    normal_y: Option<usize>,
    normal_z: Option<usize>,
    rgba: Option<usize>,
    curvature: Option<usize>,
}

impl Slots {
    fn set(&mut self, field: KnownField, slot: usize) {
        let target = match field {
            KnownField::X => &mut self.x,
            KnownField::Y => &mut self.y,
            KnownField::Z => &mut self.z,
            KnownField::NormalX => &mut self.normal_x,
            KnownField::NormalY => &mut self.normal_y,
            KnownField::NormalZ => &mut self.normal_z,
            KnownField::Rgba => &mut self.rgba,
            KnownField::Curvature => &mut self.curvature,
        };
        // Later declarations of the same name win.
        *target = Some(slot);
    }

    fn into_layout(self, record_len: usize) -> FieldLayout {
        FieldLayout {
            position: triple(self.x, self.y, self.z),
            normal: triple(self.normal_x, self.normal_y, self.normal_z),
            color: self.rgba,
            curvature: self.curvature,
            record_len,
        }
    }
}

fn triple(a: Option<usize>, b: Option<usize>, c: Option<usize>) -> Option<[usize; 3]> {
    Some([a?, b?, c?])
}

/// Resolved positions of the well-known fields within one point record.
///
/// A group is present only when every member was declared: position needs
/// `x`, `y` and `z`; normal needs all three `normal_*` fields. Absent groups
/// leave their table columns at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldLayout {
    pub position: Option<[usize; 3]>,
    pub normal: Option<[usize; 3]>,
    pub color: Option<usize>,
    pub curvature: Option<usize>,
    /// Bytes per record (binary) or declared tokens per line (ascii)
    pub record_len: usize,
}

impl FieldLayout {
    /// Resolves byte offsets for a binary payload.
    ///
    /// Offsets are the running sum of `count * size` over the preceding
    /// fields. Fails if `SIZE`/`COUNT` are shorter than `FIELDS`, the record
    /// is empty, or a resolved value would not fit inside the record.
    pub fn binary(header: &PcdHeader) -> Result<Self, DecodeError> {
        let mut slots = Slots::default();
        let mut offset = 0usize;

        for (i, name) in header.field_names.iter().enumerate() {
            let size = *header.field_sizes.get(i).ok_or_else(|| {
                DecodeError::InvalidFormat(format!("field \"{}\" has no SIZE entry", name))
            })?;
            let count = *header.field_counts.get(i).ok_or_else(|| {
                DecodeError::InvalidFormat(format!("field \"{}\" has no COUNT entry", name))
            })?;

            if let Some(field) = KnownField::from_name(name) {
                if size != VALUE_SIZE {
                    warn!(
                        "Field \"{}\" declares {} byte elements; reading {} bytes",
                        name, size, VALUE_SIZE
                    );
                }
                slots.set(field, offset);
            }

            offset = count
                .checked_mul(size)
                .and_then(|len| offset.checked_add(len))
                .ok_or_else(|| {
                    DecodeError::InvalidFormat(format!(
                        "record size overflows at field \"{}\"",
                        name
                    ))
                })?;
        }

        if offset == 0 {
            return Err(DecodeError::InvalidFormat(
                "point record stride is zero".to_string(),
            ));
        }

        let layout = slots.into_layout(offset);
        if let Some(end) = layout.max_slot().map(|s| s + VALUE_SIZE) {
            if end > layout.record_len {
                return Err(DecodeError::InvalidFormat(format!(
                    "field offset {} exceeds point record stride {}",
                    end - VALUE_SIZE,
                    layout.record_len
                )));
            }
        }

        debug!("Binary field layout: {:?}", layout);
        Ok(layout)
    }

    /// Resolves token indices for an ascii payload.
    pub fn ascii(header: &PcdHeader) -> Result<Self, DecodeError> {
        let mut slots = Slots::default();
        for (i, name) in header.field_names.iter().enumerate() {
            if let Some(field) = KnownField::from_name(name) {
                slots.set(field, i);
            }
        }

        let layout = slots.into_layout(header.field_names.len());
        debug!("Ascii field layout: {:?}", layout);
        Ok(layout)
    }

    /// Highest slot any present group reads from.
    pub fn max_slot(&self) -> Option<usize> {
        self.position
            .into_iter()
            .chain(self.normal)
            .flatten()
            .chain(self.color)
            .chain(self.curvature)
            .max()
    }
}
