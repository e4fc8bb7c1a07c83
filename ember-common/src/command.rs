// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Draw command wire format.
//!
//! The PS and the raster IP share a 32-byte little-endian record, transported
//! as two 128-bit words over the command AXI bundle:
//!
//! | Bytes  | Field    | Meaning                                      |
//! |--------|----------|----------------------------------------------|
//! | 0      | kind     | 0 = column, 1 = span                         |
//! | 1      | light    | colormap row, 0..31                          |
//! | 2:3    | x1       | column X / span start X                      |
//! | 4:5    | x2       | span end X                                   |
//! | 6:7    | y1       | column start Y / span row Y                  |
//! | 8:9    | y2       | column end Y                                 |
//! | 10:11  | -        | reserved (zero)                              |
//! | 12:15  | frac     | Q16.16 texture coordinate / packed span pos  |
//! | 16:19  | step     | Q16.16 step / packed span step               |
//! | 20:23  | tex_off  | byte offset into the texture atlas           |
//! | 24:31  | -        | reserved (zero)                              |
//!
//! Records may land byte-aligned in the command region, so decoding never
//! reinterprets the raw bytes as wider machine words in place: both words are
//! assembled with `u128::from_le_bytes` and fields extracted by shift/mask,
//! mirroring the bit-range extraction on the IP side.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

/// Encoded size of one [`DrawCommand`].
pub const COMMAND_SIZE: usize = 32;

/// Draw primitive selector, byte 0 of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CommandKind {
    /// Vertical wall strip walked with a Q16.16 texture coordinate.
    #[default]
    Column = 0,
    /// Horizontal floor/ceiling run over a 64x64 flat.
    Span = 1,
}

impl CommandKind {
    pub fn from_raw(v: u8) -> Self {
        if v == 1 {
            Self::Span
        } else {
            Self::Column
        }
    }
}

/// One rasterization command as staged by the PS and consumed by the IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawCommand {
    pub kind: CommandKind,
    pub light: u8,
    pub x1: u16,
    pub x2: u16,
    pub y1: u16,
    pub y2: u16,
    pub frac: u32,
    pub step: u32,
    pub tex_off: u32,
}

impl DrawCommand {
    /// Serialize into the 32-byte wire layout.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.kind as u8)?;
        w.write_u8(self.light)?;
        w.write_u16::<LittleEndian>(self.x1)?;
        w.write_u16::<LittleEndian>(self.x2)?;
        w.write_u16::<LittleEndian>(self.y1)?;
        w.write_u16::<LittleEndian>(self.y2)?;
        w.write_u16::<LittleEndian>(0)?; // reserved
        w.write_u32::<LittleEndian>(self.frac)?;
        w.write_u32::<LittleEndian>(self.step)?;
        w.write_u32::<LittleEndian>(self.tex_off)?;
        w.write_u32::<LittleEndian>(0)?; // reserved
        w.write_u32::<LittleEndian>(0)?; // reserved
        Ok(())
    }

    /// Serialize into a fixed 32-byte array.
    pub fn encode(&self) -> [u8; COMMAND_SIZE] {
        let mut buf = [0u8; COMMAND_SIZE];
        let mut cursor = &mut buf[..];
        // Writing into a fixed array cannot fail.
        self.write_to(&mut cursor).expect("fixed-size encode");
        buf
    }

    /// Decode from a 32-byte record.
    pub fn decode(bytes: &[u8; COMMAND_SIZE]) -> Self {
        let w0 = u128::from_le_bytes(bytes[0..16].try_into().expect("16-byte slice"));
        let w1 = u128::from_le_bytes(bytes[16..32].try_into().expect("16-byte slice"));
        Self::from_words(w0, w1)
    }

    /// Decode from the two 128-bit command words.
    pub fn from_words(w0: u128, w1: u128) -> Self {
        Self {
            kind: CommandKind::from_raw((w0 & 0xFF) as u8),
            light: ((w0 >> 8) & 0xFF) as u8,
            x1: ((w0 >> 16) & 0xFFFF) as u16,
            x2: ((w0 >> 32) & 0xFFFF) as u16,
            y1: ((w0 >> 48) & 0xFFFF) as u16,
            y2: ((w0 >> 64) & 0xFFFF) as u16,
            frac: ((w0 >> 96) & 0xFFFF_FFFF) as u32,
            step: (w1 & 0xFFFF_FFFF) as u32,
            tex_off: ((w1 >> 32) & 0xFFFF_FFFF) as u32,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DrawCommand {
        DrawCommand {
            kind: CommandKind::Span,
            light: 17,
            x1: 12,
            x2: 300,
            y1: 55,
            y2: 0,
            frac: 0x0001_8000,
            step: 0x0400_0000,
            tex_off: 0x0012_3450,
        }
    }

    #[test]
    fn test_encoded_size_is_32() {
        assert_eq!(sample().encode().len(), COMMAND_SIZE);
    }

    #[test]
    fn test_field_offsets() {
        let bytes = sample().encode();
        assert_eq!(bytes[0], 1); // kind
        assert_eq!(bytes[1], 17); // light
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 12);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 300);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 55);
        // tex_off begins at byte 20.
        assert_eq!(
            u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
            0x0012_3450
        );
    }

    #[test]
    fn test_reserved_bytes_zero() {
        let bytes = sample().encode();
        assert_eq!(&bytes[10..12], &[0, 0]);
        assert_eq!(&bytes[24..32], &[0u8; 8]);
    }

    #[test]
    fn test_roundtrip_through_words() {
        let cmd = sample();
        let bytes = cmd.encode();
        let w0 = u128::from_le_bytes(bytes[0..16].try_into().unwrap());
        let w1 = u128::from_le_bytes(bytes[16..32].try_into().unwrap());
        assert_eq!(DrawCommand::from_words(w0, w1), cmd);
    }

    #[test]
    fn test_roundtrip_column() {
        let cmd = DrawCommand {
            kind: CommandKind::Column,
            light: 31,
            x1: 319,
            x2: 0,
            y1: 0,
            y2: 199,
            frac: u32::MAX,
            step: 0x0001_0000,
            tex_off: 0x00FF_FF80,
        };
        assert_eq!(DrawCommand::decode(&cmd.encode()), cmd);
    }
}
