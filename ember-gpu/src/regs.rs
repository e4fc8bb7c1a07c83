// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! AXI-Lite control interface shared by both IPs.
//!
//! Each kernel exposes one control window with the handshake register at
//! offset 0, pointer pairs for its AXI masters, and scalar parameters:
//!
//! | Offset | Register                                   |
//! |--------|--------------------------------------------|
//! | 0x00   | ctrl (bit 0 start, bit 1 done, bit 2 idle) |
//! | 0x10   | framebuffer out lo / 0x14 hi               |
//! | 0x1C   | texture atlas lo / 0x20 hi                 |
//! | 0x28   | colormap lo / 0x2C hi                      |
//! | 0x34   | command / present source lo / 0x38 hi      |
//! | 0x40   | mode                                       |
//! | 0x48   | num_commands                               |
//! | 0x50   | lane 1 out lo / 0x54 hi (present only)     |
//! | 0x58   | lane 2 out lo / 0x5C hi                    |
//! | 0x60   | lane 3 out lo / 0x64 hi                    |
//! | 0x68   | present_scale (1 or 5)                     |
//! | 0x6C   | present_rows (0 = all)                     |
//! | 0x70   | present_lanes (1 or 4)                     |
//! | 0x74   | present_format (0 = XRGB8888, 1 = RGB565)  |
//! | 0x78   | present_stride_bytes                       |
//! | 0x7C   | sharpen_enable                             |
//! | 0x80   | sharpen_strength (0..255)                  |

use bitflags::bitflags;

bitflags! {
    /// Handshake bits of the control register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ctrl: u32 {
        const START = 1 << 0;
        const DONE = 1 << 1;
        const IDLE = 1 << 2;
    }
}

/// Register byte offsets within one control window.
pub mod offs {
    pub const CTRL: usize = 0x00;
    pub const FB_OUT_LO: usize = 0x10;
    pub const FB_OUT_HI: usize = 0x14;
    pub const TEX_ATLAS_LO: usize = 0x1C;
    pub const TEX_ATLAS_HI: usize = 0x20;
    pub const COLORMAP_LO: usize = 0x28;
    pub const COLORMAP_HI: usize = 0x2C;
    pub const SOURCE_LO: usize = 0x34;
    pub const SOURCE_HI: usize = 0x38;
    pub const MODE: usize = 0x40;
    pub const NUM_COMMANDS: usize = 0x48;
    pub const LANE1_LO: usize = 0x50;
    pub const LANE1_HI: usize = 0x54;
    pub const LANE2_LO: usize = 0x58;
    pub const LANE2_HI: usize = 0x5C;
    pub const LANE3_LO: usize = 0x60;
    pub const LANE3_HI: usize = 0x64;
    pub const PRESENT_SCALE: usize = 0x68;
    pub const PRESENT_ROWS: usize = 0x6C;
    pub const PRESENT_LANES: usize = 0x70;
    pub const PRESENT_FORMAT: usize = 0x74;
    pub const PRESENT_STRIDE_BYTES: usize = 0x78;
    pub const SHARPEN_ENABLE: usize = 0x7C;
    pub const SHARPEN_STRENGTH: usize = 0x80;
}

/// Operation selector written to the mode register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Mode {
    Idle = 0,
    /// Load the colormap image (raster) or RGB palette (present) from DDR.
    LoadColormap = 1,
    ClearFb = 2,
    DrawBatch = 3,
    DmaOut = 4,
    /// Legacy alias of [`Mode::Present`], kept for old driver revisions.
    Upscale = 5,
    DrawAndDma = 6,
    Present = 7,
}

impl Mode {
    pub fn from_raw(v: u32) -> Self {
        match v {
            1 => Self::LoadColormap,
            2 => Self::ClearFb,
            3 => Self::DrawBatch,
            4 => Self::DmaOut,
            5 => Self::Upscale,
            6 => Self::DrawAndDma,
            7 => Self::Present,
            _ => Self::Idle,
        }
    }

    pub fn raw(self) -> u32 {
        self as u32
    }
}

/// Output pixel format of the present IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum PixelFormat {
    #[default]
    Xrgb8888 = 0,
    Rgb565 = 1,
}

impl PixelFormat {
    pub fn from_raw(v: u32) -> Self {
        if v == 1 {
            Self::Rgb565
        } else {
            Self::Xrgb8888
        }
    }

    /// Bytes per packed pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Xrgb8888 => 4,
            Self::Rgb565 => 2,
        }
    }
}

/// Latched register file of one kernel.
///
/// The simulated device routes AXI-Lite writes here and snapshots the file on
/// start, the same way the hardware latches its `s_axilite` scalars.
#[derive(Debug, Clone)]
pub struct KernelRegs {
    pub fb_out: u64,
    pub lanes: [u64; 3],
    pub tex_atlas: u64,
    pub colormap: u64,
    pub source: u64,
    pub mode: u32,
    pub num_commands: u32,
    pub present_scale: u32,
    pub present_rows: u32,
    pub present_lanes: u32,
    pub present_format: u32,
    pub present_stride_bytes: u32,
    pub sharpen_enable: u32,
    pub sharpen_strength: u32,
}

impl Default for KernelRegs {
    fn default() -> Self {
        Self {
            fb_out: 0,
            lanes: [0; 3],
            tex_atlas: 0,
            colormap: 0,
            source: 0,
            mode: 0,
            num_commands: 0,
            present_scale: 5,
            present_rows: 0,
            present_lanes: 1,
            present_format: 0,
            present_stride_bytes: 0,
            sharpen_enable: 0,
            sharpen_strength: 0,
        }
    }
}

impl KernelRegs {
    /// Apply a register write at `off`.
    ///
    /// Unknown offsets are ignored, matching the slave's reserved holes.
    pub fn write(&mut self, off: usize, val: u32) {
        use offs::*;
        match off {
            FB_OUT_LO => set_lo(&mut self.fb_out, val),
            FB_OUT_HI => set_hi(&mut self.fb_out, val),
            TEX_ATLAS_LO => set_lo(&mut self.tex_atlas, val),
            TEX_ATLAS_HI => set_hi(&mut self.tex_atlas, val),
            COLORMAP_LO => set_lo(&mut self.colormap, val),
            COLORMAP_HI => set_hi(&mut self.colormap, val),
            SOURCE_LO => set_lo(&mut self.source, val),
            SOURCE_HI => set_hi(&mut self.source, val),
            MODE => self.mode = val,
            NUM_COMMANDS => self.num_commands = val,
            LANE1_LO => set_lo(&mut self.lanes[0], val),
            LANE1_HI => set_hi(&mut self.lanes[0], val),
            LANE2_LO => set_lo(&mut self.lanes[1], val),
            LANE2_HI => set_hi(&mut self.lanes[1], val),
            LANE3_LO => set_lo(&mut self.lanes[2], val),
            LANE3_HI => set_hi(&mut self.lanes[2], val),
            PRESENT_SCALE => self.present_scale = val,
            PRESENT_ROWS => self.present_rows = val,
            PRESENT_LANES => self.present_lanes = val,
            PRESENT_FORMAT => self.present_format = val,
            PRESENT_STRIDE_BYTES => self.present_stride_bytes = val,
            SHARPEN_ENABLE => self.sharpen_enable = val,
            SHARPEN_STRENGTH => self.sharpen_strength = val,
            _ => log::trace!("regs: ignored write off=0x{:02X} val=0x{:08X}", off, val),
        }
    }
}

fn set_lo(reg: &mut u64, val: u32) {
    *reg = (*reg & 0xFFFF_FFFF_0000_0000) | val as u64;
}

fn set_hi(reg: &mut u64, val: u32) {
    *reg = (*reg & 0xFFFF_FFFF) | ((val as u64) << 32);
}

// ── Tests ────────────────────────────────────────────────────────────────────
