// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Present/upscale IP model.
//!
//! Expands the indexed 320-wide frame through the on-chip RGB palette and
//! writes the packed result to the scanout region, natively or with the 5x
//! nearest-neighbor upscale, in XRGB8888 or RGB565, through one or four
//! write lanes.
//!
//! Each source row goes through a two-stage pipeline:
//!
//! 1. index -> packed-color row (320 entries, II=1 on hardware);
//! 2. pack-and-expand into 128-bit words (4x32bpp or 8x16bpp per word).
//!
//! The 5x replication in stage 2 keeps a running `(q, r)` divide state
//! instead of computing `out_x / 5` per pixel; splitting the stages removes
//! the loop-carried packed-word dependency that would otherwise force II>=5.
//!
//! An optional five-tap sharpen (center, left, right, above, below) runs
//! between expansion and pack; strength 0 leaves the output bit-exact with
//! the plain path.

use ember_common::layout::PALETTE_OFFSET;
use ember_common::{SCREEN_HEIGHT, SCREEN_WIDTH, UPSCALE_FACTOR};

use crate::regs::{KernelRegs, Mode, PixelFormat};

/// DDR windows visible to the present IP.
pub struct PresentIo<'a> {
    /// Scanout region shared by all four lane masters.
    pub fb_out: &'a mut [u8],
    /// 128-bit word offset of each lane pointer within `fb_out`.
    pub lane_word_base: [usize; 4],
    /// Colormap image; the RGB palette sits at [`PALETTE_OFFSET`].
    pub colormap: &'a [u8],
    /// Indexed source frame (composed DDR buffer or shared handoff region).
    pub source: &'a [u8],
}

/// On-chip palette state of the present IP.
pub struct PresentKernel {
    palette_rgb: [[u8; 3]; 256],
    palette_rgba: [u32; 256],
    palette_rgb565: [u16; 256],
    palette_valid: bool,
}

fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    (((r & 0xF8) as u16) << 8) | (((g & 0xFC) as u16) << 3) | ((b as u16) >> 3)
}

impl PresentKernel {
    pub fn new() -> Self {
        Self {
            palette_rgb: [[0; 3]; 256],
            palette_rgba: [0; 256],
            palette_rgb565: [0; 256],
            palette_valid: false,
        }
    }

    /// One start/done handshake: dispatch on the latched mode register.
    pub fn run(&mut self, regs: &KernelRegs, io: PresentIo<'_>) {
        match Mode::from_raw(regs.mode) {
            Mode::LoadColormap => self.load_palette(io.colormap),
            Mode::Present | Mode::Upscale => self.present(regs, io),
            _ => {}
        }
    }

    /// Refresh the palette BRAMs from the DDR image.
    fn load_palette(&mut self, colormap_ddr: &[u8]) {
        for i in 0..256 {
            let off = PALETTE_OFFSET + i * 3;
            let (r, g, b) = if off + 3 <= colormap_ddr.len() {
                (colormap_ddr[off], colormap_ddr[off + 1], colormap_ddr[off + 2])
            } else {
                (0, 0, 0)
            };
            self.palette_rgb[i] = [r, g, b];
            self.palette_rgba[i] = ((r as u32) << 16) | ((g as u32) << 8) | b as u32;
            self.palette_rgb565[i] = pack_rgb565(r, g, b);
        }
        self.palette_valid = true;
        log::trace!("present: palette loaded");
    }

    fn present(&mut self, regs: &KernelRegs, io: PresentIo<'_>) {
        if !self.palette_valid {
            self.load_palette(io.colormap);
        }

        let src_rows = if regs.present_rows == 0 || regs.present_rows as usize > SCREEN_HEIGHT {
            SCREEN_HEIGHT
        } else {
            regs.present_rows as usize
        };
        let scale = if regs.present_scale == 1 { 1 } else { UPSCALE_FACTOR };
        let format = PixelFormat::from_raw(regs.present_format);
        let lanes = if regs.present_lanes >= 4 { 4 } else { 1 };
        let sharpen = regs.sharpen_enable != 0 && regs.sharpen_strength != 0;
        let strength = (regs.sharpen_strength & 0xFF) as i32;

        let pixels_per_word = 16 / format.bytes_per_pixel();
        let out_width = SCREEN_WIDTH * scale;
        let row_words = out_width / pixels_per_word;
        let stride_words = if regs.present_stride_bytes == 0 {
            row_words
        } else {
            row_words.max((regs.present_stride_bytes as usize + 15) / 16)
        };
        let lane_words = row_words / lanes;

        let mut row_words_buf = vec![0u128; row_words];

        for y in 0..src_rows {
            let src_row = read_indexed_row(io.source, y);

            match format {
                PixelFormat::Xrgb8888 => {
                    let colors = if sharpen {
                        let rgb = self.sharpened_rgb_row(io.source, y, src_rows, strength);
                        let mut colors = [0u32; SCREEN_WIDTH];
                        for (c, px) in colors.iter_mut().zip(rgb.iter()) {
                            *c = ((px[0] as u32) << 16) | ((px[1] as u32) << 8) | px[2] as u32;
                        }
                        colors
                    } else {
                        let mut colors = [0u32; SCREEN_WIDTH];
                        for (c, &idx) in colors.iter_mut().zip(src_row.iter()) {
                            *c = self.palette_rgba[idx as usize];
                        }
                        colors
                    };
                    pack_row_8888(&colors, scale, &mut row_words_buf);
                }
                PixelFormat::Rgb565 => {
                    let colors = if sharpen {
                        let rgb = self.sharpened_rgb_row(io.source, y, src_rows, strength);
                        let mut colors = [0u16; SCREEN_WIDTH];
                        for (c, px) in colors.iter_mut().zip(rgb.iter()) {
                            *c = pack_rgb565(px[0], px[1], px[2]);
                        }
                        colors
                    } else {
                        let mut colors = [0u16; SCREEN_WIDTH];
                        for (c, &idx) in colors.iter_mut().zip(src_row.iter()) {
                            *c = self.palette_rgb565[idx as usize];
                        }
                        colors
                    };
                    pack_row_565(&colors, scale, &mut row_words_buf);
                }
            }

            // Replicate the packed row over `scale` output rows. In quad mode
            // slot w belongs to lane w / lane_words; the four pointers address
            // the same logical frame, so disjoint slot ranges splice into one
            // contiguous row.
            for vy in 0..scale {
                let dst_word_base = (y * scale + vy) * stride_words;
                for (slot, word) in row_words_buf.iter().enumerate() {
                    let lane = slot / lane_words;
                    let word_idx = io.lane_word_base[lane] + dst_word_base + slot;
                    let byte = word_idx * 16;
                    if byte + 16 <= io.fb_out.len() {
                        io.fb_out[byte..byte + 16].copy_from_slice(&word.to_le_bytes());
                    }
                }
            }
        }
    }

    /// Expand row `y` and its vertical neighbors to RGB, then apply the
    /// five-tap ring per channel.
    fn sharpened_rgb_row(
        &self,
        source: &[u8],
        y: usize,
        src_rows: usize,
        strength: i32,
    ) -> [[u8; 3]; SCREEN_WIDTH] {
        let cur = self.rgb_row(source, y);
        let above = self.rgb_row(source, y.saturating_sub(1));
        let below = self.rgb_row(source, (y + 1).min(src_rows - 1));

        let mut out = [[0u8; 3]; SCREEN_WIDTH];
        for x in 0..SCREEN_WIDTH {
            let left = &cur[x.saturating_sub(1)];
            let right = &cur[(x + 1).min(SCREEN_WIDTH - 1)];
            for ch in 0..3 {
                let c = cur[x][ch] as i32;
                let avg = (left[ch] as i32
                    + right[ch] as i32
                    + above[x][ch] as i32
                    + below[x][ch] as i32)
                    / 4;
                let v = c + (((c - avg) * strength) >> 8);
                out[x][ch] = v.clamp(0, 255) as u8;
            }
        }
        out
    }

    fn rgb_row(&self, source: &[u8], y: usize) -> [[u8; 3]; SCREEN_WIDTH] {
        let idx = read_indexed_row(source, y);
        let mut out = [[0u8; 3]; SCREEN_WIDTH];
        for (px, &i) in out.iter_mut().zip(idx.iter()) {
            *px = self.palette_rgb[i as usize];
        }
        out
    }
}

impl Default for PresentKernel {
    fn default() -> Self {
        Self::new()
    }
}

fn read_indexed_row(source: &[u8], y: usize) -> [u8; SCREEN_WIDTH] {
    let mut row = [0u8; SCREEN_WIDTH];
    let off = y * SCREEN_WIDTH;
    let avail = source.len().saturating_sub(off).min(SCREEN_WIDTH);
    row[..avail].copy_from_slice(&source[off..off + avail]);
    row
}

/// Stage 2, 32-bpp: pack four pixels per word. At 5x the running `(q, r)`
/// state advances 4 output pixels per word, so a word never straddles more
/// than one source-pixel boundary.
fn pack_row_8888(colors: &[u32; SCREEN_WIDTH], scale: usize, out: &mut [u128]) {
    if scale == 1 {
        for (ow, word) in out.iter_mut().enumerate() {
            let mut packed = 0u128;
            for p in 0..4 {
                packed |= (colors[ow * 4 + p] as u128) << (p * 32);
            }
            *word = packed;
        }
        return;
    }

    let mut q = 0usize;
    let mut r = 0usize;
    for word in out.iter_mut() {
        let c0 = colors[q];
        let c1 = colors[(q + 1).min(SCREEN_WIDTH - 1)];
        let mut lanes = [c0; 4];
        match r {
            2 => lanes[3] = c1,
            3 => {
                lanes[2] = c1;
                lanes[3] = c1;
            }
            4 => {
                lanes[1] = c1;
                lanes[2] = c1;
                lanes[3] = c1;
            }
            _ => {}
        }
        let mut packed = 0u128;
        for (p, lane) in lanes.iter().enumerate() {
            packed |= (*lane as u128) << (p * 32);
        }
        *word = packed;

        r += 4;
        if r >= UPSCALE_FACTOR {
            r -= UPSCALE_FACTOR;
            q += 1;
        }
    }
}

/// Stage 2, 16-bpp: pack eight pixels per word, advancing `(q, r)` one output
/// pixel at a time.
fn pack_row_565(colors: &[u16; SCREEN_WIDTH], scale: usize, out: &mut [u128]) {
    if scale == 1 {
        for (ow, word) in out.iter_mut().enumerate() {
            let mut packed = 0u128;
            for p in 0..8 {
                packed |= (colors[ow * 8 + p] as u128) << (p * 16);
            }
            *word = packed;
        }
        return;
    }

    let mut q = 0usize;
    let mut r = 0usize;
    for word in out.iter_mut() {
        let mut packed = 0u128;
        for p in 0..8 {
            let src_x = q.min(SCREEN_WIDTH - 1);
            packed |= (colors[src_x] as u128) << (p * 16);
            r += 1;
            if r >= UPSCALE_FACTOR {
                r = 0;
                q += 1;
            }
        }
        *word = packed;
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ember_common::layout::{COLORMAP_SIZE, PALETTE_SIZE};

    const OUT_WIDTH: usize = SCREEN_WIDTH * UPSCALE_FACTOR;

    /// Colormap image whose palette maps index i to (i, i/2, 255 - i).
    fn test_image() -> Vec<u8> {
        let mut img = vec![0u8; COLORMAP_SIZE + PALETTE_SIZE];
        for i in 0..256 {
            img[PALETTE_OFFSET + i * 3] = i as u8;
            img[PALETTE_OFFSET + i * 3 + 1] = (i / 2) as u8;
            img[PALETTE_OFFSET + i * 3 + 2] = (255 - i) as u8;
        }
        img
    }

    fn run_present(
        kernel: &mut PresentKernel,
        regs: &KernelRegs,
        source: &[u8],
        out_len: usize,
    ) -> Vec<u8> {
        let image = test_image();
        let mut out = vec![0u8; out_len];
        let mut load = KernelRegs::default();
        load.mode = Mode::LoadColormap.raw();
        kernel.run(
            &load,
            PresentIo {
                fb_out: &mut [],
                lane_word_base: [0; 4],
                colormap: &image,
                source: &[],
            },
        );
        kernel.run(
            regs,
            PresentIo {
                fb_out: &mut out,
                lane_word_base: [0; 4],
                colormap: &image,
                source,
            },
        );
        out
    }

    fn pixel32(out: &[u8], stride_bytes: usize, x: usize, y: usize) -> u32 {
        let off = y * stride_bytes + x * 4;
        u32::from_le_bytes(out[off..off + 4].try_into().unwrap())
    }

    #[test]
    fn test_uniform_row_quad_lane_5x() {
        let mut kernel = PresentKernel::new();
        let mut source = vec![0u8; SCREEN_WIDTH * SCREEN_HEIGHT];
        source[..SCREEN_WIDTH].fill(7); // row 0 uniform palette index 7

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Present.raw();
        regs.present_scale = 5;
        regs.present_lanes = 4;
        regs.present_rows = 1;
        regs.present_stride_bytes = 6400;

        let out = run_present(&mut kernel, &regs, &source, 6400 * 5);

        let expect = (7u32 << 16) | ((7 / 2) << 8) | (255 - 7);
        for y in 0..5 {
            for x in 0..OUT_WIDTH {
                assert_eq!(pixel32(&out, 6400, x, y), expect, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_5x_is_exact_nearest_neighbor() {
        let mut kernel = PresentKernel::new();
        let mut source = vec![0u8; SCREEN_WIDTH];
        for (x, b) in source.iter_mut().enumerate() {
            *b = (x % 256) as u8;
        }

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Present.raw();
        regs.present_rows = 1;

        let stride = OUT_WIDTH * 4;
        let out = run_present(&mut kernel, &regs, &source, stride * 5);

        for c in 0..OUT_WIDTH {
            let src = source[c / 5] as u32;
            let expect = (src << 16) | ((src / 2) << 8) | (255 - src);
            assert_eq!(pixel32(&out, stride, c, 0), expect, "column {}", c);
        }
    }

    #[test]
    fn test_native_scale_1() {
        let mut kernel = PresentKernel::new();
        let mut source = vec![0u8; SCREEN_WIDTH];
        for (x, b) in source.iter_mut().enumerate() {
            *b = (x % 256) as u8;
        }

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Present.raw();
        regs.present_scale = 1;
        regs.present_rows = 1;

        let out = run_present(&mut kernel, &regs, &source, SCREEN_WIDTH * 4);
        for x in 0..SCREEN_WIDTH {
            let src = source[x] as u32;
            let expect = (src << 16) | ((src / 2) << 8) | (255 - src);
            assert_eq!(pixel32(&out, SCREEN_WIDTH * 4, x, 0), expect);
        }
    }

    #[test]
    fn test_rgb565_format() {
        let mut kernel = PresentKernel::new();
        let mut source = vec![0u8; SCREEN_WIDTH];
        source.fill(200);

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Present.raw();
        regs.present_format = PixelFormat::Rgb565 as u32;
        regs.present_rows = 1;

        let out = run_present(&mut kernel, &regs, &source, OUT_WIDTH * 2 * 5);

        let expect = pack_rgb565(200, 100, 55);
        for x in 0..OUT_WIDTH {
            let got = u16::from_le_bytes([out[x * 2], out[x * 2 + 1]]);
            assert_eq!(got, expect, "column {}", x);
        }
    }

    #[test]
    fn test_rows_replicate_vertically() {
        let mut kernel = PresentKernel::new();
        let mut source = vec![0u8; SCREEN_WIDTH * 2];
        source[..SCREEN_WIDTH].fill(1);
        source[SCREEN_WIDTH..].fill(2);

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Present.raw();
        regs.present_rows = 2;

        let stride = OUT_WIDTH * 4;
        let out = run_present(&mut kernel, &regs, &source, stride * 10);

        let c1 = pixel32(&out, stride, 0, 0);
        for y in 0..5 {
            assert_eq!(pixel32(&out, stride, 123, y), c1);
        }
        let c2 = pixel32(&out, stride, 0, 5);
        assert_ne!(c1, c2);
        for y in 5..10 {
            assert_eq!(pixel32(&out, stride, 123, y), c2);
        }
    }

    #[test]
    fn test_upscale_mode_alias() {
        let mut kernel = PresentKernel::new();
        let source = vec![9u8; SCREEN_WIDTH];

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Upscale.raw();
        regs.present_rows = 1;

        let out = run_present(&mut kernel, &regs, &source, OUT_WIDTH * 4 * 5);
        assert_ne!(pixel32(&out, OUT_WIDTH * 4, 0, 0), 0);
    }

    #[test]
    fn test_sharpen_strength_zero_is_bit_exact() {
        let mut source = vec![0u8; SCREEN_WIDTH * 4];
        for (i, b) in source.iter_mut().enumerate() {
            *b = (i * 37 % 256) as u8;
        }

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Present.raw();
        regs.present_rows = 4;

        let stride = OUT_WIDTH * 4;
        let mut plain_kernel = PresentKernel::new();
        let plain = run_present(&mut plain_kernel, &regs, &source, stride * 20);

        regs.sharpen_enable = 1;
        regs.sharpen_strength = 0;
        let mut sharp_kernel = PresentKernel::new();
        let sharp = run_present(&mut sharp_kernel, &regs, &source, stride * 20);

        assert_eq!(plain, sharp);
    }

    #[test]
    fn test_sharpen_flat_field_unchanged() {
        // c == avg(neighbors) everywhere, so any strength is a no-op.
        let source = vec![42u8; SCREEN_WIDTH * 4];

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Present.raw();
        regs.present_rows = 4;

        let stride = OUT_WIDTH * 4;
        let mut plain_kernel = PresentKernel::new();
        let plain = run_present(&mut plain_kernel, &regs, &source, stride * 20);

        regs.sharpen_enable = 1;
        regs.sharpen_strength = 255;
        let mut sharp_kernel = PresentKernel::new();
        let sharp = run_present(&mut sharp_kernel, &regs, &source, stride * 20);

        assert_eq!(plain, sharp);
    }

    #[test]
    fn test_sharpen_boosts_edges() {
        // Bright column on dark field; palette red channel equals the index.
        let mut source = vec![10u8; SCREEN_WIDTH * 3];
        for y in 0..3 {
            source[y * SCREEN_WIDTH + 160] = 200;
        }

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Present.raw();
        regs.present_rows = 3;
        regs.present_scale = 1;
        regs.sharpen_enable = 1;
        regs.sharpen_strength = 255;

        let mut kernel = PresentKernel::new();
        let out = run_present(&mut kernel, &regs, &source, SCREEN_WIDTH * 4 * 3);

        let center = pixel32(&out, SCREEN_WIDTH * 4, 160, 1) >> 16 & 0xFF;
        let field = pixel32(&out, SCREEN_WIDTH * 4, 10, 1) >> 16 & 0xFF;
        // Center overshoots its plain value (200), field stays put.
        assert!(center > 200, "center={}", center);
        assert_eq!(field, 10);
    }

    #[test]
    fn test_stride_wider_than_row() {
        let mut kernel = PresentKernel::new();
        let source = vec![5u8; SCREEN_WIDTH];

        let mut regs = KernelRegs::default();
        regs.mode = Mode::Present.raw();
        regs.present_rows = 1;
        regs.present_stride_bytes = 8192; // display pitch wider than 6400

        let out = run_present(&mut kernel, &regs, &source, 8192 * 5);
        let first_row_px = pixel32(&out, 8192, 0, 0);
        assert_ne!(first_row_px, 0);
        // The pad area between row end and stride end is untouched.
        assert!(out[OUT_WIDTH * 4..8192].iter().all(|&b| b == 0));
        // Second output row starts at the stride boundary.
        assert_eq!(pixel32(&out, 8192, 0, 1), first_row_px);
    }
}
