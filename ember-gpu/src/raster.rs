// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Raster IP model.
//!
//! Mode-dispatched coprocessor around a 320x200 indexed framebuffer held in
//! BRAM. Executes draw-command batches with colormap lighting, resolving wall
//! columns through a direct-mapped 256x128 B texture cache and floor/ceiling
//! spans through a single-slot 4 KiB flat cache, then DMAs the frame (or its
//! 168-row view area) back to DDR.
//!
//! The framebuffer persists across invocations: the status bar the PS draws
//! into the DDR copy stays visible because legacy DMA stops at the view
//! boundary and nothing here ever clears rows implicitly.

use ember_common::command::{CommandKind, DrawCommand, COMMAND_SIZE};
use ember_common::layout::{COLORMAP_SIZE, COLUMN_BYTES, FLAT_BYTES};
use ember_common::{SCREEN_HEIGHT, SCREEN_WIDTH, VIEW_HEIGHT};

use crate::regs::{KernelRegs, Mode};

/// Commands fetched per burst from the command region.
const BATCH_SIZE: usize = 64;
/// Direct-mapped texture cache slots.
const TEX_CACHE_ENTRIES: usize = 256;

const FB_SIZE: usize = SCREEN_WIDTH * SCREEN_HEIGHT;

/// DDR windows visible to the raster IP's four AXI masters.
pub struct RasterIo<'a> {
    /// DMA destination for the indexed frame.
    pub fb_out: &'a mut [u8],
    /// Texture atlas.
    pub atlas: &'a [u8],
    /// Colormap image (32x256 lighting table).
    pub colormap: &'a [u8],
    /// Command region, two 128-bit words per record.
    pub commands: &'a [u8],
}

#[derive(Clone, Copy)]
struct TexCacheMeta {
    tag: u32,
    valid: bool,
}

/// On-chip state of the raster IP.
pub struct RasterKernel {
    framebuffer: Box<[u8; FB_SIZE]>,
    colormap: Box<[u8; COLORMAP_SIZE]>,
    tex_cache: Box<[[u8; COLUMN_BYTES]; TEX_CACHE_ENTRIES]>,
    tex_meta: [TexCacheMeta; TEX_CACHE_ENTRIES],
    flat_cache: Box<[u8; FLAT_BYTES]>,
    flat_tag: u32,
    flat_valid: bool,
}

/// Direct-mapped cache index: columns are 128-byte aligned in the atlas.
fn tex_cache_hash(tex_off: u32) -> usize {
    ((tex_off >> 7) as usize) & (TEX_CACHE_ENTRIES - 1)
}

impl RasterKernel {
    pub fn new() -> Self {
        Self {
            framebuffer: Box::new([0; FB_SIZE]),
            colormap: Box::new([0; COLORMAP_SIZE]),
            tex_cache: Box::new([[0; COLUMN_BYTES]; TEX_CACHE_ENTRIES]),
            tex_meta: [TexCacheMeta { tag: 0, valid: false }; TEX_CACHE_ENTRIES],
            flat_cache: Box::new([0; FLAT_BYTES]),
            flat_tag: 0,
            flat_valid: false,
        }
    }

    /// One start/done handshake: dispatch on the latched mode register.
    pub fn run(&mut self, regs: &KernelRegs, io: RasterIo<'_>) {
        let mode = Mode::from_raw(regs.mode);
        log::trace!("raster: run mode={:?} n={}", mode, regs.num_commands);

        match mode {
            Mode::LoadColormap => self.load_colormap(io.colormap),
            Mode::ClearFb => self.clear_framebuffer(),
            Mode::DrawBatch => self.draw_batch(io.commands, io.atlas, regs.num_commands),
            Mode::DmaOut => self.dma_out(io.fb_out, dma_rows(regs.present_rows)),
            Mode::DrawAndDma => {
                self.draw_batch(io.commands, io.atlas, regs.num_commands);
                self.dma_out(io.fb_out, dma_rows(regs.present_rows));
            }
            Mode::Idle | Mode::Upscale | Mode::Present => {}
        }
    }

    /// Burst the 8 KiB lighting table into BRAM and drop both texture caches:
    /// a colormap load marks a level transition, after which atlas offsets may
    /// alias different payloads.
    fn load_colormap(&mut self, colormap_ddr: &[u8]) {
        let n = COLORMAP_SIZE.min(colormap_ddr.len());
        self.colormap[..n].copy_from_slice(&colormap_ddr[..n]);

        for meta in self.tex_meta.iter_mut() {
            meta.valid = false;
        }
        self.flat_valid = false;
    }

    fn clear_framebuffer(&mut self) {
        self.framebuffer.fill(0);
        self.flat_valid = false;
    }

    /// Execute `num_commands` records, fetched in sub-batches of 64.
    fn draw_batch(&mut self, commands: &[u8], atlas: &[u8], num_commands: u32) {
        let mut batch = [DrawCommand::default(); BATCH_SIZE];
        let mut processed = 0usize;
        let total = num_commands as usize;

        while processed < total {
            let chunk = (total - processed).min(BATCH_SIZE);
            burst_read_commands(commands, processed, &mut batch[..chunk]);

            for cmd in &batch[..chunk] {
                match cmd.kind {
                    CommandKind::Column => self.draw_column(cmd, atlas),
                    CommandKind::Span => self.draw_span(cmd, atlas),
                }
            }
            processed += chunk;
        }
    }

    fn draw_column(&mut self, cmd: &DrawCommand, atlas: &[u8]) {
        // The PS clamps at queue time; re-clamp so malformed records stay inert.
        if cmd.x1 as usize >= SCREEN_WIDTH {
            return;
        }
        let y_start = (cmd.y1 as usize).min(SCREEN_HEIGHT - 1);
        let y_end = (cmd.y2 as usize).min(SCREEN_HEIGHT - 1);
        if y_start > y_end {
            return;
        }

        let hash = tex_cache_hash(cmd.tex_off);
        let hit = self.tex_meta[hash].valid && self.tex_meta[hash].tag == cmd.tex_off;
        if !hit {
            burst_read_atlas(atlas, cmd.tex_off, &mut self.tex_cache[hash]);
            self.tex_meta[hash] = TexCacheMeta { tag: cmd.tex_off, valid: true };
        }
        let column = self.tex_cache[hash];

        let cmap_base = (cmd.light as usize) << 8;
        let mut frac = cmd.frac;
        let x = cmd.x1 as usize;

        for y in y_start..=y_end {
            let tex_idx = ((frac >> 16) & 127) as usize;
            let lit = self.colormap[cmap_base + column[tex_idx] as usize];
            self.framebuffer[y * SCREEN_WIDTH + x] = lit;
            frac = frac.wrapping_add(cmd.step);
        }
    }

    fn draw_span(&mut self, cmd: &DrawCommand, atlas: &[u8]) {
        if cmd.y1 as usize >= SCREEN_HEIGHT {
            return;
        }
        let x_start = (cmd.x1 as usize).min(SCREEN_WIDTH - 1);
        let x_end = (cmd.x2 as usize).min(SCREEN_WIDTH - 1);
        if x_start > x_end {
            return;
        }

        if !self.flat_valid || self.flat_tag != cmd.tex_off {
            burst_read_atlas(atlas, cmd.tex_off, self.flat_cache.as_mut());
            self.flat_tag = cmd.tex_off;
            self.flat_valid = true;
        }

        let cmap_base = (cmd.light as usize) << 8;
        let mut pos = cmd.frac;
        let row = cmd.y1 as usize * SCREEN_WIDTH;

        for x in x_start..=x_end {
            // 64x64 tap from the packed position: x in the top 6 bits, y below.
            let ytemp = (pos >> 4) & 0x0FC0;
            let xtemp = pos >> 26;
            let spot = ((xtemp | ytemp) & 4095) as usize;
            let lit = self.colormap[cmap_base + self.flat_cache[spot] as usize];
            self.framebuffer[row + x] = lit;
            pos = pos.wrapping_add(cmd.step);
        }
    }

    /// Burst the first `rows` framebuffer rows out to DDR.
    fn dma_out(&self, fb_out: &mut [u8], rows: usize) {
        let n = (rows * SCREEN_WIDTH).min(fb_out.len());
        fb_out[..n].copy_from_slice(&self.framebuffer[..n]);
    }

    /// Current BRAM framebuffer contents.
    pub fn framebuffer(&self) -> &[u8] {
        self.framebuffer.as_ref()
    }
}

impl Default for RasterKernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Row count for a DMA handshake: `present_rows` when programmed, else the
/// legacy view-only stride that preserves the HUD rows in DDR.
fn dma_rows(present_rows: u32) -> usize {
    if present_rows > 0 {
        (present_rows as usize).min(SCREEN_HEIGHT)
    } else {
        VIEW_HEIGHT
    }
}

/// Decode a sub-batch from the 128-bit-wide command region.
fn burst_read_commands(commands: &[u8], first: usize, batch: &mut [DrawCommand]) {
    for (i, slot) in batch.iter_mut().enumerate() {
        let off = (first + i) * COMMAND_SIZE;
        let mut record = [0u8; COMMAND_SIZE];
        if off + COMMAND_SIZE <= commands.len() {
            record.copy_from_slice(&commands[off..off + COMMAND_SIZE]);
        }
        *slot = DrawCommand::decode(&record);
    }
}

/// Burst-read from the atlas at a 16-byte-aligned word boundary, zero-filling
/// past the end of the window.
fn burst_read_atlas(atlas: &[u8], tex_off: u32, buf: &mut [u8]) {
    let start = ((tex_off as usize) / 16) * 16;
    let avail = atlas.len().saturating_sub(start).min(buf.len());
    buf[..avail].copy_from_slice(&atlas[start..start + avail]);
    buf[avail..].fill(0);
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ember_common::layout::PALETTE_SIZE;

    /// colormap[k*256 + i] = i for every light level.
    fn identity_colormap() -> Vec<u8> {
        let mut cm = vec![0u8; COLORMAP_SIZE + PALETTE_SIZE];
        for k in 0..32 {
            for i in 0..256 {
                cm[k * 256 + i] = i as u8;
            }
        }
        cm
    }

    fn loaded_kernel(colormap: &[u8]) -> RasterKernel {
        let mut k = RasterKernel::new();
        let mut regs = KernelRegs::default();
        regs.mode = Mode::LoadColormap.raw();
        k.run(
            &regs,
            RasterIo { fb_out: &mut [], atlas: &[], colormap, commands: &[] },
        );
        k
    }

    fn draw(kernel: &mut RasterKernel, atlas: &[u8], cmds: &[DrawCommand]) {
        let mut bytes = Vec::new();
        for c in cmds {
            c.write_to(&mut bytes).unwrap();
        }
        let mut regs = KernelRegs::default();
        regs.mode = Mode::DrawBatch.raw();
        regs.num_commands = cmds.len() as u32;
        kernel.run(
            &regs,
            RasterIo { fb_out: &mut [], atlas, colormap: &[], commands: &bytes },
        );
    }

    #[test]
    fn test_column_gradient() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);

        let mut atlas = vec![0u8; 8192];
        for (i, b) in atlas[..128].iter_mut().enumerate() {
            *b = i as u8;
        }

        draw(
            &mut kernel,
            &atlas,
            &[DrawCommand {
                kind: CommandKind::Column,
                light: 0,
                x1: 100,
                y1: 10,
                y2: 13,
                frac: 0,
                step: 0x0001_0000,
                tex_off: 0,
                ..Default::default()
            }],
        );

        let fb = kernel.framebuffer();
        for (row, expect) in (10..=13).zip(0u8..) {
            assert_eq!(fb[row * SCREEN_WIDTH + 100], expect, "row {}", row);
        }
        // Neighboring column untouched.
        assert_eq!(fb[10 * SCREEN_WIDTH + 101], 0);
    }

    #[test]
    fn test_column_single_pixel() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);
        let atlas = vec![9u8; 8192];

        draw(
            &mut kernel,
            &atlas,
            &[DrawCommand {
                kind: CommandKind::Column,
                x1: 5,
                y1: 7,
                y2: 7,
                step: 0x0001_0000,
                ..Default::default()
            }],
        );

        let fb = kernel.framebuffer();
        assert_eq!(fb[7 * SCREEN_WIDTH + 5], 9);
        assert_eq!(fb[6 * SCREEN_WIDTH + 5], 0);
        assert_eq!(fb[8 * SCREEN_WIDTH + 5], 0);
    }

    #[test]
    fn test_span_gradient() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);

        // 64x64 flat with byte(r, c) = r*64 + c.
        let mut atlas = vec![0u8; 8192];
        for r in 0..64 {
            for c in 0..64 {
                atlas[r * 64 + c] = (r * 64 + c) as u8;
            }
        }

        draw(
            &mut kernel,
            &atlas,
            &[DrawCommand {
                kind: CommandKind::Span,
                light: 0,
                x1: 0,
                x2: 3,
                y1: 50,
                frac: 0,
                step: 0x0400_0000,
                tex_off: 0,
                ..Default::default()
            }],
        );

        let fb = kernel.framebuffer();
        assert_eq!(&fb[50 * SCREEN_WIDTH..50 * SCREEN_WIDTH + 4], &[0, 1, 2, 3]);
    }

    #[test]
    fn test_span_single_pixel() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);
        let atlas = vec![3u8; 8192];

        draw(
            &mut kernel,
            &atlas,
            &[DrawCommand {
                kind: CommandKind::Span,
                x1: 40,
                x2: 40,
                y1: 20,
                step: 0x0400_0000,
                ..Default::default()
            }],
        );

        let fb = kernel.framebuffer();
        assert_eq!(fb[20 * SCREEN_WIDTH + 40], 3);
        assert_eq!(fb[20 * SCREEN_WIDTH + 39], 0);
        assert_eq!(fb[20 * SCREEN_WIDTH + 41], 0);
    }

    #[test]
    fn test_lighting_applied() {
        // colormap row 5 maps everything to 0xAB.
        let mut cm = vec![0u8; COLORMAP_SIZE];
        cm[5 * 256..6 * 256].fill(0xAB);

        let mut kernel = loaded_kernel(&cm);
        let atlas = vec![1u8; 8192];

        draw(
            &mut kernel,
            &atlas,
            &[DrawCommand {
                kind: CommandKind::Column,
                light: 5,
                x1: 0,
                y1: 0,
                y2: 0,
                ..Default::default()
            }],
        );
        assert_eq!(kernel.framebuffer()[0], 0xAB);
    }

    #[test]
    fn test_out_of_range_commands_dropped() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);
        let atlas = vec![7u8; 8192];

        draw(
            &mut kernel,
            &atlas,
            &[
                DrawCommand {
                    kind: CommandKind::Column,
                    x1: 320, // off-screen
                    y1: 0,
                    y2: 10,
                    ..Default::default()
                },
                DrawCommand {
                    kind: CommandKind::Span,
                    x1: 0,
                    x2: 10,
                    y1: 200, // off-screen
                    ..Default::default()
                },
            ],
        );
        assert!(kernel.framebuffer().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_column_clamps_tall_range() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);
        let atlas = vec![2u8; 8192];

        draw(
            &mut kernel,
            &atlas,
            &[DrawCommand {
                kind: CommandKind::Column,
                x1: 0,
                y1: 190,
                y2: 400, // clamps to 199
                step: 0x0001_0000,
                ..Default::default()
            }],
        );

        let fb = kernel.framebuffer();
        assert_eq!(fb[199 * SCREEN_WIDTH], 2);
    }

    #[test]
    fn test_colormap_load_invalidates_texture_cache() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);

        let mut atlas = vec![0u8; 8192];
        atlas[..128].fill(0x11);

        let cmd = DrawCommand {
            kind: CommandKind::Column,
            x1: 0,
            y1: 0,
            y2: 0,
            ..Default::default()
        };

        draw(&mut kernel, &atlas, &[cmd]);
        assert_eq!(kernel.framebuffer()[0], 0x11);

        // Same tag, new payload: the cached copy must win until invalidated.
        atlas[..128].fill(0x22);
        draw(&mut kernel, &atlas, &[cmd]);
        assert_eq!(kernel.framebuffer()[0], 0x11);

        let mut regs = KernelRegs::default();
        regs.mode = Mode::LoadColormap.raw();
        kernel.run(
            &regs,
            RasterIo { fb_out: &mut [], atlas: &[], colormap: &cm, commands: &[] },
        );

        draw(&mut kernel, &atlas, &[cmd]);
        assert_eq!(kernel.framebuffer()[0], 0x22);
    }

    #[test]
    fn test_clear_then_dma_is_all_zero() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);
        let atlas = vec![5u8; 8192];

        draw(
            &mut kernel,
            &atlas,
            &[DrawCommand {
                kind: CommandKind::Column,
                x1: 10,
                y1: 0,
                y2: 199,
                ..Default::default()
            }],
        );

        let mut regs = KernelRegs::default();
        regs.mode = Mode::ClearFb.raw();
        kernel.run(
            &regs,
            RasterIo { fb_out: &mut [], atlas: &[], colormap: &[], commands: &[] },
        );

        let mut out = vec![0xFFu8; FB_SIZE];
        let mut regs = KernelRegs::default();
        regs.mode = Mode::DmaOut.raw();
        regs.present_rows = SCREEN_HEIGHT as u32;
        kernel.run(
            &regs,
            RasterIo { fb_out: &mut out, atlas: &[], colormap: &[], commands: &[] },
        );
        assert!(out.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_dma_legacy_stride_preserves_hud_rows() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);
        let atlas = vec![4u8; 8192];

        draw(
            &mut kernel,
            &atlas,
            &[DrawCommand {
                kind: CommandKind::Column,
                x1: 0,
                y1: 0,
                y2: 199,
                ..Default::default()
            }],
        );

        // DDR copy pre-filled with HUD bytes.
        let mut out = vec![0x77u8; FB_SIZE];
        let mut regs = KernelRegs::default();
        regs.mode = Mode::DmaOut.raw();
        kernel.run(
            &regs,
            RasterIo { fb_out: &mut out, atlas: &[], colormap: &[], commands: &[] },
        );

        assert_eq!(out[0], 4);
        assert_eq!(out[(VIEW_HEIGHT - 1) * SCREEN_WIDTH], 4);
        // Rows 168..199 untouched.
        assert!(out[VIEW_HEIGHT * SCREEN_WIDTH..].iter().all(|&p| p == 0x77));
    }

    #[test]
    fn test_batch_larger_than_burst() {
        let cm = identity_colormap();
        let mut kernel = loaded_kernel(&cm);
        let atlas = vec![1u8; 8192];

        // 100 commands spans two sub-batches of 64.
        let cmds: Vec<DrawCommand> = (0..100)
            .map(|x| DrawCommand {
                kind: CommandKind::Column,
                x1: x as u16,
                y1: 0,
                y2: 0,
                ..Default::default()
            })
            .collect();
        draw(&mut kernel, &atlas, &cmds);

        let fb = kernel.framebuffer();
        for x in 0..100 {
            assert_eq!(fb[x], 1, "column {}", x);
        }
        assert_eq!(fb[100], 0);
    }
}
