// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command builder: per-frame batch assembly and submission.
//!
//! Draw requests are clamped at queue time and appended as packed records to
//! a host-cached staging buffer; the PL-visible command region is mapped
//! non-cacheable, so per-command writes there would dominate the frame. A
//! flush performs one contiguous copy, programs the raster IP and returns
//! without waiting; the fence happens lazily on the next flush (or an
//! explicit [`CommandBuilder::wait_for_batch`]).
//!
//! The staged count is the single source of truth: it sizes the copy and
//! parameterizes the IP's command-count register.

use std::sync::Arc;
use std::time::Instant;

use ember_common::command::{CommandKind, DrawCommand};
use ember_common::layout::{
    CMD_BUF, COLORMAP, COLORMAP_SIZE, MAX_COMMANDS, PALETTE_OFFSET, PALETTE_SIZE, SHARED_BRAM,
    TEX_ATLAS, VIDEO_BUF,
};
use ember_common::{SCREEN_HEIGHT, SCREEN_WIDTH};
use ember_gpu::regs::offs;

use crate::atlas::AtlasManager;
use crate::device::{
    wait_for_done, wait_for_idle, write_ptr, Ip, KernelOp, RegionId, SharedDevice,
};
use crate::perf::PerfCounters;

/// PS-side front end of the raster IP.
pub struct CommandBuilder {
    device: SharedDevice,
    /// Encoded records, staged in cached memory.
    staging: Vec<u8>,
    count: usize,
    in_flight: bool,
    /// Raster DMA target: shared handoff region (full frame) or the
    /// DDR-composed buffer (view rows only, HUD preserved).
    shared_handoff: bool,
    atlas: AtlasManager,
    perf: Arc<PerfCounters>,
}

impl CommandBuilder {
    pub fn new(device: SharedDevice) -> Self {
        // Sanity-check the handshake before first use; a missing bitstream
        // shows up here as a never-idle control register.
        {
            let mut dev = device.lock();
            for ip in [Ip::Raster, Ip::Present] {
                if !wait_for_idle(&mut **dev, ip) {
                    log::warn!("command: {:?} IP not idle at init", ip);
                }
            }
        }

        let perf = Arc::new(PerfCounters::new());
        Self {
            device,
            staging: Vec::with_capacity(MAX_COMMANDS * 32),
            count: 0,
            in_flight: false,
            shared_handoff: false,
            atlas: AtlasManager::new(perf.clone()),
            perf,
        }
    }

    pub fn perf(&self) -> Arc<PerfCounters> {
        self.perf.clone()
    }

    pub fn device(&self) -> SharedDevice {
        self.device.clone()
    }

    /// Route the raster DMA through the on-chip shared region (full 200 rows)
    /// or back to the DDR frame (168 view rows).
    pub fn set_shared_handoff(&mut self, enable: bool) {
        self.shared_handoff = enable;
    }

    pub fn shared_handoff(&self) -> bool {
        self.shared_handoff
    }

    /// Fence the previous frame's submission and reset the batch.
    ///
    /// Never clears the indexed framebuffer: the status bar drawn into the
    /// DDR copy persists between frames.
    pub fn start_frame(&mut self) {
        self.wait_for_batch();
        self.staging.clear();
        self.count = 0;
    }

    /// Append a wall-column command, clamped to the screen.
    pub fn queue_column(
        &mut self,
        x: i32,
        y1: i32,
        y2: i32,
        frac: u32,
        step: u32,
        tex_off: u32,
        light: u8,
    ) {
        if !(0..SCREEN_WIDTH as i32).contains(&x) {
            return;
        }
        let y1 = y1.max(0);
        let y2 = y2.min(SCREEN_HEIGHT as i32 - 1);
        if y1 > y2 {
            return;
        }

        self.push(DrawCommand {
            kind: CommandKind::Column,
            light: light.min(31),
            x1: x as u16,
            x2: 0,
            y1: y1 as u16,
            y2: y2 as u16,
            frac,
            step,
            tex_off,
        });
        self.perf.queued_column();
    }

    /// Append a floor/ceiling span command, clamped to the screen.
    pub fn queue_span(
        &mut self,
        y: i32,
        x1: i32,
        x2: i32,
        pos: u32,
        step: u32,
        tex_off: u32,
        light: u8,
    ) {
        if !(0..SCREEN_HEIGHT as i32).contains(&y) {
            return;
        }
        let x1 = x1.max(0);
        let x2 = x2.min(SCREEN_WIDTH as i32 - 1);
        if x1 > x2 {
            return;
        }

        self.push(DrawCommand {
            kind: CommandKind::Span,
            light: light.min(31),
            x1: x1 as u16,
            x2: x2 as u16,
            y1: y as u16,
            y2: 0,
            frac: pos,
            step,
            tex_off,
        });
        self.perf.queued_span();
    }

    fn push(&mut self, cmd: DrawCommand) {
        if self.count == MAX_COMMANDS {
            // Capacity reached mid-frame: submit what we have and keep going.
            self.perf.mid_frame_flush();
            log::debug!("command: mid-frame flush at {} records", self.count);
            self.flush_batch();
        }
        self.staging.extend_from_slice(&cmd.encode());
        self.count += 1;
    }

    /// Upload a texture payload through the atlas manager.
    ///
    /// On an atlas wrap the IP's column and flat caches hold stale payloads
    /// for re-used offsets, so the colormap-load path is re-issued to drop
    /// them.
    pub fn upload_texture(&mut self, key: u64, bytes: &[u8]) -> u32 {
        let outcome = {
            let mut dev = self.device.lock();
            self.atlas.upload(key, bytes, dev.region_mut(RegionId::TexAtlas))
        };

        if outcome.wrapped {
            self.wait_for_batch();
            self.run_sync(Ip::Raster, KernelOp::LoadColormap, "post-wrap invalidate");
        }
        outcome.offset
    }

    /// Async submit of the staged batch: fence the previous submission, copy
    /// the records to the PL-visible region, fire draw + DMA in one handshake.
    pub fn flush_batch(&mut self) {
        if self.count == 0 {
            return;
        }
        self.wait_for_batch();

        let bytes = self.staging.len();
        let count = self.count as u32;
        let target = if self.shared_handoff {
            SHARED_BRAM
        } else {
            VIDEO_BUF
        };
        // Shared handoff needs the full frame downstream; legacy DMA stops at
        // the view boundary (present_rows = 0).
        let rows = if self.shared_handoff { SCREEN_HEIGHT as u32 } else { 0 };

        {
            let mut dev = self.device.lock();
            dev.region_mut(RegionId::CmdBuf)[..bytes].copy_from_slice(&self.staging);

            let d = &mut **dev;
            write_ptr(d, Ip::Raster, offs::SOURCE_LO, CMD_BUF.base);
            write_ptr(d, Ip::Raster, offs::TEX_ATLAS_LO, TEX_ATLAS.base);
            write_ptr(d, Ip::Raster, offs::COLORMAP_LO, COLORMAP.base);
            write_ptr(d, Ip::Raster, offs::FB_OUT_LO, target.base);
            KernelOp::DrawAndDma { count, rows }.program(d, Ip::Raster);
            d.start(Ip::Raster);
        }

        self.in_flight = true;
        self.staging.clear();
        self.count = 0;
        self.perf.flush(bytes as u64, count as u64);
    }

    /// Block until the in-flight submission signals done. Idempotent.
    pub fn wait_for_batch(&mut self) {
        if !self.in_flight {
            return;
        }
        let t0 = Instant::now();
        let ok = {
            let mut dev = self.device.lock();
            wait_for_done(&mut **dev, Ip::Raster)
        };
        self.perf.pl_wait(t0.elapsed().as_nanos() as u64);
        if !ok {
            // Keep the pipeline unstuck: the next submission re-arms the IP.
            log::warn!("command: raster did not signal done within budget");
        }
        self.in_flight = false;
    }

    /// Synchronously clear the on-chip framebuffer and invalidate the atlas
    /// and both texture caches. Level-transition path.
    pub fn clear_framebuffer(&mut self) {
        self.wait_for_batch();
        self.run_sync(Ip::Raster, KernelOp::ClearFramebuffer, "clear");
        // Colormap reload drops the IP's texture caches; the host-side atlas
        // restarts from a clean cursor.
        self.run_sync(Ip::Raster, KernelOp::LoadColormap, "clear invalidate");
        self.atlas.reset();
    }

    /// Copy the 8 KiB colormap image to DDR and load it into the raster IP.
    pub fn upload_colormap(&mut self, image: &[u8]) {
        let n = image.len().min(COLORMAP_SIZE);
        {
            let mut dev = self.device.lock();
            dev.region_mut(RegionId::Colormap)[..n].copy_from_slice(&image[..n]);
        }
        self.wait_for_batch();
        self.run_sync(Ip::Raster, KernelOp::LoadColormap, "colormap");
        log::debug!("command: colormap uploaded ({} bytes)", n);
    }

    /// Copy the 768-byte RGB palette to DDR and refresh the present IP's
    /// expansion tables. Ordered before any subsequent present invocation.
    pub fn upload_palette(&mut self, rgb: &[u8]) {
        let n = rgb.len().min(PALETTE_SIZE);
        {
            let mut dev = self.device.lock();
            dev.region_mut(RegionId::Colormap)[PALETTE_OFFSET..PALETTE_OFFSET + n]
                .copy_from_slice(&rgb[..n]);
        }
        self.run_sync(Ip::Present, KernelOp::LoadPalette, "palette");
    }

    /// Program a parameterless operation and wait for completion.
    fn run_sync(&mut self, ip: Ip, op: KernelOp, what: &str) {
        let mut dev = self.device.lock();
        let d = &mut **dev;
        write_ptr(d, ip, offs::COLORMAP_LO, COLORMAP.base);
        op.program(d, ip);
        d.start(ip);
        if !wait_for_done(d, ip) {
            log::warn!("command: {} did not complete within budget", what);
        }
    }

    /// Staged record count, for diagnostics.
    pub fn pending(&self) -> usize {
        self.count
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
