// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Present orchestrator.
//!
//! Decouples the engine thread from presentation with a bounded queue of
//! indexed-frame snapshots and one worker thread. The engine copies the
//! finished 320x200 frame into a free slot and moves on; a full queue blocks
//! it, which is the backpressure that keeps game speed honest. The worker
//! drains snapshots and runs one of two paths:
//!
//! - **CPU**: palette expansion + integer upscale through [`crate::blit`];
//! - **PL**: a present-IP invocation, sourcing either the composed DDR frame
//!   (composite mode, HUD included in the upscale) or the shared handoff
//!   region, with the HUD band overlaid on the packed output afterwards.
//!
//! Routing lives here, not in the kernels: switching modes only rewrites
//! pointer registers and the DMA row count.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use ember_common::layout::{COLORMAP, FB_OUT, FRAME_SIZE, OUT_WIDTH, SHARED_BRAM, VIDEO_BUF};
use ember_common::{SCREEN_HEIGHT, UPSCALE_FACTOR, VIEW_HEIGHT};
use ember_gpu::regs::offs;
use ember_gpu::PixelFormat;

use crate::blit::{blit_band, blit_frame, CpuPalette};
use crate::device::{wait_for_done, write_ptr, Ip, KernelOp, RegionId, SharedDevice};
use crate::perf::PerfCounters;

/// Snapshot slots between the engine and the worker.
pub const PRESENT_QUEUE_DEPTH: usize = 3;

/// Boundary to the actual display: fbdev scanout, network viewer, or nothing.
pub trait DisplaySink: Send {
    fn present(
        &mut self,
        frame: &[u8],
        width: usize,
        height: usize,
        stride_bytes: usize,
        format: PixelFormat,
    ) -> io::Result<()>;
}

/// Presentation policy, adjustable at runtime.
#[derive(Debug, Clone)]
pub struct PresentConfig {
    /// Run the upscale on the present IP instead of the CPU.
    pub pl_scale: bool,
    /// Present-IP write lanes, 1 or 4.
    pub lanes: u32,
    pub format: PixelFormat,
    /// Integer upscale factor (PL path supports 1 and 5).
    pub scale: usize,
    /// Present from the composed DDR frame rather than the handoff region.
    pub composite: bool,
    /// Overlay the HUD band on the packed output in handoff mode.
    pub hud_overlay: bool,
    pub sharpen_enable: bool,
    pub sharpen_strength: u8,
    /// CPU path writes straight into the device scanout region instead of a
    /// worker-local buffer (screen output).
    pub blit_to_device: bool,
    /// Destination surface geometry.
    pub out_width: usize,
    pub stride_bytes: usize,
    /// Physical base the present IP writes to.
    pub scanout_base: u64,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            pl_scale: false,
            lanes: 1,
            format: PixelFormat::Xrgb8888,
            scale: UPSCALE_FACTOR,
            composite: true,
            hud_overlay: true,
            sharpen_enable: false,
            sharpen_strength: 0,
            blit_to_device: false,
            out_width: OUT_WIDTH,
            stride_bytes: OUT_WIDTH * 4,
            scanout_base: FB_OUT.base,
        }
    }
}

struct QueueState {
    slots: Vec<Vec<u8>>,
    head: usize,
    tail: usize,
    count: usize,
    /// Worker is between pop and sink completion.
    busy: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Engine-facing handle; owns the worker thread.
pub struct PresentOrchestrator {
    shared: Arc<Shared>,
    config: Arc<Mutex<PresentConfig>>,
    palette: Arc<Mutex<CpuPalette>>,
    worker: Option<JoinHandle<()>>,
}

impl PresentOrchestrator {
    /// Start the worker thread.
    pub fn spawn(
        device: SharedDevice,
        perf: Arc<PerfCounters>,
        config: PresentConfig,
        sink: Box<dyn DisplaySink>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                slots: (0..PRESENT_QUEUE_DEPTH).map(|_| vec![0u8; FRAME_SIZE]).collect(),
                head: 0,
                tail: 0,
                count: 0,
                busy: false,
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        });
        let config = Arc::new(Mutex::new(config));
        let palette = Arc::new(Mutex::new(CpuPalette::new()));

        let worker = {
            let shared = shared.clone();
            let config = config.clone();
            let palette = palette.clone();
            std::thread::Builder::new()
                .name("ember-present".into())
                .spawn(move || worker_loop(shared, device, perf, config, palette, sink))?
        };

        log::info!("present: worker started (queue depth {})", PRESENT_QUEUE_DEPTH);
        Ok(Self { shared, config, palette, worker: Some(worker) })
    }

    /// Copy the finished indexed frame into a free slot; blocks while the
    /// queue is full.
    pub fn present_frame(&self, frame: &[u8]) {
        let mut st = self.shared.state.lock();
        while st.count == PRESENT_QUEUE_DEPTH && !st.shutdown {
            self.shared.not_full.wait(&mut st);
        }
        if st.shutdown {
            return;
        }
        let tail = st.tail;
        let n = frame.len().min(FRAME_SIZE);
        st.slots[tail][..n].copy_from_slice(&frame[..n]);
        st.slots[tail][n..].fill(0);
        st.tail = (st.tail + 1) % PRESENT_QUEUE_DEPTH;
        st.count += 1;
        self.shared.not_empty.notify_one();
    }

    /// Block until every queued snapshot has been presented.
    pub fn drain(&self) {
        let mut st = self.shared.state.lock();
        while (st.count > 0 || st.busy) && !st.shutdown {
            self.shared.not_full.wait(&mut st);
        }
    }

    /// Refresh the CPU expansion tables (PL tables reload via the palette
    /// upload on the command builder).
    pub fn set_palette(&self, rgb: &[u8]) {
        self.palette.lock().set(rgb);
    }

    /// Adjust routing/presentation policy at runtime.
    pub fn update_config(&self, f: impl FnOnce(&mut PresentConfig)) {
        f(&mut self.config.lock());
    }
}

impl Drop for PresentOrchestrator {
    fn drop(&mut self) {
        {
            let mut st = self.shared.state.lock();
            st.shutdown = true;
        }
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    shared: Arc<Shared>,
    device: SharedDevice,
    perf: Arc<PerfCounters>,
    config: Arc<Mutex<PresentConfig>>,
    palette: Arc<Mutex<CpuPalette>>,
    mut sink: Box<dyn DisplaySink>,
) {
    let mut snapshot = vec![0u8; FRAME_SIZE];
    let mut cpu_out: Vec<u8> = Vec::new();

    loop {
        {
            let mut st = shared.state.lock();
            while st.count == 0 && !st.shutdown {
                shared.not_empty.wait(&mut st);
            }
            if st.count == 0 && st.shutdown {
                break;
            }
            let head = st.head;
            std::mem::swap(&mut snapshot, &mut st.slots[head]);
            st.head = (st.head + 1) % PRESENT_QUEUE_DEPTH;
            st.count -= 1;
            st.busy = true;
            shared.not_full.notify_all();
        }

        let cfg = config.lock().clone();
        let t0 = Instant::now();
        let result = if cfg.pl_scale {
            pl_present(&device, &cfg, &palette, &snapshot, sink.as_mut())
        } else {
            cpu_present(&device, &cfg, &palette, &snapshot, &mut cpu_out, sink.as_mut())
        };
        perf.scale(t0.elapsed().as_nanos() as u64);

        if let Err(e) = result {
            // A dropped viewer is routine; keep the loop alive.
            log::warn!("present: sink error: {}", e);
        }

        let mut st = shared.state.lock();
        st.busy = false;
        shared.not_full.notify_all();
    }
    log::debug!("present: worker exit");
}

fn cpu_present(
    device: &SharedDevice,
    cfg: &PresentConfig,
    palette: &Mutex<CpuPalette>,
    frame: &[u8],
    out: &mut Vec<u8>,
    sink: &mut dyn DisplaySink,
) -> io::Result<()> {
    let height = SCREEN_HEIGHT * cfg.scale;

    if cfg.blit_to_device {
        // Screen output: the scanout region IS the display surface.
        let mut dev = device.lock();
        {
            let pal = palette.lock();
            let scanout = dev.region_mut(RegionId::FbOut);
            blit_frame(
                frame,
                SCREEN_HEIGHT,
                &pal,
                cfg.format,
                cfg.scale,
                scanout,
                cfg.stride_bytes,
                cfg.out_width,
            );
        }
        let scanout = dev.region(RegionId::FbOut);
        return sink.present(scanout, cfg.out_width, height, cfg.stride_bytes, cfg.format);
    }

    out.resize(cfg.stride_bytes * height, 0);
    {
        let pal = palette.lock();
        blit_frame(
            frame,
            SCREEN_HEIGHT,
            &pal,
            cfg.format,
            cfg.scale,
            out,
            cfg.stride_bytes,
            cfg.out_width,
        );
    }
    sink.present(out, cfg.out_width, height, cfg.stride_bytes, cfg.format)
}

fn pl_present(
    device: &SharedDevice,
    cfg: &PresentConfig,
    palette: &Mutex<CpuPalette>,
    frame: &[u8],
    sink: &mut dyn DisplaySink,
) -> io::Result<()> {
    let mut dev = device.lock();

    let source = if cfg.composite {
        dev.region_mut(RegionId::VideoBuf)[..FRAME_SIZE].copy_from_slice(frame);
        VIDEO_BUF.base
    } else {
        // Raster already DMAed the full frame into the handoff region.
        SHARED_BRAM.base
    };

    let lanes = if cfg.lanes >= 4 { 4 } else { 1 };
    let d = &mut **dev;
    write_ptr(d, Ip::Present, offs::FB_OUT_LO, cfg.scanout_base);
    write_ptr(d, Ip::Present, offs::LANE1_LO, cfg.scanout_base);
    write_ptr(d, Ip::Present, offs::LANE2_LO, cfg.scanout_base);
    write_ptr(d, Ip::Present, offs::LANE3_LO, cfg.scanout_base);
    write_ptr(d, Ip::Present, offs::SOURCE_LO, source);
    write_ptr(d, Ip::Present, offs::COLORMAP_LO, COLORMAP.base);
    KernelOp::Present {
        scale: cfg.scale as u32,
        rows: 0,
        lanes,
        format: cfg.format,
        stride_bytes: cfg.stride_bytes as u32,
        sharpen_enable: cfg.sharpen_enable,
        sharpen_strength: cfg.sharpen_strength,
    }
    .program(d, Ip::Present);
    d.start(Ip::Present);
    if !wait_for_done(d, Ip::Present) {
        log::warn!("present: IP did not signal done within budget");
    }

    if !cfg.composite && cfg.hud_overlay {
        // The handoff frame carries BRAM contents for rows 168..199; the real
        // HUD lives only in the PS snapshot. Narrow post-step on the packed
        // output.
        let pal = palette.lock();
        let out = dev.region_mut(RegionId::FbOut);
        blit_band(
            frame,
            VIEW_HEIGHT,
            SCREEN_HEIGHT,
            &pal,
            cfg.format,
            cfg.scale,
            out,
            cfg.stride_bytes,
            cfg.out_width,
        );
    }

    let height = SCREEN_HEIGHT * cfg.scale;
    let out = dev.region(RegionId::FbOut);
    sink.present(out, cfg.out_width, height, cfg.stride_bytes, cfg.format)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimDevice;
    use ember_common::layout::PALETTE_OFFSET;

    struct CollectSink {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        geometry: Arc<Mutex<Option<(usize, usize, usize)>>>,
    }

    impl DisplaySink for CollectSink {
        fn present(
            &mut self,
            frame: &[u8],
            width: usize,
            height: usize,
            stride_bytes: usize,
            _format: PixelFormat,
        ) -> io::Result<()> {
            self.frames.lock().push(frame[..stride_bytes * height].to_vec());
            *self.geometry.lock() = Some((width, height, stride_bytes));
            Ok(())
        }
    }

    struct Harness {
        orch: PresentOrchestrator,
        device: SharedDevice,
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        geometry: Arc<Mutex<Option<(usize, usize, usize)>>>,
    }

    fn harness(config: PresentConfig) -> Harness {
        let device: SharedDevice = Arc::new(Mutex::new(Box::new(SimDevice::new())));
        let frames = Arc::new(Mutex::new(Vec::new()));
        let geometry = Arc::new(Mutex::new(None));
        let sink = Box::new(CollectSink { frames: frames.clone(), geometry: geometry.clone() });
        let orch = PresentOrchestrator::spawn(
            device.clone(),
            Arc::new(PerfCounters::new()),
            config,
            sink,
        )
        .unwrap();
        Harness { orch, device, frames, geometry }
    }

    /// Grayscale ramp palette as raw RGB triplets.
    fn ramp_rgb() -> Vec<u8> {
        let mut rgb = vec![0u8; 768];
        for i in 0..256 {
            rgb[i * 3] = i as u8;
            rgb[i * 3 + 1] = i as u8;
            rgb[i * 3 + 2] = i as u8;
        }
        rgb
    }

    fn px32(buf: &[u8], stride: usize, x: usize, y: usize) -> u32 {
        let off = y * stride + x * 4;
        u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
    }

    #[test]
    fn test_cpu_path_presents_frame() {
        let h = harness(PresentConfig::default());
        h.orch.set_palette(&ramp_rgb());

        let mut frame = vec![0u8; FRAME_SIZE];
        frame[0] = 9;
        h.orch.present_frame(&frame);
        h.orch.drain();

        let frames = h.frames.lock();
        assert_eq!(frames.len(), 1);
        let stride = OUT_WIDTH * 4;
        assert_eq!(*h.geometry.lock(), Some((OUT_WIDTH, 1000, stride)));
        // Source pixel (0,0) covers a 5x5 output block.
        for y in 0..5 {
            for x in 0..5 {
                assert_eq!(px32(&frames[0], stride, x, y), 0x0009_0909);
            }
        }
        assert_eq!(px32(&frames[0], stride, 5, 0), 0);
    }

    #[test]
    fn test_multiple_frames_in_order() {
        let h = harness(PresentConfig::default());
        h.orch.set_palette(&ramp_rgb());

        for v in 1..=5u8 {
            let frame = vec![v; FRAME_SIZE];
            h.orch.present_frame(&frame);
        }
        h.orch.drain();

        let frames = h.frames.lock();
        assert_eq!(frames.len(), 5);
        let stride = OUT_WIDTH * 4;
        for (i, f) in frames.iter().enumerate() {
            let v = (i + 1) as u32;
            let expect = (v << 16) | (v << 8) | v;
            assert_eq!(px32(f, stride, 0, 0), expect);
        }
    }

    #[test]
    fn test_pl_composite_path() {
        let mut cfg = PresentConfig::default();
        cfg.pl_scale = true;
        let h = harness(cfg);

        // Seed the device palette image the way the palette upload would.
        {
            let rgb = ramp_rgb();
            let mut dev = h.device.lock();
            dev.region_mut(RegionId::Colormap)[PALETTE_OFFSET..PALETTE_OFFSET + 768]
                .copy_from_slice(&rgb);
        }

        let mut frame = vec![0u8; FRAME_SIZE];
        frame[..ember_common::SCREEN_WIDTH].fill(20);
        h.orch.present_frame(&frame);
        h.orch.drain();

        let frames = h.frames.lock();
        assert_eq!(frames.len(), 1);
        let stride = OUT_WIDTH * 4;
        for x in 0..OUT_WIDTH {
            assert_eq!(px32(&frames[0], stride, x, 0), 0x0014_1414, "x={}", x);
        }
    }

    #[test]
    fn test_pl_handoff_with_hud_overlay() {
        let mut cfg = PresentConfig::default();
        cfg.pl_scale = true;
        cfg.composite = false;
        let h = harness(cfg);
        h.orch.set_palette(&ramp_rgb());

        {
            let rgb = ramp_rgb();
            let mut dev = h.device.lock();
            dev.region_mut(RegionId::Colormap)[PALETTE_OFFSET..PALETTE_OFFSET + 768]
                .copy_from_slice(&rgb);
            // View content lives in the handoff region (raster DMA output).
            dev.region_mut(RegionId::SharedBram)[..FRAME_SIZE].fill(30);
        }

        // The snapshot's HUD rows differ from the handoff contents.
        let mut frame = vec![0u8; FRAME_SIZE];
        frame[VIEW_HEIGHT * ember_common::SCREEN_WIDTH..].fill(77);
        h.orch.present_frame(&frame);
        h.orch.drain();

        let frames = h.frames.lock();
        let stride = OUT_WIDTH * 4;
        // View rows come from the handoff region.
        assert_eq!(px32(&frames[0], stride, 0, 0), 0x001E_1E1E);
        // HUD rows come from the snapshot overlay.
        assert_eq!(px32(&frames[0], stride, 0, VIEW_HEIGHT * 5), 0x004D_4D4D);
    }

    #[test]
    fn test_shutdown_without_frames() {
        let h = harness(PresentConfig::default());
        drop(h.orch); // must join cleanly
    }
}
