// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device access layer.
//!
//! Both IPs speak the same four-bit control protocol (start/done/idle) over
//! AXI-Lite, with all bulk data flowing through the shared DDR regions. The
//! driver talks to an [`AccelDevice`]:
//!
//! - [`MappedDevice`] maps the control windows and the DDR block through
//!   `/dev/mem` for the real bitstream. The DDR windows are non-cacheable on
//!   the PS side, which is why callers stage into cached memory and copy once.
//! - [`SimDevice`] hosts the `ember-gpu` kernel models in-process behind the
//!   same register protocol; a start completes synchronously. This is the
//!   software bench path and the test double.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use thiserror::Error;

use ember_common::layout::{
    Region, CMD_BUF, COLORMAP, CTRL_SPAN, FB_OUT, SHARED_BRAM, TEX_ATLAS, VIDEO_BUF,
};
use ember_common::Settings;
use ember_gpu::regs::offs;
use ember_gpu::{Ctrl, KernelRegs, Mode, PixelFormat, PresentIo, PresentKernel, RasterIo, RasterKernel};

/// Poll budget for `wait_for_idle`.
pub const IDLE_POLL_BUDGET: u32 = 100_000;
/// Poll budget for `wait_for_done`.
pub const DONE_POLL_BUDGET: u32 = 1_000_000;

/// Which IP a control access targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ip {
    Raster,
    Present,
}

/// Shared DDR regions by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionId {
    FbOut,
    VideoBuf,
    TexAtlas,
    Colormap,
    CmdBuf,
    SharedBram,
}

impl RegionId {
    pub fn region(self) -> Region {
        match self {
            Self::FbOut => FB_OUT,
            Self::VideoBuf => VIDEO_BUF,
            Self::TexAtlas => TEX_ATLAS,
            Self::Colormap => COLORMAP,
            Self::CmdBuf => CMD_BUF,
            Self::SharedBram => SHARED_BRAM,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("cannot open /dev/mem (root required): {0}")]
    DevMem(#[source] std::io::Error),
    #[error("mmap of {what} at 0x{base:08X} failed: {source}")]
    Map {
        what: &'static str,
        base: u64,
        #[source]
        source: std::io::Error,
    },
}

/// Control-plus-memory surface of the accelerator pair.
pub trait AccelDevice: Send {
    fn read_reg(&mut self, ip: Ip, off: usize) -> u32;
    fn write_reg(&mut self, ip: Ip, off: usize, val: u32);
    /// Publish all prior shared-memory writes, then raise the start bit.
    fn start(&mut self, ip: Ip);
    fn region(&self, id: RegionId) -> &[u8];
    fn region_mut(&mut self, id: RegionId) -> &mut [u8];
}

/// Device handle shared between the engine thread and the present worker.
pub type SharedDevice = Arc<Mutex<Box<dyn AccelDevice>>>;

/// Write a 64-bit pointer register pair.
pub fn write_ptr(dev: &mut dyn AccelDevice, ip: Ip, lo_off: usize, addr: u64) {
    dev.write_reg(ip, lo_off, addr as u32);
    dev.write_reg(ip, lo_off + 4, (addr >> 32) as u32);
}

/// One kernel invocation, serialized into the mode register and its scalar
/// parameters. Pointer registers are programmed separately by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelOp {
    LoadColormap,
    ClearFramebuffer,
    DrawBatch {
        count: u32,
    },
    DmaOut {
        /// 0 selects the legacy 168-row view window.
        rows: u32,
    },
    DrawAndDma {
        count: u32,
        rows: u32,
    },
    Present {
        scale: u32,
        rows: u32,
        lanes: u32,
        format: PixelFormat,
        stride_bytes: u32,
        sharpen_enable: bool,
        sharpen_strength: u8,
    },
    /// Present-IP palette refresh; same wire mode as `LoadColormap`.
    LoadPalette,
}

impl KernelOp {
    pub fn mode(&self) -> Mode {
        match self {
            Self::LoadColormap | Self::LoadPalette => Mode::LoadColormap,
            Self::ClearFramebuffer => Mode::ClearFb,
            Self::DrawBatch { .. } => Mode::DrawBatch,
            Self::DmaOut { .. } => Mode::DmaOut,
            Self::DrawAndDma { .. } => Mode::DrawAndDma,
            Self::Present { .. } => Mode::Present,
        }
    }

    /// Write the scalar registers this operation carries, then the mode.
    pub fn program(&self, dev: &mut dyn AccelDevice, ip: Ip) {
        match *self {
            Self::LoadColormap | Self::LoadPalette | Self::ClearFramebuffer => {}
            Self::DrawBatch { count } => {
                dev.write_reg(ip, offs::NUM_COMMANDS, count);
            }
            Self::DmaOut { rows } => {
                dev.write_reg(ip, offs::PRESENT_ROWS, rows);
            }
            Self::DrawAndDma { count, rows } => {
                dev.write_reg(ip, offs::NUM_COMMANDS, count);
                dev.write_reg(ip, offs::PRESENT_ROWS, rows);
            }
            Self::Present {
                scale,
                rows,
                lanes,
                format,
                stride_bytes,
                sharpen_enable,
                sharpen_strength,
            } => {
                dev.write_reg(ip, offs::PRESENT_SCALE, scale);
                dev.write_reg(ip, offs::PRESENT_ROWS, rows);
                dev.write_reg(ip, offs::PRESENT_LANES, lanes);
                dev.write_reg(ip, offs::PRESENT_FORMAT, format as u32);
                dev.write_reg(ip, offs::PRESENT_STRIDE_BYTES, stride_bytes);
                dev.write_reg(ip, offs::SHARPEN_ENABLE, sharpen_enable as u32);
                dev.write_reg(ip, offs::SHARPEN_STRENGTH, sharpen_strength as u32);
            }
        }
        dev.write_reg(ip, offs::MODE, self.mode().raw());
    }
}

/// Poll the done bit within the submission budget.
pub fn wait_for_done(dev: &mut dyn AccelDevice, ip: Ip) -> bool {
    for _ in 0..DONE_POLL_BUDGET {
        let ctrl = Ctrl::from_bits_truncate(dev.read_reg(ip, offs::CTRL));
        if ctrl.contains(Ctrl::DONE) {
            return true;
        }
    }
    false
}

/// Poll the idle bit within the re-arm budget.
pub fn wait_for_idle(dev: &mut dyn AccelDevice, ip: Ip) -> bool {
    for _ in 0..IDLE_POLL_BUDGET {
        let ctrl = Ctrl::from_bits_truncate(dev.read_reg(ip, offs::CTRL));
        if ctrl.contains(Ctrl::IDLE) {
            return true;
        }
    }
    false
}

// ── Simulated device ─────────────────────────────────────────────────────────

/// In-process device: the kernel models run synchronously on start.
pub struct SimDevice {
    raster: RasterKernel,
    present: PresentKernel,
    raster_regs: KernelRegs,
    present_regs: KernelRegs,
    raster_done: bool,
    present_done: bool,
    fb_out: Vec<u8>,
    video_buf: Vec<u8>,
    tex_atlas: Vec<u8>,
    colormap: Vec<u8>,
    cmd_buf: Vec<u8>,
    shared_bram: Vec<u8>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            raster: RasterKernel::new(),
            present: PresentKernel::new(),
            raster_regs: KernelRegs::default(),
            present_regs: KernelRegs::default(),
            raster_done: false,
            present_done: false,
            fb_out: vec![0; FB_OUT.size],
            video_buf: vec![0; VIDEO_BUF.size],
            tex_atlas: vec![0; TEX_ATLAS.size],
            colormap: vec![0; COLORMAP.size],
            cmd_buf: vec![0; CMD_BUF.size],
            shared_bram: vec![0; SHARED_BRAM.size],
        }
    }

    /// Direct view of the raster BRAM framebuffer, for tests.
    pub fn raster_framebuffer(&self) -> &[u8] {
        self.raster.framebuffer()
    }

    fn run_raster(&mut self) {
        let Self { raster, raster_regs, fb_out, video_buf, tex_atlas, colormap, cmd_buf, shared_bram, .. } =
            self;

        let fb_slice = resolve_mut(raster_regs.fb_out, fb_out, video_buf, shared_bram);
        let commands = resolve_in(raster_regs.source, CMD_BUF, cmd_buf);
        let atlas = resolve_in(raster_regs.tex_atlas, TEX_ATLAS, tex_atlas);
        let cmap = resolve_in(raster_regs.colormap, COLORMAP, colormap);

        raster.run(raster_regs, RasterIo { fb_out: fb_slice, atlas, colormap: cmap, commands });
    }

    fn run_present(&mut self) {
        let Self { present, present_regs, fb_out, video_buf, colormap, shared_bram, .. } = self;

        // All lanes address the same scanout region; unprogrammed lane
        // pointers fall back to the primary output pointer.
        let base0 = word_base_in(present_regs.fb_out, FB_OUT);
        let lane_word_base = [
            base0,
            word_base_or(present_regs.lanes[0], FB_OUT, base0),
            word_base_or(present_regs.lanes[1], FB_OUT, base0),
            word_base_or(present_regs.lanes[2], FB_OUT, base0),
        ];

        let source: &[u8] = if VIDEO_BUF.contains(present_regs.source) {
            &video_buf[VIDEO_BUF.offset_of(present_regs.source)..]
        } else if SHARED_BRAM.contains(present_regs.source) {
            &shared_bram[SHARED_BRAM.offset_of(present_regs.source)..]
        } else {
            &[]
        };
        let cmap = resolve_in(present_regs.colormap, COLORMAP, colormap);

        present.run(
            present_regs,
            PresentIo { fb_out: fb_out.as_mut_slice(), lane_word_base, colormap: cmap, source },
        );
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_in<'a>(addr: u64, region: Region, backing: &'a [u8]) -> &'a [u8] {
    if region.contains(addr) {
        &backing[region.offset_of(addr)..]
    } else {
        &[]
    }
}

fn resolve_mut<'a>(
    addr: u64,
    fb_out: &'a mut [u8],
    video_buf: &'a mut [u8],
    shared_bram: &'a mut [u8],
) -> &'a mut [u8] {
    if VIDEO_BUF.contains(addr) {
        &mut video_buf[VIDEO_BUF.offset_of(addr)..]
    } else if SHARED_BRAM.contains(addr) {
        &mut shared_bram[SHARED_BRAM.offset_of(addr)..]
    } else if FB_OUT.contains(addr) {
        &mut fb_out[FB_OUT.offset_of(addr)..]
    } else {
        &mut []
    }
}

fn word_base_in(addr: u64, region: Region) -> usize {
    if region.contains(addr) {
        region.offset_of(addr) / 16
    } else {
        0
    }
}

fn word_base_or(addr: u64, region: Region, fallback: usize) -> usize {
    if addr != 0 && region.contains(addr) {
        region.offset_of(addr) / 16
    } else {
        fallback
    }
}

impl AccelDevice for SimDevice {
    fn read_reg(&mut self, ip: Ip, off: usize) -> u32 {
        if off == offs::CTRL {
            // A start completes before this read returns, so the IP is always
            // idle; done latches until the next start.
            let done = match ip {
                Ip::Raster => self.raster_done,
                Ip::Present => self.present_done,
            };
            let mut ctrl = Ctrl::IDLE;
            if done {
                ctrl |= Ctrl::DONE;
            }
            ctrl.bits()
        } else {
            0
        }
    }

    fn write_reg(&mut self, ip: Ip, off: usize, val: u32) {
        match ip {
            Ip::Raster => self.raster_regs.write(off, val),
            Ip::Present => self.present_regs.write(off, val),
        }
    }

    fn start(&mut self, ip: Ip) {
        match ip {
            Ip::Raster => {
                self.raster_done = false;
                self.run_raster();
                self.raster_done = true;
            }
            Ip::Present => {
                self.present_done = false;
                self.run_present();
                self.present_done = true;
            }
        }
    }

    fn region(&self, id: RegionId) -> &[u8] {
        match id {
            RegionId::FbOut => &self.fb_out,
            RegionId::VideoBuf => &self.video_buf,
            RegionId::TexAtlas => &self.tex_atlas,
            RegionId::Colormap => &self.colormap,
            RegionId::CmdBuf => &self.cmd_buf,
            RegionId::SharedBram => &self.shared_bram,
        }
    }

    fn region_mut(&mut self, id: RegionId) -> &mut [u8] {
        match id {
            RegionId::FbOut => &mut self.fb_out,
            RegionId::VideoBuf => &mut self.video_buf,
            RegionId::TexAtlas => &mut self.tex_atlas,
            RegionId::Colormap => &mut self.colormap,
            RegionId::CmdBuf => &mut self.cmd_buf,
            RegionId::SharedBram => &mut self.shared_bram,
        }
    }
}

// ── Memory-mapped hardware device ────────────────────────────────────────────

/// `/dev/mem` mapping of both control windows and the shared DDR block.
pub struct MappedDevice {
    raster_regs: MmapMut,
    present_regs: MmapMut,
    /// VIDEO_BUF through SHARED_BRAM, one contiguous mapping.
    ddr: MmapMut,
    ddr_base: u64,
    /// Scanout region, possibly relocated by `FB_SCANOUT_PHYS`.
    scanout: MmapMut,
}

impl MappedDevice {
    /// Map the hardware. Fails when `/dev/mem` or any window is unavailable,
    /// which callers treat as fatal for hardware-required modes.
    pub fn open(settings: &Settings) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")
            .map_err(DeviceError::DevMem)?;

        let map = |base: u64, len: usize, what: &'static str| -> Result<MmapMut, DeviceError> {
            unsafe { MmapOptions::new().offset(base).len(len).map_mut(&file) }
                .map_err(|source| DeviceError::Map { what, base, source })
        };

        let ddr_base = VIDEO_BUF.base;
        let ddr_len = (SHARED_BRAM.base + SHARED_BRAM.size as u64 - ddr_base) as usize;
        let scanout_base = settings.fb_scanout_phys.unwrap_or(FB_OUT.base);

        let dev = Self {
            raster_regs: map(settings.raster_base, CTRL_SPAN, "raster ctrl")?,
            present_regs: map(settings.present_base, CTRL_SPAN, "present ctrl")?,
            ddr: map(ddr_base, ddr_len, "shared DDR")?,
            ddr_base,
            scanout: map(scanout_base, FB_OUT.size, "scanout")?,
        };

        log::info!(
            "device: mapped raster=0x{:08X} present=0x{:08X} ddr=0x{:08X}+0x{:X} scanout=0x{:08X}",
            settings.raster_base,
            settings.present_base,
            ddr_base,
            ddr_len,
            scanout_base
        );
        Ok(dev)
    }

    fn regs(&self, ip: Ip) -> &MmapMut {
        match ip {
            Ip::Raster => &self.raster_regs,
            Ip::Present => &self.present_regs,
        }
    }

    fn regs_mut(&mut self, ip: Ip) -> &mut MmapMut {
        match ip {
            Ip::Raster => &mut self.raster_regs,
            Ip::Present => &mut self.present_regs,
        }
    }

    fn ddr_range(&self, id: RegionId) -> (usize, usize) {
        let r = id.region();
        let off = (r.base - self.ddr_base) as usize;
        (off, off + r.size)
    }
}

impl AccelDevice for MappedDevice {
    fn read_reg(&mut self, ip: Ip, off: usize) -> u32 {
        let ptr = self.regs(ip).as_ptr() as *const u32;
        // Control registers are device memory: every access must hit the bus.
        unsafe { ptr.add(off / 4).read_volatile() }
    }

    fn write_reg(&mut self, ip: Ip, off: usize, val: u32) {
        let ptr = self.regs_mut(ip).as_mut_ptr() as *mut u32;
        unsafe { ptr.add(off / 4).write_volatile(val) }
    }

    fn start(&mut self, ip: Ip) {
        // Make staged DDR writes visible to the PL before raising start.
        fence(Ordering::SeqCst);
        self.write_reg(ip, offs::CTRL, Ctrl::START.bits());
    }

    fn region(&self, id: RegionId) -> &[u8] {
        if id == RegionId::FbOut {
            return &self.scanout;
        }
        let (a, b) = self.ddr_range(id);
        &self.ddr[a..b]
    }

    fn region_mut(&mut self, id: RegionId) -> &mut [u8] {
        if id == RegionId::FbOut {
            return &mut self.scanout;
        }
        let (a, b) = self.ddr_range(id);
        &mut self.ddr[a..b]
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
