// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod bench;
mod sink;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use parking_lot::Mutex;

use ember_common::layout::{FB_OUT, OUT_WIDTH};
use ember_common::{Settings, SCREEN_WIDTH, UPSCALE_FACTOR};
use ember_driver::{
    CommandBuilder, MappedDevice, PresentConfig, PresentOrchestrator, SharedDevice, SimDevice,
};
use ember_gpu::PixelFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    /// Push frames to the network viewer (falls back to headless when the
    /// viewer transport is not built in).
    Tcp,
    /// Write to the mapped scanout surface.
    Screen,
    /// Render and drop; pacing and counters only.
    Headless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Path {
    /// Simulated device: kernel models run in-process.
    BenchSw,
    /// Real bitstream through /dev/mem.
    BenchHw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Resolution {
    Native320,
    Fullres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GfxMode {
    Rgba8888,
    Rgb565,
}

/// ember - hardware-assisted DOOM raster pipeline bench
#[derive(Parser, Debug)]
#[command(name = "ember", version, about = "DOOM raster pipeline driver bench")]
struct Args {
    /// Frame destination
    #[arg(long, value_enum, default_value_t = Output::Headless)]
    output: Output,

    /// Force the software or hardware raster path
    #[arg(long, value_enum, default_value_t = Path::BenchSw)]
    path: Path,

    #[arg(long, value_enum, default_value_t = Resolution::Fullres)]
    resolution: Resolution,

    /// Output pixel format
    #[arg(long, value_enum, default_value_t = GfxMode::Rgba8888)]
    gfxmode: GfxMode,

    /// Integer scaling factor (CPU path; 0 = auto from resolution)
    #[arg(long, default_value_t = 0)]
    scaling: usize,

    /// Decouple presentation onto the worker thread
    #[arg(long, conflicts_with = "sync_present")]
    async_present: bool,

    /// Present synchronously from the engine loop
    #[arg(long)]
    sync_present: bool,

    /// Run the upscale on the present IP
    #[arg(long)]
    pl_scale: bool,

    /// Present-IP write lanes (clamped to 4)
    #[arg(long, default_value_t = 1)]
    pl_lanes: u32,

    /// Sharpen strength for the PL upscale, 0 disables
    #[arg(long, default_value_t = 0)]
    sharpen: u8,

    /// Frames to run
    #[arg(long, default_value_t = 1000)]
    frames: u64,

    /// Benchmark without a connected client
    #[arg(long)]
    no_client: bool,

    /// Shorthand for --output headless --no-client
    #[arg(long)]
    bench_headless: bool,

    /// Run without any output pacing (alias kept for scripts)
    #[arg(long)]
    headless: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let mut args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("ember - DOOM raster pipeline");
    info!("============================");

    if args.bench_headless || args.headless {
        args.output = Output::Headless;
        args.no_client = true;
    }

    let settings = Settings::from_env();
    info!(
        "config: raster=0x{:08X} present=0x{:08X} handoff={} composite={}",
        settings.raster_base, settings.present_base, settings.shared_bram_handoff, settings.composite
    );

    let device: SharedDevice = match args.path {
        Path::BenchSw => {
            if args.output == Output::Screen {
                anyhow::bail!("screen output requires the hardware path (--path bench-hw)");
            }
            info!("device: simulated (bench-sw)");
            Arc::new(Mutex::new(Box::new(SimDevice::new())))
        }
        Path::BenchHw => {
            let dev = MappedDevice::open(&settings)
                .context("hardware path requested but the device is not mappable")?;
            Arc::new(Mutex::new(Box::new(dev)))
        }
    };

    let format = match args.gfxmode {
        GfxMode::Rgba8888 => PixelFormat::Xrgb8888,
        GfxMode::Rgb565 => PixelFormat::Rgb565,
    };
    let scale = match (args.resolution, args.scaling) {
        (Resolution::Native320, _) => 1,
        (Resolution::Fullres, 0) => UPSCALE_FACTOR,
        (Resolution::Fullres, s) => s,
    };
    if args.pl_scale && scale != 1 && scale != UPSCALE_FACTOR {
        anyhow::bail!("PL upscale supports only native320 or the 5x full resolution");
    }

    let out_width = SCREEN_WIDTH * scale.max(1);
    let config = PresentConfig {
        pl_scale: args.pl_scale,
        lanes: args.pl_lanes.min(4),
        format,
        scale,
        composite: settings.composite,
        hud_overlay: settings.hud_overlay,
        sharpen_enable: args.sharpen > 0,
        sharpen_strength: args.sharpen,
        blit_to_device: args.output == Output::Screen,
        out_width: out_width.min(OUT_WIDTH),
        stride_bytes: out_width * format.bytes_per_pixel(),
        scanout_base: settings.fb_scanout_phys.unwrap_or(FB_OUT.base),
    };
    info!(
        "present: {}x{} scale={} format={:?} path={}",
        config.out_width,
        200 * scale,
        scale,
        format,
        if args.pl_scale { "pl" } else { "cpu" }
    );

    let mut builder = CommandBuilder::new(device.clone());
    // The handoff routing only matters when the PL consumes its own output.
    builder.set_shared_handoff(args.pl_scale && settings.shared_bram_handoff && !settings.composite);

    let sink = sink::make_sink(args.output, args.no_client);
    let orchestrator =
        PresentOrchestrator::spawn(device, builder.perf(), config, sink).context("present worker")?;

    let sync_present = args.sync_present || !args.async_present;
    bench::run(&mut builder, &orchestrator, args.frames, sync_present)?;

    info!("bench finished");
    Ok(())
}
