// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Synthetic frame workload.
//!
//! Approximates one rendered game frame: a wall column per screen X with a
//! slowly changing texture and distance-based light, plus floor/ceiling span
//! bands. Enough to exercise the atlas cache, the IP texture caches, the
//! mid-frame flush path and both present routes.

use std::time::Instant;

use anyhow::Result;
use log::info;

use ember_common::layout::{COLORMAP_SIZE, PALETTE_SIZE};
use ember_common::{SCREEN_HEIGHT, SCREEN_WIDTH, VIEW_HEIGHT};
use ember_driver::{CommandBuilder, PresentOrchestrator, RegionId};

/// Distinct wall textures cycling through the workload.
const WALL_TEXTURES: usize = 16;
/// Distinct flats for ceiling and floor bands.
const FLAT_TEXTURES: usize = 4;

/// Light-attenuating colormap: row k darkens the ramp by k/32.
fn build_colormap() -> Vec<u8> {
    let mut cm = vec![0u8; COLORMAP_SIZE + PALETTE_SIZE];
    for k in 0..32usize {
        for i in 0..256usize {
            cm[k * 256 + i] = ((i * (32 - k)) / 32) as u8;
        }
    }
    // Grayscale palette behind the indexed ramp.
    for i in 0..256 {
        let off = COLORMAP_SIZE + i * 3;
        cm[off] = i as u8;
        cm[off + 1] = i as u8;
        cm[off + 2] = i as u8;
    }
    cm
}

struct Workload {
    walls: Vec<u32>,
    flats: Vec<u32>,
}

fn upload_workload(builder: &mut CommandBuilder) -> Workload {
    let walls = (0..WALL_TEXTURES)
        .map(|t| {
            let mut col = [0u8; 128];
            for (y, b) in col.iter_mut().enumerate() {
                *b = ((y * 2) ^ (t * 31)) as u8;
            }
            builder.upload_texture(0x1000_0000 + t as u64 * 0x80, &col)
        })
        .collect();

    let flats = (0..FLAT_TEXTURES)
        .map(|t| {
            let mut flat = vec![0u8; 4096];
            for (i, b) in flat.iter_mut().enumerate() {
                *b = ((i / 64 + i % 64) ^ (t * 63)) as u8;
            }
            builder.upload_texture(0x2000_0000 + t as u64 * 0x1000, &flat)
        })
        .collect();

    Workload { walls, flats }
}

/// Queue one frame's worth of draw commands.
fn queue_frame(builder: &mut CommandBuilder, work: &Workload, frame: u64) {
    let phase = (frame % 64) as i32;

    // Ceiling and floor span bands.
    for y in 0..40 {
        let flat = work.flats[(y as usize / 10) % FLAT_TEXTURES];
        builder.queue_span(y, 0, 319, (frame as u32) << 20, 0x0400_0000, flat, 8);
        builder.queue_span(
            VIEW_HEIGHT as i32 - 1 - y,
            0,
            319,
            (frame as u32) << 18,
            0x0200_0000,
            flat,
            12,
        );
    }

    // One wall column per screen X, height swinging with the phase.
    for x in 0..SCREEN_WIDTH as i32 {
        let tex = work.walls[(x as usize / 20 + frame as usize) % WALL_TEXTURES];
        let half = 30 + ((x + phase) % 40);
        let mid = VIEW_HEIGHT as i32 / 2;
        let light = ((x / 10) % 32) as u8;
        builder.queue_column(x, mid - half, mid + half, 0, 0x0002_0000, tex, light);
    }
}

/// Drive `frames` synthetic frames through the pipeline.
pub fn run(
    builder: &mut CommandBuilder,
    orchestrator: &PresentOrchestrator,
    frames: u64,
    sync_present: bool,
) -> Result<()> {
    let colormap = build_colormap();
    builder.upload_colormap(&colormap);
    builder.upload_palette(&colormap[COLORMAP_SIZE..]);
    orchestrator.set_palette(&colormap[COLORMAP_SIZE..]);

    let work = upload_workload(builder);
    let perf = builder.perf();

    let started = Instant::now();
    let mut window_start = Instant::now();
    let mut window_frames = 0u64;
    let mut snapshot = vec![0u8; SCREEN_WIDTH * SCREEN_HEIGHT];

    for frame in 0..frames {
        builder.start_frame();
        queue_frame(builder, &work, frame);
        builder.flush_batch();
        builder.wait_for_batch();

        // Hand the composed frame to the present path the way the engine
        // would: snapshot the DDR copy the raster just DMAed into.
        {
            let device = builder.device();
            let dev = device.lock();
            let src = if builder.shared_handoff() {
                dev.region(RegionId::SharedBram)
            } else {
                dev.region(RegionId::VideoBuf)
            };
            let len = snapshot.len();
            snapshot.copy_from_slice(&src[..len]);
        }
        orchestrator.present_frame(&snapshot);
        if sync_present {
            orchestrator.drain();
        }

        window_frames += 1;
        if window_start.elapsed().as_secs() >= 1 {
            let snap = perf.sample_and_reset();
            let fps = window_frames as f64 / window_start.elapsed().as_secs_f64();
            info!(
                "bench: {:.1} fps | cols={} spans={} flushes={} (mid {}) maxbatch={} | \
                 cache {}/{} hits wraps={} | wait {:.2} ms scale {:.2} ms",
                fps,
                snap.queued_columns,
                snap.queued_spans,
                snap.flushes,
                snap.mid_frame_flushes,
                snap.max_batch,
                snap.cache_hits,
                snap.cache_lookups,
                snap.cache_wraps,
                snap.pl_wait_ns as f64 / 1e6,
                snap.scale_ns as f64 / 1e6,
            );
            window_start = Instant::now();
            window_frames = 0;
        }
    }

    orchestrator.drain();
    let elapsed = started.elapsed();
    info!(
        "bench: {} frames in {:.2} s ({:.1} fps average)",
        frames,
        elapsed.as_secs_f64(),
        frames as f64 / elapsed.as_secs_f64().max(1e-9)
    );
    Ok(())
}
