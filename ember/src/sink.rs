// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Display boundaries for the bench binary.
//!
//! The real viewer transport and the fbdev handover live outside this
//! repository; the bench only needs sinks that account for frames.

use std::io;

use ember_driver::DisplaySink;
use ember_gpu::PixelFormat;

use crate::Output;

/// Counts frames and logs the geometry once.
pub struct HeadlessSink {
    frames: u64,
    announced: bool,
}

impl HeadlessSink {
    pub fn new() -> Self {
        Self { frames: 0, announced: false }
    }
}

impl DisplaySink for HeadlessSink {
    fn present(
        &mut self,
        _frame: &[u8],
        width: usize,
        height: usize,
        stride_bytes: usize,
        format: PixelFormat,
    ) -> io::Result<()> {
        if !self.announced {
            log::info!(
                "sink: headless {}x{} stride={} format={:?}",
                width,
                height,
                stride_bytes,
                format
            );
            self.announced = true;
        }
        self.frames += 1;
        if self.frames % 600 == 0 {
            log::debug!("sink: {} frames consumed", self.frames);
        }
        Ok(())
    }
}

/// Screen output: frames land in the mapped scanout region before this sink
/// runs, so presenting is a pacing point only.
pub struct ScanoutSink;

impl DisplaySink for ScanoutSink {
    fn present(
        &mut self,
        _frame: &[u8],
        _width: usize,
        _height: usize,
        _stride_bytes: usize,
        _format: PixelFormat,
    ) -> io::Result<()> {
        Ok(())
    }
}

pub fn make_sink(output: Output, no_client: bool) -> Box<dyn DisplaySink> {
    match output {
        Output::Screen => Box::new(ScanoutSink),
        Output::Tcp => {
            if !no_client {
                log::warn!("sink: viewer transport not built in, running headless");
            }
            Box::new(HeadlessSink::new())
        }
        Output::Headless => Box::new(HeadlessSink::new()),
    }
}
