// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Functional models of the two programmable-logic IPs.
//!
//! Each model reproduces its HLS kernel cycle-for-byte: same on-chip state,
//! same burst granularity, same fixed-point walks. They serve as the
//! reference for driver tests and as the execution engine of the simulated
//! device on the software bench path.

pub mod present;
pub mod raster;
pub mod regs;

pub use present::{PresentIo, PresentKernel};
pub use raster::{RasterIo, RasterKernel};
pub use regs::{Ctrl, KernelRegs, Mode, PixelFormat};
