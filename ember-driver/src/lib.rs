// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! PS-side driver for the ember raster pipeline.
//!
//! Owns everything the game engine touches: the command builder with its
//! host-cached staging batch, the texture-atlas manager and its
//! pointer-to-offset cache, the process-wide perf record, the device
//! abstraction (memory-mapped hardware or the in-process simulator), and the
//! present orchestrator with its worker thread.

pub mod atlas;
pub mod blit;
pub mod command;
pub mod device;
pub mod perf;
pub mod present;

pub use atlas::AtlasManager;
pub use command::CommandBuilder;
pub use device::{
    AccelDevice, DeviceError, Ip, KernelOp, MappedDevice, RegionId, SharedDevice, SimDevice,
};
pub use perf::{PerfCounters, PerfSnapshot};
pub use present::{DisplaySink, PresentConfig, PresentOrchestrator};
