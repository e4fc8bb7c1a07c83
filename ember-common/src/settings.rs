// SPDX-FileCopyrightText: 2025 ember contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Runtime configuration, populated from the environment.
//!
//! The deployment target boots the pipeline from a service unit, so every
//! knob that depends on the bitstream or the display is an environment
//! variable rather than a config file.

use crate::layout;

/// Pipeline settings with their deployment defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// AXI-Lite base of the raster IP.
    pub raster_base: u64,
    /// AXI-Lite base of the present IP.
    pub present_base: u64,
    /// Route the indexed frame through the on-chip shared region.
    pub shared_bram_handoff: bool,
    /// Present from the PS-composed frame (HUD included in the upscale).
    pub composite: bool,
    /// Overlay the HUD band on the packed output in shared-handoff mode.
    pub hud_overlay: bool,
    /// Override for the scanout destination physical base.
    pub fb_scanout_phys: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            raster_base: layout::RASTER_BASE,
            present_base: layout::PRESENT_BASE,
            shared_bram_handoff: true,
            composite: true,
            hud_overlay: true,
            fb_scanout_phys: None,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// Recognized variables: `RASTER_BASE`, `PRESENT_BASE`, `SWAP_IPS`,
    /// `SHARED_BRAM_HANDOFF`, `COMPOSITE`, `HUD_OVERLAY`, `FB_SCANOUT_PHYS`.
    pub fn from_env() -> Self {
        let mut s = Self::default();

        if let Some(v) = env_addr("RASTER_BASE") {
            s.raster_base = v;
        }
        if let Some(v) = env_addr("PRESENT_BASE") {
            s.present_base = v;
        }
        if env_bool("SWAP_IPS").unwrap_or(false) {
            std::mem::swap(&mut s.raster_base, &mut s.present_base);
            log::info!(
                "settings: SWAP_IPS set, raster=0x{:08X} present=0x{:08X}",
                s.raster_base,
                s.present_base
            );
        }
        if let Some(v) = env_bool("SHARED_BRAM_HANDOFF") {
            s.shared_bram_handoff = v;
        }
        if let Some(v) = env_bool("COMPOSITE") {
            s.composite = v;
        }
        if let Some(v) = env_bool("HUD_OVERLAY") {
            s.hud_overlay = v;
        }
        s.fb_scanout_phys = env_addr("FB_SCANOUT_PHYS");

        s
    }
}

fn env_addr(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match parse_addr(&raw) {
        Some(v) => Some(v),
        None => {
            log::warn!("settings: ignoring unparsable {}={}", name, raw);
            None
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match parse_bool(&raw) {
        Some(v) => Some(v),
        None => {
            log::warn!("settings: ignoring unparsable {}={}", name, raw);
            None
        }
    }
}

/// Parse a physical address, accepting `0x` hex or decimal.
fn parse_addr(raw: &str) -> Option<u64> {
    let t = raw.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        t.parse().ok()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
