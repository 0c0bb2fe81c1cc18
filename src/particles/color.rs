use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::particles::COLOR_BLEND_SECS;

/// Named three-stop color gradients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorPreset {
    #[default]
    Aurora,
    Neon,
    Sunset,
    Mono,
}

impl ColorPreset {
    pub const ALL: [ColorPreset; 4] = [
        ColorPreset::Aurora,
        ColorPreset::Neon,
        ColorPreset::Sunset,
        ColorPreset::Mono,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ColorPreset::Aurora => "aurora",
            ColorPreset::Neon => "neon",
            ColorPreset::Sunset => "sunset",
            ColorPreset::Mono => "mono",
        }
    }

    /// Lenient lookup for UI strings; anything unknown is aurora
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    pub fn stops(&self) -> [Vec3; 3] {
        match self {
            ColorPreset::Aurora => [
                Vec3::new(0.1, 0.9, 0.8),
                Vec3::new(0.6, 0.5, 1.0),
                Vec3::new(0.2, 0.6, 1.0),
            ],
            ColorPreset::Neon => [
                Vec3::new(0.0, 1.0, 0.8),
                Vec3::new(1.0, 0.0, 0.8),
                Vec3::new(0.9, 1.0, 0.2),
            ],
            ColorPreset::Sunset => [
                Vec3::new(1.0, 0.4, 0.2),
                Vec3::new(0.9, 0.2, 0.6),
                Vec3::new(0.2, 0.4, 1.0),
            ],
            ColorPreset::Mono => [
                Vec3::new(0.7, 0.7, 0.8),
                Vec3::new(0.5, 0.5, 0.6),
                Vec3::new(0.9, 0.9, 1.0),
            ],
        }
    }

    /// Linear RGB at position `t` (0.0-1.0) along the gradient
    pub fn sample(&self, t: f32) -> Vec3 {
        let stops = self.stops();
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let x = t * (stops.len() - 1) as f32;
        let i = (x.floor() as usize).min(stops.len() - 1);
        let f = x - i as f32;
        let next = (i + 1).min(stops.len() - 1);
        stops[i].lerp(stops[next], f)
    }
}

impl fmt::Display for ColorPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ColorPreset::ALL
            .into_iter()
            .find(|p| p.name() == lower)
            .ok_or_else(|| format!("unknown color preset '{}'", s))
    }
}

/// Crossfade between the previous and current preset after a change
#[derive(Debug, Clone)]
pub struct ColorBlend {
    current: ColorPreset,
    previous: Option<ColorPreset>,
    progress: f32,
}

impl ColorBlend {
    pub fn new(preset: ColorPreset) -> Self {
        Self {
            current: preset,
            previous: None,
            progress: 1.0,
        }
    }

    pub fn set_preset(&mut self, preset: ColorPreset) {
        self.previous = Some(self.current);
        self.current = preset;
        self.progress = 0.0;
    }

    pub fn advance(&mut self, dt: f32) {
        if self.previous.is_some() && self.progress < 1.0 {
            self.progress = (self.progress + dt.max(0.0) / COLOR_BLEND_SECS).min(1.0);
            if self.progress >= 1.0 {
                self.previous = None;
            }
        }
    }

    pub fn current(&self) -> ColorPreset {
        self.current
    }

    pub fn is_blending(&self) -> bool {
        self.previous.is_some()
    }

    pub fn sample(&self, t: f32) -> Vec3 {
        let target = self.current.sample(t);
        match self.previous {
            Some(prev) => prev.sample(t).lerp(target, self.progress),
            None => target,
        }
    }
}
