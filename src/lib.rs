//! Vixel: audio-reactive particle field core
//!
//! Frequency-band analysis, beat detection, offline pre-scanning and the
//! particle simulation that consumes them. Rendering is left to the host.
//!
//! ## Quick start
//!
//! ```no_run
//! use vixel::config::SimulationConfig;
//! use vixel::session::Visualizer;
//!
//! let mut viz = Visualizer::new(&SimulationConfig::default(), 44_100);
//! let spectrum = vec![0u8; 1024];
//! let frame = viz.frame(Some(&spectrum), 1.0 / 60.0, true);
//! println!("bpm = {}", frame.beat.bpm);
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod particles;
pub mod session;

pub use error::{Result, VixelError};
