//! reelkit Timeline Model
//!
//! Defines the data contracts everything else in reelkit is driven from:
//! - **Content:** placed media sources with trims, rates, and audio streams
//! - **Playlist:** the ordered, invariant-checked set of content plus snapshots
//! - **AudioMapping:** input × output channel gain matrices
//! - **Reels:** splitting the output timeline into segments
//! - **Project:** output settings and the `project.json` bundle
//!
//! The model performs no decoding and no media I/O; the only files it touches
//! are `project.json` and the existence checks of pre-flight.

pub mod audio_mapping;
pub mod content;
pub mod examine;
pub mod playlist;
pub mod project;
pub mod reel;

pub use audio_mapping::*;
pub use content::*;
pub use examine::*;
pub use playlist::*;
pub use project::*;
pub use reel::*;
