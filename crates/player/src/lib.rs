//! reelkit Player
//!
//! Turns a playlist snapshot into synchronized output:
//! - **Player:** pulls decoded media piece by piece and emits one output
//!   quantum (pictures, mixed audio, captions) per frame period
//! - **Butler:** keeps a bounded read-ahead of player output on a thread
//! - **Decoder:** the contract format-specific decoders implement
//! - **Reference:** checks and lists content included by pointer

pub mod butler;
pub mod decoder;
pub mod image;
pub mod player;
pub mod reference;
pub mod synthetic;
pub mod text;

pub use butler::{Behaviour, Butler, ButlerConfig};
pub use decoder::{Decoded, Decoder, DecoderFactory};
pub use image::{AudioBuffers, Eyes, Image};
pub use player::{ListenerId, Player, PlayerAudio, PlayerOptions, PlayerVideo, Quantum};
pub use reference::{check_reference, referenced_assets, ReferenceRefusal, ReferencedAsset};
pub use synthetic::{SyntheticDecoderFactory, SyntheticExaminer};
pub use text::{compose_text, TextUnit, TEXT_POSITION_EPSILON};
