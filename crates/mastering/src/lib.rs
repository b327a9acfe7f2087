//! reelkit Mastering
//!
//! Turns player output into a packaged set of reels:
//!
//! ```text
//! Player ──► source hash ──► reuse? ──yes──────────────┐
//!                              │                       │
//!                              no                      ▼
//!                              └──► Encoder ──► reorder ──► Writer ──► reel-*/
//!                                   │  local threads              picture.asset
//!                                   └─ remote servers (TCP)       picture.info
//!                                                                 sound.pcm
//!                                                                 text.json
//! ```

pub mod codec;
pub mod encoder;
pub mod frame_info;
pub mod reel_writer;
pub mod remote;
pub mod status;
pub mod transcoder;
pub mod writer;

pub use codec::{EncodeRequest, FrameEncoder, RleEncoder};
pub use encoder::{EncodedFrame, Encoder, EncoderOptions, EncoderStats, FrameJob, JobWork};
pub use frame_info::{FrameInfo, FrameInfoFile};
pub use reel_writer::{ReelSummary, ReelWriter, TextEntry};
pub use remote::EncodeServer;
pub use status::{JobHandle, JobReport, JobStatus, StatusBoard, StatusServer};
pub use transcoder::{MasteringConfig, TranscodeSummary, Transcoder};
pub use writer::{PackageSummary, Writer};
