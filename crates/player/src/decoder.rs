//! The contract between the player and per-format decoders.

use std::sync::Arc;

use reelkit_common::error::ReelkitResult;
use reelkit_common::time::ContentTime;
use reelkit_timeline_model::{Content, ProjectSettings, TextSpan};

use crate::image::{AudioBuffers, Eyes, Image};

/// One unit of decoded output, in native content time.
#[derive(Debug, Clone)]
pub enum Decoded {
    /// Native frame index `frame` (counted from the start of the source).
    Video {
        frame: i64,
        image: Arc<Image>,
        eyes: Eyes,
    },
    /// A block of samples starting at `time`.
    Audio {
        time: ContentTime,
        buffers: AudioBuffers,
    },
    Text(TextSpan),
}

/// Sequential decoder for one piece of content.
pub trait Decoder: Send {
    /// Reposition so the next `pass` yields output at or before `time`.
    ///
    /// An inaccurate seek may land earlier than requested; the player
    /// discards what it does not need.
    fn seek(&mut self, time: ContentTime, accurate: bool) -> ReelkitResult<()>;

    /// The next decoded unit, or `None` at end of stream.
    fn pass(&mut self) -> ReelkitResult<Option<Decoded>>;
}

/// Creates decoders for content.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, content: &Content, settings: &ProjectSettings)
        -> ReelkitResult<Box<dyn Decoder>>;
}
