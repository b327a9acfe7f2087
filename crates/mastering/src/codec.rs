//! Picture codecs.

use std::sync::Arc;

use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_player::{Eyes, Image};

/// Everything a codec needs to encode one picture.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub sequence: u64,
    /// Output frame index.
    pub frame: i64,
    pub eyes: Eyes,
    pub image: Arc<Image>,
    /// Picture bit rate in bits per second.
    pub bandwidth: u64,
    pub fps: u32,
}

impl EncodeRequest {
    /// Byte budget of one encoded picture at the request's bandwidth.
    pub fn byte_budget(&self) -> u64 {
        self.bandwidth / 8 / self.fps.max(1) as u64
    }
}

/// Trait for picture codecs (local reference codec, external J2K, etc.).
pub trait FrameEncoder: Send + Sync {
    /// Encode one picture.
    fn encode(&self, request: &EncodeRequest) -> ReelkitResult<Vec<u8>>;

    /// Codec name.
    fn name(&self) -> &str;
}

const RLE_MAGIC: &[u8; 4] = b"RKR1";

/// Run-length reference codec.
///
/// Output is `RKR1`, width and height as little-endian `u32`, then runs of
/// `(count, r, g, b)` with `count` in `1..=255`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RleEncoder;

impl FrameEncoder for RleEncoder {
    fn encode(&self, request: &EncodeRequest) -> ReelkitResult<Vec<u8>> {
        let image = &request.image;
        let data = image.data();
        if data.len() % 3 != 0 {
            return Err(ReelkitError::encode(request.frame, "picture is not RGB24"));
        }

        let mut out = Vec::with_capacity(12 + data.len() / 8);
        out.extend_from_slice(RLE_MAGIC);
        out.extend_from_slice(&image.width().to_le_bytes());
        out.extend_from_slice(&image.height().to_le_bytes());

        let mut pixels = data.chunks_exact(3).peekable();
        while let Some(pixel) = pixels.next() {
            let mut count: u8 = 1;
            while count < u8::MAX && pixels.peek() == Some(&pixel) {
                pixels.next();
                count += 1;
            }
            out.push(count);
            out.extend_from_slice(pixel);
        }

        let budget = request.byte_budget();
        if out.len() as u64 > budget {
            tracing::debug!(
                frame = request.frame,
                size = out.len(),
                budget,
                "Encoded picture exceeds its bandwidth budget"
            );
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "rle"
    }
}
