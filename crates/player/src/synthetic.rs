//! Decoders for generated content.
//!
//! Colour, tone, silence, and caption generators need no external media, so
//! they back slates, line-up material, and the test suites. File sources are
//! left to format-specific factories.

use std::f64::consts::TAU;
use std::sync::Arc;

use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_common::time::ContentTime;
use reelkit_timeline_model::{
    Content, ContentKind, ContentSource, Examination, Examiner, Generator, ProjectSettings,
    TextSpan, VideoFrameType,
};

use crate::decoder::{Decoded, Decoder, DecoderFactory};
use crate::image::{AudioBuffers, Eyes, Image};

/// Frames between seek points for inaccurate seeks.
pub const GOP_LENGTH: i64 = 12;

/// Samples per decoded audio block.
pub const AUDIO_BLOCK: i64 = 1024;

struct ColourDecoder {
    image: Arc<Image>,
    frames: i64,
    rate: f64,
    alternate: bool,
    next: i64,
    /// The left eye of `next` has gone out; the right is due.
    right_due: bool,
}

impl Decoder for ColourDecoder {
    fn seek(&mut self, time: ContentTime, accurate: bool) -> ReelkitResult<()> {
        let frame = time.frames_floor(self.rate).max(0);
        self.next = if accurate {
            frame
        } else {
            frame - frame % GOP_LENGTH
        };
        self.right_due = false;
        Ok(())
    }

    fn pass(&mut self) -> ReelkitResult<Option<Decoded>> {
        if self.next >= self.frames {
            return Ok(None);
        }
        let frame = self.next;
        let eyes = if !self.alternate {
            self.next += 1;
            Eyes::Both
        } else if self.right_due {
            self.right_due = false;
            self.next += 1;
            Eyes::Right
        } else {
            self.right_due = true;
            Eyes::Left
        };
        Ok(Some(Decoded::Video {
            frame,
            image: self.image.clone(),
            eyes,
        }))
    }
}

struct ToneDecoder {
    frequency: f64,
    /// Zero for silence.
    amplitude: f32,
    channels: usize,
    sample_rate: f64,
    samples: i64,
    next: i64,
}

impl Decoder for ToneDecoder {
    fn seek(&mut self, time: ContentTime, _accurate: bool) -> ReelkitResult<()> {
        self.next = time.frames_floor(self.sample_rate).max(0);
        Ok(())
    }

    fn pass(&mut self) -> ReelkitResult<Option<Decoded>> {
        if self.next >= self.samples {
            return Ok(None);
        }
        let count = AUDIO_BLOCK.min(self.samples - self.next);
        let wave: Vec<f32> = (self.next..self.next + count)
            .map(|n| {
                if self.amplitude == 0.0 {
                    0.0
                } else {
                    let phase = TAU * self.frequency * n as f64 / self.sample_rate;
                    self.amplitude * phase.sin() as f32
                }
            })
            .collect();
        let time = ContentTime::from_frames(self.next, self.sample_rate);
        self.next += count;
        Ok(Some(Decoded::Audio {
            time,
            buffers: AudioBuffers::from_channels(vec![wave; self.channels]),
        }))
    }
}

struct CaptionDecoder {
    span: TextSpan,
    done: bool,
}

impl Decoder for CaptionDecoder {
    fn seek(&mut self, time: ContentTime, _accurate: bool) -> ReelkitResult<()> {
        self.done = time >= self.span.to;
        Ok(())
    }

    fn pass(&mut self) -> ReelkitResult<Option<Decoded>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        Ok(Some(Decoded::Text(self.span.clone())))
    }
}

fn generator_of(content: &Content) -> ReelkitResult<&Generator> {
    match &content.source {
        ContentSource::Generated { generator } => Ok(generator),
        ContentSource::File { path } => Err(ReelkitError::decode(
            content.id.to_string(),
            format!("no decoder is available for {}", path.display()),
        )),
    }
}

/// Builds decoders for [`ContentSource::Generated`] content.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticDecoderFactory;

impl DecoderFactory for SyntheticDecoderFactory {
    fn create(
        &self,
        content: &Content,
        settings: &ProjectSettings,
    ) -> ReelkitResult<Box<dyn Decoder>> {
        let mismatch = |generator: &str| {
            ReelkitError::decode(
                content.id.to_string(),
                format!(
                    "a {generator} generator cannot produce {} content",
                    content.kind.as_str()
                ),
            )
        };

        match (generator_of(content)?, content.kind) {
            (Generator::Colour { r, g, b }, ContentKind::Video) => {
                let rate = content.video_frame_rate.unwrap_or(settings.fps());
                Ok(Box::new(ColourDecoder {
                    image: Arc::new(Image::solid(settings.width, settings.height, (*r, *g, *b))),
                    frames: content.length.frames_round(rate),
                    rate,
                    alternate: content.video_frame_type == VideoFrameType::ThreeDAlternate,
                    next: 0,
                    right_due: false,
                }))
            }
            (Generator::Colour { .. }, _) => Err(mismatch("colour")),
            (generator @ (Generator::Tone { .. } | Generator::Silence), ContentKind::Audio) => {
                let stream = content.audio.as_ref().ok_or_else(|| {
                    ReelkitError::decode(content.id.to_string(), "audio content has no stream")
                })?;
                let (frequency, amplitude) = match generator {
                    Generator::Tone {
                        frequency,
                        amplitude,
                    } => (*frequency, *amplitude),
                    _ => (0.0, 0.0),
                };
                let sample_rate = stream.sample_rate as f64;
                Ok(Box::new(ToneDecoder {
                    frequency,
                    amplitude,
                    channels: stream.channels,
                    sample_rate,
                    samples: content.length.frames_round(sample_rate),
                    next: 0,
                }))
            }
            (Generator::Tone { .. } | Generator::Silence, _) => Err(mismatch("tone")),
            (
                Generator::Text {
                    text,
                    v_align,
                    v_position,
                },
                ContentKind::Text,
            ) => Ok(Box::new(CaptionDecoder {
                span: TextSpan {
                    from: ContentTime::ZERO,
                    to: content.length,
                    text: text.clone(),
                    v_align: *v_align,
                    v_position: *v_position,
                },
                done: false,
            })),
            (Generator::Text { .. }, _) => Err(mismatch("text")),
        }
    }
}

/// Reports the declared properties of generated content.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticExaminer;

impl Examiner for SyntheticExaminer {
    fn examine(&self, content: &Content) -> ReelkitResult<Examination> {
        generator_of(content)?;
        Ok(Examination {
            length: content.length,
            video_frame_rate: content.video_frame_rate,
            audio: content.audio.as_ref().map(|a| (a.channels, a.sample_rate)),
            field_flags: vec![],
        })
    }
}
