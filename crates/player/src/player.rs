//! The synchronization engine.
//!
//! A [`Player`] turns a playlist snapshot into a stream of output quanta, one
//! output video frame period at a time. Each call to [`Player::pass`] pulls
//! just enough decoded data from the pieces under the quantum, translates it
//! onto the output timeline, fills gaps with black and silence, and hands the
//! result to registered listeners and the caller.

use std::collections::VecDeque;
use std::sync::Arc;

use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_common::time::{ContentTime, DcpTime, FrameRateChange, Period};
use reelkit_timeline_model::{
    Content, ContentId, ContentKind, PlaylistSnapshot, ProjectSettings, TextSpan, VideoFrameType,
};
use sha2::{Digest, Sha256};

use crate::decoder::{Decoded, Decoder, DecoderFactory};
use crate::image::{AudioBuffers, Eyes, Image};
use crate::reference::{referenced_assets, ReferencedAsset};
use crate::text::{compose_text, TextUnit};

/// Player behaviour switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerOptions {
    /// Decode referenced content like any other (for preview).
    pub play_referenced: bool,
}

/// One output picture.
#[derive(Debug, Clone)]
pub struct PlayerVideo {
    pub time: DcpTime,
    pub image: Arc<Image>,
    pub eyes: Eyes,
    /// Content the picture came from; `None` for gap fill.
    pub content: Option<ContentId>,
}

impl PlayerVideo {
    pub fn is_black_fill(&self) -> bool {
        self.content.is_none()
    }

    /// Identity of the picture's source bits.
    pub fn source_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.image.width().to_le_bytes());
        hasher.update(self.image.height().to_le_bytes());
        hasher.update(self.eyes.as_str().as_bytes());
        hasher.update(self.image.data());
        format!("{:x}", hasher.finalize())
    }
}

/// One output frame's worth of mixed sound at the project channel count.
#[derive(Debug, Clone)]
pub struct PlayerAudio {
    pub time: DcpTime,
    pub buffers: AudioBuffers,
}

/// Everything produced for one output frame period.
#[derive(Debug, Clone)]
pub struct Quantum {
    pub time: DcpTime,
    /// One picture in 2D; left then right in 3D; empty where referenced
    /// content stands in.
    pub video: Vec<PlayerVideo>,
    /// `None` only where referenced audio covers the whole quantum.
    pub audio: Option<PlayerAudio>,
    pub text: Vec<TextUnit>,
}

/// Handle for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

enum Listener {
    Video(Box<dyn FnMut(&PlayerVideo) + Send>),
    Audio(Box<dyn FnMut(&PlayerAudio) + Send>),
    Text(Box<dyn FnMut(DcpTime, &[TextUnit]) + Send>),
}

/// Name the content in a decode failure.
fn decode_failure(content: &Content, err: ReelkitError) -> ReelkitError {
    match err {
        ReelkitError::Decode { .. } => err,
        other => ReelkitError::decode(
            format!("{} ({})", content.id, content.name),
            other.to_string(),
        ),
    }
}

struct QueuedFrame {
    time: DcpTime,
    image: Arc<Image>,
    eyes: Eyes,
}

/// Frame slot for the left eye (or both).
const LEFT: usize = 0;
const RIGHT: usize = 1;

struct VideoPiece {
    content: Content,
    period: Period,
    decoder: Box<dyn Decoder>,
    queue: VecDeque<QueuedFrame>,
    held: [Option<Arc<Image>>; 2],
    eof: bool,
}

impl VideoPiece {
    /// Whether this piece supplies `eye` in a project of the given mode.
    fn serves(&self, eye: Eyes) -> bool {
        let frame_type = self.content.video_frame_type;
        match eye {
            Eyes::Both => frame_type != VideoFrameType::ThreeDRight,
            Eyes::Left => frame_type != VideoFrameType::ThreeDRight,
            Eyes::Right => frame_type != VideoFrameType::ThreeDLeft,
        }
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.held = [None, None];
        self.eof = false;
    }

    fn seek(&mut self, time: DcpTime, accurate: bool, fps: f64) -> ReelkitResult<()> {
        self.reset();
        let native = self.content.content_time(time, fps);
        self.decoder
            .seek(native, accurate)
            .map_err(|e| decode_failure(&self.content, e))
    }

    /// The picture held for `slot` at output time `t`.
    ///
    /// Frames are held until a later one replaces them, which covers both
    /// repeated frames (slow content) and skipped ones (fast content).
    fn frame_at(
        &mut self,
        t: DcpTime,
        slot: usize,
        settings: &ProjectSettings,
    ) -> ReelkitResult<Option<Arc<Image>>> {
        let fps = settings.fps();
        let rate = self.content.video_frame_rate.unwrap_or(fps);
        loop {
            while self.queue.front().is_some_and(|f| f.time <= t) {
                let Some(frame) = self.queue.pop_front() else {
                    break;
                };
                match frame.eyes {
                    Eyes::Both => {
                        self.held[LEFT] = Some(frame.image.clone());
                        self.held[RIGHT] = Some(frame.image);
                    }
                    Eyes::Left => self.held[LEFT] = Some(frame.image),
                    Eyes::Right => self.held[RIGHT] = Some(frame.image),
                }
            }
            if !self.queue.is_empty() || self.eof {
                break;
            }

            match self
                .decoder
                .pass()
                .map_err(|e| decode_failure(&self.content, e))?
            {
                None => self.eof = true,
                Some(Decoded::Video { frame, image, eyes }) => {
                    let time = self
                        .content
                        .dcp_time(ContentTime::from_frames(frame, rate), fps)
                        .round(fps);
                    let eyes = match self.content.video_frame_type {
                        VideoFrameType::TwoD | VideoFrameType::ThreeDAlternate => eyes,
                        VideoFrameType::ThreeDLeft => Eyes::Left,
                        VideoFrameType::ThreeDRight => Eyes::Right,
                    };
                    let image = if image.width() == settings.width
                        && image.height() == settings.height
                    {
                        image
                    } else {
                        Arc::new(image.scaled(settings.width, settings.height))
                    };
                    self.queue.push_back(QueuedFrame { time, image, eyes });
                }
                Some(_) => {}
            }
        }
        Ok(self.held[slot].clone())
    }
}

struct AudioPiece {
    content: Content,
    /// Output span with the stream delay applied.
    period: Period,
    decoder: Box<dyn Decoder>,
    frc: FrameRateChange,
    mapping: reelkit_timeline_model::AudioMapping,
    gain: f32,
    buffer: AudioBuffers,
    /// Native sample index of `buffer`'s first frame.
    buffer_start: i64,
    eof: bool,
}

impl AudioPiece {
    fn native_at(&self, time: DcpTime) -> ContentTime {
        let offset = (time - self.period.from).max(DcpTime::ZERO);
        self.content.trim_start + ContentTime::from_dcp(offset, &self.frc)
    }

    /// Native sample position (fractional under a speed change) heard at
    /// output time `time`.
    fn native_sample_at(&self, time: DcpTime, sample_rate: f64) -> f64 {
        let offset = (time - self.period.from).max(DcpTime::ZERO);
        self.content.trim_start.frames_round(sample_rate) as f64
            + offset.frames_round(sample_rate) as f64 * self.frc.speed_up
    }

    fn seek(&mut self, time: DcpTime, accurate: bool) -> ReelkitResult<()> {
        self.buffer = AudioBuffers::default();
        self.buffer_start = 0;
        self.eof = false;
        let native = self.native_at(time);
        self.decoder
            .seek(native, accurate)
            .map_err(|e| decode_failure(&self.content, e))
    }

    fn push(&mut self, start: i64, block: AudioBuffers) {
        if self.buffer.frames() == 0 {
            self.buffer = block;
            self.buffer_start = start;
            return;
        }
        let expected = self.buffer_start + self.buffer.frames() as i64;
        if start > expected {
            self.buffer.pad((start - expected) as usize);
            self.buffer.append(&block);
        } else {
            let overlap = (expected - start) as usize;
            if overlap < block.frames() {
                self.buffer.append(&block.slice(overlap, block.frames()));
            }
        }
    }

    fn fill(&mut self, until: i64, sample_rate: f64) -> ReelkitResult<()> {
        while !self.eof && self.buffer_start + (self.buffer.frames() as i64) < until {
            match self
                .decoder
                .pass()
                .map_err(|e| decode_failure(&self.content, e))?
            {
                None => self.eof = true,
                Some(Decoded::Audio { time, buffers }) => {
                    self.push(time.frames_round(sample_rate), buffers)
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Mix this piece's share of `quantum` into `out`.
    ///
    /// Output sample `k` of the overlap reads native position
    /// `first + k * speed_up`, so sped-up content is time-mapped onto the
    /// output rate and stays in step with its picture.
    fn mix_into(
        &mut self,
        out: &mut AudioBuffers,
        quantum: Period,
        sample_rate: f64,
    ) -> ReelkitResult<()> {
        let Some(overlap) = self.period.overlap(&quantum) else {
            return Ok(());
        };
        let out_offset = (overlap.from - quantum.from).frames_round(sample_rate);
        let count = overlap.duration().frames_round(sample_rate).max(0);
        let step = self.frc.speed_up;
        let first = self.native_sample_at(overlap.from, sample_rate);
        let end = first + count as f64 * step;

        // One sample past the end for interpolation.
        self.fill(end.ceil() as i64 + 1, sample_rate)?;

        if count > 0 {
            let stretched =
                self.buffer
                    .resampled(first - self.buffer_start as f64, step, count as usize);
            let mapping = &self.mapping;
            let gain = self.gain;
            out.mix_from(
                &stretched,
                0,
                out_offset as usize,
                count as usize,
                |input, output| mapping.get(input, output) * gain,
            );
        }

        let consumed =
            (end.floor() as i64 - self.buffer_start).clamp(0, self.buffer.frames() as i64);
        self.buffer.trim_front(consumed as usize);
        self.buffer_start += consumed;
        Ok(())
    }
}

struct TextPiece {
    content: Content,
    period: Period,
    decoder: Box<dyn Decoder>,
    spans: Vec<(Period, TextSpan)>,
    eof: bool,
}

impl TextPiece {
    fn seek(&mut self, time: DcpTime, accurate: bool, fps: f64) -> ReelkitResult<()> {
        self.spans.clear();
        self.eof = false;
        let native = self.content.content_time(time, fps);
        self.decoder
            .seek(native, accurate)
            .map_err(|e| decode_failure(&self.content, e))
    }

    fn active(&mut self, quantum: Period, fps: f64) -> ReelkitResult<Vec<TextSpan>> {
        while !self.eof
            && self
                .spans
                .last()
                .map_or(true, |(period, _)| period.from < quantum.to)
        {
            match self
                .decoder
                .pass()
                .map_err(|e| decode_failure(&self.content, e))?
            {
                None => self.eof = true,
                Some(Decoded::Text(span)) => {
                    let from = self.content.dcp_time(span.from, fps);
                    let to = self.content.dcp_time(span.to, fps);
                    if from < to {
                        if let Some(period) = Period::new(from, to).overlap(&self.period) {
                            self.spans.push((period, span));
                        }
                    }
                }
                Some(_) => {}
            }
        }

        self.spans.retain(|(period, _)| period.to > quantum.from);
        Ok(self
            .spans
            .iter()
            .filter(|(period, _)| period.overlaps(&quantum))
            .map(|(_, span)| span.clone())
            .collect())
    }
}

/// Pull-based synchronization engine over one playlist snapshot.
pub struct Player {
    snapshot: Arc<PlaylistSnapshot>,
    settings: ProjectSettings,
    options: PlayerOptions,
    video: Vec<VideoPiece>,
    audio: Vec<AudioPiece>,
    text: Vec<TextPiece>,
    video_gaps: Vec<Period>,
    audio_gaps: Vec<Period>,
    /// Referenced spans that are passed through rather than played.
    referenced_video: Vec<Period>,
    referenced_audio: Vec<Period>,
    black: Arc<Image>,
    length_frames: i64,
    frame: i64,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl Player {
    pub fn new(
        snapshot: Arc<PlaylistSnapshot>,
        factory: &dyn DecoderFactory,
        settings: ProjectSettings,
        options: PlayerOptions,
    ) -> ReelkitResult<Self> {
        settings.validate()?;
        if snapshot.video_frame_rate() != settings.video_frame_rate {
            return Err(ReelkitError::config(format!(
                "Playlist is timed at {} fps but the project outputs {} fps",
                snapshot.video_frame_rate(),
                settings.video_frame_rate
            )));
        }

        let fps = settings.fps();
        let length = snapshot.length();
        let timeline = Period::new(DcpTime::ZERO, length);

        let mut video = vec![];
        let mut audio = vec![];
        let mut text = vec![];
        let mut referenced_video = vec![];
        let mut referenced_audio = vec![];

        for content in snapshot.content() {
            if content.reference && !options.play_referenced {
                match content.kind {
                    ContentKind::Video => referenced_video.push(content.period(fps)),
                    ContentKind::Audio => referenced_audio.push(content.output_period(fps)),
                    ContentKind::Text => {}
                }
                continue;
            }

            let mut decoder = factory
                .create(content, &settings)
                .map_err(|e| decode_failure(content, e))?;
            decoder
                .seek(content.trim_start, true)
                .map_err(|e| decode_failure(content, e))?;

            match content.kind {
                ContentKind::Video => video.push(VideoPiece {
                    content: content.clone(),
                    period: content.period(fps),
                    decoder,
                    queue: VecDeque::new(),
                    held: [None, None],
                    eof: false,
                }),
                ContentKind::Audio => {
                    let stream = content.audio.as_ref().ok_or_else(|| {
                        ReelkitError::decode(content.id.to_string(), "audio content has no stream")
                    })?;
                    if stream.sample_rate != settings.audio_sample_rate {
                        return Err(ReelkitError::decode(
                            content.id.to_string(),
                            format!(
                                "sample rate {} differs from the project rate {}",
                                stream.sample_rate, settings.audio_sample_rate
                            ),
                        ));
                    }
                    audio.push(AudioPiece {
                        content: content.clone(),
                        period: content.output_period(fps),
                        decoder,
                        frc: content.frame_rate_change(fps),
                        mapping: stream.mapping.clone(),
                        gain: stream.linear_gain(),
                        buffer: AudioBuffers::default(),
                        buffer_start: 0,
                        eof: false,
                    });
                }
                ContentKind::Text => text.push(TextPiece {
                    content: content.clone(),
                    period: content.period(fps),
                    decoder,
                    spans: vec![],
                    eof: false,
                }),
            }
        }

        let video_coverage: Vec<Period> = snapshot
            .of_kind(ContentKind::Video)
            .filter(|c| settings.three_d || c.video_frame_type != VideoFrameType::ThreeDRight)
            .map(|c| c.period(fps))
            .collect();
        let video_gaps = timeline.subtract(&video_coverage);
        let audio_gaps = timeline.subtract(&snapshot.coverage(ContentKind::Audio));

        tracing::debug!(
            revision = snapshot.revision(),
            video = video.len(),
            audio = audio.len(),
            text = text.len(),
            video_gaps = video_gaps.len(),
            audio_gaps = audio_gaps.len(),
            "Player set up"
        );

        Ok(Self {
            black: Arc::new(Image::black(settings.width, settings.height)),
            length_frames: length.frames_round(fps),
            snapshot,
            settings,
            options,
            video,
            audio,
            text,
            video_gaps,
            audio_gaps,
            referenced_video: Period::coalesce(&referenced_video),
            referenced_audio: Period::coalesce(&referenced_audio),
            frame: 0,
            listeners: vec![],
            next_listener: 0,
        })
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> &Arc<PlaylistSnapshot> {
        &self.snapshot
    }

    pub fn length(&self) -> DcpTime {
        DcpTime::from_frames(self.length_frames, self.settings.fps())
    }

    /// Start of the next quantum.
    pub fn position(&self) -> DcpTime {
        DcpTime::from_frames(self.frame, self.settings.fps())
    }

    /// Periods filled with black, computed once at setup.
    pub fn video_gaps(&self) -> &[Period] {
        &self.video_gaps
    }

    /// Periods filled with silence, computed once at setup.
    pub fn audio_gaps(&self) -> &[Period] {
        &self.audio_gaps
    }

    /// Assets the writer should include by pointer.
    pub fn referenced_assets(&self) -> Vec<ReferencedAsset> {
        if self.options.play_referenced {
            return vec![];
        }
        referenced_assets(&self.snapshot)
    }

    pub fn on_video<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&PlayerVideo) + Send + 'static,
    {
        self.register(Listener::Video(Box::new(listener)))
    }

    pub fn on_audio<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&PlayerAudio) + Send + 'static,
    {
        self.register(Listener::Audio(Box::new(listener)))
    }

    pub fn on_text<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(DcpTime, &[TextUnit]) + Send + 'static,
    {
        self.register(Listener::Text(Box::new(listener)))
    }

    /// Remove a listener; returns whether it was registered.
    pub fn disconnect(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    fn register(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Move so the next quantum starts at the frame containing `time`.
    pub fn seek(&mut self, time: DcpTime, accurate: bool) -> ReelkitResult<()> {
        let fps = self.settings.fps();
        self.frame = time.frames_floor(fps).clamp(0, self.length_frames);
        let at = self.position();
        tracing::debug!(time = at.get(), accurate, "Player seek");

        for piece in &mut self.video {
            piece.seek(at, accurate, fps)?;
        }
        for piece in &mut self.audio {
            piece.seek(at, accurate)?;
        }
        for piece in &mut self.text {
            piece.seek(at, accurate, fps)?;
        }
        Ok(())
    }

    /// Advance by one output quantum; `None` once the timeline is exhausted.
    pub fn pass(&mut self) -> ReelkitResult<Option<Quantum>> {
        if self.frame >= self.length_frames {
            return Ok(None);
        }
        let fps = self.settings.fps();
        let time = DcpTime::from_frames(self.frame, fps);
        let quantum = Period::new(time, DcpTime::from_frames(self.frame + 1, fps));

        let video = self.video_at(time)?;
        let audio = self.audio_at(quantum)?;
        let text = self.text_at(quantum)?;
        self.frame += 1;

        let quantum = Quantum {
            time,
            video,
            audio,
            text,
        };
        self.emit(&quantum);
        Ok(Some(quantum))
    }

    fn emit(&mut self, quantum: &Quantum) {
        for video in &quantum.video {
            for (_, listener) in &mut self.listeners {
                if let Listener::Video(f) = listener {
                    f(video);
                }
            }
        }
        if let Some(audio) = &quantum.audio {
            for (_, listener) in &mut self.listeners {
                if let Listener::Audio(f) = listener {
                    f(audio);
                }
            }
        }
        if !quantum.text.is_empty() {
            for (_, listener) in &mut self.listeners {
                if let Listener::Text(f) = listener {
                    f(quantum.time, &quantum.text);
                }
            }
        }
    }

    fn black_frame(&self, time: DcpTime, eyes: Eyes) -> PlayerVideo {
        PlayerVideo {
            time,
            image: self.black.clone(),
            eyes,
            content: None,
        }
    }

    fn video_at(&mut self, time: DcpTime) -> ReelkitResult<Vec<PlayerVideo>> {
        let eyes: &[Eyes] = if self.settings.three_d {
            &[Eyes::Left, Eyes::Right]
        } else {
            &[Eyes::Both]
        };

        if self.video_gaps.iter().any(|gap| gap.contains(time)) {
            return Ok(eyes.iter().map(|e| self.black_frame(time, *e)).collect());
        }

        let mut out = Vec::with_capacity(eyes.len());
        for &eye in eyes {
            let slot = if eye == Eyes::Right { RIGHT } else { LEFT };
            let piece = self
                .video
                .iter_mut()
                .find(|p| p.period.contains(time) && p.serves(eye));
            match piece {
                Some(piece) => {
                    let id = piece.content.id;
                    let frame = match piece.frame_at(time, slot, &self.settings)? {
                        Some(image) => PlayerVideo {
                            time,
                            image,
                            eyes: eye,
                            content: Some(id),
                        },
                        None => self.black_frame(time, eye),
                    };
                    out.push(frame);
                }
                None if self.referenced_video.iter().any(|p| p.contains(time)) => {}
                None => out.push(self.black_frame(time, eye)),
            }
        }
        Ok(out)
    }

    fn audio_at(&mut self, quantum: Period) -> ReelkitResult<Option<PlayerAudio>> {
        let channels = self.settings.audio_channels;
        let samples = self.settings.samples_per_frame();
        let sample_rate = self.settings.audio_sample_rate as f64;

        let silent = AudioBuffers::silent(channels, samples);
        if self
            .audio_gaps
            .iter()
            .any(|gap| gap.from <= quantum.from && quantum.to <= gap.to)
        {
            return Ok(Some(PlayerAudio {
                time: quantum.from,
                buffers: silent,
            }));
        }

        let played = self.audio.iter().any(|p| p.period.overlaps(&quantum));
        let referenced = self
            .referenced_audio
            .iter()
            .any(|p| p.from <= quantum.from && quantum.to <= p.to);
        if referenced && !played {
            return Ok(None);
        }

        let mut mixed = silent;
        for piece in &mut self.audio {
            piece.mix_into(&mut mixed, quantum, sample_rate)?;
        }
        Ok(Some(PlayerAudio {
            time: quantum.from,
            buffers: mixed,
        }))
    }

    fn text_at(&mut self, quantum: Period) -> ReelkitResult<Vec<TextUnit>> {
        let fps = self.settings.fps();
        let mut spans = vec![];
        for piece in &mut self.text {
            if !piece.period.overlaps(&quantum) {
                continue;
            }
            spans.extend(piece.active(quantum, fps)?);
        }
        Ok(compose_text(&spans))
    }
}
