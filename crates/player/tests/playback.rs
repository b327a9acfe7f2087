//! End-to-end playback over synthetic content.

use std::sync::{Arc, Mutex};

use reelkit_common::error::{ReelkitError, ReelkitResult};
use reelkit_common::time::{ContentTime, DcpTime, Period};
use reelkit_player::{
    Behaviour, Butler, ButlerConfig, Decoded, Decoder, DecoderFactory, Eyes, Image, Player,
    PlayerOptions, SyntheticDecoderFactory,
};
use reelkit_timeline_model::{
    Content, ContentKind, ContentSource, Playlist, ProjectSettings, VAlign, VideoFrameType,
};

fn settings(three_d: bool) -> ProjectSettings {
    ProjectSettings {
        width: 4,
        height: 2,
        three_d,
        ..ProjectSettings::default()
    }
}

fn player(playlist: &Playlist, settings: ProjectSettings) -> Player {
    Player::new(
        playlist.snapshot(),
        &SyntheticDecoderFactory,
        settings,
        PlayerOptions::default(),
    )
    .unwrap()
}

fn seconds(s: f64) -> DcpTime {
    DcpTime::from_seconds(s)
}

#[test]
fn test_gaps_filled_with_black_and_silence() {
    let mut playlist = Playlist::new(24, false);
    let a = playlist
        .add(Content::colour("A", (200, 0, 0), 72, 24.0).at(seconds(2.0)))
        .unwrap();
    let b = playlist
        .add(Content::colour("B", (0, 200, 0), 24, 24.0).at(seconds(7.0)))
        .unwrap();
    let mut player = player(&playlist, settings(false));

    assert_eq!(
        player.video_gaps(),
        &[
            Period::new(DcpTime::ZERO, seconds(2.0)),
            Period::new(seconds(5.0), seconds(7.0))
        ]
    );

    let mut frames = 0;
    while let Some(quantum) = player.pass().unwrap() {
        assert_eq!(quantum.video.len(), 1);
        let video = &quantum.video[0];
        assert_eq!(video.time, quantum.time);
        assert_eq!(video.eyes, Eyes::Both);

        let expected = match frames {
            0..=47 => None,
            48..=119 => Some(a),
            120..=167 => None,
            _ => Some(b),
        };
        assert_eq!(video.content, expected, "frame {frames}");
        if expected.is_none() {
            assert!(video.image.data().iter().all(|p| *p == 0));
        }

        let audio = quantum.audio.expect("silence is always produced");
        assert_eq!(audio.buffers.frames(), 2000);
        assert_eq!(audio.buffers.channels(), 6);
        assert!(audio.buffers.is_silent());
        frames += 1;
    }
    assert_eq!(frames, 192);
}

#[test]
fn test_seek_lands_on_frame_boundary() {
    let mut playlist = Playlist::new(24, false);
    playlist
        .add(Content::colour("A", (1, 1, 1), 240, 24.0))
        .unwrap();
    let mut player = player(&playlist, settings(false));

    player.seek(seconds(2.5) + DcpTime::new(10), false).unwrap();
    let quantum = player.pass().unwrap().unwrap();
    assert_eq!(quantum.time, seconds(2.5));
    assert!(quantum.video[0].content.is_some());

    player.seek(seconds(100.0), true).unwrap();
    assert!(player.pass().unwrap().is_none());
}

#[test]
fn test_three_d_project_duplicates_two_d_and_fills_missing_eye() {
    let mut playlist = Playlist::new(24, true);
    let flat = playlist
        .add(Content::colour("flat", (5, 5, 5), 24, 24.0))
        .unwrap();
    let left = playlist
        .add(
            Content::colour("left", (9, 9, 9), 24, 24.0)
                .with_frame_type(VideoFrameType::ThreeDLeft)
                .at(seconds(1.0)),
        )
        .unwrap();
    let mut player = player(&playlist, settings(true));

    let first = player.pass().unwrap().unwrap();
    let eyes: Vec<_> = first.video.iter().map(|v| (v.eyes, v.content)).collect();
    assert_eq!(
        eyes,
        vec![(Eyes::Left, Some(flat)), (Eyes::Right, Some(flat))]
    );

    player.seek(seconds(1.0), true).unwrap();
    let later = player.pass().unwrap().unwrap();
    assert_eq!(later.video[0].eyes, Eyes::Left);
    assert_eq!(later.video[0].content, Some(left));
    assert_eq!(later.video[1].eyes, Eyes::Right);
    assert!(later.video[1].is_black_fill());
}

#[test]
fn test_two_d_project_drops_right_eye_content() {
    let mut playlist = Playlist::new(24, false);
    playlist
        .add(Content::colour("right", (9, 9, 9), 24, 24.0).with_frame_type(VideoFrameType::ThreeDRight))
        .unwrap();
    let mut player = player(&playlist, settings(false));

    assert_eq!(player.video_gaps().len(), 1);
    let quantum = player.pass().unwrap().unwrap();
    assert_eq!(quantum.video.len(), 1);
    assert!(quantum.video[0].is_black_fill());
}

#[test]
fn test_mono_tone_routed_to_centre_with_gain() {
    let mut playlist = Playlist::new(24, false);
    let mut tone = Content::tone("tone", 1000.0, ContentTime::from_seconds(1.0), 1, 48_000, 6);
    let id = playlist.add(tone.clone()).unwrap();
    let mut player_a = player(&playlist, settings(false));
    let loud = player_a.pass().unwrap().unwrap().audio.unwrap();
    assert!(loud.buffers.channel(0).iter().all(|s| *s == 0.0));
    assert!(loud.buffers.channel(2).iter().any(|s| *s != 0.0));

    playlist
        .modify(id, |c| {
            if let Some(audio) = c.audio.as_mut() {
                audio.gain_db = -6.0;
            }
        })
        .unwrap();
    let mut player_b = player(&playlist, settings(false));
    let quiet = player_b.pass().unwrap().unwrap().audio.unwrap();
    let peak = |samples: &[f32]| samples.iter().fold(0f32, |m, s| m.max(s.abs()));
    let ratio = peak(quiet.buffers.channel(2)) / peak(loud.buffers.channel(2));
    assert!((ratio - 0.501).abs() < 0.01, "ratio {ratio}");

    tone.audio.as_mut().unwrap().sample_rate = 44_100;
    let mut other = Playlist::new(24, false);
    other.add(tone).unwrap();
    let err = Player::new(
        other.snapshot(),
        &SyntheticDecoderFactory,
        settings(false),
        PlayerOptions::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, ReelkitError::Decode { .. }));
}

#[test]
fn test_audio_delay_shifts_output() {
    let mut playlist = Playlist::new(24, false);
    let mut tone = Content::tone("tone", 1000.0, ContentTime::from_seconds(1.0), 1, 48_000, 6);
    tone.audio.as_mut().unwrap().delay_ms = 500;
    playlist.add(tone).unwrap();
    let mut player = player(&playlist, settings(false));

    // 500 ms at 24 fps is twelve frames of silence.
    for frame in 0..12 {
        let audio = player.pass().unwrap().unwrap().audio.unwrap();
        assert!(audio.buffers.is_silent(), "frame {frame}");
    }
    let audio = player.pass().unwrap().unwrap().audio.unwrap();
    assert!(!audio.buffers.is_silent());
}

#[test]
fn test_captions_grouped_per_quantum() {
    let mut playlist = Playlist::new(24, false);
    playlist
        .add(Content::colour("bg", (0, 0, 0), 72, 24.0))
        .unwrap();
    playlist
        .add(
            Content::caption("one", "Hello", VAlign::Bottom, 0.1, ContentTime::from_seconds(1.0))
                .at(seconds(1.0)),
        )
        .unwrap();
    playlist
        .add(
            Content::caption("two", "World", VAlign::Bottom, 0.1, ContentTime::from_seconds(1.0))
                .at(seconds(1.0)),
        )
        .unwrap();
    let mut player = player(&playlist, settings(false));

    let first = player.pass().unwrap().unwrap();
    assert!(first.text.is_empty());

    player.seek(seconds(1.5), true).unwrap();
    let during = player.pass().unwrap().unwrap();
    assert_eq!(during.text.len(), 1);
    assert_eq!(during.text[0].lines, vec!["Hello", "World"]);

    player.seek(seconds(2.0), true).unwrap();
    assert!(player.pass().unwrap().unwrap().text.is_empty());
}

#[test]
fn test_listeners_fire_in_order_and_disconnect() {
    let mut playlist = Playlist::new(24, false);
    playlist
        .add(Content::colour("A", (1, 2, 3), 24, 24.0))
        .unwrap();
    let mut player = player(&playlist, settings(false));

    let log = Arc::new(Mutex::new(vec![]));
    let video_log = log.clone();
    let video = player.on_video(move |_| video_log.lock().unwrap().push("video"));
    let audio_log = log.clone();
    player.on_audio(move |_| audio_log.lock().unwrap().push("audio"));

    player.pass().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["video", "audio"]);

    assert!(player.disconnect(video));
    assert!(!player.disconnect(video));
    player.pass().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["video", "audio", "audio"]);
}

#[test]
fn test_decode_error_names_content() {
    let mut playlist = Playlist::new(24, false);
    let mut clip = Content::new(
        "clip",
        ContentKind::Video,
        ContentSource::File {
            path: "/nowhere/clip.mov".into(),
        },
    )
    .with_length(ContentTime::from_seconds(1.0))
    .with_video_rate(24.0);
    clip.valid = true;
    let id = playlist.add(clip).unwrap();

    let err = Player::new(
        playlist.snapshot(),
        &SyntheticDecoderFactory,
        settings(false),
        PlayerOptions::default(),
    )
    .err()
    .unwrap();
    match err {
        ReelkitError::Decode { content, .. } => assert!(content.starts_with(&id.to_string())),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_referenced_content_is_passed_through() {
    let mut playlist = Playlist::new(24, false);
    let id = playlist
        .add(Content::colour("pkg", (3, 3, 3), 24, 24.0).packaged(vec![seconds(1.0)]))
        .unwrap();
    playlist
        .add(Content::colour("after", (4, 4, 4), 24, 24.0).at(seconds(1.0)))
        .unwrap();
    playlist.set_reference(id, true).unwrap();

    let mut skipping = player(&playlist, settings(false));
    assert_eq!(skipping.referenced_assets().len(), 1);
    let quantum = skipping.pass().unwrap().unwrap();
    assert!(quantum.video.is_empty());

    let mut previewing = Player::new(
        playlist.snapshot(),
        &SyntheticDecoderFactory,
        settings(false),
        PlayerOptions {
            play_referenced: true,
        },
    )
    .unwrap();
    assert!(previewing.referenced_assets().is_empty());
    let quantum = previewing.pass().unwrap().unwrap();
    assert_eq!(quantum.video[0].content, Some(id));
}

#[test]
fn test_soundtrack_keeps_step_with_sped_up_picture() {
    let mut playlist = Playlist::new(24, false);
    let picture = Content::colour("pal", (1, 1, 1), 50, 25.0);
    let soundtrack = Content::tone("pal sound", 440.0, ContentTime::from_seconds(2.0), 1, 48_000, 6)
        .with_video_rate(25.0);
    let end = picture.end(24.0);
    assert_eq!(soundtrack.end(24.0), end);
    playlist.add(picture).unwrap();
    playlist.add(soundtrack).unwrap();
    let mut player = player(&playlist, settings(false));
    assert!(player.audio_gaps().is_empty());

    let mut frames = 0;
    while let Some(quantum) = player.pass().unwrap() {
        assert!(quantum.video[0].content.is_some(), "frame {frames}");
        let audio = quantum.audio.unwrap();
        let tail = &audio.buffers.channel(2)[1900..];
        assert!(tail.iter().any(|s| *s != 0.0), "frame {frames}");
        frames += 1;
    }
    assert_eq!(frames, 50);
    assert_eq!(DcpTime::from_frames(frames, 24.0), end);
}

/// Writes each native frame's index into its pixels.
struct IndexedFactory;

struct IndexedDecoder {
    width: u32,
    height: u32,
    rate: f64,
    frames: i64,
    next: i64,
}

impl Decoder for IndexedDecoder {
    fn seek(&mut self, time: ContentTime, _accurate: bool) -> ReelkitResult<()> {
        self.next = time.frames_floor(self.rate).max(0);
        Ok(())
    }

    fn pass(&mut self) -> ReelkitResult<Option<Decoded>> {
        if self.next >= self.frames {
            return Ok(None);
        }
        let frame = self.next;
        self.next += 1;
        let index = (frame as u8, (frame >> 8) as u8, 0);
        Ok(Some(Decoded::Video {
            frame,
            image: Arc::new(Image::solid(self.width, self.height, index)),
            eyes: Eyes::Both,
        }))
    }
}

impl DecoderFactory for IndexedFactory {
    fn create(
        &self,
        content: &Content,
        settings: &ProjectSettings,
    ) -> ReelkitResult<Box<dyn Decoder>> {
        let rate = content.video_frame_rate.unwrap_or(settings.fps());
        Ok(Box::new(IndexedDecoder {
            width: settings.width,
            height: settings.height,
            rate,
            frames: content.length.frames_round(rate),
            next: 0,
        }))
    }
}

/// Native frame index shown at each output frame of a 24 fps timeline.
fn shown_frames(content: Content) -> Vec<i64> {
    let mut playlist = Playlist::new(24, false);
    playlist.add(content).unwrap();
    let mut player = Player::new(
        playlist.snapshot(),
        &IndexedFactory,
        settings(false),
        PlayerOptions::default(),
    )
    .unwrap();

    let mut shown = vec![];
    while let Some(quantum) = player.pass().unwrap() {
        let pixel = quantum.video[0].image.data();
        shown.push(pixel[0] as i64 | (pixel[1] as i64) << 8);
    }
    shown
}

#[test]
fn test_double_rate_content_skips_alternate_frames() {
    let shown = shown_frames(Content::colour("fifty", (0, 0, 0), 96, 48.0));
    assert_eq!(shown, (0..48).map(|k| 2 * k).collect::<Vec<_>>());
}

#[test]
fn test_half_rate_content_repeats_frames() {
    let shown = shown_frames(Content::colour("twelve", (0, 0, 0), 24, 12.0));
    assert_eq!(shown, (0..48).map(|k| k / 2).collect::<Vec<_>>());
}

#[test]
fn test_near_rate_content_is_sped_frame_for_frame() {
    let shown = shown_frames(Content::colour("pal", (0, 0, 0), 50, 25.0));
    assert_eq!(shown, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_seek_into_double_rate_content_shows_matching_frame() {
    let mut playlist = Playlist::new(24, false);
    playlist
        .add(Content::colour("fifty", (0, 0, 0), 96, 48.0))
        .unwrap();
    let mut player = Player::new(
        playlist.snapshot(),
        &IndexedFactory,
        settings(false),
        PlayerOptions::default(),
    )
    .unwrap();

    player.seek(DcpTime::from_frames(10, 24.0), true).unwrap();
    let quantum = player.pass().unwrap().unwrap();
    assert_eq!(quantum.video[0].image.data()[0], 20);
}

/// Produces `good` frames, then fails.
struct FailingFactory {
    good: i64,
}

struct FailingDecoder {
    next: i64,
    good: i64,
}

impl Decoder for FailingDecoder {
    fn seek(&mut self, time: ContentTime, _accurate: bool) -> ReelkitResult<()> {
        self.next = time.frames_floor(24.0);
        Ok(())
    }

    fn pass(&mut self) -> ReelkitResult<Option<Decoded>> {
        if self.next >= self.good {
            return Err(ReelkitError::config("corrupt frame"));
        }
        self.next += 1;
        Ok(Some(Decoded::Video {
            frame: self.next - 1,
            image: Arc::new(Image::solid(4, 2, (1, 1, 1))),
            eyes: Eyes::Both,
        }))
    }
}

impl DecoderFactory for FailingFactory {
    fn create(
        &self,
        _content: &Content,
        _settings: &ProjectSettings,
    ) -> ReelkitResult<Box<dyn Decoder>> {
        Ok(Box::new(FailingDecoder {
            next: 0,
            good: self.good,
        }))
    }
}

#[test]
fn test_butler_reads_ahead_and_seeks() {
    let mut playlist = Playlist::new(24, false);
    playlist
        .add(Content::colour("A", (1, 1, 1), 240, 24.0))
        .unwrap();
    let butler = Butler::new(player(&playlist, settings(false)), ButlerConfig::default()).unwrap();

    for frame in 0..5 {
        let video = butler.get_video(Behaviour::Blocking).unwrap().unwrap();
        assert_eq!(video.time, DcpTime::from_frames(frame, 24.0));
        assert!(butler.get_audio(Behaviour::Blocking).unwrap().is_some());
    }

    butler.seek(seconds(5.0), true).unwrap();
    let video = butler.get_video(Behaviour::Blocking).unwrap().unwrap();
    assert_eq!(video.time, seconds(5.0));

    butler.disable_audio();
    assert!(butler.get_audio(Behaviour::Blocking).unwrap().is_none());
    let mut last = video.time;
    while let Some(video) = butler.get_video(Behaviour::Blocking).unwrap() {
        assert!(video.time > last);
        last = video.time;
    }
    assert_eq!(last, DcpTime::from_frames(239, 24.0));
}

#[test]
fn test_butler_raises_error_once() {
    let mut playlist = Playlist::new(24, false);
    let id = playlist
        .add(Content::colour("bad", (1, 1, 1), 48, 24.0))
        .unwrap();
    let player = Player::new(
        playlist.snapshot(),
        &FailingFactory { good: 3 },
        settings(false),
        PlayerOptions::default(),
    )
    .unwrap();
    let config = ButlerConfig {
        audio: false,
        ..ButlerConfig::default()
    };
    let butler = Butler::new(player, config).unwrap();

    let mut delivered = 0;
    let err = loop {
        match butler.get_video(Behaviour::Blocking) {
            Ok(Some(_)) => delivered += 1,
            Ok(None) => panic!("stream ended without an error"),
            Err(err) => break err,
        }
    };
    assert!(delivered <= 3);
    assert!(err.to_string().contains(&id.to_string()));

    while butler.get_video(Behaviour::Blocking).unwrap().is_some() {}
    assert!(butler.get_video(Behaviour::NonBlocking).unwrap().is_none());
}
