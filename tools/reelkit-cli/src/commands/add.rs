//! Add generated content to a project.

use std::path::PathBuf;

use clap::Subcommand;
use reelkit_common::time::{ContentTime, DcpTime};
use reelkit_player::SyntheticExaminer;
use reelkit_timeline_model::{Content, Examiner, LoadedProject, VAlign, VideoFrameType};

#[derive(Subcommand)]
pub enum AddKind {
    /// Solid colour picture
    Colour {
        /// Colour as r,g,b
        #[arg(long, default_value = "0,0,0", value_parser = parse_rgb)]
        rgb: (u8, u8, u8),

        /// Length in source frames
        #[arg(long, default_value = "48")]
        frames: i64,

        /// Source frame rate
        #[arg(long, default_value = "24")]
        rate: f64,

        /// 2d | left | right | alternate
        #[arg(long, default_value = "2d")]
        eye: String,

        /// Durations (seconds) of the reels of the package this stands in for
        #[arg(long = "package-reel")]
        package_reels: Vec<f64>,
    },

    /// Sine tone
    Tone {
        /// Frequency in Hz
        #[arg(long, default_value = "1000")]
        frequency: f64,

        /// Length in seconds
        #[arg(long, default_value = "2")]
        seconds: f64,

        /// Source channels
        #[arg(long, default_value = "1")]
        channels: usize,

        /// Source sample rate
        #[arg(long, default_value = "48000")]
        sample_rate: u32,

        /// Gain in dB
        #[arg(long, default_value = "0")]
        gain_db: f64,

        /// Delay in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: i64,
    },

    /// Caption
    Caption {
        text: String,

        /// Length in seconds
        #[arg(long, default_value = "2")]
        seconds: f64,

        /// Vertical position from the top, 0..1
        #[arg(long, default_value = "0.85")]
        v_position: f64,
    },
}

fn parse_rgb(value: &str) -> Result<(u8, u8, u8), String> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<u8>().map_err(|e| format!("{p}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [r, g, b] => Ok((*r, *g, *b)),
        _ => Err(format!("expected r,g,b but got {value}")),
    }
}

fn frame_type(eye: &str) -> anyhow::Result<VideoFrameType> {
    Ok(match eye {
        "2d" => VideoFrameType::TwoD,
        "left" => VideoFrameType::ThreeDLeft,
        "right" => VideoFrameType::ThreeDRight,
        "alternate" => VideoFrameType::ThreeDAlternate,
        _ => {
            return Err(anyhow::anyhow!(
                "Unknown eye: {eye}. Use: 2d, left, right, alternate"
            ))
        }
    })
}

pub fn run(path: PathBuf, at: f64, kind: AddKind) -> anyhow::Result<()> {
    let mut project =
        LoadedProject::load(&path).map_err(|e| anyhow::anyhow!("Failed to load project: {e}"))?;
    let settings = project.project.settings.clone();

    let mut content = match kind {
        AddKind::Colour {
            rgb,
            frames,
            rate,
            eye,
            package_reels,
        } => Content::colour(format!("colour {},{},{}", rgb.0, rgb.1, rgb.2), rgb, frames, rate)
            .with_frame_type(frame_type(&eye)?)
            .packaged(package_reels.into_iter().map(DcpTime::from_seconds).collect()),
        AddKind::Tone {
            frequency,
            seconds,
            channels,
            sample_rate,
            gain_db,
            delay_ms,
        } => {
            let mut content = Content::tone(
                format!("tone {frequency} Hz"),
                frequency,
                ContentTime::from_seconds(seconds),
                channels,
                sample_rate,
                settings.audio_channels,
            );
            if let Some(audio) = content.audio.as_mut() {
                audio.gain_db = gain_db;
                audio.delay_ms = delay_ms;
            }
            content
        }
        AddKind::Caption {
            text,
            seconds,
            v_position,
        } => Content::caption(
            "caption",
            text,
            VAlign::Top,
            v_position,
            ContentTime::from_seconds(seconds),
        ),
    };
    content = content.at(DcpTime::from_seconds(at).round(settings.fps()));

    let examination = SyntheticExaminer.examine(&content)?;
    examination.apply_to(&mut content, settings.audio_channels);

    let name = content.name.clone();
    let id = project
        .project
        .playlist
        .add(content)
        .map_err(|e| anyhow::anyhow!("Failed to add content: {e}"))?;
    project
        .save()
        .map_err(|e| anyhow::anyhow!("Failed to save project: {e}"))?;

    println!("Added {name} as content {id} at {at:.3}s");
    Ok(())
}
