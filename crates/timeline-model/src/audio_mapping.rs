//! Input × output channel gain matrices.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Gains below this (-96 dB) count as unmapped.
const MINUS_96_DB: f32 = 0.000_015_849;

/// Output channel index of centre.
pub const CENTRE_CHANNEL: usize = 2;

/// Filename tokens that identify a mono file's speaker, checked in order.
const CHANNEL_TOKENS: &[(&str, usize)] = &[
    ("l", 0),
    ("r", 1),
    ("c", 2),
    ("lfe", 3),
    ("lss", 4),
    ("lsr", 6),
    ("ls", 4),
    ("rss", 5),
    ("rsr", 7),
    ("rs", 5),
];

/// Dense gain matrix from content channels to output channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMapping {
    input_channels: usize,
    output_channels: usize,
    /// `gain[input][output]`, linear.
    gain: Vec<Vec<f32>>,
}

impl AudioMapping {
    /// An all-zero mapping.
    pub fn new(input_channels: usize, output_channels: usize) -> Self {
        let mut mapping = Self {
            input_channels: 0,
            output_channels: 0,
            gain: vec![],
        };
        mapping.setup(input_channels, output_channels);
        mapping
    }

    /// Resize to the given channel counts, clearing every gain.
    pub fn setup(&mut self, input_channels: usize, output_channels: usize) {
        self.input_channels = input_channels;
        self.output_channels = output_channels;
        self.gain = vec![vec![0.0; output_channels]; input_channels];
    }

    pub fn make_zero(&mut self) {
        for row in &mut self.gain {
            row.iter_mut().for_each(|g| *g = 0.0);
        }
    }

    /// Reset to the default routing.
    ///
    /// Multichannel input maps 1:1. A mono input is routed by a channel token
    /// in its filename (`music_Ls.wav`, `dialog-C-v2.wav`); with no usable
    /// token it goes to centre.
    pub fn make_default(&mut self, filename: Option<&Path>) {
        self.make_zero();

        if self.input_channels == 1 {
            let mut guessed = false;
            if let Some(name) = filename {
                for channel in guess_channels(name) {
                    if channel < self.output_channels {
                        self.set(0, channel, 1.0);
                        guessed = true;
                    }
                }
            }
            if !guessed && CENTRE_CHANNEL < self.output_channels {
                self.set(0, CENTRE_CHANNEL, 1.0);
            }
        } else {
            for channel in 0..self.input_channels.min(self.output_channels) {
                self.set(channel, channel, 1.0);
            }
        }
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Gain from `input` to `output`; zero outside the matrix.
    pub fn get(&self, input: usize, output: usize) -> f32 {
        self.gain
            .get(input)
            .and_then(|row| row.get(output))
            .copied()
            .unwrap_or(0.0)
    }

    /// Set a gain. Out-of-range channels are ignored.
    pub fn set(&mut self, input: usize, output: usize, gain: f32) {
        if let Some(slot) = self.gain.get_mut(input).and_then(|row| row.get_mut(output)) {
            *slot = gain;
        }
    }

    /// Output channels that receive any signal, ascending.
    pub fn mapped_output_channels(&self) -> Vec<usize> {
        (0..self.output_channels)
            .filter(|&output| {
                self.gain
                    .iter()
                    .any(|row| row[output].abs() > MINUS_96_DB)
            })
            .collect()
    }

    /// Remove every route into `output`.
    pub fn unmap_output(&mut self, output: usize) {
        for row in &mut self.gain {
            if let Some(slot) = row.get_mut(output) {
                *slot = 0.0;
            }
        }
    }

    /// Hex digest identifying this configuration.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.input_channels as u64).to_le_bytes());
        hasher.update((self.output_channels as u64).to_le_bytes());
        for row in &self.gain {
            for gain in row {
                hasher.update(gain.to_le_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Speaker channels named by delimited tokens in a filename.
fn guess_channels(path: &Path) -> Vec<usize> {
    let name = path.to_string_lossy().to_lowercase();
    let pieces: Vec<&str> = name.split(['.', '_', '-']).collect();
    if pieces.len() < 3 {
        return vec![];
    }

    // A token only counts with a delimiter on both sides.
    let inner = &pieces[1..pieces.len() - 1];
    CHANNEL_TOKENS
        .iter()
        .filter(|(token, _)| inner.contains(token))
        .map(|&(_, channel)| channel)
        .collect()
}
