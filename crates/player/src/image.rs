//! Decoded pictures and sound.

use serde::{Deserialize, Serialize};

/// Which stereoscopic view a picture belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eyes {
    Both,
    Left,
    Right,
}

impl Eyes {
    pub fn as_str(self) -> &'static str {
        match self {
            Eyes::Both => "both",
            Eyes::Left => "left",
            Eyes::Right => "right",
        }
    }
}

/// Packed RGB24 picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Image {
    /// Wrap raw RGB24 bytes; `None` if the length does not match the size.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * 3).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn solid(width: u32, height: u32, rgb: (u8, u8, u8)) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&[rgb.0, rgb.1, rgb.2]);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn black(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 3],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Nearest-neighbour resize; returns a copy when the size already matches.
    pub fn scaled(&self, width: u32, height: u32) -> Image {
        if width == self.width && height == self.height {
            return self.clone();
        }
        if self.width == 0 || self.height == 0 {
            return Image::black(width, height);
        }

        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height as usize {
            let sy = y * self.height as usize / height.max(1) as usize;
            for x in 0..width as usize {
                let sx = x * self.width as usize / width.max(1) as usize;
                let at = (sy * self.width as usize + sx) * 3;
                data.extend_from_slice(&self.data[at..at + 3]);
            }
        }
        Image {
            width,
            height,
            data,
        }
    }
}

/// Planar floating-point audio, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffers {
    channels: Vec<Vec<f32>>,
}

impl AudioBuffers {
    pub fn silent(channels: usize, frames: usize) -> Self {
        Self {
            channels: vec![vec![0.0; frames]; channels],
        }
    }

    /// Build from per-channel sample vectors of equal length.
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        let channels = channels
            .into_iter()
            .map(|mut c| {
                c.truncate(frames);
                c
            })
            .collect();
        Self { channels }
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn is_silent(&self) -> bool {
        self.channels.iter().flatten().all(|s| *s == 0.0)
    }

    /// Append `other`, which must have the same channel count.
    pub fn append(&mut self, other: &AudioBuffers) {
        if self.channels.is_empty() {
            self.channels = vec![vec![]; other.channels()];
        }
        for (mine, theirs) in self.channels.iter_mut().zip(&other.channels) {
            mine.extend_from_slice(theirs);
        }
    }

    /// Append `frames` frames of silence.
    pub fn pad(&mut self, frames: usize) {
        for channel in &mut self.channels {
            channel.resize(channel.len() + frames, 0.0);
        }
    }

    /// Drop the first `frames` frames.
    pub fn trim_front(&mut self, frames: usize) {
        for channel in &mut self.channels {
            let n = frames.min(channel.len());
            channel.drain(..n);
        }
    }

    /// Mix `frames` frames of `source` starting at `source_offset` into this
    /// buffer at `offset`, routing input channel `i` to output `o` with
    /// `gain(i, o)`.
    pub fn mix_from(
        &mut self,
        source: &AudioBuffers,
        source_offset: usize,
        offset: usize,
        frames: usize,
        gain: impl Fn(usize, usize) -> f32,
    ) {
        let frames = frames
            .min(source.frames().saturating_sub(source_offset))
            .min(self.frames().saturating_sub(offset));
        for (input, samples) in source.channels.iter().enumerate() {
            for (output, target) in self.channels.iter_mut().enumerate() {
                let g = gain(input, output);
                if g == 0.0 {
                    continue;
                }
                let src = &samples[source_offset..source_offset + frames];
                for (dst, s) in target[offset..offset + frames].iter_mut().zip(src) {
                    *dst += s * g;
                }
            }
        }
    }

    /// Interleaved samples, frame by frame.
    pub fn interleaved(&self) -> impl Iterator<Item = f32> + '_ {
        (0..self.frames()).flat_map(move |frame| self.channels.iter().map(move |c| c[frame]))
    }

    /// `frames` frames read at positions `start + k * step`, counted from this
    /// buffer's first frame and linearly interpolated. Positions outside the
    /// buffer read as silence.
    pub fn resampled(&self, start: f64, step: f64, frames: usize) -> AudioBuffers {
        let channels = self
            .channels
            .iter()
            .map(|samples| {
                let at = |index: f64| {
                    if index >= 0.0 && (index as usize) < samples.len() {
                        samples[index as usize]
                    } else {
                        0.0
                    }
                };
                (0..frames)
                    .map(|k| {
                        let position = start + k as f64 * step;
                        let index = position.floor();
                        let frac = (position - index) as f32;
                        if frac == 0.0 {
                            at(index)
                        } else {
                            at(index) * (1.0 - frac) + at(index + 1.0) * frac
                        }
                    })
                    .collect()
            })
            .collect();
        AudioBuffers { channels }
    }

    /// Frames `[from, to)` as a new buffer.
    pub fn slice(&self, from: usize, to: usize) -> AudioBuffers {
        let to = to.min(self.frames());
        let from = from.min(to);
        AudioBuffers {
            channels: self.channels.iter().map(|c| c[from..to].to_vec()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_nearest() {
        let mut data = vec![];
        data.extend_from_slice(&[255, 0, 0, 0, 255, 0]);
        let image = Image::from_rgb(2, 1, data).unwrap();
        let scaled = image.scaled(4, 2);
        assert_eq!(scaled.width(), 4);
        assert_eq!(&scaled.data()[0..3], &[255, 0, 0]);
        assert_eq!(&scaled.data()[9..12], &[0, 255, 0]);
    }

    #[test]
    fn test_from_rgb_checks_length() {
        assert!(Image::from_rgb(2, 2, vec![0; 11]).is_none());
    }

    #[test]
    fn test_mix_with_gain() {
        let source = AudioBuffers::from_channels(vec![vec![1.0; 4]]);
        let mut target = AudioBuffers::silent(3, 4);
        target.mix_from(&source, 1, 2, 10, |_, o| if o == 2 { 0.5 } else { 0.0 });
        assert_eq!(target.channel(2), &[0.0, 0.0, 0.5, 0.5]);
        assert!(target.channel(0).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_append_trim_slice() {
        let mut buffers = AudioBuffers::default();
        buffers.append(&AudioBuffers::from_channels(vec![vec![1.0, 2.0], vec![3.0, 4.0]]));
        buffers.pad(1);
        assert_eq!(buffers.frames(), 3);
        buffers.trim_front(1);
        assert_eq!(buffers.channel(0), &[2.0, 0.0]);
        let interleaved: Vec<f32> = buffers.slice(0, 1).interleaved().collect();
        assert_eq!(interleaved, vec![2.0, 4.0]);
    }

    #[test]
    fn test_resampled_interpolates_and_pads() {
        let buffers = AudioBuffers::from_channels(vec![vec![0.0, 1.0, 2.0, 3.0]]);
        let same = buffers.resampled(0.0, 1.0, 4);
        assert_eq!(same, buffers);

        let stretched = buffers.resampled(-1.0, 0.5, 6);
        assert_eq!(stretched.channel(0), &[0.0, 0.0, 0.0, 0.5, 1.0, 1.5]);

        let tail = buffers.resampled(2.5, 1.0, 3);
        assert_eq!(tail.channel(0), &[2.5, 1.5, 0.0]);
    }

    proptest::proptest! {
        #[test]
        fn prop_mix_stays_inside_target_window(
            source_len in 0usize..64,
            target_len in 0usize..64,
            source_offset in 0usize..80,
            offset in 0usize..80,
            frames in 0usize..80,
        ) {
            let source = AudioBuffers::from_channels(vec![vec![1.0; source_len]]);
            let mut target = AudioBuffers::silent(1, target_len);
            target.mix_from(&source, source_offset, offset, frames, |_, _| 1.0);

            let touched: Vec<usize> = target
                .channel(0)
                .iter()
                .enumerate()
                .filter(|(_, s)| **s != 0.0)
                .map(|(i, _)| i)
                .collect();
            proptest::prop_assert!(touched.len() <= frames);
            proptest::prop_assert!(touched.iter().all(|i| *i >= offset && *i < target_len));
        }
    }
}
