//! Timebase shared by content and output timelines.
//!
//! Every timestamp in reelkit is an integer count of ticks at [`HZ`] ticks per
//! second. 96 kHz divides evenly by every common video frame rate and by
//! 48 kHz audio, so frame and sample boundaries are exact on integer rates.
//!
//! Two distinct types keep the timelines apart:
//! - [`DcpTime`]: position on the shared output timeline
//! - [`ContentTime`]: position inside a piece of content, in its own native time

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Ticks per second.
pub const HZ: i64 = 96_000;

macro_rules! timebase {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub const ZERO: Self = Self(0);

            pub const fn new(ticks: i64) -> Self {
                Self(ticks)
            }

            /// Raw tick count.
            pub const fn get(self) -> i64 {
                self.0
            }

            pub fn from_seconds(seconds: f64) -> Self {
                Self((seconds * HZ as f64).round() as i64)
            }

            pub fn seconds(self) -> f64 {
                self.0 as f64 / HZ as f64
            }

            /// Time of the start of frame `frames` at `rate` frames per second.
            pub fn from_frames(frames: i64, rate: f64) -> Self {
                Self((frames as f64 * HZ as f64 / rate).round() as i64)
            }

            pub fn frames_round(self, rate: f64) -> i64 {
                (self.0 as f64 * rate / HZ as f64).round() as i64
            }

            pub fn frames_floor(self, rate: f64) -> i64 {
                (self.0 as f64 * rate / HZ as f64).floor() as i64
            }

            pub fn frames_ceil(self, rate: f64) -> i64 {
                (self.0 as f64 * rate / HZ as f64).ceil() as i64
            }

            /// Snap to the nearest frame boundary.
            pub fn round(self, rate: f64) -> Self {
                Self::from_frames(self.frames_round(rate), rate)
            }

            /// Snap up to the next frame boundary (identity if already on one).
            pub fn ceil(self, rate: f64) -> Self {
                Self::from_frames(self.frames_ceil(rate), rate)
            }

            pub fn floor(self, rate: f64) -> Self {
                Self::from_frames(self.frames_floor(rate), rate)
            }

            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }
        }

        impl Add for $name {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: Self) {
                self.0 += rhs.0;
            }
        }

        impl SubAssign for $name {
            fn sub_assign(&mut self, rhs: Self) {
                self.0 -= rhs.0;
            }
        }

        impl Neg for $name {
            type Output = Self;
            fn neg(self) -> Self {
                Self(-self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}[{:.3}s]", self.0, self.seconds())
            }
        }
    };
}

timebase!(DcpTime);
timebase!(ContentTime);

impl DcpTime {
    /// Map a content-relative time onto the output timeline (no offset applied).
    pub fn from_content(time: ContentTime, frc: &FrameRateChange) -> Self {
        Self((time.0 as f64 / frc.speed_up).round() as i64)
    }
}

impl ContentTime {
    /// Map an output-relative duration back into native content time.
    pub fn from_dcp(time: DcpTime, frc: &FrameRateChange) -> Self {
        Self((time.0 as f64 * frc.speed_up).round() as i64)
    }
}

/// Half-open interval `[from, to)` on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub from: DcpTime,
    pub to: DcpTime,
}

impl Period {
    pub fn new(from: DcpTime, to: DcpTime) -> Self {
        debug_assert!(from <= to, "period must not run backwards");
        Self { from, to }
    }

    pub fn duration(&self) -> DcpTime {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    pub fn contains(&self, time: DcpTime) -> bool {
        self.from <= time && time < self.to
    }

    /// Intersection, if non-empty.
    pub fn overlap(&self, other: &Period) -> Option<Period> {
        let from = self.from.max(other.from);
        let to = self.to.min(other.to);
        (from < to).then(|| Period::new(from, to))
    }

    pub fn overlaps(&self, other: &Period) -> bool {
        self.overlap(other).is_some()
    }

    /// Merge overlapping or touching periods into a sorted disjoint set.
    pub fn coalesce(periods: &[Period]) -> Vec<Period> {
        let mut sorted: Vec<Period> = periods.iter().copied().filter(|p| !p.is_empty()).collect();
        sorted.sort();

        let mut merged: Vec<Period> = Vec::with_capacity(sorted.len());
        for period in sorted {
            match merged.last_mut() {
                Some(last) if period.from <= last.to => {
                    last.to = last.to.max(period.to);
                }
                _ => merged.push(period),
            }
        }
        merged
    }

    /// The parts of `self` not covered by any of `covered`.
    pub fn subtract(&self, covered: &[Period]) -> Vec<Period> {
        let mut gaps = Vec::new();
        let mut cursor = self.from;
        for period in Self::coalesce(covered) {
            let Some(clipped) = period.overlap(self) else {
                continue;
            };
            if clipped.from > cursor {
                gaps.push(Period::new(cursor, clipped.from));
            }
            cursor = cursor.max(clipped.to);
        }
        if cursor < self.to {
            gaps.push(Period::new(cursor, self.to));
        }
        gaps
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from.get(), self.to.get())
    }
}

/// How native content frames map onto output frames.
///
/// Content within a factor of two of the output rate plays frame-for-frame
/// and changes speed slightly; content at roughly double the output rate
/// skips every other frame; content at roughly half (or a third...) repeats
/// each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateChange {
    pub source: f64,
    pub output: f64,
    pub skip: bool,
    pub repeat: u32,
    /// Output duration = native duration / `speed_up`.
    pub speed_up: f64,
}

impl FrameRateChange {
    pub fn new(source: f64, output: f64) -> Self {
        let mut skip = false;
        let mut repeat = 1u32;

        if (source / 2.0 - output).abs() < (source - output).abs() {
            skip = true;
        } else if (source * 2.0 - output).abs() < (source - output).abs() {
            repeat = (output / source).round().max(1.0) as u32;
        }

        let factor = if skip { 0.5 } else { repeat as f64 };
        Self {
            source,
            output,
            skip,
            repeat,
            speed_up: output / (source * factor),
        }
    }

    /// Identity change for content without a frame rate of its own.
    pub fn identity(rate: f64) -> Self {
        Self::new(rate, rate)
    }

    /// Output frames produced per native frame.
    pub fn factor(&self) -> f64 {
        if self.skip {
            0.5
        } else {
            self.repeat as f64
        }
    }

    pub fn changes_speed(&self) -> bool {
        (self.speed_up - 1.0).abs() > 1e-6
    }
}
