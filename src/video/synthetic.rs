//! A stand-in camera that needs no hardware: a drifting colour gradient
//! with some noise on top, delivered at a steady frame rate. It lets the
//! whole pipeline run on a laptop, and keeps tests deterministic in count
//! if not in content.

use super::frame::Frame;
use super::source::{FrameSource, SyntheticSpec};
use super::VideoError;
use image::Rgb;
use rand::prelude::*;
use std::time::{Duration, Instant};

/// Largest per-channel noise added to each pixel.
const NOISE: u8 = 12;

/// The synthetic camera. Frames are generated on the reading thread, which
/// is paced to the configured rate.
pub struct SyntheticCamera {
    spec: SyntheticSpec,
    interval: Duration,
    next_due: Option<Instant>,
    produced: u64,
    rng: StdRng,
}

impl SyntheticCamera {
    /// A camera producing frames of `spec`'s size at `spec`'s rate.
    pub fn new(spec: SyntheticSpec) -> Self {
        Self {
            spec,
            interval: Duration::from_secs_f64(1.0 / spec.fps),
            next_due: None,
            produced: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Frames delivered so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn wait_for_slot(&mut self) {
        let now = Instant::now();
        let due = *self.next_due.get_or_insert(now);
        if due > now {
            spin_sleep::sleep(due - now);
        }
        // Skip slots we are already late for instead of bursting to catch up.
        self.next_due = Some((due + self.interval).max(Instant::now()));
    }
}

impl FrameSource for SyntheticCamera {
    type Frame = Frame;

    fn fps(&self) -> Option<f64> {
        Some(self.spec.fps)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, VideoError> {
        if self
            .spec
            .frame_limit
            .is_some_and(|limit| self.produced >= limit)
        {
            return Ok(None);
        }

        self.wait_for_slot();
        let frame = gradient_frame(
            self.spec.width,
            self.spec.height,
            self.produced,
            &mut self.rng,
        );
        self.produced += 1;
        Ok(Some(frame))
    }
}

/// A diagonal gradient shifted by `tick`, with uniform noise.
fn gradient_frame(width: u32, height: u32, tick: u64, rng: &mut impl Rng) -> Frame {
    let shift = (tick % 256) as u32;
    Frame::from_fn(width, height, |x, y| {
        let base = [
            ((x + shift) % 256) as u8,
            ((y + shift) % 256) as u8,
            (((x + y) / 2 + shift) % 256) as u8,
        ];
        Rgb(base.map(|channel| channel.saturating_add(rng.gen_range(0..=NOISE))))
    })
}
