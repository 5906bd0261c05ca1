//! Mock module for testing
//!
//! Behaves like the starter template: every output is the matching input
//! (wrapping around the input count) scaled by a `gain` slider. With no
//! inputs the outputs carry the gain value itself, which makes it easy to
//! see whether the module ran at all. A `level` bargraph reports the last
//! block's peak.

use super::{BlockBuffers, Dsp};
use crate::controls::{BoxKind, ControlRange, ControlVisitor, Orientation, Zone};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

struct Slider {
    label: String,
    range: ControlRange,
    cell: AtomicU32,
}

pub struct MockDsp {
    inputs: usize,
    outputs: usize,
    sliders: Vec<Slider>,
    level: AtomicU32,
    sample_rate: Option<u32>,
    blocks: AtomicU64,
}

impl MockDsp {
    /// Module with a single `gain` slider, range [0, 1], init 0.5
    pub fn new(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            sliders: Vec::new(),
            level: AtomicU32::new(0),
            sample_rate: None,
            blocks: AtomicU64::new(0),
        }
        .with_slider("gain", 0.5, 0.0, 1.0)
    }

    pub fn passthrough() -> Self {
        Self::new(1, 1)
    }

    /// Append another horizontal slider
    pub fn with_slider(mut self, label: &str, init: f32, min: f32, max: f32) -> Self {
        self.sliders.push(Slider {
            label: label.to_string(),
            range: ControlRange {
                init,
                min,
                max,
                step: 0.01,
            },
            cell: AtomicU32::new(init.to_bits()),
        });
        self
    }

    /// Sample rate passed to the last `init`, if any
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn gain(&self) -> f32 {
        self.sliders
            .first()
            .map(|s| f32::from_bits(s.cell.load(Ordering::Relaxed)))
            .unwrap_or(1.0)
    }

    /// Number of blocks computed so far
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }
}

impl Dsp for MockDsp {
    fn num_inputs(&self) -> usize {
        self.inputs
    }

    fn num_outputs(&self) -> usize {
        self.outputs
    }

    fn init(&mut self, sample_rate: u32) {
        self.sample_rate = Some(sample_rate);
        for slider in &self.sliders {
            slider.cell.store(slider.range.init.to_bits(), Ordering::Relaxed);
        }
        self.level.store(0, Ordering::Relaxed);
    }

    fn compute(&mut self, buffers: &mut BlockBuffers<'_>) {
        let gain = self.gain();
        let mut peak = 0.0f32;

        for channel in 0..buffers.num_outputs() {
            if buffers.num_inputs() == 0 {
                buffers.output(channel).fill(gain);
            } else {
                let input = buffers.input(channel % buffers.num_inputs());
                for (out, x) in buffers.output(channel).iter_mut().zip(input) {
                    *out = x * gain;
                }
            }
            for x in buffers.output(channel).iter() {
                peak = peak.max(x.abs());
            }
        }

        self.level.store(peak.to_bits(), Ordering::Relaxed);
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    fn build_controls<'a>(&'a mut self, visitor: &mut dyn ControlVisitor<'a>) {
        visitor.open_box(BoxKind::Vertical, "mock");
        for slider in &self.sliders {
            visitor.add_slider(
                Orientation::Horizontal,
                &slider.label,
                Zone::from_atomic(&slider.cell),
                slider.range,
            );
        }
        visitor.add_bargraph(
            Orientation::Vertical,
            "level",
            Zone::from_atomic(&self.level),
            0.0,
            1.0,
        );
        visitor.close_box();
    }
}
