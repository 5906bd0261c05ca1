//! Loadable DSP modules
//!
//! A module is anything implementing [`Dsp`]: the natively compiled unit
//! produced by the build pipeline ([`NativeModule`]), or the in-process
//! [`MockDsp`] used by tests. Modules move around as `Box<dyn Dsp>` and have
//! exactly one owner at a time.

pub mod abi;
pub mod loader;
pub mod mock;
pub mod native;

pub use loader::load;
pub use mock::MockDsp;
pub use native::NativeModule;

use crate::controls::ControlVisitor;
use std::slice;

/// One compiled, loadable DSP unit
pub trait Dsp: Send {
    fn num_inputs(&self) -> usize;
    fn num_outputs(&self) -> usize;

    /// Prepare for running at `sample_rate`; resets internal state
    fn init(&mut self, sample_rate: u32);

    /// Process one block. Called on the audio thread.
    fn compute(&mut self, buffers: &mut BlockBuffers<'_>);

    /// Declare the control surface to `visitor`
    fn build_controls<'a>(&'a mut self, visitor: &mut dyn ControlVisitor<'a>);
}

/// Channel buffers of one processing block
///
/// Wraps the per-port pointer arrays gathered by the audio client so that
/// Rust modules see slices while native modules get the raw arrays.
pub struct BlockBuffers<'a> {
    frames: usize,
    inputs: &'a [*mut f32],
    outputs: &'a [*mut f32],
}

impl<'a> BlockBuffers<'a> {
    /// # Safety
    ///
    /// Every pointer must be valid for `frames` samples during `'a`. Output
    /// buffers must not overlap each other or any input buffer.
    pub unsafe fn from_raw(frames: usize, inputs: &'a [*mut f32], outputs: &'a [*mut f32]) -> Self {
        Self {
            frames,
            inputs,
            outputs,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, channel: usize) -> &'a [f32] {
        // SAFETY: see `from_raw`.
        unsafe { slice::from_raw_parts(self.inputs[channel], self.frames) }
    }

    pub fn output(&mut self, channel: usize) -> &mut [f32] {
        // SAFETY: see `from_raw`; `&mut self` keeps output views unique.
        unsafe { slice::from_raw_parts_mut(self.outputs[channel], self.frames) }
    }

    /// Zero every output buffer
    pub fn silence(&mut self) {
        for channel in 0..self.outputs.len() {
            self.output(channel).fill(0.0);
        }
    }

    pub(crate) fn raw_inputs(&self) -> *mut *mut f32 {
        self.inputs.as_ptr() as *mut *mut f32
    }

    pub(crate) fn raw_outputs(&mut self) -> *mut *mut f32 {
        self.outputs.as_ptr() as *mut *mut f32
    }
}
