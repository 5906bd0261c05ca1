//! Audio graph client
//!
//! Hosts at most one module in the real-time path and exposes its channels as
//! ports of the external audio graph.
//!
//! # Hot-swap
//!
//! ```text
//!   activate(new)
//!     │ 1. snapshot connections of every port
//!     │ 2. suspend   ── backend hands back the Processor, no callbacks run
//!     │ 3. new.init(sample_rate)
//!     │ 4. grow/shrink in_N / out_N ports to the new channel counts
//!     │    swap the module, re-collect its controls
//!     │ 5. resume    ── Processor moves back into the callback
//!     │ 6. reconnect ports that exist in both topologies
//!     ▼
//!   old module returned to the caller
//! ```
//!
//! The real-time state ([`Processor`]) is owned by exactly one side at a
//! time: the backend while running, the client while suspended. That is
//! what keeps the audio thread away from a half-updated port set.

pub mod jack;
pub mod mock;

pub use self::jack::JackBackend;
pub use self::mock::MockBackend;

use crate::controls::{self, Controls};
use crate::dsp::{BlockBuffers, Dsp};
use crate::error::BackendResult;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Stable port name for a 1-based index: `in_1`, `out_2`, ...
pub fn port_name(direction: Direction, index: usize) -> String {
    match direction {
        Direction::Input => format!("in_{}", index),
        Direction::Output => format!("out_{}", index),
    }
}

/// The external audio graph
///
/// Ports are addressed by their short name (see [`port_name`]).
pub trait AudioBackend {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn sample_rate(&self) -> u32;
    fn client_name(&self) -> &str;

    /// Full names of the peers connected to one of our ports
    fn connections(&self, port: &str) -> Vec<String>;

    /// Connect one of our ports to `peer`, in the port's signal direction
    fn connect(&mut self, port: &str, direction: Direction, peer: &str) -> BackendResult<()>;

    fn register_input(&mut self, name: &str) -> BackendResult<Self::Input>;
    fn register_output(&mut self, name: &str) -> BackendResult<Self::Output>;
    fn unregister_input(&mut self, port: Self::Input) -> BackendResult<()>;
    fn unregister_output(&mut self, port: Self::Output) -> BackendResult<()>;

    /// Stop real-time callbacks and take the processing state back
    ///
    /// # Safety
    ///
    /// An [`AudioClient`] keeps views into the module held by the processor.
    /// The caller must hand the same processor back through
    /// [`resume`](Self::resume), module included, before anything reads or
    /// writes those views.
    unsafe fn suspend(&mut self) -> BackendResult<Processor<Self::Input, Self::Output>>;

    /// Hand the processing state to the real-time callback and start it
    ///
    /// # Safety
    ///
    /// `processor` is either the one returned by the last
    /// [`suspend`](Self::suspend) or a fresh one while no views into an
    /// earlier module exist.
    unsafe fn resume(&mut self, processor: Processor<Self::Input, Self::Output>) -> BackendResult<()>;
}

/// State touched by the real-time callback
pub struct Processor<I, O> {
    module: Option<Box<dyn Dsp>>,
    inputs: Vec<I>,
    outputs: Vec<O>,
    input_bufs: Vec<*mut f32>,
    output_bufs: Vec<*mut f32>,
}

// The pointer arrays are scratch space, rewritten at the start of every
// cycle and never dereferenced outside of it.
unsafe impl<I: Send, O: Send> Send for Processor<I, O> {}

impl<I, O> Default for Processor<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Processor<I, O> {
    pub fn new() -> Self {
        Self {
            module: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_bufs: Vec::new(),
            output_bufs: Vec::new(),
        }
    }

    pub fn module(&self) -> Option<&dyn Dsp> {
        self.module.as_deref()
    }

    pub fn inputs(&self) -> &[I] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[O] {
        &self.outputs
    }

    /// Run one block
    ///
    /// `input_buf`/`output_buf` give the buffer of each port for this cycle;
    /// both must be valid for `frames` samples. Without a module every
    /// output is zero-filled. Never allocates.
    pub fn process_with(
        &mut self,
        frames: usize,
        input_buf: impl FnMut(&I) -> *mut f32,
        output_buf: impl FnMut(&mut O) -> *mut f32,
    ) {
        self.input_bufs.clear();
        self.input_bufs.extend(self.inputs.iter().map(input_buf));
        self.output_bufs.clear();
        self.output_bufs.extend(self.outputs.iter_mut().map(output_buf));

        // SAFETY: the backend vouches for the buffers of this cycle.
        let mut buffers =
            unsafe { BlockBuffers::from_raw(frames, &self.input_bufs, &self.output_bufs) };
        match self.module.as_mut() {
            Some(module) => module.compute(&mut buffers),
            None => buffers.silence(),
        }
    }

    /// Size the scratch arrays so `process_with` stays allocation-free
    fn reserve_scratch(&mut self) {
        self.input_bufs.clear();
        self.input_bufs.reserve(self.inputs.len());
        self.output_bufs.clear();
        self.output_bufs.reserve(self.outputs.len());
    }
}

/// Hosts the active module on an [`AudioBackend`]
pub struct AudioClient<B: AudioBackend> {
    // Views into the module inside the backend's processor; declared first
    // so they go away before it.
    controls: Controls<'static>,
    backend: B,
    num_inputs: usize,
    num_outputs: usize,
}

impl<B: AudioBackend> AudioClient<B> {
    /// Start processing with no module: zero ports, silence
    pub fn new(mut backend: B) -> BackendResult<Self> {
        // SAFETY: no module yet, so no views into one.
        unsafe { backend.resume(Processor::new())? };
        info!(
            "Audio client {} running at {} Hz",
            backend.client_name(),
            backend.sample_rate()
        );
        Ok(Self {
            controls: Controls::default(),
            backend,
            num_inputs: 0,
            num_outputs: 0,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the backend
    ///
    /// Taking the module out from under the client is not possible without
    /// `unsafe`:
    ///
    /// ```compile_fail,E0133
    /// use livedsp::client::{AudioBackend, AudioClient, MockBackend};
    ///
    /// let mut client = AudioClient::new(MockBackend::default()).unwrap();
    /// drop(client.backend_mut().suspend());
    /// ```
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Make `module` the active module and return the previous one
    ///
    /// `None` means silence with zero ports. Connections of ports that exist
    /// before and after the swap are kept; an error means the port
    /// inventory of the graph can no longer be trusted.
    pub fn activate(&mut self, module: Option<Box<dyn Dsp>>) -> BackendResult<Option<Box<dyn Dsp>>> {
        let (old_inputs, old_outputs) = (self.num_inputs, self.num_outputs);
        let input_peers = self.snapshot(Direction::Input, old_inputs);
        let output_peers = self.snapshot(Direction::Output, old_outputs);

        // Must not outlive a module that could be dropped on an error path.
        self.controls = Controls::default();

        // SAFETY: the views were cleared above and the processor goes back
        // through `resume` below, or is dropped with the client on error.
        let mut processor = unsafe { self.backend.suspend()? };

        let mut module = module;
        if let Some(module) = module.as_mut() {
            module.init(self.backend.sample_rate());
        }
        let new_inputs = module.as_ref().map_or(0, |m| m.num_inputs());
        let new_outputs = module.as_ref().map_or(0, |m| m.num_outputs());

        self.reconcile(&mut processor, new_inputs, new_outputs)?;

        let old = std::mem::replace(&mut processor.module, module);
        if let Some(active) = processor.module.as_mut() {
            // SAFETY: the module is only dropped by a later `activate`, which
            // clears these views first, or together with the backend, which
            // is declared after `controls`.
            self.controls = unsafe { controls::collect(active.as_mut()).detach() };
        }
        self.num_inputs = new_inputs;
        self.num_outputs = new_outputs;

        // SAFETY: same processor as `suspend` returned.
        unsafe { self.backend.resume(processor)? };

        self.restore(Direction::Input, &input_peers[..old_inputs.min(new_inputs)]);
        self.restore(Direction::Output, &output_peers[..old_outputs.min(new_outputs)]);

        info!(
            "Activated module: {} inputs, {} outputs, {} controls",
            new_inputs,
            new_outputs,
            self.controls.inputs.len()
        );
        Ok(old)
    }

    /// Write `values` positionally into the input controls, clamped to their
    /// ranges; returns how many were written
    pub fn set_controls(&self, values: &[f32]) -> usize {
        self.controls.apply(values)
    }

    /// Input and output controls of the active module
    pub fn parameters(&self) -> &Controls<'_> {
        &self.controls
    }

    /// Current input control values, in declaration order
    pub fn control_values(&self) -> Vec<f32> {
        self.controls.input_values()
    }

    pub fn input_count(&self) -> usize {
        self.num_inputs
    }

    pub fn output_count(&self) -> usize {
        self.num_outputs
    }

    fn snapshot(&self, direction: Direction, count: usize) -> Vec<Vec<String>> {
        (1..=count)
            .map(|index| self.backend.connections(&port_name(direction, index)))
            .collect()
    }

    fn reconcile(
        &mut self,
        processor: &mut Processor<B::Input, B::Output>,
        inputs: usize,
        outputs: usize,
    ) -> BackendResult<()> {
        while processor.inputs.len() > inputs {
            if let Some(port) = processor.inputs.pop() {
                self.backend.unregister_input(port)?;
            }
        }
        while processor.inputs.len() < inputs {
            let name = port_name(Direction::Input, processor.inputs.len() + 1);
            debug!("Registering port {}", name);
            processor.inputs.push(self.backend.register_input(&name)?);
        }

        while processor.outputs.len() > outputs {
            if let Some(port) = processor.outputs.pop() {
                self.backend.unregister_output(port)?;
            }
        }
        while processor.outputs.len() < outputs {
            let name = port_name(Direction::Output, processor.outputs.len() + 1);
            debug!("Registering port {}", name);
            processor.outputs.push(self.backend.register_output(&name)?);
        }

        processor.reserve_scratch();
        Ok(())
    }

    fn restore(&mut self, direction: Direction, peers: &[Vec<String>]) {
        for (index, peers) in peers.iter().enumerate() {
            let port = port_name(direction, index + 1);
            for peer in peers {
                if let Err(e) = self.backend.connect(&port, direction, peer) {
                    warn!("Could not restore connection: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ControlVisitor;
    use crate::dsp::MockDsp;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Silent module recording the rate it was initialized with
    struct RateRecorder(Arc<AtomicU32>);

    impl Dsp for RateRecorder {
        fn num_inputs(&self) -> usize {
            0
        }

        fn num_outputs(&self) -> usize {
            1
        }

        fn init(&mut self, sample_rate: u32) {
            self.0.store(sample_rate, Ordering::Relaxed);
        }

        fn compute(&mut self, buffers: &mut BlockBuffers<'_>) {
            buffers.silence();
        }

        fn build_controls<'a>(&'a mut self, _: &mut dyn ControlVisitor<'a>) {}
    }

    #[test]
    fn test_port_names() {
        assert_eq!(port_name(Direction::Input, 1), "in_1");
        assert_eq!(port_name(Direction::Output, 12), "out_12");
    }

    #[test]
    fn test_processor_without_module_is_silent() {
        let mut processor: Processor<Vec<f32>, Vec<f32>> = Processor::new();
        processor.outputs = vec![vec![1.0; 8], vec![2.0; 8]];
        processor.reserve_scratch();

        processor.process_with(8, |p| p.as_ptr() as *mut f32, |p| p.as_mut_ptr());
        assert!(processor.outputs.iter().all(|b| b.iter().all(|&s| s == 0.0)));
    }

    #[test]
    fn test_processor_runs_module() {
        let mut processor: Processor<Vec<f32>, Vec<f32>> = Processor::new();
        processor.module = Some(Box::new(MockDsp::passthrough()));
        processor.inputs = vec![vec![0.5; 4]];
        processor.outputs = vec![vec![0.0; 4]];
        processor.reserve_scratch();

        processor.process_with(4, |p| p.as_ptr() as *mut f32, |p| p.as_mut_ptr());
        // default gain is 0.5
        assert_eq!(processor.outputs[0], vec![0.25; 4]);
    }

    #[test]
    fn test_controls_survive_suspend_and_resume() {
        let mut client = AudioClient::new(MockBackend::default()).unwrap();
        client.activate(Some(Box::new(MockDsp::passthrough()))).unwrap();

        let backend = client.backend_mut();
        let processor = unsafe { backend.suspend().unwrap() };
        assert!(processor.module().is_some());
        unsafe { backend.resume(processor).unwrap() };

        assert_eq!(client.set_controls(&[0.75]), 1);
        assert_eq!(client.control_values(), vec![0.75]);
        let input = vec![1.0f32; 4];
        let outputs = client.backend_mut().run_cycle(4, &[&input]).unwrap();
        assert_eq!(outputs[0], vec![0.75; 4]);
    }

    #[test]
    fn test_activate_uses_current_sample_rate() {
        let mut client = AudioClient::new(MockBackend::default()).unwrap();
        let rate = Arc::new(AtomicU32::new(0));

        client.activate(Some(Box::new(RateRecorder(Arc::clone(&rate))))).unwrap();
        assert_eq!(rate.load(Ordering::Relaxed), 48000);

        client.backend_mut().set_sample_rate(96000);
        client.activate(Some(Box::new(RateRecorder(Arc::clone(&rate))))).unwrap();
        assert_eq!(rate.load(Ordering::Relaxed), 96000);
    }
}
