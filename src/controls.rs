//! Control surface introspection
//!
//! A module declares its controls by calling into a [`ControlVisitor`]. The
//! [`ParameterCollector`] is the visitor used here: it flattens the surface
//! into input parameters (buttons, check buttons, sliders, numeric entries)
//! and output parameters (bargraphs), in declaration order. That order is
//! the positional addressing scheme used when restoring control values.

use crate::dsp::Dsp;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Layout group kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoxKind {
    Tab,
    Horizontal,
    Vertical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Declared init/min/max/step of a continuous control
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlRange {
    pub init: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

/// A module-owned value cell
///
/// Reads and writes are single relaxed 32-bit accesses, so the control
/// thread can update a value while the audio thread is computing.
#[derive(Clone, Copy, Debug)]
pub struct Zone<'a> {
    ptr: NonNull<f32>,
    _module: PhantomData<&'a f32>,
}

// The cell is only ever accessed through atomic loads and stores.
unsafe impl Send for Zone<'_> {}
unsafe impl Sync for Zone<'_> {}

impl<'a> Zone<'a> {
    /// # Safety
    ///
    /// `ptr` must be aligned and stay valid for `'a`, and every other
    /// access to the cell during `'a` must be a plain 32-bit load or store.
    pub unsafe fn new(ptr: NonNull<f32>) -> Self {
        Self {
            ptr,
            _module: PhantomData,
        }
    }

    /// View an atomic cell as a zone
    pub fn from_atomic(cell: &'a AtomicU32) -> Self {
        Self {
            ptr: NonNull::from(cell).cast(),
            _module: PhantomData,
        }
    }

    fn cell(&self) -> &AtomicU32 {
        // SAFETY: guaranteed by the constructor contract.
        unsafe { AtomicU32::from_ptr(self.ptr.as_ptr().cast()) }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.cell().load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.cell().store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn as_ptr(&self) -> *mut f32 {
        self.ptr.as_ptr()
    }

    /// Drop the borrow on the owning module.
    ///
    /// # Safety
    ///
    /// The caller keeps the owning module alive for as long as the returned
    /// zone is used.
    pub(crate) unsafe fn detach(self) -> Zone<'static> {
        Zone {
            ptr: self.ptr,
            _module: PhantomData,
        }
    }
}

/// Receiver of a module's control declarations
///
/// Layout and metadata callbacks default to no-ops.
pub trait ControlVisitor<'a> {
    fn open_box(&mut self, _kind: BoxKind, _label: &str) {}
    fn close_box(&mut self) {}

    fn add_button(&mut self, label: &str, zone: Zone<'a>);
    fn add_check_button(&mut self, label: &str, zone: Zone<'a>);
    fn add_slider(
        &mut self,
        orientation: Orientation,
        label: &str,
        zone: Zone<'a>,
        range: ControlRange,
    );
    fn add_num_entry(&mut self, label: &str, zone: Zone<'a>, range: ControlRange);
    fn add_bargraph(
        &mut self,
        orientation: Orientation,
        label: &str,
        zone: Zone<'a>,
        min: f32,
        max: f32,
    );

    fn declare(&mut self, _zone: Option<Zone<'a>>, _key: &str, _value: &str) {}
}

/// Addressable view of one control of a live module
#[derive(Clone, Debug)]
pub struct Parameter<'a> {
    pub label: String,
    pub zone: Zone<'a>,
    pub init: f32,
    pub min: f32,
    pub max: f32,
}

impl Parameter<'_> {
    pub fn value(&self) -> f32 {
        self.zone.get()
    }

    /// Write `value` clamped into `[min, max]`, returning what was written
    pub fn set_clamped(&self, value: f32) -> f32 {
        let clamped = value.min(self.max).max(self.min);
        self.zone.set(clamped);
        clamped
    }
}

/// Flattened control surface of one module instance
#[derive(Clone, Debug, Default)]
pub struct Controls<'a> {
    pub inputs: Vec<Parameter<'a>>,
    pub outputs: Vec<Parameter<'a>>,
}

impl<'a> Controls<'a> {
    /// Current values of the input parameters, in order
    pub fn input_values(&self) -> Vec<f32> {
        self.inputs.iter().map(Parameter::value).collect()
    }

    /// Apply `values` positionally to the inputs, clamping each one
    ///
    /// Returns how many parameters were written; inputs past the end of
    /// `values` keep their current value.
    pub fn apply(&self, values: &[f32]) -> usize {
        let mut written = 0;
        for (param, &value) in self.inputs.iter().zip(values) {
            param.set_clamped(value);
            written += 1;
        }
        written
    }

    pub(crate) unsafe fn detach(self) -> Controls<'static> {
        let detach = |params: Vec<Parameter<'a>>| -> Vec<Parameter<'static>> {
            params
                .into_iter()
                .map(|p| Parameter {
                    label: p.label,
                    zone: p.zone.detach(),
                    init: p.init,
                    min: p.min,
                    max: p.max,
                })
                .collect()
        };
        Controls {
            inputs: detach(self.inputs),
            outputs: detach(self.outputs),
        }
    }
}

/// Visitor that builds a [`Controls`] list
#[derive(Default)]
pub struct ParameterCollector<'a> {
    controls: Controls<'a>,
}

impl<'a> ParameterCollector<'a> {
    pub fn new() -> Self {
        Self {
            controls: Controls::default(),
        }
    }

    pub fn finish(self) -> Controls<'a> {
        self.controls
    }

    fn input(&mut self, label: &str, zone: Zone<'a>, init: f32, min: f32, max: f32) {
        self.controls.inputs.push(Parameter {
            label: label.to_string(),
            zone,
            init,
            min,
            max,
        });
    }
}

impl<'a> ControlVisitor<'a> for ParameterCollector<'a> {
    fn add_button(&mut self, label: &str, zone: Zone<'a>) {
        self.input(label, zone, 0.0, 0.0, 1.0);
    }

    fn add_check_button(&mut self, label: &str, zone: Zone<'a>) {
        self.input(label, zone, 0.0, 0.0, 1.0);
    }

    fn add_slider(&mut self, _: Orientation, label: &str, zone: Zone<'a>, range: ControlRange) {
        self.input(label, zone, range.init, range.min, range.max);
    }

    fn add_num_entry(&mut self, label: &str, zone: Zone<'a>, range: ControlRange) {
        self.input(label, zone, range.init, range.min, range.max);
    }

    fn add_bargraph(&mut self, _: Orientation, label: &str, zone: Zone<'a>, min: f32, max: f32) {
        self.controls.outputs.push(Parameter {
            label: label.to_string(),
            zone,
            init: 0.0,
            min,
            max,
        });
    }
}

/// Collect the input and output parameters of `dsp`
pub fn collect<'a>(dsp: &'a mut dyn Dsp) -> Controls<'a> {
    let mut collector = ParameterCollector::new();
    dsp.build_controls(&mut collector);
    collector.finish()
}
