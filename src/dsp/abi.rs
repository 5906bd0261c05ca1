//! C ABI shared with `resources/architecture/wrapper.cpp`
//!
//! The wrapper exports a single factory, [`ENTRY_SYMBOL`], returning a heap
//! allocated [`ModuleDescriptor`]. The descriptor's `destroy` frees both the
//! DSP instance and the descriptor itself.

use crate::controls::{BoxKind, ControlRange, ControlVisitor, Orientation, Zone};
use std::ffi::{c_char, c_void, CStr};
use std::ptr::NonNull;

pub const ABI_VERSION: u32 = 1;

pub const ENTRY_SYMBOL: &[u8] = b"livedsp_create_module\0";

pub type EntryFn = unsafe extern "C" fn() -> *mut ModuleDescriptor;

pub const BOX_TAB: i32 = 0;
pub const BOX_HORIZONTAL: i32 = 1;
pub const BOX_VERTICAL: i32 = 2;

pub const HORIZONTAL: i32 = 0;
pub const VERTICAL: i32 = 1;

#[repr(C)]
pub struct ModuleDescriptor {
    pub abi_version: u32,
    pub instance: *mut c_void,
    pub destroy: unsafe extern "C" fn(module: *mut ModuleDescriptor),
    pub num_inputs: unsafe extern "C" fn(instance: *mut c_void) -> i32,
    pub num_outputs: unsafe extern "C" fn(instance: *mut c_void) -> i32,
    pub init: unsafe extern "C" fn(instance: *mut c_void, sample_rate: i32),
    pub compute: unsafe extern "C" fn(
        instance: *mut c_void,
        count: i32,
        inputs: *mut *mut f32,
        outputs: *mut *mut f32,
    ),
    pub build_controls: unsafe extern "C" fn(instance: *mut c_void, controls: *const ControlsTable),
}

#[repr(C)]
pub struct ControlsTable {
    pub ctx: *mut c_void,
    pub open_box: unsafe extern "C" fn(ctx: *mut c_void, kind: i32, label: *const c_char),
    pub close_box: unsafe extern "C" fn(ctx: *mut c_void),
    pub add_button: unsafe extern "C" fn(ctx: *mut c_void, label: *const c_char, zone: *mut f32),
    pub add_check_button:
        unsafe extern "C" fn(ctx: *mut c_void, label: *const c_char, zone: *mut f32),
    pub add_slider: unsafe extern "C" fn(
        ctx: *mut c_void,
        orientation: i32,
        label: *const c_char,
        zone: *mut f32,
        init: f32,
        min: f32,
        max: f32,
        step: f32,
    ),
    pub add_num_entry: unsafe extern "C" fn(
        ctx: *mut c_void,
        label: *const c_char,
        zone: *mut f32,
        init: f32,
        min: f32,
        max: f32,
        step: f32,
    ),
    pub add_bargraph: unsafe extern "C" fn(
        ctx: *mut c_void,
        orientation: i32,
        label: *const c_char,
        zone: *mut f32,
        min: f32,
        max: f32,
    ),
    pub declare: unsafe extern "C" fn(
        ctx: *mut c_void,
        zone: *mut f32,
        key: *const c_char,
        value: *const c_char,
    ),
}

/// Context behind `ControlsTable::ctx` for the duration of one
/// `build_controls` call
pub(crate) struct VisitorContext<'v, 'a> {
    pub visitor: &'v mut dyn ControlVisitor<'a>,
}

impl<'v, 'a: 'v> VisitorContext<'v, 'a> {
    /// Callback table pointing back at `self`
    pub fn table(&mut self) -> ControlsTable {
        ControlsTable {
            ctx: self as *mut Self as *mut c_void,
            open_box: open_box::<'v, 'a>,
            close_box: close_box::<'v, 'a>,
            add_button: add_button::<'v, 'a>,
            add_check_button: add_check_button::<'v, 'a>,
            add_slider: add_slider::<'v, 'a>,
            add_num_entry: add_num_entry::<'v, 'a>,
            add_bargraph: add_bargraph::<'v, 'a>,
            declare: declare::<'v, 'a>,
        }
    }
}

unsafe fn visitor<'c, 'v, 'a>(ctx: *mut c_void) -> &'c mut dyn ControlVisitor<'a>
where
    'v: 'c,
    'a: 'v,
{
    &mut *(*(ctx as *mut VisitorContext<'v, 'a>)).visitor
}

unsafe fn label<'s>(ptr: *const c_char) -> std::borrow::Cow<'s, str> {
    if ptr.is_null() {
        return "".into();
    }
    CStr::from_ptr(ptr).to_string_lossy()
}

unsafe fn zone<'a>(ptr: *mut f32) -> Option<Zone<'a>> {
    match NonNull::new(ptr) {
        Some(ptr) => Some(Zone::new(ptr)),
        None => None,
    }
}

fn orientation(value: i32) -> Orientation {
    if value == VERTICAL {
        Orientation::Vertical
    } else {
        Orientation::Horizontal
    }
}

unsafe extern "C" fn open_box<'v, 'a>(ctx: *mut c_void, kind: i32, name: *const c_char)
where
    'a: 'v,
{
    let kind = match kind {
        BOX_TAB => BoxKind::Tab,
        BOX_HORIZONTAL => BoxKind::Horizontal,
        _ => BoxKind::Vertical,
    };
    visitor::<'_, 'v, 'a>(ctx).open_box(kind, &label(name));
}

unsafe extern "C" fn close_box<'v, 'a>(ctx: *mut c_void)
where
    'a: 'v,
{
    visitor::<'_, 'v, 'a>(ctx).close_box();
}

unsafe extern "C" fn add_button<'v, 'a>(ctx: *mut c_void, name: *const c_char, ptr: *mut f32)
where
    'a: 'v,
{
    if let Some(zone) = zone(ptr) {
        visitor::<'_, 'v, 'a>(ctx).add_button(&label(name), zone);
    }
}

unsafe extern "C" fn add_check_button<'v, 'a>(
    ctx: *mut c_void,
    name: *const c_char,
    ptr: *mut f32,
)
where
    'a: 'v,
{
    if let Some(zone) = zone(ptr) {
        visitor::<'_, 'v, 'a>(ctx).add_check_button(&label(name), zone);
    }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn add_slider<'v, 'a>(
    ctx: *mut c_void,
    orient: i32,
    name: *const c_char,
    ptr: *mut f32,
    init: f32,
    min: f32,
    max: f32,
    step: f32,
)
where
    'a: 'v,
{
    if let Some(zone) = zone(ptr) {
        let range = ControlRange {
            init,
            min,
            max,
            step,
        };
        visitor::<'_, 'v, 'a>(ctx).add_slider(orientation(orient), &label(name), zone, range);
    }
}

unsafe extern "C" fn add_num_entry<'v, 'a>(
    ctx: *mut c_void,
    name: *const c_char,
    ptr: *mut f32,
    init: f32,
    min: f32,
    max: f32,
    step: f32,
)
where
    'a: 'v,
{
    if let Some(zone) = zone(ptr) {
        let range = ControlRange {
            init,
            min,
            max,
            step,
        };
        visitor::<'_, 'v, 'a>(ctx).add_num_entry(&label(name), zone, range);
    }
}

unsafe extern "C" fn add_bargraph<'v, 'a>(
    ctx: *mut c_void,
    orient: i32,
    name: *const c_char,
    ptr: *mut f32,
    min: f32,
    max: f32,
)
where
    'a: 'v,
{
    if let Some(zone) = zone(ptr) {
        visitor::<'_, 'v, 'a>(ctx).add_bargraph(orientation(orient), &label(name), zone, min, max);
    }
}

unsafe extern "C" fn declare<'v, 'a>(
    ctx: *mut c_void,
    ptr: *mut f32,
    key: *const c_char,
    value: *const c_char,
)
where
    'a: 'v,
{
    visitor::<'_, 'v, 'a>(ctx).declare(zone(ptr), &label(key), &label(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ParameterCollector;
    use std::ptr;

    fn c(s: &'static [u8]) -> *const c_char {
        s.as_ptr().cast()
    }

    #[test]
    fn test_table_forwards_to_visitor() {
        let mut cells = [0.25f32, 0.0, 0.0];
        let gain = cells.as_mut_ptr();
        let (level, gate) = unsafe { (gain.add(1), gain.add(2)) };

        let mut collector = ParameterCollector::new();
        {
            let mut context = VisitorContext {
                visitor: &mut collector,
            };
            let table = context.table();
            unsafe {
                (table.open_box)(table.ctx, BOX_VERTICAL, c(b"synth\0"));
                (table.declare)(table.ctx, gain, c(b"unit\0"), c(b"lin\0"));
                (table.add_slider)(table.ctx, HORIZONTAL, c(b"gain\0"), gain, 0.25, 0.0, 1.0, 0.01);
                (table.add_bargraph)(table.ctx, VERTICAL, c(b"level\0"), level, -1.0, 1.0);
                (table.add_button)(table.ctx, ptr::null(), gate);
                (table.add_check_button)(table.ctx, c(b"mute\0"), ptr::null_mut());
                (table.close_box)(table.ctx);
            }
        }

        let controls = collector.finish();
        let labels: Vec<_> = controls.inputs.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["gain", ""]);
        assert_eq!(controls.inputs[0].init, 0.25);
        assert_eq!(controls.outputs.len(), 1);
        assert_eq!(controls.outputs[0].min, -1.0);

        assert_eq!(controls.inputs[0].set_clamped(3.0), 1.0);
        assert_eq!(unsafe { *gain }, 1.0);
    }
}
