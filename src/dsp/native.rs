//! Natively compiled module loaded from a shared library

use super::abi::{ModuleDescriptor, VisitorContext};
use super::{BlockBuffers, Dsp};
use crate::controls::ControlVisitor;
use libloading::Library;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::{debug, warn};

/// A DSP instance living inside a freshly built shared library
///
/// Owns the library handle and the artifact file it was loaded from. On drop
/// the instance is destroyed, the library is closed and the artifact is
/// deleted, in that order.
pub struct NativeModule {
    descriptor: NonNull<ModuleDescriptor>,
    library: Option<Library>,
    artifact: PathBuf,
}

// The descriptor is only reached through `&self`/`&mut self`, and the
// instance behind it has no thread affinity.
unsafe impl Send for NativeModule {}

impl NativeModule {
    /// # Safety
    ///
    /// `descriptor` must come from `library`'s factory, use the current ABI
    /// version and not be owned by anything else.
    pub(crate) unsafe fn from_raw(
        descriptor: NonNull<ModuleDescriptor>,
        library: Library,
        artifact: PathBuf,
    ) -> Self {
        Self {
            descriptor,
            library: Some(library),
            artifact,
        }
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    fn descriptor(&self) -> &ModuleDescriptor {
        // SAFETY: valid until `drop`.
        unsafe { self.descriptor.as_ref() }
    }
}

impl Dsp for NativeModule {
    fn num_inputs(&self) -> usize {
        let d = self.descriptor();
        let count = unsafe { (d.num_inputs)(d.instance) };
        usize::try_from(count).unwrap_or(0)
    }

    fn num_outputs(&self) -> usize {
        let d = self.descriptor();
        let count = unsafe { (d.num_outputs)(d.instance) };
        usize::try_from(count).unwrap_or(0)
    }

    fn init(&mut self, sample_rate: u32) {
        let d = self.descriptor();
        let rate = i32::try_from(sample_rate).unwrap_or(i32::MAX);
        unsafe { (d.init)(d.instance, rate) }
    }

    fn compute(&mut self, buffers: &mut BlockBuffers<'_>) {
        let d = self.descriptor();
        let (compute, instance) = (d.compute, d.instance);
        let frames = i32::try_from(buffers.frames()).unwrap_or(i32::MAX);
        unsafe { compute(instance, frames, buffers.raw_inputs(), buffers.raw_outputs()) }
    }

    fn build_controls<'a>(&'a mut self, visitor: &mut dyn ControlVisitor<'a>) {
        let d = self.descriptor();
        let (build_controls, instance) = (d.build_controls, d.instance);
        let mut ctx = VisitorContext { visitor };
        let table = ctx.table();
        unsafe { build_controls(instance, &table) }
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        let destroy = self.descriptor().destroy;
        unsafe { destroy(self.descriptor.as_ptr()) };

        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                warn!("Could not close {}: {}", self.artifact.display(), e);
            }
        }

        match std::fs::remove_file(&self.artifact) {
            Ok(()) => debug!("Removed {}", self.artifact.display()),
            Err(e) => warn!("Could not remove {}: {}", self.artifact.display(), e),
        }
    }
}
