//! Turns a built shared library into a [`NativeModule`]

use super::abi::{EntryFn, ABI_VERSION, ENTRY_SYMBOL};
use super::NativeModule;
use crate::error::{BuildError, BuildResult, BuildStage};
use libloading::Library;
use std::path::Path;
use std::ptr::NonNull;
use tracing::{error, info, warn};

/// Load `artifact` and instantiate the module it exports
///
/// On success the module takes ownership of the artifact file. On failure the
/// library is closed and the artifact is deleted, since artifacts are never
/// reloaded.
pub fn load(artifact: &Path) -> BuildResult<NativeModule> {
    let result = open(artifact);
    if let Err(e) = &result {
        error!("DSP loading failed: {}", e);
        if let Err(e) = std::fs::remove_file(artifact) {
            warn!("Could not remove {}: {}", artifact.display(), e);
        }
    }
    result
}

fn open(artifact: &Path) -> BuildResult<NativeModule> {
    info!("Loading {}", artifact.display());

    // SAFETY: the artifact was built from our wrapper template; its
    // initializers are the translated DSP's static constructors.
    let library = unsafe { Library::new(artifact) }.map_err(|e| BuildError::Stage {
        stage: BuildStage::Open,
        reason: e.to_string(),
    })?;

    let entry: EntryFn = unsafe {
        *library
            .get::<EntryFn>(ENTRY_SYMBOL)
            .map_err(|e| BuildError::Stage {
                stage: BuildStage::Symbol,
                reason: e.to_string(),
            })?
    };

    let descriptor = NonNull::new(unsafe { entry() }).ok_or_else(|| BuildError::Stage {
        stage: BuildStage::Instantiate,
        reason: "factory returned no instance".to_string(),
    })?;

    let (version, instance) = unsafe {
        let d = descriptor.as_ref();
        (d.abi_version, d.instance)
    };
    if version != ABI_VERSION {
        // The layout behind a foreign version is unknown, so the descriptor
        // is leaked rather than destroyed.
        return Err(BuildError::Stage {
            stage: BuildStage::Instantiate,
            reason: format!(
                "module ABI version {} does not match host version {}",
                version, ABI_VERSION
            ),
        });
    }
    if instance.is_null() {
        unsafe { (descriptor.as_ref().destroy)(descriptor.as_ptr()) };
        return Err(BuildError::Stage {
            stage: BuildStage::Instantiate,
            reason: "factory returned no instance".to_string(),
        });
    }

    Ok(unsafe { NativeModule::from_raw(descriptor, library, artifact.to_path_buf()) })
}
