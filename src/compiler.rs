//! Build pipeline: DSP source → C++ → shared library → loaded module
//!
//! 1. the translator turns the source into `<cache>/module.cpp`, wrapped in
//!    the architecture template;
//! 2. the native compiler builds it into a fresh `module.XXXXXX.so`;
//! 3. the loader opens the library and instantiates the module.
//!
//! Any failure yields a [`CompileResult`] without a module. The failing stage
//! only shows up in the logs.

use crate::cache::CacheDir;
use crate::dsp::{self, Dsp, NativeModule};
use crate::error::{BuildError, BuildResult, BuildStage};
use crate::settings::{CompileSettings, Toolchain};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{error, info};

/// One build of one source file
#[derive(Clone, Debug, PartialEq)]
pub struct CompileRequest {
    pub source: PathBuf,
    pub settings: CompileSettings,
    /// Input control values to restore once the module is active
    pub initial_controls: Vec<f32>,
}

impl CompileRequest {
    pub fn new(source: impl Into<PathBuf>, settings: CompileSettings) -> Self {
        Self {
            source: source.into(),
            settings,
            initial_controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, values: Vec<f32>) -> Self {
        self.initial_controls = values;
        self
    }
}

/// Outcome of a build; `module` is `None` when any stage failed
#[derive(Default)]
pub struct CompileResult {
    pub module: Option<Box<dyn Dsp>>,
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        self.module.is_some()
    }
}

impl fmt::Debug for CompileResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(
                f,
                "CompileResult({} in, {} out)",
                module.num_inputs(),
                module.num_outputs()
            ),
            None => write!(f, "CompileResult(failed)"),
        }
    }
}

/// Runs the external toolchain inside a cache directory
#[derive(Clone, Debug)]
pub struct Compiler {
    cache: Arc<CacheDir>,
    toolchain: Toolchain,
}

impl Compiler {
    pub fn new(cache: Arc<CacheDir>, toolchain: Toolchain) -> Self {
        Self { cache, toolchain }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Build and load; failures are logged and reported as an empty result
    pub fn compile(&self, request: &CompileRequest) -> CompileResult {
        info!("Compiling DSP {}", request.source.display());
        match self.build(request) {
            Ok(module) => {
                info!(
                    "DSP compilation success: {} inputs, {} outputs",
                    module.num_inputs(),
                    module.num_outputs()
                );
                CompileResult {
                    module: Some(Box::new(module)),
                }
            }
            Err(e) => {
                error!("DSP compilation failed ({}): {}", e.stage(), e);
                CompileResult::default()
            }
        }
    }

    /// Run all pipeline stages, reporting the first failure
    pub fn build(&self, request: &CompileRequest) -> BuildResult<NativeModule> {
        let artifact = ArtifactGuard(self.cache.new_artifact()?);
        let intermediate = self.cache.intermediate_file();

        // A stale file from the previous build must not pass for fresh output.
        if intermediate.exists() {
            std::fs::remove_file(&intermediate).map_err(BuildError::io(BuildStage::Translate))?;
        }

        run(
            BuildStage::Translate,
            self.translator_command(request, &intermediate),
        )?;
        if !intermediate.exists() {
            return Err(BuildError::MissingOutput {
                stage: BuildStage::Translate,
                path: intermediate,
            });
        }

        run(
            BuildStage::CompileNative,
            self.compiler_command(request, &intermediate, &artifact.0),
        )?;

        dsp::load(&artifact.keep())
    }

    /// `translator -o <intermediate> -a <wrapper> <precision> [-vec -vs N] [-mapp] <source>`
    pub fn translator_command(&self, request: &CompileRequest, intermediate: &Path) -> Command {
        let mut cmd = Command::new(&self.toolchain.faust);
        cmd.arg("-o")
            .arg(intermediate)
            .arg("-a")
            .arg(self.cache.wrapper_file())
            .args(request.settings.translator_flags())
            .arg(&request.source);
        cmd
    }

    /// `compiler -I<source dir> <cxx flags> -shared -fPIC -o <artifact> <intermediate> <ld flags>`
    pub fn compiler_command(
        &self,
        request: &CompileRequest,
        intermediate: &Path,
        artifact: &Path,
    ) -> Command {
        let source_dir = match request.source.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut include = OsString::from("-I");
        include.push(source_dir);

        let mut cmd = Command::new(self.toolchain.cxx_program(request.settings.cxx_compiler));
        cmd.arg(include)
            .args(request.settings.cxx_flags())
            .args(&self.toolchain.cxx_flags)
            .arg("-shared")
            .arg("-fPIC")
            .arg("-o")
            .arg(artifact)
            .arg(intermediate)
            .args(&self.toolchain.ld_flags);
        cmd
    }
}

fn run(stage: BuildStage, mut cmd: Command) -> BuildResult<()> {
    info!("$ {:?}", cmd);
    let status = cmd.status().map_err(BuildError::io(stage))?;
    if !status.success() {
        return Err(BuildError::Process {
            stage,
            program: cmd.get_program().to_string_lossy().into_owned(),
            status,
        });
    }
    Ok(())
}

/// Deletes a reserved artifact unless it was handed to the loader
struct ArtifactGuard(PathBuf);

impl ArtifactGuard {
    fn keep(self) -> PathBuf {
        let mut guard = std::mem::ManuallyDrop::new(self);
        std::mem::take(&mut guard.0)
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{CxxCompiler, FloatPrecision};

    fn compiler(base: &Path) -> Compiler {
        let cache = Arc::new(CacheDir::create_in(base).unwrap());
        Compiler::new(cache, Toolchain::default())
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_translator_command_line() {
        let base = tempfile::tempdir().unwrap();
        let compiler = compiler(base.path());
        let settings = CompileSettings {
            faust_float: FloatPrecision::Double,
            faust_vectorize: true,
            faust_vector_size: 64,
            ..Default::default()
        };
        let request = CompileRequest::new("/music/synth.dsp", settings);
        let intermediate = Path::new("/cache/module.cpp");

        let cmd = compiler.translator_command(&request, intermediate);
        assert_eq!(cmd.get_program(), "faust");

        let wrapper = compiler.cache.wrapper_file().to_string_lossy().into_owned();
        assert_eq!(
            args(&cmd),
            vec![
                "-o",
                "/cache/module.cpp",
                "-a",
                wrapper.as_str(),
                "-double",
                "-vec",
                "-vs",
                "64",
                "/music/synth.dsp"
            ]
        );
    }

    #[test]
    fn test_compiler_command_line() {
        let base = tempfile::tempdir().unwrap();
        let mut compiler = compiler(base.path());
        compiler.toolchain.ld_flags = vec!["-lm".to_string()];
        let settings = CompileSettings {
            cxx_compiler: CxxCompiler::Clang,
            cxx_optimization: 3,
            cxx_fast_math: true,
            ..Default::default()
        };
        let request = CompileRequest::new("/music/synth.dsp", settings);

        let cmd = compiler.compiler_command(
            &request,
            Path::new("/cache/module.cpp"),
            Path::new("/cache/module.abc.so"),
        );
        assert_eq!(cmd.get_program(), "clang++");
        assert_eq!(
            args(&cmd),
            vec![
                "-I/music",
                "-O3",
                "-ffast-math",
                "-shared",
                "-fPIC",
                "-o",
                "/cache/module.abc.so",
                "/cache/module.cpp",
                "-lm"
            ]
        );
    }

    #[test]
    fn test_relative_source_includes_current_dir() {
        let base = tempfile::tempdir().unwrap();
        let compiler = compiler(base.path());
        let request = CompileRequest::new("synth.dsp", CompileSettings::default());
        let cmd = compiler.compiler_command(&request, Path::new("m.cpp"), Path::new("m.so"));
        assert_eq!(args(&cmd)[0], "-I.");
    }

    #[test]
    fn test_failed_translation_yields_no_module() {
        let base = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheDir::create_in(base.path()).unwrap());
        let toolchain = Toolchain {
            faust: "false".to_string(),
            ..Toolchain::default()
        };
        let compiler = Compiler::new(cache.clone(), toolchain);
        let request = CompileRequest::new("/nonexistent.dsp", CompileSettings::default());

        let err = compiler.build(&request).err().unwrap();
        assert_eq!(err.stage(), BuildStage::Translate);
        assert!(!compiler.compile(&request).is_success());

        // Reserved artifacts are cleaned up after a failure
        let leftovers: Vec<_> = std::fs::read_dir(cache.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("module."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_missing_translator_yields_no_module() {
        let base = tempfile::tempdir().unwrap();
        let cache = Arc::new(CacheDir::create_in(base.path()).unwrap());
        let toolchain = Toolchain {
            faust: "/nonexistent/bin/faust".to_string(),
            ..Toolchain::default()
        };
        let compiler = Compiler::new(cache, toolchain);
        let request = CompileRequest::new("/nonexistent.dsp", CompileSettings::default());

        let err = compiler.build(&request).err().unwrap();
        assert!(matches!(
            err,
            BuildError::Io {
                stage: BuildStage::Translate,
                ..
            }
        ));
    }
}
