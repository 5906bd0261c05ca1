//! Build settings and toolchain configuration
//!
//! `CompileSettings` travel with each compile request. `Toolchain` names the
//! external programs and is resolved once from the config file and the
//! environment (`FAUST`, `CXX`, `CXXFLAGS`, `LDFLAGS`).

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIN_VECTOR_SIZE: u32 = 4;
pub const MAX_VECTOR_SIZE: u32 = 256;
pub const MAX_OPTIMIZATION: u8 = 3;

/// Native compiler selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CxxCompiler {
    /// `$CXX`, falling back to `c++`
    #[default]
    Default,
    Gcc,
    Clang,
}

/// Internal sample precision of the translated DSP
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FloatPrecision {
    #[default]
    Single,
    Double,
    Quad,
}

impl FloatPrecision {
    pub fn flag(self) -> &'static str {
        match self {
            FloatPrecision::Single => "-single",
            FloatPrecision::Double => "-double",
            FloatPrecision::Quad => "-quad",
        }
    }
}

/// Per-request build settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CompileSettings {
    pub cxx_compiler: CxxCompiler,
    pub cxx_optimization: u8,
    pub cxx_fast_math: bool,
    pub faust_float: FloatPrecision,
    pub faust_vectorize: bool,
    pub faust_vector_size: u32,
    pub faust_math_approximation: bool,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            cxx_compiler: CxxCompiler::Default,
            cxx_optimization: 2,
            cxx_fast_math: false,
            faust_float: FloatPrecision::Single,
            faust_vectorize: false,
            faust_vector_size: 32,
            faust_math_approximation: false,
        }
    }
}

impl CompileSettings {
    /// Clamp out-of-range values into what the toolchain accepts
    ///
    /// Optimization is limited to 0..=3; the vector size to 4..=256, rounded
    /// down to a multiple of 4.
    pub fn normalized(mut self) -> Self {
        self.cxx_optimization = self.cxx_optimization.min(MAX_OPTIMIZATION);
        let size = self.faust_vector_size.clamp(MIN_VECTOR_SIZE, MAX_VECTOR_SIZE);
        self.faust_vector_size = size - size % 4;
        self
    }

    /// Translator flags derived from these settings
    pub fn translator_flags(&self) -> Vec<String> {
        let mut flags = vec![self.faust_float.flag().to_string()];
        if self.faust_vectorize {
            flags.push("-vec".to_string());
            flags.push("-vs".to_string());
            flags.push(self.faust_vector_size.to_string());
        }
        if self.faust_math_approximation {
            flags.push("-mapp".to_string());
        }
        flags
    }

    /// Native compiler flags derived from these settings
    pub fn cxx_flags(&self) -> Vec<String> {
        let mut flags = vec![format!("-O{}", self.cxx_optimization)];
        if self.cxx_fast_math {
            flags.push("-ffast-math".to_string());
        }
        flags
    }
}

/// Toolchain overrides as written in the config file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ToolchainConfig {
    pub faust: Option<String>,
    pub cxx: Option<String>,
    pub cxx_flags: Vec<String>,
    pub ld_flags: Vec<String>,
}

/// Resolved external programs and default flags
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toolchain {
    pub faust: String,
    pub cxx: String,
    pub cxx_flags: Vec<String>,
    pub ld_flags: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            faust: "faust".to_string(),
            cxx: "c++".to_string(),
            cxx_flags: Vec::new(),
            ld_flags: Vec::new(),
        }
    }
}

impl Toolchain {
    /// Resolve from the process environment on top of `file`
    pub fn from_env(file: &ToolchainConfig) -> Self {
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Resolve with an explicit environment lookup; environment beats file,
    /// empty values count as unset.
    pub fn resolve(file: &ToolchainConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let split = |value: String| -> Vec<String> {
            value.split_whitespace().map(str::to_string).collect()
        };

        Self {
            faust: env("FAUST")
                .or_else(|| file.faust.clone())
                .unwrap_or(defaults.faust),
            cxx: env("CXX").or_else(|| file.cxx.clone()).unwrap_or(defaults.cxx),
            cxx_flags: env("CXXFLAGS")
                .map(split)
                .unwrap_or_else(|| file.cxx_flags.clone()),
            ld_flags: env("LDFLAGS")
                .map(split)
                .unwrap_or_else(|| file.ld_flags.clone()),
        }
    }

    /// Native compiler program for a request's compiler choice
    pub fn cxx_program(&self, compiler: CxxCompiler) -> &str {
        match compiler {
            CxxCompiler::Default => &self.cxx,
            CxxCompiler::Gcc => "g++",
            CxxCompiler::Clang => "clang++",
        }
    }
}

/// Contents of `config.toml`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub compile: CompileSettings,
    pub toolchain: ToolchainConfig,
}

impl Config {
    /// `<config dir>/livedsp/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("livedsp").join("config.toml"))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }
}
