//! # livedsp - live Faust DSP in a JACK client
//!
//! Point livedsp at a Faust source file and hear it running: the file is
//! translated to C++, compiled into a shared library, loaded, and swapped into
//! a running JACK client without restarting it or losing patch connections.
//! Every save of the file repeats the cycle.
//!
//! ## Pieces
//!
//! - [`compiler`]: the two-stage external build plus loading ([`dsp::load`])
//! - [`worker`]: runs builds on a background thread, latest request wins
//! - [`client`]: hosts the active module and hot-swaps it, keeping the
//!   connections of ports that survive the swap
//! - [`controls`]: flattens a module's control surface into parameters
//! - [`live`]: file watching and the glue between the parts
//!
//! ## Quick Start
//!
//! ```no_run
//! use livedsp::cache::CacheDir;
//! use livedsp::client::{AudioClient, JackBackend};
//! use livedsp::compiler::{CompileRequest, Compiler};
//! use livedsp::settings::{CompileSettings, Toolchain};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = Arc::new(CacheDir::create()?);
//! let compiler = Compiler::new(cache, Toolchain::default());
//! let mut client = AudioClient::new(JackBackend::open("livedsp")?)?;
//!
//! let request = CompileRequest::new("synth.dsp", CompileSettings::default());
//! if let Some(module) = compiler.compile(&request).module {
//!     client.activate(Some(module))?;
//!     // first input control, clamped to its range
//!     client.set_controls(&[0.8]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod compiler;
pub mod controls;
pub mod dsp;
pub mod error;
pub mod live;
pub mod session;
pub mod settings;
pub mod worker;

pub use client::{AudioBackend, AudioClient};
pub use compiler::{CompileRequest, CompileResult, Compiler};
pub use controls::{Controls, Parameter};
pub use dsp::Dsp;
pub use error::{BackendError, BuildError, BuildStage, ConfigError, LiveError};
pub use live::LiveSession;
pub use session::Session;
pub use settings::{CompileSettings, Config, Toolchain};
pub use worker::{Worker, WorkerEvent};
