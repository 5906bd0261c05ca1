//! livedsp CLI - play a Faust file through JACK and rebuild it on every save

use clap::Parser;
use crossbeam::channel::bounded;
use livedsp::cache::CacheDir;
use livedsp::client::{AudioClient, JackBackend};
use livedsp::compiler::Compiler;
use livedsp::live::{self, LiveSession};
use livedsp::session::Session;
use livedsp::settings::{CompileSettings, Config, CxxCompiler, FloatPrecision, Toolchain};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "livedsp")]
#[command(about = "Compile a Faust DSP file and hot-swap it into a JACK client", long_about = None)]
struct Cli {
    /// DSP source file; created from a template if missing
    file: Option<PathBuf>,

    /// JACK client name
    #[arg(long, default_value = "livedsp")]
    client_name: String,

    /// Session file to restore from and save to on exit
    #[arg(long)]
    session: Option<PathBuf>,

    /// Config file (default: <config dir>/livedsp/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Native compiler
    #[arg(long, value_enum)]
    compiler: Option<CxxCompiler>,

    /// Native optimization level (0-3)
    #[arg(short = 'O', long)]
    opt_level: Option<u8>,

    /// Compile with -ffast-math
    #[arg(long, overrides_with = "no_fast_math")]
    fast_math: bool,

    /// Compile without -ffast-math
    #[arg(long, overrides_with = "fast_math")]
    no_fast_math: bool,

    /// Internal sample precision
    #[arg(long, value_enum)]
    precision: Option<FloatPrecision>,

    /// Generate vectorized code
    #[arg(long, overrides_with = "no_vectorize")]
    vectorize: bool,

    /// Generate scalar code
    #[arg(long, overrides_with = "vectorize")]
    no_vectorize: bool,

    /// Vector size for --vectorize (4-256)
    #[arg(long)]
    vector_size: Option<u32>,

    /// Use fast approximations of math functions
    #[arg(long, overrides_with = "no_math_approx")]
    math_approx: bool,

    /// Use exact math functions
    #[arg(long, overrides_with = "math_approx")]
    no_math_approx: bool,

    /// Print the effective build settings as JSON and exit
    #[arg(long)]
    print_settings: bool,
}

impl Cli {
    /// Command-line flags on top of the config file
    fn apply_overrides(&self, mut settings: CompileSettings) -> CompileSettings {
        if let Some(compiler) = self.compiler {
            settings.cxx_compiler = compiler;
        }
        if let Some(level) = self.opt_level {
            settings.cxx_optimization = level;
        }
        if let Some(precision) = self.precision {
            settings.faust_float = precision;
        }
        if let Some(size) = self.vector_size {
            settings.faust_vector_size = size;
        }
        switch(&mut settings.cxx_fast_math, self.fast_math, self.no_fast_math);
        switch(&mut settings.faust_vectorize, self.vectorize, self.no_vectorize);
        switch(
            &mut settings.faust_math_approximation,
            self.math_approx,
            self.no_math_approx,
        );
        settings.normalized()
    }
}

/// `--x` / `--no-x` pair; neither keeps the configured value
fn switch(setting: &mut bool, on: bool, off: bool) {
    if on {
        *setting = true;
    } else if off {
        *setting = false;
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = match cli.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let settings = cli.apply_overrides(config.compile.clone());

    if cli.print_settings {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let saved = match &cli.session {
        Some(path) => Session::load(path)?,
        None => None,
    };
    let source = cli
        .file
        .clone()
        .or_else(|| saved.as_ref().map(|s| s.source.clone()))
        .ok_or("no DSP file given")?;
    live::ensure_source(&source)?;

    let toolchain = Toolchain::from_env(&config.toolchain);
    let cache = Arc::new(CacheDir::create()?);
    let client = AudioClient::new(JackBackend::open(&cli.client_name)?)?;

    let mut session = LiveSession::new(client, Compiler::new(cache, toolchain), source, settings)?;
    if let Some(path) = cli.session.clone() {
        let controls = saved.map(|s| s.controls).unwrap_or_default();
        session = session.with_session(path, controls);
    }
    session.watch()?;

    let (shutdown_tx, shutdown_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })?;

    info!("Press Ctrl+C to stop");
    session.run(&shutdown_rx)?;
    Ok(())
}
