//! Live session
//!
//! Watches one DSP source file, rebuilds it on every save and hot-swaps the
//! result into the audio client. Control positions survive rebuilds: each
//! rebuild request carries the current input control values, which are
//! written back (clamped) once the new module is active.
//!
//! A failed build never touches the module that is currently playing.

use crate::client::{AudioBackend, AudioClient};
use crate::compiler::{CompileRequest, Compiler};
use crate::error::{LiveError, LiveResult};
use crate::session::Session;
use crate::settings::CompileSettings;
use crate::worker::{Worker, WorkerEvent};
use crossbeam::channel::{never, select, unbounded, Receiver};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Written to a source path that does not exist yet
pub const STARTER_TEMPLATE: &str = include_str!("../resources/templates/new.dsp");

/// Create `path` from the starter template unless it already exists
///
/// Returns whether a file was created.
pub fn ensure_source(path: &Path) -> LiveResult<bool> {
    if path.exists() {
        return Ok(false);
    }
    let source_error = |source| LiveError::Source {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(source_error)?;
    }
    std::fs::write(path, STARTER_TEMPLATE).map_err(source_error)?;
    info!("Created {} from the starter template", path.display());
    Ok(true)
}

/// Whether a watcher event is a write to the file named `file_name`
pub fn is_source_change(event: &Event, file_name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name))
}

pub struct LiveSession<B: AudioBackend> {
    // Declared first: the active module is unloaded before the worker can
    // release the cache directory holding its artifact.
    client: AudioClient<B>,
    source: PathBuf,
    settings: CompileSettings,
    session_path: Option<PathBuf>,
    // Values to restore until the first module is active
    pending_controls: Vec<f32>,
    worker: Worker,
    events: Receiver<WorkerEvent>,
    _watcher: Option<RecommendedWatcher>,
    changes: Receiver<()>,
}

impl<B: AudioBackend> LiveSession<B> {
    pub fn new(
        client: AudioClient<B>,
        compiler: Compiler,
        source: PathBuf,
        settings: CompileSettings,
    ) -> LiveResult<Self> {
        let (worker, events) = Worker::with_compiler(compiler).map_err(LiveError::Worker)?;
        Ok(Self {
            client,
            source,
            settings: settings.normalized(),
            session_path: None,
            pending_controls: Vec::new(),
            worker,
            events,
            _watcher: None,
            changes: never(),
        })
    }

    /// Restore control values from, and save them to, `path`
    pub fn with_session(mut self, path: PathBuf, controls: Vec<f32>) -> Self {
        self.session_path = Some(path);
        self.pending_controls = controls;
        self
    }

    pub fn client(&self) -> &AudioClient<B> {
        &self.client
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Start watching the source file for saves
    ///
    /// The parent directory is watched, so editors that save by renaming a
    /// new file over the old one are seen too.
    pub fn watch(&mut self) -> LiveResult<()> {
        let file_name = self
            .source
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_default();
        let dir = match self.source.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = unbounded();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_source_change(&event, &file_name) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => warn!("File watcher error: {}", e),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!("Watching {}", self.source.display());
        self._watcher = Some(watcher);
        self.changes = rx;
        Ok(())
    }

    /// Queue a build of the source with the current control values
    pub fn request_build(&self) {
        let request = CompileRequest::new(&self.source, self.settings.clone())
            .with_controls(self.current_controls());
        self.worker.submit(request);
    }

    fn current_controls(&self) -> Vec<f32> {
        if self.client.parameters().inputs.is_empty() {
            self.pending_controls.clone()
        } else {
            self.client.control_values()
        }
    }

    /// React to one worker event
    ///
    /// Errors are audio graph failures and are fatal.
    pub fn handle_event(&mut self, event: WorkerEvent) -> LiveResult<()> {
        match event {
            WorkerEvent::Started(request) => {
                info!("Building {}", request.source.display());
            }
            WorkerEvent::Finished(request, result) => match result.module {
                Some(module) => {
                    let previous = self.client.activate(Some(module))?;
                    drop(previous);
                    let restored = self.client.set_controls(&request.initial_controls);
                    debug!("Restored {} control values", restored);
                    self.pending_controls.clear();
                }
                None => {
                    error!(
                        "Build of {} failed, keeping the current module",
                        request.source.display()
                    );
                }
            },
        }
        Ok(())
    }

    /// Build once, then rebuild on every save until `shutdown` fires
    pub fn run(&mut self, shutdown: &Receiver<()>) -> LiveResult<()> {
        self.request_build();

        let events = self.events.clone();
        loop {
            let changes = self.changes.clone();
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.handle_event(event)?,
                    Err(_) => {
                        warn!("Compilation worker exited");
                        break;
                    }
                },
                recv(changes) -> change => {
                    if change.is_ok() {
                        info!("{} changed, rebuilding", self.source.display());
                        self.request_build();
                    }
                },
                recv(shutdown) -> _ => {
                    info!("Shutting down");
                    break;
                },
            }
        }

        self.save_session()
    }

    /// Write the session file, if one was configured
    pub fn save_session(&self) -> LiveResult<()> {
        let Some(path) = &self.session_path else {
            return Ok(());
        };
        let mut session = Session::capture(&self.source, &self.client);
        if session.controls.is_empty() {
            session.controls = self.pending_controls.clone();
        }
        session.save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn test_ensure_source_writes_template_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("synth.dsp");

        assert!(ensure_source(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), STARTER_TEMPLATE);

        std::fs::write(&path, "process = _;").unwrap();
        assert!(!ensure_source(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "process = _;");
    }

    #[test]
    fn test_source_change_filter() {
        let name = OsStr::new("synth.dsp");
        let event = |kind, path: &str| Event::new(kind).add_path(PathBuf::from(path));

        assert!(is_source_change(
            &event(EventKind::Modify(ModifyKind::Any), "/music/synth.dsp"),
            name
        ));
        assert!(is_source_change(
            &event(EventKind::Create(CreateKind::File), "/music/synth.dsp"),
            name
        ));
        assert!(!is_source_change(
            &event(EventKind::Modify(ModifyKind::Any), "/music/other.dsp"),
            name
        ));
        assert!(!is_source_change(
            &event(EventKind::Remove(RemoveKind::File), "/music/synth.dsp"),
            name
        ));
    }
}
