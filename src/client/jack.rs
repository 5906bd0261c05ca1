//! JACK implementation of the audio backend

use super::{AudioBackend, Direction, Processor};
use crate::error::{BackendError, BackendResult};
use jack::{AudioIn, AudioOut, Port};
use tracing::info;

type JackProcessor = Processor<Port<AudioIn>, Port<AudioOut>>;

/// Process handler owning the real-time state while the client is active
pub struct JackProcess {
    processor: JackProcessor,
}

impl jack::ProcessHandler for JackProcess {
    fn process(&mut self, _: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        self.processor.process_with(
            ps.n_frames() as usize,
            |port| port.as_slice(ps).as_ptr().cast_mut(),
            |port| port.as_mut_slice(ps).as_mut_ptr(),
        );
        jack::Control::Continue
    }
}

enum State {
    Idle(jack::Client),
    Running(jack::AsyncClient<(), JackProcess>),
}

pub struct JackBackend {
    // `None` once a failed (de)activation consumed the client
    state: Option<State>,
    name: String,
    // Rate at open time; reported only once the client is gone
    sample_rate: u32,
}

impl JackBackend {
    /// Connect to a running JACK server; never starts one
    pub fn open(client_name: &str) -> BackendResult<Self> {
        let (client, status) = jack::Client::new(client_name, jack::ClientOptions::NO_START_SERVER)
            .map_err(|e| BackendError::Open(e.to_string()))?;
        let name = client.name().to_string();
        let sample_rate = u32::try_from(client.sample_rate()).unwrap_or(u32::MAX);
        info!(
            "Opened JACK client {} ({} Hz, status {:?})",
            name, sample_rate, status
        );
        Ok(Self {
            state: Some(State::Idle(client)),
            name,
            sample_rate,
        })
    }

    fn client(&self) -> BackendResult<&jack::Client> {
        match &self.state {
            Some(State::Idle(client)) => Ok(client),
            Some(State::Running(active)) => Ok(active.as_client()),
            None => Err(BackendError::Closed),
        }
    }

    fn full_name(&self, port: &str) -> String {
        format!("{}:{}", self.name, port)
    }
}

impl AudioBackend for JackBackend {
    type Input = Port<AudioIn>;
    type Output = Port<AudioOut>;

    fn sample_rate(&self) -> u32 {
        match self.client() {
            Ok(client) => u32::try_from(client.sample_rate()).unwrap_or(u32::MAX),
            Err(_) => self.sample_rate,
        }
    }

    fn client_name(&self) -> &str {
        &self.name
    }

    fn connections(&self, port: &str) -> Vec<String> {
        let Ok(client) = self.client() else {
            return Vec::new();
        };
        client
            .port_by_name(&self.full_name(port))
            .map(|p| p.get_connections())
            .unwrap_or_default()
    }

    fn connect(&mut self, port: &str, direction: Direction, peer: &str) -> BackendResult<()> {
        let ours = self.full_name(port);
        let (source, destination) = match direction {
            Direction::Input => (peer.to_string(), ours),
            Direction::Output => (ours, peer.to_string()),
        };
        match self.client()?.connect_ports_by_name(&source, &destination) {
            Ok(()) | Err(jack::Error::PortAlreadyConnected(..)) => Ok(()),
            Err(e) => Err(BackendError::Connect {
                source_port: source,
                destination,
                reason: e.to_string(),
            }),
        }
    }

    fn register_input(&mut self, name: &str) -> BackendResult<Self::Input> {
        self.client()?
            .register_port(name, AudioIn::default())
            .map_err(|e| BackendError::Register {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    fn register_output(&mut self, name: &str) -> BackendResult<Self::Output> {
        self.client()?
            .register_port(name, AudioOut::default())
            .map_err(|e| BackendError::Register {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    fn unregister_input(&mut self, port: Self::Input) -> BackendResult<()> {
        let name = port.short_name().unwrap_or_default();
        self.client()?
            .unregister_port(port)
            .map_err(|e| BackendError::Unregister {
                name,
                reason: e.to_string(),
            })
    }

    fn unregister_output(&mut self, port: Self::Output) -> BackendResult<()> {
        let name = port.short_name().unwrap_or_default();
        self.client()?
            .unregister_port(port)
            .map_err(|e| BackendError::Unregister {
                name,
                reason: e.to_string(),
            })
    }

    unsafe fn suspend(&mut self) -> BackendResult<JackProcessor> {
        match self.state.take() {
            Some(State::Running(active)) => {
                let (client, (), handler) =
                    active
                        .deactivate()
                        .map_err(|e| BackendError::Activation {
                            operation: "deactivate",
                            reason: e.to_string(),
                        })?;
                self.state = Some(State::Idle(client));
                Ok(handler.processor)
            }
            Some(idle @ State::Idle(_)) => {
                self.state = Some(idle);
                Err(BackendError::NotRunning)
            }
            None => Err(BackendError::Closed),
        }
    }

    unsafe fn resume(&mut self, processor: JackProcessor) -> BackendResult<()> {
        match self.state.take() {
            Some(State::Idle(client)) => {
                let active = client
                    .activate_async((), JackProcess { processor })
                    .map_err(|e| BackendError::Activation {
                        operation: "activate",
                        reason: e.to_string(),
                    })?;
                self.state = Some(State::Running(active));
                Ok(())
            }
            Some(running @ State::Running(_)) => {
                self.state = Some(running);
                Err(BackendError::AlreadyRunning)
            }
            None => Err(BackendError::Closed),
        }
    }
}
