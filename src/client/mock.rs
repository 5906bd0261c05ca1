//! In-memory audio graph for tests
//!
//! Follows the JACK rules the hot-swap depends on: suspending the client
//! drops every connection of its ports, and port names are unique.

use super::{AudioBackend, Direction, Processor};
use crate::error::{BackendError, BackendResult};
use std::collections::BTreeMap;

/// A port registered with the mock graph
#[derive(Debug)]
pub struct MockPort {
    name: String,
    id: u64,
    buffer: Vec<f32>,
}

impl MockPort {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

pub struct MockBackend {
    name: String,
    sample_rate: u32,
    processor: Option<Processor<MockPort, MockPort>>,
    ports: BTreeMap<String, u64>,
    connections: BTreeMap<String, Vec<String>>,
    next_id: u64,
    port_limit: Option<usize>,
    suspensions: usize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("mock", 48000)
    }
}

impl MockBackend {
    pub fn new(name: &str, sample_rate: u32) -> Self {
        Self {
            name: name.to_string(),
            sample_rate,
            processor: None,
            ports: BTreeMap::new(),
            connections: BTreeMap::new(),
            next_id: 1,
            port_limit: None,
            suspensions: 0,
        }
    }

    /// Refuse registrations once `limit` ports exist
    pub fn with_port_limit(mut self, limit: usize) -> Self {
        self.port_limit = Some(limit);
        self
    }

    /// Change the graph rate, as a server restart would
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn is_running(&self) -> bool {
        self.processor.is_some()
    }

    /// How many times processing was suspended
    pub fn suspensions(&self) -> usize {
        self.suspensions
    }

    /// Registered port names, sorted
    pub fn port_names(&self) -> Vec<String> {
        self.ports.keys().cloned().collect()
    }

    /// Identity of a registered port; changes when a port is re-registered
    pub fn port_id(&self, port: &str) -> Option<u64> {
        self.ports.get(port).copied()
    }

    /// Connect a port as some other graph client would
    pub fn connect_external(&mut self, port: &str, peer: &str) -> BackendResult<()> {
        if !self.ports.contains_key(port) {
            return Err(BackendError::Connect {
                source_port: peer.to_string(),
                destination: port.to_string(),
                reason: "no such port".to_string(),
            });
        }
        let peers = self.connections.entry(port.to_string()).or_default();
        if !peers.iter().any(|p| p == peer) {
            peers.push(peer.to_string());
        }
        Ok(())
    }

    /// Run one process cycle
    ///
    /// `inputs[n]` feeds `in_{n+1}`; missing inputs read as silence. Output
    /// buffers start out filled with garbage, like real driver buffers.
    pub fn run_cycle(&mut self, frames: usize, inputs: &[&[f32]]) -> BackendResult<Vec<Vec<f32>>> {
        let processor = self.processor.as_mut().ok_or(BackendError::NotRunning)?;

        for (index, port) in processor.inputs.iter_mut().enumerate() {
            port.buffer.clear();
            port.buffer.resize(frames, 0.0);
            if let Some(data) = inputs.get(index) {
                let n = data.len().min(frames);
                port.buffer[..n].copy_from_slice(&data[..n]);
            }
        }
        for port in processor.outputs.iter_mut() {
            port.buffer.clear();
            port.buffer.resize(frames, f32::NAN);
        }

        processor.process_with(
            frames,
            |port| port.buffer.as_ptr().cast_mut(),
            |port| port.buffer.as_mut_ptr(),
        );

        Ok(processor
            .outputs
            .iter()
            .map(|port| port.buffer.clone())
            .collect())
    }

    fn register(&mut self, name: &str) -> BackendResult<MockPort> {
        if self.ports.contains_key(name) {
            return Err(BackendError::Register {
                name: name.to_string(),
                reason: "port name already in use".to_string(),
            });
        }
        if self.port_limit.is_some_and(|limit| self.ports.len() >= limit) {
            return Err(BackendError::Register {
                name: name.to_string(),
                reason: "port limit reached".to_string(),
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.ports.insert(name.to_string(), id);
        Ok(MockPort {
            name: name.to_string(),
            id,
            buffer: Vec::new(),
        })
    }

    fn unregister(&mut self, port: MockPort) -> BackendResult<()> {
        match self.ports.get(&port.name) {
            Some(&id) if id == port.id => {
                self.ports.remove(&port.name);
                self.connections.remove(&port.name);
                Ok(())
            }
            _ => Err(BackendError::Unregister {
                name: port.name,
                reason: "not registered".to_string(),
            }),
        }
    }
}

impl AudioBackend for MockBackend {
    type Input = MockPort;
    type Output = MockPort;

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn client_name(&self) -> &str {
        &self.name
    }

    fn connections(&self, port: &str) -> Vec<String> {
        self.connections.get(port).cloned().unwrap_or_default()
    }

    fn connect(&mut self, port: &str, _direction: Direction, peer: &str) -> BackendResult<()> {
        self.connect_external(port, peer)
    }

    fn register_input(&mut self, name: &str) -> BackendResult<MockPort> {
        self.register(name)
    }

    fn register_output(&mut self, name: &str) -> BackendResult<MockPort> {
        self.register(name)
    }

    fn unregister_input(&mut self, port: MockPort) -> BackendResult<()> {
        self.unregister(port)
    }

    fn unregister_output(&mut self, port: MockPort) -> BackendResult<()> {
        self.unregister(port)
    }

    unsafe fn suspend(&mut self) -> BackendResult<Processor<MockPort, MockPort>> {
        let processor = self.processor.take().ok_or(BackendError::NotRunning)?;
        self.connections.clear();
        self.suspensions += 1;
        Ok(processor)
    }

    unsafe fn resume(&mut self, processor: Processor<MockPort, MockPort>) -> BackendResult<()> {
        if self.processor.is_some() {
            return Err(BackendError::AlreadyRunning);
        }
        self.processor = Some(processor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suspend_drops_connections() {
        let mut backend = MockBackend::default();
        // No module, so no views to invalidate.
        unsafe { backend.resume(Processor::new()).unwrap() };
        let port = backend.register_input("in_1").unwrap();
        backend.connect_external("in_1", "system:capture_1").unwrap();
        assert_eq!(backend.connections("in_1"), vec!["system:capture_1"]);

        let processor = unsafe { backend.suspend().unwrap() };
        assert!(backend.connections("in_1").is_empty());
        assert!(matches!(unsafe { backend.suspend() }, Err(BackendError::NotRunning)));

        unsafe { backend.resume(processor).unwrap() };
        backend.unregister_input(port).unwrap();
        assert!(backend.port_names().is_empty());
    }

    #[test]
    fn test_duplicate_and_limited_registration() {
        let mut backend = MockBackend::default().with_port_limit(1);
        let _port = backend.register_output("out_1").unwrap();
        assert!(matches!(
            backend.register_output("out_1"),
            Err(BackendError::Register { .. })
        ));
        assert!(matches!(
            backend.register_output("out_2"),
            Err(BackendError::Register { .. })
        ));
    }
}
