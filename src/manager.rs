//! Stream lifecycle manager.
//!
//! Owns the registry of active device streams and the ordered pipeline,
//! reconciles the local set against the external streaming server, and
//! drives the per-frame fan-out. Everything here runs on a single loop
//! thread; per-device state is only ever touched from that thread, which is
//! what makes the plain `HashMap`s below safe.

use std::collections::{HashMap, HashSet};
use std::net::UdpSocket;

use thiserror::Error;

use crate::ingest::{FrameSource, SourceFactory};
use crate::pipeline::{ElementDirective, PipelineElement};
use crate::registry::StreamRegistry;
use crate::DeviceId;

/// Stream management failure.
///
/// Port exhaustion is split out because it signals systemic failure: the
/// daemon must stop loudly instead of logging and moving on.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no free udp port for stream relay: {0}")]
    PortExhausted(#[source] std::io::Error),
    #[error(transparent)]
    Stream(#[from] anyhow::Error),
}

impl StreamError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::PortExhausted(_))
    }
}

/// Root orchestrator: one instance owns all device streams and the pipeline.
pub struct StreamManager {
    registry: Box<dyn StreamRegistry>,
    sources: Box<dyn SourceFactory>,
    /// Host the relay should send datagrams to, as reachable from the
    /// streaming server.
    bind_host: String,
    streams: HashMap<DeviceId, Box<dyn FrameSource>>,
    pipeline: Vec<Box<dyn PipelineElement>>,
}

impl StreamManager {
    pub fn new(
        registry: Box<dyn StreamRegistry>,
        sources: Box<dyn SourceFactory>,
        bind_host: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            sources,
            bind_host: bind_host.into(),
            streams: HashMap::new(),
            pipeline: Vec::new(),
        }
    }

    /// Append an element; registration order is fan-out order.
    pub fn push_element(&mut self, element: Box<dyn PipelineElement>) {
        log::info!("pipeline element registered: {}", element.name());
        self.pipeline.push(element);
    }

    /// Named lookup used for cross-element coordination.
    pub fn get_element_by_name<'a>(
        &'a mut self,
        name: &str,
    ) -> Option<&'a mut (dyn PipelineElement + 'a)> {
        self.pipeline
            .iter_mut()
            .find(|element| element.name() == name)
            .map(|element| element.as_mut() as &mut (dyn PipelineElement + 'a))
    }

    /// Snapshot of the currently managed device ids.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.streams.keys().copied().collect()
    }

    pub fn is_managed(&self, device_id: DeviceId) -> bool {
        self.streams.contains_key(&device_id)
    }

    /// Reconcile the managed set against the external registry.
    ///
    /// A registry fetch failure skips the whole cycle; a per-stream add
    /// failure is logged and skipped. Only port exhaustion propagates.
    pub fn sync_streams(&mut self) -> Result<(), StreamError> {
        let current: HashSet<DeviceId> = match self.registry.fetch_devices() {
            Ok(devices) => devices.into_iter().collect(),
            Err(e) => {
                log::warn!("stream sync failed: {:#}", e);
                return Ok(());
            }
        };
        let existing: HashSet<DeviceId> = self.streams.keys().copied().collect();

        for device_id in current.difference(&existing) {
            log::info!("sync: adding stream {}", device_id);
            if let Err(e) = self.add_stream(*device_id) {
                if e.is_fatal() {
                    return Err(e);
                }
                log::warn!("sync: failed to add stream {}: {:#}", device_id, e);
            }
        }
        for device_id in existing.difference(&current) {
            log::info!("sync: removing stream {}", device_id);
            self.delete_stream(*device_id);
        }
        Ok(())
    }

    /// Open a stream for a device: bind an ephemeral relay port, point the
    /// streaming server at it, open the frame source, then start every
    /// pipeline element in order.
    pub fn add_stream(&mut self, device_id: DeviceId) -> Result<(), StreamError> {
        if self.streams.contains_key(&device_id) {
            log::warn!("stream {}: already managed, ignoring add", device_id);
            return Ok(());
        }

        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(StreamError::PortExhausted)?;
        let port = socket
            .local_addr()
            .map_err(StreamError::PortExhausted)?
            .port();
        self.registry
            .bind_stream(device_id, &format!("{}:{}", self.bind_host, port))?;
        let source = self.sources.open(device_id, socket)?;
        self.streams.insert(device_id, source);
        log::info!("stream {}: added on relay port {}", device_id, port);

        for element in &mut self.pipeline {
            if let Err(e) = element.on_stream_start(device_id) {
                log::error!(
                    "stream {}: element {} failed to start: {:#}",
                    device_id,
                    element.name(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Tear a stream down: close the capture handle (exactly once) and tell
    /// every element, each of which tolerates already-absent state.
    pub fn delete_stream(&mut self, device_id: DeviceId) {
        let Some(source) = self.streams.remove(&device_id) else {
            log::warn!("stream {}: asked to delete an unmanaged stream", device_id);
            return;
        };
        drop(source);

        for element in &mut self.pipeline {
            element.on_stream_end(device_id);
        }
        log::info!("stream {}: removed", device_id);
    }

    /// Read one frame for a device and fan it out to every non-frozen
    /// element in registration order. A read miss does nothing this cycle
    /// unless the source reports itself closed, which removes the stream. An
    /// element error never stops the remaining elements.
    pub fn pipe_stream(&mut self, device_id: DeviceId) {
        let read_result = match self.streams.get_mut(&device_id) {
            Some(source) => source.read_frame().map_err(|e| (e, source.is_open())),
            None => return,
        };
        let frame = match read_result {
            Ok(frame) => frame,
            Err((e, still_open)) => {
                if still_open {
                    log::debug!("stream {}: frame miss: {:#}", device_id, e);
                } else {
                    log::info!("stream {}: source closed, removing", device_id);
                    self.delete_stream(device_id);
                }
                return;
            }
        };

        let mut directives = Vec::new();
        for element in &mut self.pipeline {
            if element.is_frozen(device_id) {
                continue;
            }
            match element.on_frame(device_id, &frame) {
                Ok(mut emitted) => directives.append(&mut emitted),
                Err(e) => log::error!(
                    "stream {}: element {} failed: {:#}",
                    device_id,
                    element.name(),
                    e
                ),
            }
        }
        for directive in directives {
            self.apply_directive(directive);
        }
    }

    fn apply_directive(&mut self, directive: ElementDirective) {
        match directive {
            ElementDirective::Unfreeze { element, device_id } => {
                match self.get_element_by_name(element) {
                    Some(target) => target.unfreeze(device_id),
                    None => log::warn!("directive for unknown element '{}'", element),
                }
            }
        }
    }
}
