//! Synthetic and scripted frame sources.
//!
//! `SyntheticFrameSource` backs the daemon's debug mode: it generates a
//! simple moving pattern so the whole pipeline can run without a camera or a
//! relay. `ScriptedFrameSource` backs tests: frames are pushed through a
//! shared handle and the source can be closed on demand.

use std::collections::{HashMap, VecDeque};
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceFactory};
use crate::DeviceId;

/// Always-open source producing a synthetic scene.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
        }
    }

    /// Fill the frame with a pattern that drifts with the frame counter, so
    /// consecutive frames differ the way a live scene would.
    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count * 3) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticFrameSource {
    fn read_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        Frame::new(self.generate_pixels(), self.width, self.height)
    }

    fn is_open(&self) -> bool {
        true
    }
}

/// Factory for debug mode; ignores the relay socket.
#[derive(Clone, Debug)]
pub struct SyntheticSourceFactory {
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticSourceFactory {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

impl SourceFactory for SyntheticSourceFactory {
    fn open(&self, device_id: DeviceId, _socket: UdpSocket) -> Result<Box<dyn FrameSource>> {
        log::info!("stream {}: synthetic source (debug)", device_id);
        Ok(Box::new(SyntheticFrameSource::new(self.width, self.height)))
    }
}

#[derive(Default)]
struct ScriptState {
    frames: VecDeque<Frame>,
    closed: bool,
}

/// Shared handle that feeds a scripted source from test code.
#[derive(Clone, Default)]
pub struct ScriptedSourceHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSourceHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&self, frame: Frame) {
        self.state.lock().unwrap().frames.push_back(frame);
    }

    /// Make the source report itself closed.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

struct ScriptedFrameSource {
    state: Arc<Mutex<ScriptState>>,
}

impl FrameSource for ScriptedFrameSource {
    fn read_frame(&mut self) -> Result<Frame> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(anyhow!("scripted source closed"));
        }
        state
            .frames
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted frame queued"))
    }

    fn is_open(&self) -> bool {
        !self.state.lock().unwrap().closed
    }
}

/// Factory handing out scripted sources keyed by device id.
///
/// Tests grab a device's handle (before or after the stream opens), queue
/// frames on it, and can fail the next open to exercise error paths.
#[derive(Default)]
pub struct ScriptedSourceFactory {
    handles: Mutex<HashMap<DeviceId, ScriptedSourceHandle>>,
    opened: Mutex<Vec<DeviceId>>,
    fail_open: Mutex<Vec<DeviceId>>,
}

impl ScriptedSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle for a device, created on first use.
    pub fn handle(&self, device_id: DeviceId) -> ScriptedSourceHandle {
        self.handles
            .lock()
            .unwrap()
            .entry(device_id)
            .or_default()
            .clone()
    }

    /// Devices opened so far, in order.
    pub fn opened_devices(&self) -> Vec<DeviceId> {
        self.opened.lock().unwrap().clone()
    }

    /// Make the next open for `device_id` fail.
    pub fn fail_open_for(&self, device_id: DeviceId) {
        self.fail_open.lock().unwrap().push(device_id);
    }
}

impl SourceFactory for ScriptedSourceFactory {
    fn open(&self, device_id: DeviceId, _socket: UdpSocket) -> Result<Box<dyn FrameSource>> {
        {
            let mut fail = self.fail_open.lock().unwrap();
            if let Some(pos) = fail.iter().position(|d| *d == device_id) {
                fail.remove(pos);
                return Err(anyhow!("scripted open failure for device {}", device_id));
            }
        }
        self.opened.lock().unwrap().push(device_id);
        let handle = self.handle(device_id);
        Ok(Box::new(ScriptedFrameSource {
            state: handle.state,
        }))
    }
}
