//! Frame ingestion sources.
//!
//! One source per device stream, opened by the manager against an ephemeral
//! local UDP port the relay forwards to:
//! - `udp`: RTP/JPEG datagrams from the streaming server's relay
//! - `stub`: synthetic source (debug mode) and scripted source (tests)
//!
//! Sources yield decoded frames or a per-cycle miss; they never buffer or
//! replay. A source that stops receiving reports itself closed via
//! `is_open`, which is the manager's signal to tear the stream down.

mod stub;
mod udp;

pub use stub::{
    ScriptedSourceFactory, ScriptedSourceHandle, SyntheticFrameSource, SyntheticSourceFactory,
};
pub use udp::{UdpFrameSource, UdpSourceFactory};

use std::net::UdpSocket;

use anyhow::Result;

use crate::frame::Frame;
use crate::DeviceId;

/// One device's frame source.
pub trait FrameSource {
    /// Read one frame. An error is a transient miss for this cycle; the
    /// caller decides whether the source is gone by checking `is_open`.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Whether the source still considers itself live.
    fn is_open(&self) -> bool;
}

/// Opens a `FrameSource` over a relay socket the manager already bound.
///
/// The manager owns port acquisition (so port exhaustion stays its error to
/// classify); the factory owns everything after the socket exists.
pub trait SourceFactory {
    fn open(&self, device_id: DeviceId, socket: UdpSocket) -> Result<Box<dyn FrameSource>>;
}

impl<T: SourceFactory + ?Sized> SourceFactory for std::sync::Arc<T> {
    fn open(&self, device_id: DeviceId, socket: UdpSocket) -> Result<Box<dyn FrameSource>> {
        (**self).open(device_id, socket)
    }
}
