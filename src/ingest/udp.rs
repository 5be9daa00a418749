//! UDP RTP/JPEG frame source.
//!
//! The streaming server relays each device's feed as RTP packets with JPEG
//! payloads (payload type 26) to the local port the manager requested. This
//! source reassembles one JPEG per marker bit and decodes it in memory.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceFactory};
use crate::DeviceId;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const RTP_JPEG_PAYLOAD_TYPE: u8 = 26;

/// Opens `UdpFrameSource`s with the configured timeouts.
#[derive(Clone, Debug)]
pub struct UdpSourceFactory {
    /// Budget for assembling one frame in `read_frame`.
    pub read_timeout: Duration,
    /// How long a fresh source may stay silent before it counts as closed.
    pub open_timeout: Duration,
}

impl Default for UdpSourceFactory {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(200),
            open_timeout: Duration::from_millis(1000),
        }
    }
}

impl SourceFactory for UdpSourceFactory {
    fn open(&self, device_id: DeviceId, socket: UdpSocket) -> Result<Box<dyn FrameSource>> {
        let port = socket.local_addr().context("query relay socket address")?.port();
        socket
            .set_read_timeout(Some(self.read_timeout))
            .context("set udp read timeout")?;
        log::info!("stream {}: udp source listening on port {}", device_id, port);
        Ok(Box::new(UdpFrameSource {
            socket,
            assembly: Vec::with_capacity(128 * 1024),
            opened_at: Instant::now(),
            last_activity: None,
            closed: false,
            frame_count: 0,
            read_timeout: self.read_timeout,
            open_timeout: self.open_timeout,
        }))
    }
}

/// Frame source over one exclusively-owned relay socket.
pub struct UdpFrameSource {
    socket: UdpSocket,
    assembly: Vec<u8>,
    opened_at: Instant,
    last_activity: Option<Instant>,
    closed: bool,
    frame_count: u64,
    read_timeout: Duration,
    open_timeout: Duration,
}

impl UdpFrameSource {
    /// Grace before silence counts as a closed stream. Sized so a handful of
    /// missed read windows does not tear the stream down.
    fn silence_grace(&self) -> Duration {
        (self.read_timeout * 6).max(Duration::from_secs(2))
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

impl FrameSource for UdpFrameSource {
    fn read_frame(&mut self) -> Result<Frame> {
        let deadline = Instant::now() + self.read_timeout;
        let mut packet = vec![0u8; 64 * 1024];

        loop {
            let len = match self.socket.recv(&mut packet) {
                Ok(len) => len,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Err(anyhow!("no frame within read timeout"));
                }
                Err(e) => {
                    self.closed = true;
                    return Err(anyhow!("relay socket failed: {}", e));
                }
            };
            self.last_activity = Some(Instant::now());

            let (payload, marker) = match parse_rtp_payload(&packet[..len]) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::debug!("dropping malformed rtp packet: {}", e);
                    continue;
                }
            };

            if !payload.is_empty() {
                if self.assembly.len() + payload.len() > MAX_JPEG_BYTES {
                    self.assembly.clear();
                    return Err(anyhow!("rtp frame exceeded max jpeg size"));
                }
                self.assembly.extend_from_slice(payload);
            }

            if marker && !self.assembly.is_empty() {
                let jpeg = std::mem::take(&mut self.assembly);
                let frame = Frame::from_jpeg(&jpeg)?;
                self.frame_count += 1;
                return Ok(frame);
            }

            if Instant::now() >= deadline {
                return Err(anyhow!("no complete frame within read timeout"));
            }
        }
    }

    fn is_open(&self) -> bool {
        if self.closed {
            return false;
        }
        match self.last_activity {
            Some(at) => at.elapsed() <= self.silence_grace(),
            // Never heard from the relay: allow the open window plus grace.
            None => self.opened_at.elapsed() <= self.open_timeout + self.silence_grace(),
        }
    }
}

fn parse_rtp_payload(packet: &[u8]) -> Result<(&[u8], bool)> {
    if packet.len() < 12 {
        return Err(anyhow!("rtp packet too small"));
    }
    let b0 = packet[0];
    let b1 = packet[1];
    let version = b0 >> 6;
    if version != 2 {
        return Err(anyhow!("unsupported rtp version {}", version));
    }
    let padding = (b0 & 0x20) != 0;
    let extension = (b0 & 0x10) != 0;
    let csrc_count = (b0 & 0x0F) as usize;
    let marker = (b1 & 0x80) != 0;
    let payload_type = b1 & 0x7F;
    if payload_type != RTP_JPEG_PAYLOAD_TYPE {
        return Err(anyhow!(
            "unsupported rtp payload type {}; expected {}",
            payload_type,
            RTP_JPEG_PAYLOAD_TYPE
        ));
    }

    let mut offset = 12 + csrc_count * 4;
    if packet.len() < offset {
        return Err(anyhow!("rtp packet missing csrc entries"));
    }

    if extension {
        if packet.len() < offset + 4 {
            return Err(anyhow!("rtp extension header truncated"));
        }
        let ext_len = u16::from_be_bytes([packet[offset + 2], packet[offset + 3]]) as usize;
        offset += 4 + ext_len * 4;
    }

    if packet.len() < offset {
        return Err(anyhow!("rtp packet truncated"));
    }

    let mut payload_end = packet.len();
    if padding {
        let pad_len = *packet.last().unwrap_or(&0) as usize;
        if pad_len > payload_end - offset {
            return Err(anyhow!("invalid rtp padding"));
        }
        payload_end -= pad_len;
    }

    Ok((&packet[offset..payload_end], marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp_packet(payload: &[u8], marker: bool) -> Vec<u8> {
        let mut packet = vec![0u8; 12];
        packet[0] = 2 << 6;
        packet[1] = RTP_JPEG_PAYLOAD_TYPE | if marker { 0x80 } else { 0 };
        packet.extend_from_slice(payload);
        packet
    }

    fn open_pair(read_timeout_ms: u64) -> (Box<dyn FrameSource>, UdpSocket, std::net::SocketAddr) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();
        let factory = UdpSourceFactory {
            read_timeout: Duration::from_millis(read_timeout_ms),
            open_timeout: Duration::from_millis(1000),
        };
        let source = factory.open(7, receiver).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        (source, sender, addr)
    }

    #[test]
    fn reassembles_frame_split_across_packets() {
        let (mut source, sender, addr) = open_pair(500);
        let jpeg = Frame::new(vec![10u8; 16 * 16 * 3], 16, 16)
            .unwrap()
            .encode_jpeg()
            .unwrap();
        let mid = jpeg.len() / 2;
        sender.send_to(&rtp_packet(&jpeg[..mid], false), addr).unwrap();
        sender.send_to(&rtp_packet(&jpeg[mid..], true), addr).unwrap();

        let frame = source.read_frame().unwrap();
        assert_eq!(frame.width, 16);
        assert_eq!(frame.height, 16);
        assert!(source.is_open());
    }

    #[test]
    fn read_timeout_is_a_miss_not_a_close() {
        let (mut source, _sender, _addr) = open_pair(20);
        assert!(source.read_frame().is_err());
        assert!(source.is_open());
    }

    #[test]
    fn malformed_packets_are_skipped() {
        let (mut source, sender, addr) = open_pair(500);
        sender.send_to(b"junk", addr).unwrap();
        let jpeg = Frame::new(vec![0u8; 8 * 8 * 3], 8, 8)
            .unwrap()
            .encode_jpeg()
            .unwrap();
        sender.send_to(&rtp_packet(&jpeg, true), addr).unwrap();
        assert!(source.read_frame().is_ok());
    }

    #[test]
    fn rejects_wrong_payload_type() {
        let mut packet = rtp_packet(b"data", true);
        packet[1] = 0x80 | 96;
        assert!(parse_rtp_payload(&packet).is_err());
    }
}
