//! Streaming-registry client.
//!
//! The streaming server owns the set of live devices and the UDP relay. This
//! module provides the `StreamRegistry` port the manager reconciles against,
//! plus the HTTP implementation speaking the server's envelope format:
//! `{ "status": "success"|..., "message": ..., "payload": { "devices": [...] } }`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::DeviceId;

const STREAMS_ENDPOINT: &str = "/streaming-server/v1/http/streams/all";
const UDP_START_ENDPOINT: &str = "/streaming-server/v1/http/udp_stream_start";

/// External stream registry port.
pub trait StreamRegistry {
    /// Current set of live device ids.
    fn fetch_devices(&self) -> Result<Vec<DeviceId>>;

    /// Ask the relay to forward the device's feed to `local_addr`
    /// ("host:port").
    fn bind_stream(&self, device_id: DeviceId, local_addr: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    message: Option<String>,
    payload: Option<StreamsPayload>,
}

#[derive(Debug, Deserialize)]
struct StreamsPayload {
    #[serde(default)]
    devices: Vec<DeviceId>,
}

/// Parse a streams/all response body into device ids.
fn parse_streams_response(body: &str) -> Result<Vec<DeviceId>> {
    let envelope: Envelope =
        serde_json::from_str(body).context("parse streaming server response")?;
    if envelope.status != "success" {
        return Err(anyhow!(
            "streaming server error: {}",
            envelope
                .message
                .unwrap_or_else(|| format!("status '{}'", envelope.status))
        ));
    }
    Ok(envelope.payload.map(|p| p.devices).unwrap_or_default())
}

/// HTTP client for the streaming server.
pub struct HttpStreamRegistry {
    base_url: String,
}

impl HttpStreamRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl StreamRegistry for HttpStreamRegistry {
    fn fetch_devices(&self) -> Result<Vec<DeviceId>> {
        let body = ureq::get(&self.endpoint(STREAMS_ENDPOINT))
            .call()
            .context("fetch streams")?
            .into_string()
            .context("read streams response")?;
        parse_streams_response(&body)
    }

    fn bind_stream(&self, device_id: DeviceId, local_addr: &str) -> Result<()> {
        ureq::post(&self.endpoint(UDP_START_ENDPOINT))
            .send_json(serde_json::json!({
                "device_id": device_id,
                "address": local_addr,
            }))
            .with_context(|| format!("request udp relay for device {}", device_id))?;
        Ok(())
    }
}
