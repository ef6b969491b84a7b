//! Blocking HTTP client for the WhatsApp sidecar.
//!
//! Runs on the protocol run-loop thread, so it uses `reqwest::blocking`. The
//! HTTP client is built inside [`ProtocolClient::connect`] so it is created
//! and dropped on that thread, never inside the async runtime.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::events::SidecarEvent;
use super::SidecarError;
use crate::protocol::{OutgoingStanza, Poll, ProtocolClient, ProtocolError, ProtocolEvent};

/// Default URL the sidecar listens on.
pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:3001";

/// HTTP connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Request timeout for non-polling calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Slack added on top of the long-poll timeout.
const POLL_GRACE_MS: u64 = 2_000;

/// Account credentials handed to the sidecar on connect.
#[derive(Clone, Serialize)]
pub struct SidecarCredentials {
    /// Phone number including country code, without `+`.
    pub phone: String,
    /// Decoded account password.
    pub password: String,
}

impl std::fmt::Debug for SidecarCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarCredentials")
            .field("phone", &self.phone)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Response envelope from the sidecar HTTP API. Any `data` payload is ignored.
#[derive(Deserialize)]
struct BridgeResponse {
    success: bool,
    error: Option<String>,
}

/// Interpret a sidecar reply to a command.
///
/// A successful status with an unparseable body counts as success.
fn check_envelope(status: reqwest::StatusCode, body: &str) -> Result<(), SidecarError> {
    match serde_json::from_str::<BridgeResponse>(body) {
        Ok(envelope) if status.is_success() && envelope.success => Ok(()),
        Ok(envelope) => Err(SidecarError::Rejected(
            envelope.error.unwrap_or_else(|| format!("HTTP {status}")),
        )),
        Err(_) if status.is_success() => Ok(()),
        Err(_) => Err(SidecarError::Rejected(format!("HTTP {status}"))),
    }
}

/// Stanza body for `POST /send`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SendRequest<'a> {
    Text {
        id: &'a str,
        jid: &'a str,
        text: &'a str,
    },
    Receipt {
        id: &'a str,
        jid: &'a str,
        receipt_type: &'a str,
        participant: Option<&'a str>,
    },
    Ack {
        id: &'a str,
        jid: &'a str,
        class: &'a str,
        receipt_type: Option<&'a str>,
    },
}

impl<'a> From<&'a OutgoingStanza> for SendRequest<'a> {
    fn from(stanza: &'a OutgoingStanza) -> Self {
        match stanza {
            OutgoingStanza::Text { id, to, body } => Self::Text {
                id,
                jid: to,
                text: body,
            },
            OutgoingStanza::Receipt {
                id,
                to,
                kind,
                participant,
            } => Self::Receipt {
                id,
                jid: to,
                receipt_type: kind.as_str(),
                participant: participant.as_deref(),
            },
            OutgoingStanza::Ack {
                id,
                to,
                class,
                kind,
            } => Self::Ack {
                id,
                jid: to,
                class,
                receipt_type: kind.map(|k| k.as_str()),
            },
        }
    }
}

/// Protocol client that delegates the WhatsApp session to the sidecar.
pub struct SidecarClient {
    base_url: String,
    credentials: SidecarCredentials,
    http: Option<reqwest::blocking::Client>,
    pending: VecDeque<SidecarEvent>,
}

impl SidecarClient {
    /// Create a client for the sidecar at `base_url`.
    pub fn new(base_url: impl Into<String>, credentials: SidecarCredentials) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            credentials,
            http: None,
            pending: VecDeque::new(),
        }
    }

    /// Returns the base URL of the sidecar.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn http(&self) -> Result<&reqwest::blocking::Client, ProtocolError> {
        self.http.as_ref().ok_or(ProtocolError::NotConnected)
    }

    fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), SidecarError> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| SidecarError::Rejected("client not connected".to_owned()))?;
        let url = format!("{}{path}", self.base_url);
        let resp = http.post(&url).json(body).send()?;
        let status = resp.status();
        let text = resp.text()?;
        check_envelope(status, &text)
    }

    fn fetch_events(&mut self, timeout: Duration) -> Result<(), ProtocolError> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let url = format!("{}/events/poll?timeout_ms={timeout_ms}", self.base_url);
        let request_timeout = timeout.saturating_add(Duration::from_millis(POLL_GRACE_MS));
        let resp = match self.http()?.get(&url).timeout(request_timeout).send() {
            Ok(resp) => resp,
            // Normal: long-poll timeout expired.
            Err(e) if e.is_timeout() => return Ok(()),
            Err(e) => return Err(SidecarError::from(e).into()),
        };
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "event poll returned non-200");
            return Ok(());
        }
        let events: Vec<SidecarEvent> = resp.json().map_err(SidecarError::from)?;
        self.pending.extend(events);
        Ok(())
    }
}

impl std::fmt::Debug for SidecarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field("connected", &self.http.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl ProtocolClient for SidecarClient {
    fn connect(&mut self) -> Result<(), ProtocolError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        self.http = Some(http);
        self.post("/connect", &self.credentials)
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        debug!(base_url = %self.base_url, phone = %self.credentials.phone, "sidecar session opened");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), ProtocolError> {
        self.post("/disconnect", &serde_json::json!({}))
            .map_err(ProtocolError::from)
    }

    fn send(&mut self, stanza: OutgoingStanza) -> Result<(), ProtocolError> {
        let request = SendRequest::from(&stanza);
        self.post("/send", &request)
            .map_err(|e| ProtocolError::Send(e.to_string()))
    }

    fn poll(&mut self, timeout: Duration) -> Result<Poll, ProtocolError> {
        if self.pending.is_empty() {
            self.fetch_events(timeout)?;
        }
        while let Some(raw) = self.pending.pop_front() {
            match raw.into_protocol_event() {
                Ok(Some(event)) => return Ok(Poll::Event(event)),
                Ok(None) => return Ok(Poll::Closed),
                Err(e) => {
                    warn!(error = %e, "skipping malformed sidecar event");
                }
            }
        }
        Ok(Poll::Idle)
    }
}

/// Convenience for tests and diagnostics: decode a poll response body.
///
/// # Errors
///
/// Returns an error if the body is not a JSON array of sidecar events.
pub fn parse_poll_body(body: &str) -> Result<Vec<ProtocolEvent>, SidecarError> {
    let raw: Vec<SidecarEvent> =
        serde_json::from_str(body).map_err(|e| SidecarError::MalformedEvent(e.to_string()))?;
    let mut events = Vec::with_capacity(raw.len());
    for event in raw {
        if let Some(event) = event.into_protocol_event()? {
            events.push(event);
        }
    }
    Ok(events)
}
