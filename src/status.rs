//! Status observations and the per-component edge detector.
//!
//! The bus status channel is for changes of condition. The protocol client
//! reports "connected" and transient errors repeatedly, so every observation
//! passes through [`StatusEdgeDetector`] before it is published.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Component name for the protocol connection.
pub const COMPONENT_CONNECTION: &str = "connection";

/// Component name for inbound message handling.
pub const COMPONENT_INBOUND: &str = "inbound";

/// Component name for outbound message handling.
pub const COMPONENT_OUTBOUND: &str = "outbound";

/// Health level of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    /// Operating normally.
    Ok,
    /// Operating, but some work is failing.
    Degraded,
    /// Not operating.
    Down,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Down => "down",
        };
        f.write_str(s)
    }
}

/// A status observation as published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusObservation {
    /// Logical subsystem, e.g. `connection`.
    pub component: String,
    /// Level being reported.
    pub status: StatusLevel,
    /// Machine-readable reason, e.g. `disconnected`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable summary.
    pub message: String,
    /// Free-form diagnostic payload.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl StatusObservation {
    /// Build an observation with empty details.
    pub fn new(
        component: impl Into<String>,
        status: StatusLevel,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            status,
            kind: kind.into(),
            message: message.into(),
            details: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach diagnostic details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Remembers the last emitted level per component.
///
/// Shared between the bus context and anything reporting connection changes,
/// so access goes through an internal mutex.
#[derive(Debug, Default)]
pub struct StatusEdgeDetector {
    last: Mutex<HashMap<String, StatusLevel>>,
}

impl StatusEdgeDetector {
    /// Create a detector with no recorded levels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detector pre-seeded with known levels.
    pub fn with_initial(initial: HashMap<String, StatusLevel>) -> Self {
        Self {
            last: Mutex::new(initial),
        }
    }

    /// Returns `true` if `status` differs from the last level recorded for
    /// `component`, recording it. Returns `false` for a repeat.
    pub fn check_status(&self, component: &str, status: StatusLevel) -> bool {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if last.get(component) == Some(&status) {
            debug!(component, %status, "suppressing repeated status");
            return false;
        }
        last.insert(component.to_owned(), status);
        true
    }

    /// The last level recorded for `component`, if any.
    pub fn last_status(&self, component: &str) -> Option<StatusLevel> {
        let last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.get(component).copied()
    }
}
