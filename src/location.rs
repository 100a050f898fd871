//! Location Module
//!
//! Samples and states observed from the location backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authorization level reported by the backend.
///
/// Raw values follow the platform numbering; anything outside it is kept as
/// `Unknown` so the authorization flow can report it instead of guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthorizationStatus {
    NotDetermined,
    Restricted,
    Denied,
    Always,
    WhenInUse,
    Unknown(i32),
}

impl AuthorizationStatus {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::NotDetermined,
            1 => Self::Restricted,
            2 => Self::Denied,
            3 => Self::Always,
            4 => Self::WhenInUse,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Self::NotDetermined => 0,
            Self::Restricted => 1,
            Self::Denied => 2,
            Self::Always => 3,
            Self::WhenInUse => 4,
            Self::Unknown(raw) => raw,
        }
    }

    /// True for either granted tier.
    pub fn is_authorized(self) -> bool {
        matches!(self, Self::WhenInUse | Self::Always)
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotDetermined => write!(f, "notDetermined"),
            Self::Restricted => write!(f, "restricted"),
            Self::Denied => write!(f, "denied"),
            Self::Always => write!(f, "authorizedAlways"),
            Self::WhenInUse => write!(f, "authorizedWhenInUse"),
            Self::Unknown(raw) => write!(f, "unknown({})", raw),
        }
    }
}

/// A single position fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Horizontal accuracy radius in meters (lower is better).
    pub horizontal_accuracy: f64,
    /// Vertical accuracy in meters (lower is better).
    pub vertical_accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

impl Location {
    /// Fix at the given coordinate, stamped now, with unknown altitude.
    pub fn new(latitude: f64, longitude: f64, horizontal_accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            horizontal_accuracy,
            vertical_accuracy: horizontal_accuracy,
            timestamp: Utc::now(),
        }
    }

    /// Worst of the horizontal and vertical accuracies.
    pub fn synthetic_accuracy(&self) -> f64 {
        self.horizontal_accuracy.max(self.vertical_accuracy)
    }

    /// The backend reports (0, 0) when it has no real fix.
    pub fn is_origin(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

/// Compass sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heading {
    pub magnetic_heading: f64,
    pub true_heading: f64,
    pub heading_accuracy: f64,
    pub timestamp: DateTime<Utc>,
}

/// Opaque token handed out by the backend when push-based monitoring starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PushToken(Vec<u8>);

impl PushToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Parse a hex string. Odd lengths are left-padded with `0`; parsing
    /// stops at the first pair that is not valid hex.
    pub fn from_hex(hex: &str) -> Self {
        let padded = if hex.len() % 2 != 0 {
            format!("0{}", hex)
        } else {
            hex.to_string()
        };

        let mut bytes = Vec::with_capacity(padded.len() / 2);
        for pair in padded.as_bytes().chunks(2) {
            let parsed = std::str::from_utf8(pair)
                .ok()
                .filter(|s| s.chars().all(|c| c.is_ascii_hexdigit()))
                .and_then(|s| u8::from_str_radix(s, 16).ok());
            match parsed {
                Some(byte) => bytes.push(byte),
                None => break,
            }
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl std::fmt::Display for PushToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
