//! Data models shared by the ingestion store, alert engine and HTTP gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ---

/// One timestamped sample from a device, immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    // ---
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub is_demo: bool,
}

/// Reading-shaped record as posted by a device or bridge script.
///
/// Every field is optional at the serde level so that a missing field is
/// reported as a validation error naming the field instead of a generic
/// decode failure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestPayload {
    // ---
    pub device_id: Option<String>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub rssi: Option<f64>,
}

impl IngestPayload {
    // ---
    /// Validate the payload and stamp the server-side timestamp and demo flag.
    pub fn into_reading(self, now: DateTime<Utc>, is_demo: bool) -> Result<Reading, ValidationError> {
        // ---
        let device_id = self
            .device_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::MissingDeviceId)?;

        let temperature_c = self
            .temperature_c
            .ok_or(ValidationError::Missing("temperatureC"))?;
        ensure_finite("temperatureC", temperature_c)?;

        if let Some(h) = self.humidity_pct {
            ensure_finite("humidityPct", h)?;
        }
        let rssi = match self.rssi {
            Some(r) => {
                ensure_finite("rssi", r)?;
                Some(r.round() as i32)
            }
            None => None,
        };

        Ok(Reading {
            device_id,
            timestamp: now,
            temperature_c,
            humidity_pct: self.humidity_pct,
            rssi,
            is_demo,
        })
    }
}

fn ensure_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NotFinite(field))
    }
}

/// Lower/upper temperature bounds that define a breach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    // ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_c: Option<f64>,
}

impl ThresholdConfig {
    // ---
    pub fn high(high_c: f64) -> Self {
        Self {
            low_c: None,
            high_c: Some(high_c),
        }
    }

    pub fn low(low_c: f64) -> Self {
        Self {
            low_c: Some(low_c),
            high_c: None,
        }
    }

    /// True when neither bound is configured.
    pub fn is_empty(&self) -> bool {
        self.low_c.is_none() && self.high_c.is_none()
    }
}

/// Which side of the configured band a breach is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertVariant {
    Low,
    High,
}

impl std::fmt::Display for AlertVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertVariant::Low => f.write_str("low"),
            AlertVariant::High => f.write_str("high"),
        }
    }
}

/// Externally visible record of a current breach.
///
/// `triggered_at` is stamped when the breach begins and carried forward
/// unchanged while the device stays on the same side of the band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAlert {
    // ---
    pub device_id: String,
    pub variant: AlertVariant,
    pub temperature_c: f64,
    pub threshold_c: f64,
    pub triggered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_identity: Option<String>,
}

impl ActiveAlert {
    // ---
    /// One-line human summary used as notification subject / SMS body.
    pub fn summary(&self) -> String {
        // ---
        let room = self.room_label.as_deref().unwrap_or(&self.device_id);
        let direction = match self.variant {
            AlertVariant::High => "above",
            AlertVariant::Low => "below",
        };
        format!(
            "{room}: {:.1}°C is {direction} the {:.1}°C threshold",
            self.temperature_c, self.threshold_c
        )
    }
}
