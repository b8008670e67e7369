//! Binding document format (JSON or YAML)
//!
//! The on-disk records are loose (strings and optionals) so
//! validation can name the exact entry and field that is wrong. A document
//! is converted to bindings as a whole or not at all.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::transform::{Clamp, Curve, Output, Transform};
use super::{Binding, BindingId, MatchSpec, PrimaryFilter};
use crate::devices::DeviceId;
use crate::error::{Error, Result};
use crate::midi::EventKind;

/// Current document version
pub const DOCUMENT_VERSION: u32 = 1;

/// Serialization format of a binding document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// `.yaml`/`.yml` are YAML, everything else JSON
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingDocument {
    pub version: u32,
    #[serde(default)]
    pub bindings: Vec<BindingRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingRecord {
    pub id: u64,
    /// Device id as 16 hex digits
    #[serde(default)]
    pub device_filter: Option<String>,
    #[serde(default)]
    pub channel_filter: Option<u32>,
    pub kind: String,
    #[serde(default)]
    pub primary_filter: PrimaryRecord,
    #[serde(default)]
    pub transform: TransformRecord,
    #[serde(default)]
    pub note_off_as_zero_velocity: bool,
    pub action_ref: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryRecord {
    #[serde(rename = "type")]
    pub filter_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<u32>,
}

impl Default for PrimaryRecord {
    fn default() -> Self {
        Self {
            filter_type: "any".to_string(),
            low: None,
            high: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRecord {
    #[serde(rename = "type")]
    pub curve_type: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamp: Option<ClampRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exponent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<f64>>,
    #[serde(default)]
    pub invert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputRecord>,
}

impl Default for TransformRecord {
    fn default() -> Self {
        Self::from(&Transform::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClampRecord {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    #[serde(rename = "type")]
    pub output_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_scale() -> f64 {
    1.0
}

impl BindingDocument {
    pub fn from_bindings<'a>(bindings: impl IntoIterator<Item = &'a Binding>) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            bindings: bindings.into_iter().map(BindingRecord::from).collect(),
        }
    }

    pub fn parse(text: &str, format: DocumentFormat) -> Result<Self> {
        match format {
            DocumentFormat::Json => serde_json::from_str(text).map_err(|e| Error::format(e.to_string())),
            DocumentFormat::Yaml => serde_yaml::from_str(text).map_err(|e| Error::format(e.to_string())),
        }
    }

    pub fn write<W: std::io::Write>(&self, writer: W, format: DocumentFormat) -> Result<()> {
        match format {
            DocumentFormat::Json => {
                serde_json::to_writer_pretty(writer, self).map_err(std::io::Error::from)?
            }
            DocumentFormat::Yaml => {
                serde_yaml::to_writer(writer, self).map_err(std::io::Error::other)?
            }
        }
        Ok(())
    }

    /// Validate every record and convert, failing on the first bad entry
    pub fn into_bindings(self) -> Result<Vec<Binding>> {
        if self.version != DOCUMENT_VERSION {
            return Err(Error::format(format!(
                "unsupported document version {} (expected {})",
                self.version, DOCUMENT_VERSION
            )));
        }

        let mut seen = HashSet::new();
        let mut bindings = Vec::with_capacity(self.bindings.len());
        for (index, record) in self.bindings.into_iter().enumerate() {
            if !seen.insert(record.id) {
                return Err(Error::format(format!(
                    "binding[{}]: duplicate id {}",
                    index, record.id
                )));
            }
            let binding = record
                .into_binding()
                .map_err(|msg| Error::format(format!("binding[{}]: {}", index, msg)))?;
            bindings.push(binding);
        }
        Ok(bindings)
    }
}

impl BindingRecord {
    fn into_binding(self) -> std::result::Result<Binding, String> {
        if self.id == 0 {
            return Err("id must be non-zero".to_string());
        }

        let device = self
            .device_filter
            .as_deref()
            .map(|text| {
                text.parse::<DeviceId>()
                    .map_err(|_| format!("invalid device_filter '{}'", text))
            })
            .transpose()?;

        let channel = match self.channel_filter {
            Some(ch) if ch > 15 => return Err(format!("channel_filter {} out of range 0-15", ch)),
            Some(ch) => Some(ch as u8),
            None => None,
        };

        let kind = EventKind::parse(&self.kind).ok_or_else(|| format!("unknown kind '{}'", self.kind))?;
        let primary = self.primary_filter.to_filter()?;
        let transform = self.transform.to_transform()?;

        if self.action_ref.trim().is_empty() {
            return Err("action_ref is empty".to_string());
        }

        Ok(Binding {
            id: BindingId(self.id),
            matcher: MatchSpec {
                device,
                channel,
                kind,
                primary,
                note_off_as_zero_velocity: self.note_off_as_zero_velocity,
            },
            transform,
            action_ref: Arc::from(self.action_ref),
            enabled: self.enabled,
        })
    }
}

fn primary_value(value: Option<u32>, field: &str) -> std::result::Result<u8, String> {
    match value {
        Some(v) if v <= 127 => Ok(v as u8),
        Some(v) => Err(format!("primary_filter.{} {} out of range 0-127", field, v)),
        None => Err(format!("primary_filter.{} is required", field)),
    }
}

fn finite(value: f64, field: &str) -> std::result::Result<f64, String> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("transform.{} must be finite", field))
    }
}

impl PrimaryRecord {
    fn to_filter(&self) -> std::result::Result<PrimaryFilter, String> {
        match self.filter_type.as_str() {
            "any" => Ok(PrimaryFilter::Any),
            "exact" => Ok(PrimaryFilter::Exact(primary_value(self.low, "low")?)),
            "range" => {
                let low = primary_value(self.low, "low")?;
                let high = primary_value(self.high, "high")?;
                if low > high {
                    return Err(format!("primary_filter low {} > high {}", low, high));
                }
                Ok(PrimaryFilter::Range(low, high))
            }
            other => Err(format!("unknown primary_filter type '{}'", other)),
        }
    }
}

impl TransformRecord {
    fn to_transform(&self) -> std::result::Result<Transform, String> {
        let curve = match self.curve_type.as_str() {
            "linear" => Curve::Linear,
            "exponential" => {
                let exponent = self
                    .exponent
                    .ok_or_else(|| "transform.exponent is required for exponential".to_string())?;
                let exponent = finite(exponent, "exponent")?;
                if exponent <= 0.0 {
                    return Err(format!("transform.exponent {} must be positive", exponent));
                }
                Curve::Exponential { exponent }
            }
            "stepped" => {
                let steps = match &self.steps {
                    Some(steps) if !steps.is_empty() => steps.clone(),
                    _ => return Err("transform.steps must not be empty".to_string()),
                };
                for &step in &steps {
                    finite(step, "steps")?;
                }
                Curve::Stepped { steps }
            }
            other => return Err(format!("unknown transform type '{}'", other)),
        };

        let clamp = match &self.clamp {
            Some(ClampRecord { min, max }) => {
                let (min, max) = (finite(*min, "clamp.min")?, finite(*max, "clamp.max")?);
                if min > max {
                    return Err(format!("transform.clamp min {} > max {}", min, max));
                }
                Some(Clamp { min, max })
            }
            None => None,
        };

        let output = match &self.output {
            None => Output::Number,
            Some(record) => match record.output_type.as_str() {
                "number" => Output::Number,
                "bool" => {
                    let threshold = record
                        .threshold
                        .ok_or_else(|| "transform.output.threshold is required for bool".to_string())?;
                    Output::Bool {
                        threshold: finite(threshold, "output.threshold")?,
                    }
                }
                other => return Err(format!("unknown output type '{}'", other)),
            },
        };

        Ok(Transform {
            curve,
            scale: finite(self.scale, "scale")?,
            offset: finite(self.offset, "offset")?,
            clamp,
            invert: self.invert,
            output,
        })
    }
}

impl From<&Binding> for BindingRecord {
    fn from(binding: &Binding) -> Self {
        let matcher = &binding.matcher;
        Self {
            id: binding.id.as_raw(),
            device_filter: matcher.device.map(|d| d.to_string()),
            channel_filter: matcher.channel.map(u32::from),
            kind: matcher.kind.as_str().to_string(),
            primary_filter: PrimaryRecord::from(matcher.primary),
            transform: TransformRecord::from(&binding.transform),
            note_off_as_zero_velocity: matcher.note_off_as_zero_velocity,
            action_ref: binding.action_ref.to_string(),
            enabled: binding.enabled,
        }
    }
}

impl From<PrimaryFilter> for PrimaryRecord {
    fn from(filter: PrimaryFilter) -> Self {
        let (filter_type, low, high) = match filter {
            PrimaryFilter::Any => ("any", None, None),
            PrimaryFilter::Exact(n) => ("exact", Some(u32::from(n)), None),
            PrimaryFilter::Range(lo, hi) => ("range", Some(u32::from(lo)), Some(u32::from(hi))),
        };
        Self {
            filter_type: filter_type.to_string(),
            low,
            high,
        }
    }
}

impl From<&Transform> for TransformRecord {
    fn from(transform: &Transform) -> Self {
        let (curve_type, exponent, steps) = match &transform.curve {
            Curve::Linear => ("linear", None, None),
            Curve::Exponential { exponent } => ("exponential", Some(*exponent), None),
            Curve::Stepped { steps } => ("stepped", None, Some(steps.clone())),
        };
        Self {
            curve_type: curve_type.to_string(),
            scale: transform.scale,
            offset: transform.offset,
            clamp: transform.clamp.map(|c| ClampRecord { min: c.min, max: c.max }),
            exponent,
            steps,
            invert: transform.invert,
            output: match transform.output {
                Output::Number => None,
                Output::Bool { threshold } => Some(OutputRecord {
                    output_type: "bool".to_string(),
                    threshold: Some(threshold),
                }),
            },
        }
    }
}
