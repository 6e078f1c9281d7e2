//! Model settings as exchanged with the backend

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A model the backend can run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Sampling parameters passed to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub num_predict: u32,
    /// Options this client does not edit, kept for the round trip
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            repeat_penalty: 1.1,
            num_predict: 1000,
            extra: Map::new(),
        }
    }
}

/// Full model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub model: String,
    #[serde(default)]
    pub options: SamplingOptions,
    /// System context sent with every conversation
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options_descriptions: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Config {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            options: SamplingOptions::default(),
            context: String::new(),
            options_descriptions: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    /// Shallow-merge a patch; option fields merge one by one
    pub fn apply(&mut self, patch: &ConfigPatch) {
        if let Some(model) = &patch.model {
            self.model = model.clone();
        }
        if let Some(context) = &patch.context {
            self.context = context.clone();
        }
        if let Some(v) = patch.temperature {
            self.options.temperature = v;
        }
        if let Some(v) = patch.top_p {
            self.options.top_p = v;
        }
        if let Some(v) = patch.top_k {
            self.options.top_k = v;
        }
        if let Some(v) = patch.repeat_penalty {
            self.options.repeat_penalty = v;
        }
        if let Some(v) = patch.num_predict {
            self.options.num_predict = v;
        }
    }

    /// Human description of an option, falling back to built-in text
    pub fn option_description(&self, key: &str) -> &str {
        self.options_descriptions
            .get(key)
            .map(String::as_str)
            .or_else(|| OptionRange::for_key(key).map(|r| r.fallback_description))
            .unwrap_or("")
    }
}

/// Edits to apply to the draft; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    pub model: Option<String>,
    pub context: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
    pub num_predict: Option<u32>,
}

impl ConfigPatch {
    pub fn model(name: impl Into<String>) -> Self {
        Self {
            model: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn context(text: impl Into<String>) -> Self {
        Self {
            context: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn temperature(value: f32) -> Self {
        Self {
            temperature: Some(value),
            ..Default::default()
        }
    }

    /// Build a single-option patch from user input, clamped to the
    /// option's range and snapped to its step
    pub fn from_option_input(key: &str, raw: &str) -> Result<Self> {
        let range = OptionRange::for_key(key).ok_or_else(|| {
            ClientError::InvalidState(format!("Unknown option: {}", key))
        })?;
        let value = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                ClientError::InvalidState(format!("Not a number for {}: {}", key, raw.trim()))
            })?;
        let value = range.clamp(value);

        let mut patch = Self::default();
        match range.key {
            "temperature" => patch.temperature = Some(value as f32),
            "top_p" => patch.top_p = Some(value as f32),
            "top_k" => patch.top_k = Some(value.round() as u32),
            "repeat_penalty" => patch.repeat_penalty = Some(value as f32),
            "num_predict" => patch.num_predict = Some(value.round() as u32),
            other => {
                return Err(ClientError::InvalidState(format!("Unknown option: {}", other)))
            }
        }
        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Declared domain of a range-constrained option
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRange {
    pub key: &'static str,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub fallback_description: &'static str,
}

impl OptionRange {
    pub const TEMPERATURE: OptionRange = OptionRange {
        key: "temperature",
        min: 0.0,
        max: 1.0,
        step: 0.1,
        fallback_description: "Temperature - controls creativity",
    };
    pub const TOP_P: OptionRange = OptionRange {
        key: "top_p",
        min: 0.0,
        max: 1.0,
        step: 0.05,
        fallback_description: "Nucleus sampling",
    };
    pub const TOP_K: OptionRange = OptionRange {
        key: "top_k",
        min: 10.0,
        max: 100.0,
        step: 5.0,
        fallback_description: "Number of candidate words",
    };
    pub const REPEAT_PENALTY: OptionRange = OptionRange {
        key: "repeat_penalty",
        min: 1.0,
        max: 2.0,
        step: 0.1,
        fallback_description: "Penalty for repetition",
    };
    pub const NUM_PREDICT: OptionRange = OptionRange {
        key: "num_predict",
        min: 200.0,
        max: 2000.0,
        step: 100.0,
        fallback_description: "Maximum number of words",
    };

    pub const ALL: [OptionRange; 5] = [
        Self::TEMPERATURE,
        Self::TOP_P,
        Self::TOP_K,
        Self::REPEAT_PENALTY,
        Self::NUM_PREDICT,
    ];

    pub fn for_key(key: &str) -> Option<&'static OptionRange> {
        Self::ALL.iter().find(|r| r.key == key)
    }

    /// Clamp into `[min, max]` and snap to the nearest step from `min`
    ///
    /// NaN maps to `min`.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        let clamped = value.clamp(self.min, self.max);
        let steps = ((clamped - self.min) / self.step).round();
        let snapped = self.min + steps * self.step;
        // Round away float noise such as 0.30000000000000004
        let snapped = (snapped * 1e6).round() / 1e6;
        snapped.clamp(self.min, self.max)
    }
}
