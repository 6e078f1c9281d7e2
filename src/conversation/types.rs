use serde::{Deserialize, Serialize};

/// One user input paired with one system output, as stored by the backend
///
/// Turns have no identity of their own; their position in the log is the key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub input_timestamp: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub output_timestamp: String,
    /// Settings annotation, `|`-separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<String>,
}

impl ConversationTurn {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn with_timestamps(
        mut self,
        input_timestamp: impl Into<String>,
        output_timestamp: impl Into<String>,
    ) -> Self {
        self.input_timestamp = input_timestamp.into();
        self.output_timestamp = output_timestamp.into();
        self
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self
    }

    pub fn with_response_time(mut self, response_time: impl Into<String>) -> Self {
        self.response_time = Some(response_time.into());
        self
    }

    /// The settings annotation split into its display items
    pub fn config_items(&self) -> Vec<&str> {
        self.config
            .as_deref()
            .map(|c| {
                c.split('|')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
