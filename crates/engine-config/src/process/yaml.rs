//! YAML document form of [`ProcessConfiguration`].
//!
//! Every field is optional so operators can persist partial documents;
//! missing fields are filled from a base configuration when loaded.

use super::{AlgorithmConfiguration, ProcessConfiguration, ReadConfiguration, WriteConfiguration};
use crate::error::ProcessConfigError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlProcessConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<YamlReadConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<YamlWriteConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_channel: Option<YamlAlgorithmConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlReadConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharding_size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlWriteConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YamlAlgorithmConfiguration {
    #[serde(rename = "type")]
    pub kind: String,
    /// Scalars of any YAML type; read back as their text form.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, Value>,
}

impl YamlProcessConfiguration {
    pub fn from_yaml(text: &str) -> Result<Self, ProcessConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(ProcessConfigError::Parse)
    }

    pub fn to_yaml(&self) -> Result<String, ProcessConfigError> {
        serde_yaml::to_string(self).map_err(ProcessConfigError::Serialize)
    }

    /// Resolves the document against `base`, taking every missing field from it.
    pub fn fill_in(self, base: &ProcessConfiguration) -> Result<ProcessConfiguration, ProcessConfigError> {
        let read = self.read.unwrap_or_default();
        let write = self.write.unwrap_or_default();

        let stream_channel = match self.stream_channel {
            Some(channel) => AlgorithmConfiguration {
                kind: channel.kind,
                props: channel
                    .props
                    .into_iter()
                    .map(|(k, v)| scalar_text(&k, v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            },
            None => base.stream_channel.clone(),
        };

        Ok(ProcessConfiguration {
            read: ReadConfiguration {
                concurrency: read.concurrency.unwrap_or(base.read.concurrency),
                batch_size: read.batch_size.unwrap_or(base.read.batch_size),
                sharding_size: read.sharding_size.unwrap_or(base.read.sharding_size),
            },
            write: WriteConfiguration {
                concurrency: write.concurrency.unwrap_or(base.write.concurrency),
                batch_size: write.batch_size.unwrap_or(base.write.batch_size),
            },
            stream_channel,
        })
    }

    /// Fills missing fields with the built-in defaults.
    pub fn fill_in_defaults(self) -> Result<ProcessConfiguration, ProcessConfigError> {
        self.fill_in(&ProcessConfiguration::default())
    }
}

impl From<&ProcessConfiguration> for YamlProcessConfiguration {
    fn from(config: &ProcessConfiguration) -> Self {
        Self {
            read: Some(YamlReadConfiguration {
                concurrency: Some(config.read.concurrency),
                batch_size: Some(config.read.batch_size),
                sharding_size: Some(config.read.sharding_size),
            }),
            write: Some(YamlWriteConfiguration {
                concurrency: Some(config.write.concurrency),
                batch_size: Some(config.write.batch_size),
            }),
            stream_channel: Some(YamlAlgorithmConfiguration {
                kind: config.stream_channel.kind.clone(),
                props: config
                    .stream_channel
                    .props
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            }),
        }
    }
}

impl ProcessConfiguration {
    /// Canonical YAML text, the form configurations are stored and compared in.
    pub fn to_yaml(&self) -> Result<String, ProcessConfigError> {
        YamlProcessConfiguration::from(self).to_yaml()
    }
}

fn scalar_text(key: &str, value: Value) -> Result<String, ProcessConfigError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ProcessConfigError::Invalid(format!(
            "property '{key}' must be a scalar value"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_takes_missing_fields_from_base() {
        let doc = YamlProcessConfiguration::from_yaml(
            "read:\n  shardingSize: 10\nstreamChannel:\n  type: MEMORY\n  props:\n    block-queue-size: 64\n",
        )
        .unwrap();

        let config = doc.fill_in_defaults().unwrap();
        assert_eq!(config.read.sharding_size, 10);
        assert_eq!(config.read.batch_size, 1000);
        assert_eq!(config.write, WriteConfiguration::default());
        assert_eq!(config.stream_channel.props["block-queue-size"], "64");
    }

    #[test]
    fn empty_document_is_default() {
        let config = YamlProcessConfiguration::from_yaml("  ")
            .unwrap()
            .fill_in_defaults()
            .unwrap();
        assert_eq!(config, ProcessConfiguration::default());
    }

    #[test]
    fn yaml_text_is_stable() {
        let config = ProcessConfiguration::default();
        let text = config.to_yaml().unwrap();

        assert!(text.contains("batchSize: 1000"));
        assert!(text.contains("type: MEMORY"));

        let reloaded = YamlProcessConfiguration::from_yaml(&text)
            .unwrap()
            .fill_in_defaults()
            .unwrap();
        assert_eq!(reloaded.to_yaml().unwrap(), text);
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert!(matches!(
            YamlProcessConfiguration::from_yaml("read: [1, 2]"),
            Err(ProcessConfigError::Parse(_))
        ));
    }
}
