use crate::error::CliError;
use engine_config::process::{ProcessConfiguration, yaml::YamlProcessConfiguration};

pub fn render_process_config(
    config: &ProcessConfiguration,
    as_json: bool,
) -> Result<String, CliError> {
    if as_json {
        let doc = YamlProcessConfiguration::from(config);
        Ok(serde_json::to_string_pretty(&doc)?)
    } else {
        Ok(config.to_yaml()?)
    }
}
