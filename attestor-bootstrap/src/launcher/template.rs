use std::sync::Arc;

use error_stack::{ensure, Result};
use serde::{Deserialize, Serialize};

use super::{Error, LaunchParameters};

const DEFAULT_TEMPLATE: &str = r#"[server]
listen_addr = "0.0.0.0:8080"
log_level = "info"

[signer]
keystore_path = "/config/keystore"

[adapter]
url = "{adapter_url}"
router_address = "{router_address}"
network = "{network}"

[instance]
index = {index}
"#;

/// Textual attestor configuration with placeholders that are filled in per instance.
///
/// Supported placeholders are `{index}`, `{adapter_url}`, `{router_address}` and `{network}`.
/// Any other brace sequence is left as is. The template is scanned once, so braces inside a
/// substituted value are never expanded. String values are escaped for TOML basic strings and
/// belong between double quotes.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ConfigTemplate(String);

impl ConfigTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn materialize(
        &self,
        index: usize,
        params: &Arc<LaunchParameters>,
    ) -> Result<InstanceConfig, Error> {
        ensure!(!self.0.trim().is_empty(), Error::Template);

        let contents = render(&self.0, |name| match name {
            "index" => Some(index.to_string()),
            "adapter_url" => Some(escape(params.adapter_url.as_str())),
            "router_address" => Some(escape(&params.router_address)),
            "network" => Some(escape(&params.network)),
            _ => None,
        });

        Ok(InstanceConfig {
            index,
            contents,
            parameters: params.clone(),
        })
    }
}

impl Default for ConfigTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

fn render(template: &str, value_of: impl Fn(&str) -> Option<String>) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((head, tail)) = rest.split_once('{') {
        rendered.push_str(head);

        match tail
            .split_once('}')
            .and_then(|(name, after)| value_of(name).map(|value| (value, after)))
        {
            Some((value, after)) => {
                rendered.push_str(&value);
                rest = after;
            }
            None => {
                rendered.push('{');
                rest = tail;
            }
        }
    }

    rendered.push_str(rest);
    rendered
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => escaped.push_str(&format!("\\u{:04X}", u32::from(c))),
            c => escaped.push(c),
        }
    }

    escaped
}

/// The configuration of a single instance, rendered from a [ConfigTemplate].
#[derive(Clone, PartialEq)]
pub struct InstanceConfig {
    pub index: usize,
    pub contents: String,
    pub parameters: Arc<LaunchParameters>,
}

impl std::fmt::Debug for InstanceConfig {
    // the rendered contents can carry the adapter url's credentials
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::Url;

    fn params() -> Arc<LaunchParameters> {
        Arc::new(LaunchParameters {
            adapter_url: Url::new_sensitive("https://rpc.example.com/key").unwrap(),
            router_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
            network: "11155111".to_string(),
            host_access: true,
        })
    }

    #[test]
    fn default_template_renders_every_placeholder() {
        let config = ConfigTemplate::default().materialize(3, &params()).unwrap();

        assert_eq!(config.index, 3);
        assert!(config.contents.contains("index = 3"));
        assert!(config.contents.contains(r#"url = "https://rpc.example.com/key""#));
        assert!(config
            .contents
            .contains(r#"router_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3""#));
        assert!(config.contents.contains(r#"network = "11155111""#));
        assert!(!config.contents.contains('{'));
    }

    #[test]
    fn rendered_default_template_is_valid_toml() {
        let config = ConfigTemplate::default().materialize(0, &params()).unwrap();

        let value: toml::Value = toml::from_str(&config.contents).unwrap();
        assert_eq!(value["instance"]["index"].as_integer(), Some(0));
    }

    #[test]
    fn unknown_braces_are_left_untouched() {
        let template = ConfigTemplate::new("peers = { count = 2 }\nname = \"attestor-{index}\"");

        let config = template.materialize(1, &params()).unwrap();

        assert_eq!(config.contents, "peers = { count = 2 }\nname = \"attestor-1\"");
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let params = Arc::new(LaunchParameters {
            router_address: "{network}".to_string(),
            ..LaunchParameters::default()
        });

        let config = ConfigTemplate::new("router = \"{router_address}\"\nnetwork = \"{network}\"")
            .materialize(0, &params)
            .unwrap();

        assert_eq!(config.contents, "router = \"{network}\"\nnetwork = \"localnet\"");
    }

    #[test]
    fn values_are_escaped_for_toml_strings() {
        let params = Arc::new(LaunchParameters {
            router_address: "0xabc\"\nevil = true".to_string(),
            network: "C:\\chains\tdev".to_string(),
            ..LaunchParameters::default()
        });

        let config = ConfigTemplate::default().materialize(0, &params).unwrap();

        let value: toml::Value = toml::from_str(&config.contents).unwrap();
        assert_eq!(
            value["adapter"]["router_address"].as_str(),
            Some("0xabc\"\nevil = true")
        );
        assert_eq!(value["adapter"]["network"].as_str(), Some("C:\\chains\tdev"));
        assert!(value["adapter"].get("evil").is_none());
    }

    #[test]
    fn empty_template_is_rejected() {
        let err = ConfigTemplate::new("  \n").materialize(0, &params()).unwrap_err();

        assert!(matches!(err.current_context(), Error::Template));
    }

    #[test]
    fn debug_output_hides_contents() {
        let config = ConfigTemplate::default().materialize(0, &params()).unwrap();

        assert!(!format!("{config:?}").contains("rpc.example.com"));
    }
}
