use std::fs;
use std::path::PathBuf;

use error_stack::{Result, ResultExt};
use serde::{Deserialize, Serialize};

use crate::launcher::{docker, ConfigTemplate, LaunchParameters};
use crate::{bootstrap, health, Error};

#[derive(Deserialize, Serialize, Debug, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Number of instances to launch. Kept raw so that invalid values are rejected by the bootstrap itself.
    pub pool_size: Option<i64>,
    /// File holding the instance config template. The built-in template is used if unset.
    pub template_path: Option<PathBuf>,
    pub launch_parameters: LaunchParameters,
    pub bootstrap: bootstrap::Config,
    pub health: health::Config,
    pub docker: docker::Config,
}

impl Config {
    pub fn template(&self) -> Result<ConfigTemplate, Error> {
        match &self.template_path {
            Some(path) => fs::read_to_string(path)
                .map(ConfigTemplate::new)
                .change_context(Error::Template)
                .attach_printable_lazy(|| path.display().to_string()),
            None => Ok(ConfigTemplate::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use tempfile::NamedTempFile;

    use super::Config;
    use crate::health;
    use crate::launcher::ConfigTemplate;
    use crate::Error;

    #[test]
    fn deserialize_full_config() {
        let config: Config = toml::from_str(
            r#"
            pool_size = 3

            [launch_parameters]
            adapter_url = "http://localhost:8545/?apikey=secret"
            router_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
            network = "devnet"
            host_access = true

            [bootstrap]
            settle_interval = "10s"
            probe_retry_delay = "1s"
            launch_timeout = "2m"

            [health]
            type = "Http"
            path = "/healthz"

            [docker]
            image = "attestor:v1.2.0"
            network = "attestor-net"
            "#,
        )
        .unwrap();

        assert_eq!(config.pool_size, Some(3));
        assert!(config.launch_parameters.adapter_url.is_sensitive());
        assert!(config.launch_parameters.host_access);
        assert_eq!(config.bootstrap.settle_interval, Duration::from_secs(10));
        assert_eq!(config.bootstrap.launch_timeout, Some(Duration::from_secs(120)));
        assert_eq!(
            config.health,
            health::Config::Http {
                path: "/healthz".to_string(),
                timeout: Duration::from_secs(5),
            }
        );
        assert_eq!(config.docker.image, "attestor:v1.2.0");
        assert_eq!(config.docker.network.as_deref(), Some("attestor-net"));
        assert_eq!(config.docker.container_port, 8080);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.pool_size, None);
    }

    #[test]
    fn template_is_read_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[instance]\nindex = {{index}}\n").unwrap();
        let config = Config {
            template_path: Some(file.path().to_path_buf()),
            ..Config::default()
        };

        assert_eq!(
            config.template().unwrap(),
            ConfigTemplate::new("[instance]\nindex = {index}\n")
        );
    }

    #[test]
    fn missing_template_file_fails() {
        let config = Config {
            template_path: Some("/nonexistent/attestor-template.toml".into()),
            ..Config::default()
        };

        let err = config.template().unwrap_err();

        assert!(matches!(err.current_context(), Error::Template));
    }
}
