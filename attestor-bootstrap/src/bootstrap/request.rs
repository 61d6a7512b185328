use std::fmt::{Display, Formatter};
use std::sync::Arc;

use error_stack::{report, Result, ResultExt};

use super::Error;
use crate::launcher::{ConfigTemplate, InstanceConfig, LaunchParameters};

/// Number of instances in a pool. Zero is a valid, empty pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PoolSize(usize);

impl PoolSize {
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for PoolSize {
    fn from(size: usize) -> Self {
        Self(size)
    }
}

impl TryFrom<i64> for PoolSize {
    type Error = error_stack::Report<Error>;

    fn try_from(size: i64) -> std::result::Result<Self, Self::Error> {
        usize::try_from(size)
            .map(Self)
            .map_err(|_| report!(Error::InvalidPoolSize(size)))
    }
}

impl TryFrom<Option<i64>> for PoolSize {
    type Error = error_stack::Report<Error>;

    fn try_from(size: Option<i64>) -> std::result::Result<Self, Self::Error> {
        size.ok_or_else(|| report!(Error::MissingPoolSize))
            .and_then(PoolSize::try_from)
    }
}

impl Display for PoolSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to bootstrap one pool. Immutable once built.
#[derive(Clone, Debug)]
pub struct SetupRequest {
    pool_size: PoolSize,
    template: ConfigTemplate,
    launch_parameters: Arc<LaunchParameters>,
}

impl SetupRequest {
    pub fn new(
        pool_size: usize,
        template: ConfigTemplate,
        launch_parameters: LaunchParameters,
    ) -> Self {
        Self {
            pool_size: PoolSize(pool_size),
            template,
            launch_parameters: Arc::new(launch_parameters),
        }
    }

    /// Builds a request from an unvalidated pool size, e.g. as read from a config file.
    pub fn from_raw(
        pool_size: Option<i64>,
        template: ConfigTemplate,
        launch_parameters: LaunchParameters,
    ) -> Result<Self, Error> {
        Ok(Self::new(
            PoolSize::try_from(pool_size)?.get(),
            template,
            launch_parameters,
        ))
    }

    pub fn pool_size(&self) -> PoolSize {
        self.pool_size
    }

    pub fn launch_parameters(&self) -> &LaunchParameters {
        &self.launch_parameters
    }

    /// Renders the config of every instance, in index order.
    pub fn materialize(&self) -> Result<Vec<InstanceConfig>, Error> {
        (0..self.pool_size.get())
            .map(|index| {
                self.template
                    .materialize(index, &self.launch_parameters)
                    .change_context(Error::InvalidTemplate)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_pool_size_is_invalid() {
        let err = PoolSize::try_from(-1i64).unwrap_err();

        assert!(matches!(err.current_context(), Error::InvalidPoolSize(-1)));
    }

    #[test]
    fn missing_pool_size_is_invalid() {
        let err = SetupRequest::from_raw(
            None,
            ConfigTemplate::default(),
            LaunchParameters::default(),
        )
        .unwrap_err();

        assert!(matches!(err.current_context(), Error::MissingPoolSize));
    }

    #[test]
    fn zero_pool_size_is_valid() {
        let request = SetupRequest::from_raw(
            Some(0),
            ConfigTemplate::default(),
            LaunchParameters::default(),
        )
        .unwrap();

        assert_eq!(request.pool_size().get(), 0);
        assert!(request.materialize().unwrap().is_empty());
    }

    #[test]
    fn materialize_renders_one_config_per_index() {
        let request = SetupRequest::new(
            3,
            ConfigTemplate::new("name = \"attestor-{index}\""),
            LaunchParameters::default(),
        );

        let configs = request.materialize().unwrap();

        assert_eq!(
            configs
                .iter()
                .map(|config| (config.index, config.contents.as_str()))
                .collect::<Vec<_>>(),
            vec![
                (0, "name = \"attestor-0\""),
                (1, "name = \"attestor-1\""),
                (2, "name = \"attestor-2\""),
            ]
        );
    }

    #[test]
    fn invalid_template_is_a_configuration_error() {
        let request = SetupRequest::new(2, ConfigTemplate::new(""), LaunchParameters::default());

        let err = request.materialize().unwrap_err();

        assert!(matches!(err.current_context(), Error::InvalidTemplate));
    }
}
