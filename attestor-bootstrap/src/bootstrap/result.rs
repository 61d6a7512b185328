use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::launcher::InstanceHandle;
use crate::url::Url;

/// A healthy pool, ordered by instance index.
#[derive(Debug, Default, Clone)]
pub struct SetupResult {
    instances: Vec<InstanceHandle>,
}

impl SetupResult {
    pub(super) fn from_handles(mut instances: Vec<InstanceHandle>) -> Self {
        instances.sort_by_key(InstanceHandle::index);

        Self { instances }
    }

    pub fn instances(&self) -> &[InstanceHandle] {
        &self.instances
    }

    pub fn endpoints(&self) -> Vec<&Url> {
        self.instances.iter().map(InstanceHandle::endpoint).collect()
    }

    pub fn internal_endpoints(&self) -> Vec<&Url> {
        self.instances
            .iter()
            .map(InstanceHandle::internal_endpoint)
            .collect()
    }

    pub fn identities(&self) -> Vec<&str> {
        self.instances.iter().map(InstanceHandle::identity).collect()
    }

    pub fn config_paths(&self) -> Vec<&Path> {
        self.instances
            .iter()
            .map(InstanceHandle::config_path)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn summary(&self) -> Vec<InstanceInfo> {
        self.instances.iter().map(InstanceInfo::from).collect()
    }
}

/// Printable description of one pool member.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct InstanceInfo {
    pub index: usize,
    pub endpoint: String,
    pub internal_endpoint: String,
    pub identity: String,
    pub config_path: PathBuf,
}

impl From<&InstanceHandle> for InstanceInfo {
    fn from(handle: &InstanceHandle) -> Self {
        Self {
            index: handle.index(),
            endpoint: handle.endpoint().to_string(),
            internal_endpoint: handle.internal_endpoint().to_string(),
            identity: handle.identity().to_string(),
            config_path: handle.config_path().to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(index: usize) -> InstanceHandle {
        InstanceHandle::builder()
            .index(index)
            .endpoint(format!("http://127.0.0.1:4000{index}").parse().unwrap())
            .internal_endpoint(format!("http://attestor-{index}:8080").parse().unwrap())
            .identity(format!("0x{index:040x}"))
            .config_path(format!("/tmp/attestor-{index}"))
            .build()
    }

    #[test]
    fn handles_are_ordered_by_index() {
        let result = SetupResult::from_handles(vec![handle(2), handle(0), handle(1)]);

        assert_eq!(
            result
                .endpoints()
                .into_iter()
                .map(|url| url.to_string())
                .collect::<Vec<_>>(),
            vec![
                "http://127.0.0.1:40000/",
                "http://127.0.0.1:40001/",
                "http://127.0.0.1:40002/",
            ]
        );
        assert_eq!(
            result.config_paths(),
            vec![
                Path::new("/tmp/attestor-0"),
                Path::new("/tmp/attestor-1"),
                Path::new("/tmp/attestor-2"),
            ]
        );
        assert_eq!(result.identities()[1], format!("0x{:040x}", 1));
        assert_eq!(
            result.internal_endpoints()[2].to_string(),
            "http://attestor-2:8080/"
        );
    }

    #[test]
    fn summary_serializes_every_instance() {
        let result = SetupResult::from_handles(vec![handle(1), handle(0)]);

        let summary = serde_json::to_value(result.summary()).unwrap();

        assert_eq!(summary[0]["index"], 0);
        assert_eq!(summary[1]["endpoint"], "http://127.0.0.1:40001/");
        assert_eq!(summary[1]["config_path"], "/tmp/attestor-1");
    }

    #[test]
    fn default_result_is_empty() {
        let result = SetupResult::default();

        assert!(result.is_empty());
        assert_eq!(result.len(), 0);
        assert!(result.summary().is_empty());
    }
}
