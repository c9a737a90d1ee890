// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use crate::crds::{TFrameworkConfig, TImage};
use crate::meta::*;

/// Tunables of one namespace, resolved from its `tars-framework` config.
#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceConfig {
    pub max_exited_records: usize,
    pub max_tconfig_history: usize,
    pub max_build_time: Duration,
    pub node_image: String,
    pub node_secret: String,
    pub launcher_type: String,
    pub image_pull_policy: String,
    pub revision_history_limit: i32,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        NamespaceConfig {
            max_exited_records: DEFAULT_MAX_RECORD_LEN,
            max_tconfig_history: DEFAULT_MAX_TCONFIG_HISTORY,
            max_build_time: Duration::from_secs(DEFAULT_MAX_IMAGE_BUILD_TIME),
            node_image: SERVICE_IMAGE_PLACEHOLDER.to_string(),
            node_secret: String::new(),
            launcher_type: "background".to_string(),
            image_pull_policy: DEFAULT_IMAGE_PULL_POLICY.to_string(),
            revision_history_limit: DEFAULT_WORKLOAD_HISTORY_LIMIT,
        }
    }
}

impl NamespaceConfig {
    pub fn resolve(framework: Option<&TFrameworkConfig>, node: Option<&TImage>) -> NamespaceConfig {
        let mut config = NamespaceConfig::default();
        if let Some(node) = node {
            if let Some(release) = node
                .releases
                .iter()
                .find(|r| r.id.starts_with(DEFAULT_NODE_RELEASE_PREFIX))
            {
                config.node_image = release.image.clone();
                config.node_secret = release.secret.clone();
            }
        }
        let framework = match framework {
            Some(framework) => framework,
            None => return config,
        };
        let limit = &framework.record_limit;
        if limit.texited_pod > 0 {
            config.max_exited_records = limit.texited_pod;
        }
        if limit.tconfig_history > 0 {
            config.max_tconfig_history = limit.tconfig_history;
        }
        if framework.image_build.max_build_time > 0 {
            config.max_build_time = Duration::from_secs(framework.image_build.max_build_time);
        }
        if let Some(node_image) = &framework.node_image {
            if !node_image.image.is_empty() {
                config.node_image = node_image.image.clone();
                config.node_secret = node_image.secret.clone();
            }
        }
        config
    }
}

/// Shared, read mostly cache of per-namespace tunables. Only the
/// TFrameworkConfig reconciler writes it; absent namespaces read as defaults.
#[derive(Default)]
pub struct ConfigStore {
    entries: RwLock<AHashMap<String, Arc<NamespaceConfig>>>,
}

impl ConfigStore {
    pub fn new() -> ConfigStore {
        ConfigStore::default()
    }

    pub fn get(&self, namespace: &str) -> Arc<NamespaceConfig> {
        self.entries
            .read()
            .get(namespace)
            .cloned()
            .unwrap_or_else(|| Arc::new(NamespaceConfig::default()))
    }

    pub fn set(&self, namespace: &str, config: NamespaceConfig) {
        self.entries.write().insert(namespace.to_string(), Arc::new(config));
    }
}
