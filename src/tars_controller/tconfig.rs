// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! TConfig bookkeeping runs on three queues: history retention per config
//! tuple, and the deactivate and deleting phases per namespace.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::*;

use crate::crds::TConfig;
use crate::error::Error;
use crate::kubernetes_api_objects::patch::{label_path, PatchBuilder};
use crate::kubernetes_api_objects::selector::Selector;
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{invalid_key, retry, Context};

fn label<'a>(config: &'a TConfig, key: &str) -> &'a str {
    config
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
        .unwrap_or_default()
}

fn namespace_of(config: &TConfig) -> Option<String> {
    config.metadata.namespace.clone().filter(|ns| !ns.is_empty())
}

pub struct TConfigRetentionReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TConfigRetentionReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TConfigRetentionReconciler<C> {
        TConfigRetentionReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TConfigRetentionReconciler<C> {
    fn name(&self) -> &'static str {
        "tconfig-retention"
    }

    fn enqueue(&self, event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TConfig(config) if event == EventType::Added => Some(Enqueue::Now(format!(
                "{}/{}/{}/{}/{}",
                namespace_of(config)?,
                label(config, T_SERVER_APP_LABEL),
                label(config, T_SERVER_NAME_LABEL),
                label(config, T_CONFIG_NAME_LABEL),
                label(config, T_CONFIG_POD_SEQ_LABEL),
            ))),
            _ => None,
        }
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let parts: Vec<&str> = key.split('/').collect();
        let (namespace, app, server, config_name, pod_seq) = match parts.as_slice() {
            [namespace, app, server, config_name, pod_seq] if !namespace.is_empty() => {
                (*namespace, *app, *server, *config_name, *pod_seq)
            }
            _ => return invalid_key(key),
        };
        let selector = Selector::new()
            .equals(T_SERVER_APP_LABEL, app)
            .equals(T_SERVER_NAME_LABEL, server)
            .equals(T_CONFIG_NAME_LABEL, config_name)
            .equals(T_CONFIG_POD_SEQ_LABEL, pod_seq)
            .equals(T_CONFIG_ACTIVATED_LABEL, "false")
            .does_not_exist(T_CONFIG_DELETING_LABEL);
        let limit = self.ctx.config.get(namespace).max_tconfig_history;

        let mut history: Vec<(String, String)> = Vec::new();
        for config in self.ctx.cluster.list::<TConfig>(namespace, &selector)? {
            let name = config.metadata.name.clone().unwrap_or_default();
            let version = label(&config, T_CONFIG_VERSION_LABEL);
            if version.is_empty() {
                error!(
                    "{}",
                    should_not_happen_error(format!(
                        "resource tconfig {}/{} labels[{}] value is nil",
                        namespace, name, T_CONFIG_VERSION_LABEL
                    ))
                );
                continue;
            }
            history.push((version.to_string(), name));
        }
        if history.len() <= limit {
            return Ok(Outcome::Done);
        }

        history.sort();
        let excess = history.len() - limit;
        for (_, name) in history.into_iter().take(excess) {
            if let Err(err) = self.ctx.cluster.delete::<TConfig>(namespace, &name).await {
                return retry(resource_delete_error("tconfig", namespace, &name, err));
            }
        }
        Ok(Outcome::Done)
    }
}

/// Second phase of an activation: configs marked `tars.io/Deactivate` drop the
/// mark and become inactive.
pub struct TConfigDeactivateReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TConfigDeactivateReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TConfigDeactivateReconciler<C> {
        TConfigDeactivateReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TConfigDeactivateReconciler<C> {
    fn name(&self) -> &'static str {
        "tconfig-deactivate"
    }

    fn fixed_workers(&self) -> Option<usize> {
        Some(3)
    }

    fn enqueue(&self, event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TConfig(config) if event != EventType::Deleted => namespace_of(config).map(Enqueue::Now),
            _ => None,
        }
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let namespace = key;
        if namespace.is_empty() || namespace.contains('/') {
            return invalid_key(key);
        }
        let selector = Selector::new().exists(T_CONFIG_DEACTIVATE_LABEL);
        let mut failed = false;
        for config in self.ctx.cluster.list::<TConfig>(namespace, &selector)? {
            let name = config.metadata.name.clone().unwrap_or_default();
            let patch = PatchBuilder::new()
                .remove(label_path(T_CONFIG_DEACTIVATE_LABEL))
                .add(label_path(T_CONFIG_ACTIVATED_LABEL), json!("false"))
                .replace("/activated", json!(false))
                .build();
            if let Err(err) = self.ctx.cluster.patch::<TConfig>(namespace, &name, &patch).await {
                error!("{}", resource_patch_error("tconfig", namespace, &name, err));
                failed = true;
            }
        }
        if failed {
            Ok(Outcome::Retry)
        } else {
            Ok(Outcome::Done)
        }
    }
}

/// Removes every config the admission webhook marked `tars.io/Deleting`.
pub struct TConfigDeletingReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TConfigDeletingReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TConfigDeletingReconciler<C> {
        TConfigDeletingReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TConfigDeletingReconciler<C> {
    fn name(&self) -> &'static str {
        "tconfig-deleting"
    }

    fn fixed_workers(&self) -> Option<usize> {
        Some(1)
    }

    fn enqueue(&self, event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TConfig(config) if event != EventType::Added => namespace_of(config).map(Enqueue::Now),
            _ => None,
        }
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let namespace = key;
        if namespace.is_empty() || namespace.contains('/') {
            return invalid_key(key);
        }
        let selector = Selector::new().exists(T_CONFIG_DELETING_LABEL);
        match self.ctx.cluster.delete_collection::<TConfig>(namespace, &selector).await {
            Ok(()) => Ok(Outcome::Done),
            Err(err) => retry(resource_delete_collection_error("tconfig", &selector.to_string(), err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::{ConfigStore, NamespaceConfig};
    use crate::shim_layer::fake_cluster::FakeCluster;
    use crate::unit_tests::fixtures::tconfig;

    fn context(history: usize) -> (Arc<FakeCluster>, Arc<Context<FakeCluster>>) {
        let cluster = FakeCluster::new();
        let config = Arc::new(ConfigStore::new());
        config.set(
            "tars",
            NamespaceConfig {
                max_tconfig_history: history,
                ..Default::default()
            },
        );
        (cluster.clone(), Context::new(cluster, config))
    }

    #[tokio::test]
    async fn retention_evicts_oldest_inactive_versions() {
        let (cluster, ctx) = context(2);
        for version in ["v1", "v2", "v3", "v4"] {
            cluster.insert(&tconfig(&format!("echo-conf-{}", version), version, false));
        }
        cluster.insert(&tconfig("echo-conf-v5", "v5", true));
        let reconciler = TConfigRetentionReconciler::new(ctx);

        let added = Arc::new(tconfig("echo-conf-v4", "v4", false));
        let key = match reconciler.enqueue(EventType::Added, &Watched::from(added)) {
            Some(Enqueue::Now(key)) => key,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(key, "tars/Test/Echo/echo.conf/m");
        assert_eq!(reconciler.reconcile(&key).await.unwrap(), Outcome::Done);

        let deleted: Vec<_> = cluster.calls_of("delete").into_iter().map(|c| c.name).collect();
        assert_eq!(deleted, vec!["echo-conf-v1", "echo-conf-v2"]);
        assert_eq!(cluster.count::<TConfig>(), 3);

        cluster.clear_calls();
        reconciler.reconcile(&key).await.unwrap();
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn deactivate_flips_marked_configs() {
        let (cluster, ctx) = context(10);
        let mut old = tconfig("echo-conf-v2", "v2", true);
        old.metadata
            .labels
            .as_mut()
            .unwrap()
            .insert(T_CONFIG_DEACTIVATE_LABEL.to_string(), "Deactivating".to_string());
        cluster.insert(&old);
        cluster.insert(&tconfig("echo-conf-v3", "v3", true));

        let reconciler = TConfigDeactivateReconciler::new(ctx);
        assert_eq!(reconciler.fixed_workers(), Some(3));
        assert_eq!(reconciler.reconcile("tars").await.unwrap(), Outcome::Done);

        let old = cluster.get::<TConfig>("tars", "echo-conf-v2").unwrap().unwrap();
        assert!(!old.activated);
        let labels = old.metadata.labels.clone().unwrap();
        assert_eq!(labels.get(T_CONFIG_ACTIVATED_LABEL).map(String::as_str), Some("false"));
        assert!(!labels.contains_key(T_CONFIG_DEACTIVATE_LABEL));
        assert!(cluster.get::<TConfig>("tars", "echo-conf-v3").unwrap().unwrap().activated);
        assert_eq!(cluster.calls_of("patch").len(), 1);
    }

    #[tokio::test]
    async fn deleting_queue_sweeps_marked_configs() {
        let (cluster, ctx) = context(10);
        let mut doomed = tconfig("echo-conf-v1", "v1", false);
        doomed
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert(T_CONFIG_DELETING_LABEL.to_string(), "Deleting".to_string());
        cluster.insert(&doomed);
        cluster.insert(&tconfig("echo-conf-v2", "v2", false));

        let reconciler = TConfigDeletingReconciler::new(ctx);
        assert_eq!(reconciler.fixed_workers(), Some(1));
        assert_eq!(reconciler.reconcile("tars").await.unwrap(), Outcome::Done);
        assert_eq!(cluster.count::<TConfig>(), 1);
        assert_eq!(cluster.calls_of("delete_collection")[0].name, "tars.io/Deleting");

        cluster.fail("delete_collection");
        assert_eq!(reconciler.reconcile("tars").await.unwrap(), Outcome::Retry);
    }
}
