// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use std::sync::Arc;
use tracing::*;

use crate::config_store::NamespaceConfig;
use crate::crds::{TFrameworkConfig, TImage};
use crate::error::Error;
use crate::kubernetes_api_objects::owner::is_deleting;
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{invalid_key, Context};

/// Re-resolves a namespace's tunables whenever its `tars-framework` config or
/// its `node` image changes.
pub struct TFrameworkConfigReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TFrameworkConfigReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TFrameworkConfigReconciler<C> {
        TFrameworkConfigReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TFrameworkConfigReconciler<C> {
    fn name(&self) -> &'static str {
        "tframeworkconfig"
    }

    fn fixed_workers(&self) -> Option<usize> {
        Some(1)
    }

    fn enqueue(&self, _event: EventType, obj: &Watched) -> Option<Enqueue> {
        let meta = match obj {
            Watched::TFrameworkConfig(config) => &config.metadata,
            Watched::TImage(image) => &image.metadata,
            _ => return None,
        };
        let expected = match obj {
            Watched::TFrameworkConfig(_) => FIXED_TFRAMEWORK_CONFIG_RESOURCE_NAME,
            _ => NODE_TIMAGE_NAME,
        };
        if meta.name.as_deref() != Some(expected) {
            return None;
        }
        meta.namespace.clone().map(Enqueue::Now)
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let namespace = key;
        if namespace.is_empty() || namespace.contains('/') {
            return invalid_key(key);
        }
        let cluster = &self.ctx.cluster;
        let framework = cluster
            .get::<TFrameworkConfig>(namespace, FIXED_TFRAMEWORK_CONFIG_RESOURCE_NAME)?
            .filter(|f| !is_deleting(&f.metadata));
        let node = cluster
            .get::<TImage>(namespace, NODE_TIMAGE_NAME)?
            .filter(|i| !is_deleting(&i.metadata));

        let config = NamespaceConfig::resolve(framework.as_deref(), node.as_deref());
        if *self.ctx.config.get(namespace) != config {
            info!("namespace {} tunables refreshed", namespace);
            self.ctx.config.set(namespace, config);
        }
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ConfigStore;
    use crate::crds::TFrameworkRecordLimit;
    use crate::shim_layer::fake_cluster::FakeCluster;

    fn framework(texited_pod: usize) -> TFrameworkConfig {
        let mut framework = TFrameworkConfig {
            record_limit: TFrameworkRecordLimit {
                texited_pod,
                ..Default::default()
            },
            ..Default::default()
        };
        framework.metadata.namespace = Some("tars".to_string());
        framework.metadata.name = Some(FIXED_TFRAMEWORK_CONFIG_RESOURCE_NAME.to_string());
        framework
    }

    #[tokio::test]
    async fn framework_changes_reach_the_store() {
        let cluster = FakeCluster::new();
        let store = Arc::new(ConfigStore::new());
        let reconciler = TFrameworkConfigReconciler::new(Context::new(cluster.clone(), store.clone()));

        let fw = framework(7);
        assert!(matches!(
            reconciler.enqueue(EventType::Added, &Watched::from(Arc::new(fw.clone()))),
            Some(Enqueue::Now(ref ns)) if ns == "tars"
        ));
        cluster.insert(&fw);
        reconciler.reconcile("tars").await.unwrap();
        assert_eq!(store.get("tars").max_exited_records, 7);

        let mut other = framework(1);
        other.metadata.name = Some("something-else".to_string());
        assert!(reconciler.enqueue(EventType::Added, &Watched::from(Arc::new(other))).is_none());
    }
}
