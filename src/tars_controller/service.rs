// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use std::sync::Arc;

use crate::crds::TServer;
use crate::diff::dry_run_sync_service;
use crate::error::Error;
use crate::kubernetes_api_objects::owner::{is_controlled_by, is_deleting};
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{delete_owned, invalid_key, object_key, retry, split_key, Context};

/// Keeps the headless Service of every TServer converged.
pub struct ServiceReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> ServiceReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> ServiceReconciler<C> {
        ServiceReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for ServiceReconciler<C> {
    fn name(&self) -> &'static str {
        "service"
    }

    fn enqueue(&self, event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TServer(tserver) => object_key(&tserver.metadata).map(Enqueue::Now),
            Watched::Service(service) if event == EventType::Deleted || is_deleting(&service.metadata) => {
                object_key(&service.metadata).map(Enqueue::Now)
            }
            _ => None,
        }
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let (namespace, name) = match split_key(key) {
            Some(parts) => parts,
            None => return invalid_key(key),
        };
        let cluster = &self.ctx.cluster;

        let tserver = match cluster.get::<TServer>(namespace, name)? {
            Some(tserver) if !is_deleting(&tserver.metadata) => tserver,
            found => {
                return delete_owned::<C, corev1::Service>(cluster.as_ref(), "service", namespace, name, found.as_deref())
                    .await
            }
        };

        let service = match cluster.get::<corev1::Service>(namespace, name)? {
            Some(service) => service,
            None => {
                let service = self.ctx.translator.build_service(&tserver);
                return match cluster.create(&service).await {
                    Ok(()) => Ok(Outcome::Done),
                    Err(err) => retry(resource_create_error("service", namespace, name, err)),
                };
            }
        };

        if is_deleting(&service.metadata) {
            return Ok(Outcome::AddAfter(WORKLOAD_SETTLE_DELAY));
        }

        if !is_controlled_by(&service.metadata, tserver.as_ref()) {
            let msg = resource_out_control_error("service", namespace, name, namespace, name);
            cluster.warn(tserver.as_ref(), RESOURCE_OUT_CONTROL_REASON, &msg).await;
            return retry(msg);
        }

        if let Some(updated) = dry_run_sync_service(&tserver, &service) {
            if let Err(err) = cluster.update(&updated).await {
                return retry(resource_update_error("service", namespace, name, err));
            }
        }
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ConfigStore;
    use crate::shim_layer::fake_cluster::FakeCluster;
    use crate::unit_tests::fixtures::normal_tserver;

    fn reconciler() -> (Arc<FakeCluster>, ServiceReconciler<FakeCluster>) {
        let cluster = FakeCluster::new();
        let ctx = Context::new(cluster.clone(), Arc::new(ConfigStore::new()));
        (cluster, ServiceReconciler::new(ctx))
    }

    #[tokio::test]
    async fn creates_then_stays_quiet() {
        let (cluster, reconciler) = reconciler();
        cluster.insert(&normal_tserver());
        assert_eq!(reconciler.reconcile("tars/test-echo").await.unwrap(), Outcome::Done);
        assert_eq!(cluster.calls_of("create").len(), 1);

        let service = cluster.get::<corev1::Service>("tars", "test-echo").unwrap().unwrap();
        let ports = service.spec.as_ref().unwrap().ports.clone().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("main"));
        assert_eq!(ports[0].port, 9000);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));

        cluster.clear_calls();
        assert_eq!(reconciler.reconcile("tars/test-echo").await.unwrap(), Outcome::Done);
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn foreign_service_is_reported_not_touched() {
        let (cluster, reconciler) = reconciler();
        let tserver = normal_tserver();
        cluster.insert(&tserver);
        let mut foreign = crate::translator::service::build_service(&tserver);
        foreign.metadata.owner_references = None;
        cluster.insert(&foreign);

        assert_eq!(reconciler.reconcile("tars/test-echo").await.unwrap(), Outcome::Retry);
        assert!(cluster.calls().is_empty());
        assert_eq!(cluster.warnings()[0].0, "OutControl");
    }

    #[tokio::test]
    async fn missing_tserver_deletes_the_service() {
        let (cluster, reconciler) = reconciler();
        cluster.insert(&crate::translator::service::build_service(&normal_tserver()));
        assert_eq!(reconciler.reconcile("tars/test-echo").await.unwrap(), Outcome::Done);
        assert_eq!(cluster.calls_of("delete").len(), 1);
        assert_eq!(cluster.count::<corev1::Service>(), 0);

        assert_eq!(reconciler.reconcile("not-a-key").await.unwrap(), Outcome::Done);
    }

    #[tokio::test]
    async fn foreign_service_outlives_a_missing_tserver() {
        let (cluster, reconciler) = reconciler();
        let mut foreign = crate::translator::service::build_service(&normal_tserver());
        foreign.metadata.owner_references = None;
        cluster.insert(&foreign);
        assert_eq!(reconciler.reconcile("tars/test-echo").await.unwrap(), Outcome::Done);
        assert!(cluster.calls_of("delete").is_empty());
        assert_eq!(cluster.count::<corev1::Service>(), 1);
    }

    #[test]
    fn service_events_only_matter_on_removal() {
        let (_, reconciler) = reconciler();
        let service = Arc::new(crate::translator::service::build_service(&normal_tserver()));
        let watched = Watched::from(service);
        assert_eq!(reconciler.enqueue(EventType::Modified, &watched), None);
        assert_eq!(
            reconciler.enqueue(EventType::Deleted, &watched),
            Some(Enqueue::Now("tars/test-echo".to_string()))
        );
    }
}
