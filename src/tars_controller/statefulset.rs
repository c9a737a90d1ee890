// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use std::sync::Arc;
use tracing::*;

use crate::crds::TServer;
use crate::diff::{dry_run_sync_statefulset, Convergence};
use crate::error::Error;
use crate::kubernetes_api_objects::owner::{is_controlled_by, is_deleting};
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{delete_owned, invalid_key, object_key, retry, server_selector, split_key, Context};

pub struct StatefulSetReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> StatefulSetReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> StatefulSetReconciler<C> {
        StatefulSetReconciler { ctx }
    }

    /// Deletes the StatefulSet so its claim templates can be rebuilt, together
    /// with the local volume claims of the templates that went away.
    async fn recreate(&self, tserver: &TServer, removed: Vec<String>) -> Result<Outcome, Error> {
        let namespace = tserver.metadata.namespace.as_deref().unwrap_or_default();
        let name = tserver.metadata.name.as_deref().unwrap_or_default();
        if let Err(err) = self.ctx.cluster.delete::<appsv1::StatefulSet>(namespace, name).await {
            return retry(resource_delete_error("statefulset", namespace, name, err));
        }
        if !removed.is_empty() {
            let selector = server_selector(tserver).in_values(T_LOCAL_VOLUME_LABEL, removed);
            if let Err(err) = self
                .ctx
                .cluster
                .delete_collection::<corev1::PersistentVolumeClaim>(namespace, &selector)
                .await
            {
                error!("{}", resource_delete_collection_error("persistentvolumeclaims", &selector.to_string(), err));
            }
        }
        Ok(Outcome::AddAfter(STATEFULSET_SETTLE_DELAY))
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for StatefulSetReconciler<C> {
    fn name(&self) -> &'static str {
        "statefulset"
    }

    fn enqueue(&self, event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TServer(tserver) => object_key(&tserver.metadata).map(Enqueue::Now),
            Watched::StatefulSet(sts) if event == EventType::Deleted || is_deleting(&sts.metadata) => {
                object_key(&sts.metadata).map(Enqueue::Now)
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
            Some(tserver) if !is_deleting(&tserver.metadata) && !tserver.spec.k8s.daemon_set => tserver,
            found => {
                let cluster = cluster.as_ref();
                return delete_owned::<C, appsv1::StatefulSet>(cluster, "statefulset", namespace, name, found.as_deref())
                    .await;
            }
        };

        let sts = match cluster.get::<appsv1::StatefulSet>(namespace, name)? {
            Some(sts) => sts,
            None => {
                let sts = self.ctx.translator.build_statefulset(&tserver);
                return match cluster.create(&sts).await {
                    Ok(()) => Ok(Outcome::Done),
                    Err(err) => retry(resource_create_error("statefulset", namespace, name, err)),
                };
            }
        };

        if is_deleting(&sts.metadata) {
            return Ok(Outcome::AddAfter(STATEFULSET_SETTLE_DELAY));
        }

        if !is_controlled_by(&sts.metadata, tserver.as_ref()) {
            let msg = resource_out_control_error("statefulset", namespace, name, namespace, name);
            cluster.warn(tserver.as_ref(), RESOURCE_OUT_CONTROL_REASON, &msg).await;
            return retry(msg);
        }

        let config = self.ctx.config.get(namespace);
        match dry_run_sync_statefulset(&tserver, &config, &sts) {
            Convergence::InSync => Ok(Outcome::Done),
            Convergence::Recreate(removed) => self.recreate(&tserver, removed).await,
            Convergence::Update(updated) => match cluster.update(&updated).await {
                Ok(()) => Ok(Outcome::Done),
                Err(err) => retry(resource_update_error("statefulset", namespace, name, err)),
            },
        }
    }
}
