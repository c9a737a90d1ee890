// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use std::sync::Arc;

use crate::crds::TServer;
use crate::diff::dry_run_sync_daemonset;
use crate::error::Error;
use crate::kubernetes_api_objects::owner::{is_controlled_by, is_deleting};
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{delete_owned, invalid_key, object_key, retry, split_key, Context};

/// Counterpart of the StatefulSet reconciler for TServers with `daemonSet` set.
pub struct DaemonSetReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> DaemonSetReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> DaemonSetReconciler<C> {
        DaemonSetReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for DaemonSetReconciler<C> {
    fn name(&self) -> &'static str {
        "daemonset"
    }

    fn enqueue(&self, event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TServer(tserver) => object_key(&tserver.metadata).map(Enqueue::Now),
            Watched::DaemonSet(ds) if event == EventType::Deleted || is_deleting(&ds.metadata) => {
                object_key(&ds.metadata).map(Enqueue::Now)
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
            Some(tserver) if !is_deleting(&tserver.metadata) && tserver.spec.k8s.daemon_set => tserver,
            found => {
                let cluster = cluster.as_ref();
                return delete_owned::<C, appsv1::DaemonSet>(cluster, "daemonset", namespace, name, found.as_deref())
                    .await;
            }
        };

        let ds = match cluster.get::<appsv1::DaemonSet>(namespace, name)? {
            Some(ds) => ds,
            None => {
                let ds = self.ctx.translator.build_daemonset(&tserver);
                return match cluster.create(&ds).await {
                    Ok(()) => Ok(Outcome::Done),
                    Err(err) => retry(resource_create_error("daemonset", namespace, name, err)),
                };
            }
        };

        if is_deleting(&ds.metadata) {
            return Ok(Outcome::AddAfter(WORKLOAD_SETTLE_DELAY));
        }

        if !is_controlled_by(&ds.metadata, tserver.as_ref()) {
            let msg = resource_out_control_error("daemonset", namespace, name, namespace, name);
            cluster.warn(tserver.as_ref(), RESOURCE_OUT_CONTROL_REASON, &msg).await;
            return retry(msg);
        }

        let config = self.ctx.config.get(namespace);
        if let Some(updated) = dry_run_sync_daemonset(&tserver, &config, &ds) {
            if let Err(err) = cluster.update(&updated).await {
                return retry(resource_update_error("daemonset", namespace, name, err));
            }
        }
        Ok(Outcome::Done)
    }
}
