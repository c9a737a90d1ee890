// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use std::sync::Arc;

use crate::crds::{TServer, TServerStatus};
use crate::error::Error;
use crate::meta::resource_update_error;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{invalid_key, object_key, retry, server_key, server_selector, split_key, Context};

pub fn is_pod_ready(pod: &corev1::Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map_or(false, |conditions| {
            conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Aggregates the pods of a TServer into its status subresource.
pub struct TServerReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TServerReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TServerReconciler<C> {
        TServerReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TServerReconciler<C> {
    fn name(&self) -> &'static str {
        "tserver"
    }

    fn enqueue(&self, _event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::Pod(pod) => server_key(&pod.metadata).map(Enqueue::Now),
            Watched::TServer(tserver) => object_key(&tserver.metadata).map(Enqueue::Now),
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
            Some(tserver) => tserver,
            None => return Ok(Outcome::Done),
        };

        let selector = server_selector(&tserver);
        let pods = cluster.list::<corev1::Pod>(namespace, &selector)?;
        let status = TServerStatus {
            replicas: tserver.spec.k8s.replicas,
            ready_replicas: pods.iter().filter(|pod| is_pod_ready(pod)).count() as i32,
            current_replicas: pods.len() as i32,
            selector: selector.to_string(),
        };
        if tserver.status.as_ref() == Some(&status) {
            return Ok(Outcome::Done);
        }

        let mut updated = tserver.as_ref().clone();
        updated.status = Some(status);
        match cluster.update_status(&updated).await {
            Ok(()) => Ok(Outcome::Done),
            Err(err) => retry(resource_update_error("tserver", namespace, name, err)),
        }
    }
}
