// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use std::sync::Arc;

use crate::crds::{TEndpoint, TEndpointPodStatus, TEndpointStatus, TServer};
use crate::diff::dry_run_sync_tendpoint;
use crate::error::Error;
use crate::kubernetes_api_objects::owner::{is_controlled_by, is_deleting};
use crate::kubernetes_api_objects::selector::Selector;
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{delete_owned, invalid_key, object_key, retry, server_key, split_key, Context};

/// The node agent reports `setting/present/pid` through the readiness gate reason.
pub fn split_tars_condition_reason(reason: &str) -> (String, String, String) {
    let parts: Vec<&str> = reason.split('/').collect();
    match parts.as_slice() {
        [setting] => (setting.to_string(), String::new(), String::new()),
        [setting, present] => (setting.to_string(), present.to_string(), String::new()),
        [setting, present, pid] => (setting.to_string(), present.to_string(), pid.to_string()),
        _ => ("Unknown".to_string(), "Unknown".to_string(), String::new()),
    }
}

/// Projects one pod onto the state machine TEndpoint consumers read.
pub fn build_pod_status(pod: &corev1::Pod) -> TEndpointPodStatus {
    let status = pod.status.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    let mut pod_status = TEndpointPodStatus {
        uid: pod.metadata.uid.clone().unwrap_or_default(),
        name: name.clone(),
        pod_ip: status.pod_ip.clone().unwrap_or_default(),
        host_ip: status.host_ip.clone().unwrap_or_default(),
        start_time: pod.metadata.creation_timestamp.clone(),
        container_statuses: status.container_statuses.clone().unwrap_or_default(),
        setting_state: "Active".to_string(),
        present_state: String::new(),
        present_message: String::new(),
        pid: String::new(),
        id: pod
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(T_SERVER_ID_LABEL))
            .cloned()
            .unwrap_or_default(),
    };

    if is_deleting(&pod.metadata) {
        pod_status.present_state = "Terminating".to_string();
        pod_status.present_message = format!("pod/{} is terminating", name);
        return pod_status;
    }

    let mut ordered: Vec<Option<&corev1::PodCondition>> = vec![None, None, None];
    let mut ready = None;
    let mut gate = None;
    let conditions = status.conditions.as_deref().unwrap_or_default();
    for condition in conditions {
        match condition.type_.as_str() {
            "PodScheduled" => ordered[0] = Some(condition),
            "Initialized" => ordered[1] = Some(condition),
            "ContainersReady" => ordered[2] = Some(condition),
            "Ready" => ready = Some(condition),
            T_POD_READINESS_GATE => gate = Some(condition),
            _ => ordered.push(Some(condition)),
        }
    }

    if let Some(ready) = ready.filter(|c| c.status == "True") {
        pod_status.present_state = "Active".to_string();
        if let Some(gate) = gate {
            pod_status.present_message = ready.message.clone().unwrap_or_default();
            pod_status.pid = split_tars_condition_reason(gate.reason.as_deref().unwrap_or_default()).2;
        }
        return pod_status;
    }

    for condition in ordered.into_iter().flatten() {
        if condition.status != "True" {
            pod_status.present_state = condition.reason.clone().unwrap_or_default();
            pod_status.present_message = condition.message.clone().unwrap_or_default();
            return pod_status;
        }
        pod_status.present_state = condition.type_.clone();
        pod_status.present_message = condition.message.clone().unwrap_or_default();
    }

    if let Some(gate) = gate {
        let (setting, present, pid) = split_tars_condition_reason(gate.reason.as_deref().unwrap_or_default());
        pod_status.setting_state = setting;
        pod_status.present_state = present;
        pod_status.pid = pid;
    }
    pod_status
}

/// Mirrors TServer routing data onto its TEndpoint and keeps the per-pod
/// status list current.
pub struct TEndpointReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TEndpointReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TEndpointReconciler<C> {
        TEndpointReconciler { ctx }
    }

    async fn update_status(&self, endpoint: &TEndpoint) -> Result<Outcome, Error> {
        let namespace = endpoint.metadata.namespace.as_deref().unwrap_or_default();
        let name = endpoint.metadata.name.as_deref().unwrap_or_default();
        let selector = Selector::new()
            .equals(T_SERVER_APP_LABEL, &endpoint.spec.app)
            .equals(T_SERVER_NAME_LABEL, &endpoint.spec.server);
        let mut pods: Vec<TEndpointPodStatus> = self
            .ctx
            .cluster
            .list::<corev1::Pod>(namespace, &selector)?
            .iter()
            .map(|pod| build_pod_status(pod))
            .collect();
        pods.sort_by(|a, b| a.name.cmp(&b.name));

        let current = endpoint.status.as_ref().map(|s| s.pods.as_slice()).unwrap_or_default();
        if current == pods.as_slice() {
            return Ok(Outcome::Done);
        }
        let mut updated = endpoint.clone();
        updated.status = Some(TEndpointStatus { pods });
        match self.ctx.cluster.update_status(&updated).await {
            Ok(()) => Ok(Outcome::Done),
            Err(err) => retry(resource_update_error("tendpoint", namespace, name, err)),
        }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TEndpointReconciler<C> {
    fn name(&self) -> &'static str {
        "tendpoint"
    }

    fn enqueue(&self, _event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TServer(tserver) => object_key(&tserver.metadata).map(Enqueue::Now),
            Watched::TEndpoint(endpoint) => object_key(&endpoint.metadata).map(Enqueue::Now),
            Watched::Pod(pod) => server_key(&pod.metadata).map(Enqueue::Now),
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
                return delete_owned::<C, TEndpoint>(cluster.as_ref(), "tendpoint", namespace, name, found.as_deref()).await;
            }
        };

        let endpoint = match cluster.get::<TEndpoint>(namespace, name)? {
            Some(endpoint) => endpoint,
            None => {
                let endpoint = self.ctx.translator.build_tendpoint(&tserver);
                return match cluster.create(&endpoint).await {
                    Ok(()) => Ok(Outcome::Done),
                    Err(err) => retry(resource_create_error("tendpoint", namespace, name, err)),
                };
            }
        };

        if !is_controlled_by(&endpoint.metadata, tserver.as_ref()) {
            let msg = resource_out_control_error("tendpoint", namespace, name, namespace, name);
            cluster.warn(tserver.as_ref(), RESOURCE_OUT_CONTROL_REASON, &msg).await;
            return retry(msg);
        }

        if let Some(updated) = dry_run_sync_tendpoint(&tserver, &endpoint) {
            // The status pass follows on the Modified event of this update.
            return match cluster.update(&updated).await {
                Ok(()) => Ok(Outcome::Done),
                Err(err) => retry(resource_update_error("tendpoint", namespace, name, err)),
            };
        }
        self.update_status(&endpoint).await
    }
}
