// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use json_patch::Patch;
use k8s_openapi::api::core::v1 as corev1;
use std::sync::Arc;

use crate::crds::{TExitedPod, TExitedRecord, TServer};
use crate::error::Error;
use crate::kubernetes_api_objects::owner::is_deleting;
use crate::kubernetes_api_objects::patch::PatchBuilder;
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{delete_owned, invalid_key, object_key, retry, split_key, Context};

const EVENT_SEGMENT: &str = "event";

/// Queue key carrying a terminating pod, `namespace/event/{record json}`.
pub fn exited_pod_key(pod: &corev1::Pod) -> Option<String> {
    let meta = &pod.metadata;
    let deleted_at = meta.deletion_timestamp.clone()?;
    let uid = meta.uid.clone().filter(|uid| !uid.is_empty())?;
    let labels = meta.labels.as_ref()?;
    let status = pod.status.clone().unwrap_or_default();
    let event = TExitedRecord {
        app: labels.get(T_SERVER_APP_LABEL)?.clone(),
        server: labels.get(T_SERVER_NAME_LABEL)?.clone(),
        pods: vec![TExitedPod {
            uid,
            name: meta.name.clone().unwrap_or_default(),
            id: labels.get(T_SERVER_ID_LABEL).cloned().unwrap_or_default(),
            node_ip: status.host_ip.unwrap_or_default(),
            pod_ip: status.pod_ip.unwrap_or_default(),
            create_time: meta.creation_timestamp.clone(),
            delete_time: Some(deleted_at),
        }],
        ..Default::default()
    };
    let json = serde_json::to_string(&event).ok()?;
    Some(format!("{}/{}/{}", meta.namespace.as_deref()?, EVENT_SEGMENT, json))
}

/// Prepends `pod` and trims the journal back to `cap` entries. `len` is the
/// journal length before the insert.
pub fn build_journal_patch(pod: &TExitedPod, len: usize, cap: usize) -> Result<Patch, Error> {
    let mut builder = PatchBuilder::new().add("/pods/0", serde_json::to_value(pod)?);
    let cap = cap.max(1);
    for index in (cap..=len).rev() {
        builder = builder.remove(format!("/pods/{}", index));
    }
    Ok(builder.build())
}

/// Keeps one exited pod journal per TServer.
pub struct TExitedRecordReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TExitedRecordReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TExitedRecordReconciler<C> {
        TExitedRecordReconciler { ctx }
    }

    async fn reconcile_tserver(&self, namespace: &str, name: &str) -> Result<Outcome, Error> {
        let cluster = &self.ctx.cluster;
        let tserver = match cluster.get::<TServer>(namespace, name)? {
            Some(tserver) if !is_deleting(&tserver.metadata) => tserver,
            found => {
                let cluster = cluster.as_ref();
                return delete_owned::<C, TExitedRecord>(cluster, "texitedrecord", namespace, name, found.as_deref())
                    .await;
            }
        };
        if cluster.get::<TExitedRecord>(namespace, name)?.is_some() {
            return Ok(Outcome::Done);
        }
        let record = self.ctx.translator.build_texitedrecord(&tserver);
        match cluster.create(&record).await {
            Ok(()) => Ok(Outcome::Done),
            Err(err) => retry(resource_create_error("texitedrecord", namespace, name, err)),
        }
    }

    async fn reconcile_pod(&self, namespace: &str, event: &str) -> Result<Outcome, Error> {
        let event: TExitedRecord = match serde_json::from_str(event) {
            Ok(event) => event,
            Err(_) => return invalid_key(event),
        };
        let pod = match event.pods.first() {
            Some(pod) => pod,
            None => return Ok(Outcome::Done),
        };
        let name = tserver_name(&event.app, &event.server);
        let record = match self.ctx.cluster.get::<TExitedRecord>(namespace, &name)? {
            Some(record) => record,
            None => return Ok(Outcome::Done),
        };
        if record.pods.iter().take(EXITED_RECORD_CHECK_LEN).any(|p| p.uid == pod.uid) {
            return Ok(Outcome::Done);
        }

        let cap = self.ctx.config.get(namespace).max_exited_records;
        let patch = build_journal_patch(pod, record.pods.len(), cap)?;
        match self.ctx.cluster.patch::<TExitedRecord>(namespace, &name, &patch).await {
            Ok(()) => Ok(Outcome::Done),
            Err(err) => retry(resource_patch_error("texitedrecord", namespace, &name, err)),
        }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TExitedRecordReconciler<C> {
    fn name(&self) -> &'static str {
        "texitedrecord"
    }

    fn enqueue(&self, _event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TServer(tserver) => object_key(&tserver.metadata).map(Enqueue::Now),
            Watched::TExitedRecord(record) => object_key(&record.metadata).map(Enqueue::Now),
            Watched::Pod(pod) => exited_pod_key(pod).map(Enqueue::Now),
            _ => None,
        }
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let mut parts = key.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(EVENT_SEGMENT), Some(event)) if !namespace.is_empty() => {
                self.reconcile_pod(namespace, event).await
            }
            _ => match split_key(key) {
                Some((namespace, name)) => self.reconcile_tserver(namespace, name).await,
                None => invalid_key(key),
            },
        }
    }
}
