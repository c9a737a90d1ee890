// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::crds::TServer;
use crate::error::Error;
use crate::kubernetes_api_objects::owner::is_deleting;
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{invalid_key, object_key, retry, server_key, server_selector, split_key, Context};

/// Ownership hints for each local volume, keyed by mount name. The local
/// volume provisioner reads them off the claim.
pub fn build_pvc_annotations(tserver: &TServer) -> BTreeMap<String, BTreeMap<String, String>> {
    tserver
        .spec
        .k8s
        .mounts
        .iter()
        .filter_map(|mount| {
            let volume = mount.source.t_local_volume.as_ref()?;
            let annotations = BTreeMap::from([
                (T_LOCAL_VOLUME_UID_ANNOTATION.to_string(), volume.uid.clone()),
                (T_LOCAL_VOLUME_GID_ANNOTATION.to_string(), volume.gid.clone()),
                (T_LOCAL_VOLUME_MODE_ANNOTATION.to_string(), volume.mode.clone()),
            ]);
            Some((mount.name.clone(), annotations))
        })
        .collect()
}

fn contains_all(current: Option<&BTreeMap<String, String>>, wanted: &BTreeMap<String, String>) -> bool {
    wanted
        .iter()
        .all(|(k, v)| current.and_then(|c| c.get(k)) == Some(v))
}

pub struct PersistentVolumeClaimReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> PersistentVolumeClaimReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> PersistentVolumeClaimReconciler<C> {
        PersistentVolumeClaimReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for PersistentVolumeClaimReconciler<C> {
    fn name(&self) -> &'static str {
        "persistentvolumeclaim"
    }

    fn enqueue(&self, event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TServer(tserver) => object_key(&tserver.metadata).map(Enqueue::Now),
            Watched::PersistentVolumeClaim(pvc) if event != EventType::Deleted => {
                server_key(&pvc.metadata).map(Enqueue::Now)
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
            _ => return Ok(Outcome::Done),
        };

        for (volume, annotations) in build_pvc_annotations(&tserver) {
            let selector = server_selector(&tserver).equals(T_LOCAL_VOLUME_LABEL, &volume);
            for pvc in cluster.list::<corev1::PersistentVolumeClaim>(namespace, &selector)? {
                if is_deleting(&pvc.metadata) || contains_all(pvc.metadata.annotations.as_ref(), &annotations) {
                    continue;
                }
                let mut updated = pvc.as_ref().clone();
                updated
                    .metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .extend(annotations.clone());
                if let Err(err) = cluster.update(&updated).await {
                    let pvc_name = pvc.metadata.name.as_deref().unwrap_or_default();
                    return retry(resource_update_error("persistentvolumeclaims", namespace, pvc_name, err));
                }
            }
        }
        Ok(Outcome::Done)
    }
}
