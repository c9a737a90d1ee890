// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! One reconciler per managed resource family. Each maps watched changes to
//! keys of its own and converges one key per `reconcile` call.

pub mod daemonset;
pub mod node;
pub mod pvc;
pub mod service;
pub mod statefulset;
pub mod taccount;
pub mod tconfig;
pub mod tendpoint;
pub mod texitedrecord;
pub mod tframeworkconfig;
pub mod timage;
pub mod tserver;
pub mod ttree;

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube_core::Resource;
use std::sync::Arc;
use tracing::*;

use crate::config_store::ConfigStore;
use crate::crds::TServer;
use crate::error::Error;
use crate::kubernetes_api_objects::owner::{controller_of, is_controlled_by};
use crate::kubernetes_api_objects::selector::Selector;
use crate::meta::*;
use crate::shim_layer::{Cluster, Kind, Outcome, Reconciler};
use crate::translator::Translator;

/// What every reconciler shares: the cluster facade, the namespace tunables
/// and the translator bound to them.
pub struct Context<C: Cluster> {
    pub cluster: Arc<C>,
    pub config: Arc<ConfigStore>,
    pub translator: Translator,
}

impl<C: Cluster> Context<C> {
    pub fn new(cluster: Arc<C>, config: Arc<ConfigStore>) -> Arc<Context<C>> {
        let translator = Translator::new(config.clone());
        Arc::new(Context {
            cluster,
            config,
            translator,
        })
    }
}

/// Splits a `namespace/name` key. Anything else, including empty parts, is
/// malformed.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => Some((namespace, name)),
        _ => None,
    }
}

pub fn invalid_key(key: &str) -> Result<Outcome, Error> {
    error!("invalid key: {}", key);
    Ok(Outcome::Done)
}

pub fn retry(message: String) -> Result<Outcome, Error> {
    error!("{}", message);
    Ok(Outcome::Retry)
}

pub fn object_key(meta: &metav1::ObjectMeta) -> Option<String> {
    Some(format!("{}/{}", meta.namespace.as_deref()?, meta.name.as_deref()?))
}

/// `namespace/app-server` for an object carrying the server label pair.
pub fn server_key(meta: &metav1::ObjectMeta) -> Option<String> {
    let labels = meta.labels.as_ref()?;
    let app = labels.get(T_SERVER_APP_LABEL)?;
    let server = labels.get(T_SERVER_NAME_LABEL)?;
    Some(format!("{}/{}", meta.namespace.as_deref()?, tserver_name(app, server)))
}

pub fn server_selector(tserver: &TServer) -> Selector {
    Selector::new()
        .equals(T_SERVER_APP_LABEL, &tserver.spec.app)
        .equals(T_SERVER_NAME_LABEL, &tserver.spec.server)
}

/// Whether the object behind `meta` belongs to the TServer `name`. While the
/// TServer exists its uid decides; once it is gone the owner reference has to
/// name it.
pub fn owned_by_tserver(meta: &metav1::ObjectMeta, name: &str, tserver: Option<&TServer>) -> bool {
    match tserver {
        Some(tserver) => is_controlled_by(meta, tserver),
        None => controller_of(meta).map_or(false, |r| r.kind == "TServer" && r.name == name),
    }
}

/// Deletes the object a TServer derived, leaving objects someone else owns in
/// place.
pub async fn delete_owned<C: Cluster, K: Kind>(
    cluster: &C,
    kind: &str,
    namespace: &str,
    name: &str,
    tserver: Option<&TServer>,
) -> Result<Outcome, Error> {
    let obj = match cluster.get::<K>(namespace, name)? {
        Some(obj) => obj,
        None => return Ok(Outcome::Done),
    };
    if !owned_by_tserver(obj.meta(), name, tserver) {
        warn!("{} {}/{} is not owned by tserver {}, leaving it", kind, namespace, name, name);
        return Ok(Outcome::Done);
    }
    match cluster.delete::<K>(namespace, name).await {
        Ok(()) => Ok(Outcome::Done),
        Err(err) => retry(resource_delete_error(kind, namespace, name, err)),
    }
}

/// Every reconciler of the controller binary, in start order.
pub fn reconcilers<C: Cluster>(ctx: &Arc<Context<C>>) -> Vec<Arc<dyn Reconciler>> {
    vec![
        Arc::new(tframeworkconfig::TFrameworkConfigReconciler::new(ctx.clone())),
        Arc::new(tserver::TServerReconciler::new(ctx.clone())),
        Arc::new(service::ServiceReconciler::new(ctx.clone())),
        Arc::new(statefulset::StatefulSetReconciler::new(ctx.clone())),
        Arc::new(daemonset::DaemonSetReconciler::new(ctx.clone())),
        Arc::new(pvc::PersistentVolumeClaimReconciler::new(ctx.clone())),
        Arc::new(tendpoint::TEndpointReconciler::new(ctx.clone())),
        Arc::new(texitedrecord::TExitedRecordReconciler::new(ctx.clone())),
        Arc::new(tconfig::TConfigRetentionReconciler::new(ctx.clone())),
        Arc::new(tconfig::TConfigDeactivateReconciler::new(ctx.clone())),
        Arc::new(tconfig::TConfigDeletingReconciler::new(ctx.clone())),
        Arc::new(taccount::TAccountReconciler::new(ctx.clone())),
        Arc::new(node::NodeReconciler::new(ctx.clone())),
        Arc::new(ttree::TTreeReconciler::new(ctx.clone())),
        Arc::new(timage::TImageReconciler::new(ctx.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn keys_need_both_parts() {
        assert_eq!(split_key("tars/test-echo"), Some(("tars", "test-echo")));
        assert_eq!(split_key("tars/"), None);
        assert_eq!(split_key("test-echo"), None);
        assert_eq!(split_key("tars/a/b"), None);
    }

    #[test]
    fn server_key_lowercases_the_label_pair() {
        let meta = metav1::ObjectMeta {
            namespace: Some("tars".to_string()),
            labels: Some(BTreeMap::from([
                (T_SERVER_APP_LABEL.to_string(), "Test".to_string()),
                (T_SERVER_NAME_LABEL.to_string(), "Echo".to_string()),
            ])),
            ..Default::default()
        };
        assert_eq!(server_key(&meta).as_deref(), Some("tars/test-echo"));
        assert_eq!(server_key(&metav1::ObjectMeta::default()), None);
    }

    #[test]
    fn ownership_falls_back_to_the_reference_name() {
        let tserver = crate::unit_tests::fixtures::normal_tserver();
        let meta = metav1::ObjectMeta {
            owner_references: crate::kubernetes_api_objects::owner::controller_owner_refs(&tserver),
            ..Default::default()
        };
        assert!(owned_by_tserver(&meta, "test-echo", Some(&tserver)));
        assert!(owned_by_tserver(&meta, "test-echo", None));
        assert!(!owned_by_tserver(&meta, "test-other", None));

        let mut successor = tserver.clone();
        successor.metadata.uid = Some("uid-successor".to_string());
        assert!(!owned_by_tserver(&meta, "test-echo", Some(&successor)));
        assert!(!owned_by_tserver(&metav1::ObjectMeta::default(), "test-echo", None));
    }
}
