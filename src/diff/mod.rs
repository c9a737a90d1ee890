// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Compute-before-write: each `dry_run_sync_*` returns the object to send to
//! the apiserver, or nothing when the observed one already matches.

pub mod equal;

use ahash::AHashSet;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;

use crate::config_store::NamespaceConfig;
use crate::crds::{TEndpoint, TServer};
use crate::translator::statefulset::build_volume_claim_templates;
use crate::translator::{daemonset, service, statefulset, tendpoint};

/// Decision for an object whose spec may not be mutable in place.
#[derive(Debug)]
pub enum Convergence<T> {
    InSync,
    Update(T),
    /// Delete the object so it is rebuilt, removing the local volume claims
    /// of the listed claim templates.
    Recreate(Vec<String>),
}

fn claim_names(claims: &[corev1::PersistentVolumeClaim]) -> Vec<String> {
    claims.iter().filter_map(|c| c.metadata.name.clone()).collect()
}

/// Claim templates cannot change once a StatefulSet exists. Returns `None`
/// while the current set is compatible with the desired one, else the names
/// of the current templates that are no longer wanted.
pub fn diff_volume_claim_templates(
    current: &[corev1::PersistentVolumeClaim],
    desired: &[corev1::PersistentVolumeClaim],
) -> Option<Vec<String>> {
    if current.is_empty() && !desired.is_empty() {
        return Some(Vec::new());
    }
    let wanted: AHashSet<String> = claim_names(desired).into_iter().collect();
    let removed: Vec<String> = claim_names(current).into_iter().filter(|name| !wanted.contains(name)).collect();
    if removed.is_empty() {
        None
    } else {
        Some(removed)
    }
}

pub fn dry_run_sync_service(tserver: &TServer, observed: &corev1::Service) -> Option<corev1::Service> {
    if equal::equal_service(tserver, observed) {
        return None;
    }
    let mut updated = observed.clone();
    service::sync_service(tserver, &mut updated);
    Some(updated)
}

pub fn dry_run_sync_statefulset(
    tserver: &TServer,
    config: &NamespaceConfig,
    observed: &appsv1::StatefulSet,
) -> Convergence<appsv1::StatefulSet> {
    let current = observed
        .spec
        .as_ref()
        .and_then(|s| s.volume_claim_templates.as_deref())
        .unwrap_or_default();
    if let Some(removed) = diff_volume_claim_templates(current, &build_volume_claim_templates(tserver)) {
        return Convergence::Recreate(removed);
    }
    if equal::equal_statefulset(tserver, config, observed) {
        return Convergence::InSync;
    }
    let mut updated = observed.clone();
    statefulset::sync_statefulset(tserver, config, &mut updated);
    Convergence::Update(updated)
}

pub fn dry_run_sync_daemonset(
    tserver: &TServer,
    config: &NamespaceConfig,
    observed: &appsv1::DaemonSet,
) -> Option<appsv1::DaemonSet> {
    if equal::equal_daemonset(tserver, config, observed) {
        return None;
    }
    let mut updated = observed.clone();
    daemonset::sync_daemonset(tserver, config, &mut updated);
    Some(updated)
}

pub fn dry_run_sync_tendpoint(tserver: &TServer, observed: &TEndpoint) -> Option<TEndpoint> {
    if equal::equal_tendpoint(tserver, observed) {
        return None;
    }
    let mut updated = observed.clone();
    tendpoint::sync_tendpoint(tserver, &mut updated);
    Some(updated)
}
