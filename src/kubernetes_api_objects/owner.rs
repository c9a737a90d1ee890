// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube_core::Resource;

/// The owner reference every derived object carries back to its parent.
/// Empty when the parent has not been persisted yet (no uid).
pub fn controller_owner_refs<K: Resource<DynamicType = ()>>(owner: &K) -> Option<Vec<metav1::OwnerReference>> {
    Some(owner.controller_owner_ref(&()).into_iter().collect())
}

pub fn controller_of(meta: &metav1::ObjectMeta) -> Option<&metav1::OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Whether `owner` is the managing controller of the object described by `meta`.
pub fn is_controlled_by<K: Resource<DynamicType = ()>>(meta: &metav1::ObjectMeta, owner: &K) -> bool {
    match (controller_of(meta), owner.meta().uid.as_ref()) {
        (Some(reference), Some(uid)) => &reference.uid == uid,
        _ => false,
    }
}

pub fn is_deleting(meta: &metav1::ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{TServer, TServerSpec};

    fn tserver(uid: &str) -> TServer {
        let mut ts = TServer::new("test-echo", TServerSpec::default());
        ts.metadata.namespace = Some("tars".to_string());
        ts.metadata.uid = Some(uid.to_string());
        ts
    }

    #[test]
    fn owner_is_matched_by_uid() {
        let owner = tserver("uid-1");
        let meta = metav1::ObjectMeta {
            owner_references: controller_owner_refs(&owner),
            ..Default::default()
        };
        assert!(is_controlled_by(&meta, &owner));
        assert!(!is_controlled_by(&meta, &tserver("uid-2")));
        assert!(!is_controlled_by(&metav1::ObjectMeta::default(), &owner));
    }
}
