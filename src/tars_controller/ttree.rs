// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::sync::Arc;

use crate::crds::{TTree, TTreeApp};
use crate::error::Error;
use crate::kubernetes_api_objects::patch::PatchBuilder;
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{invalid_key, retry, split_key, Context};

const ADDED_BY_CONTROLLER: &str = "AddByController";

/// Registers the app of every TServer in the namespace's `tars-tree`.
pub struct TTreeReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TTreeReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TTreeReconciler<C> {
        TTreeReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TTreeReconciler<C> {
    fn name(&self) -> &'static str {
        "ttree"
    }

    fn enqueue(&self, _event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TServer(tserver) => {
                let namespace = tserver.metadata.namespace.as_deref()?;
                Some(Enqueue::Now(format!("{}/{}", namespace, tserver.spec.app)))
            }
            _ => None,
        }
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let (namespace, app) = match split_key(key) {
            Some(parts) => parts,
            None => return invalid_key(key),
        };
        let tree = match self.ctx.cluster.get::<TTree>(namespace, FIXED_TTREE_RESOURCE_NAME)? {
            Some(tree) => tree,
            None => {
                return retry(resource_get_error(
                    "ttree",
                    namespace,
                    FIXED_TTREE_RESOURCE_NAME,
                    "not found",
                ))
            }
        };
        if tree.apps.iter().any(|a| a.name == app) {
            return Ok(Outcome::Done);
        }

        let entry = TTreeApp {
            name: app.to_string(),
            create_time: Some(metav1::Time(Utc::now())),
            mark: ADDED_BY_CONTROLLER.to_string(),
            ..Default::default()
        };
        let patch = PatchBuilder::new().add("/apps/-", serde_json::to_value(&entry)?).build();
        match self
            .ctx
            .cluster
            .patch::<TTree>(namespace, FIXED_TTREE_RESOURCE_NAME, &patch)
            .await
        {
            Ok(()) => Ok(Outcome::Done),
            Err(err) => retry(resource_patch_error("ttree", namespace, FIXED_TTREE_RESOURCE_NAME, err)),
        }
    }
}
