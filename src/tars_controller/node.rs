// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use std::sync::Arc;

use crate::error::Error;
use crate::kubernetes_api_objects::owner::is_deleting;
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{invalid_key, retry, Context};

/// Keeps the bare `tars.io/node` label in step with the per-namespace
/// `tars.io/node.<namespace>` labels.
pub struct NodeReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> NodeReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> NodeReconciler<C> {
        NodeReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for NodeReconciler<C> {
    fn name(&self) -> &'static str {
        "node"
    }

    fn enqueue(&self, _event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::Node(node) => node.metadata.name.clone().map(Enqueue::Now),
            _ => None,
        }
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        if key.is_empty() || key.contains('/') {
            return invalid_key(key);
        }
        let node = match self.ctx.cluster.get::<corev1::Node>("", key)? {
            Some(node) => node,
            None => return Ok(Outcome::Done),
        };
        let labels = match &node.metadata.labels {
            Some(labels) if !is_deleting(&node.metadata) => labels,
            _ => return Ok(Outcome::Done),
        };

        let namespace_prefix = format!("{}.", TARS_NODE_LABEL);
        let has_namespace_label = labels.keys().any(|k| k.starts_with(&namespace_prefix));
        let has_node_label = labels.contains_key(TARS_NODE_LABEL);
        if has_namespace_label == has_node_label {
            return Ok(Outcome::Done);
        }

        let mut updated = node.as_ref().clone();
        let labels = updated.metadata.labels.get_or_insert_with(Default::default);
        if has_namespace_label {
            labels.insert(TARS_NODE_LABEL.to_string(), String::new());
        } else {
            labels.remove(TARS_NODE_LABEL);
        }
        match self.ctx.cluster.update(&updated).await {
            Ok(()) => Ok(Outcome::Done),
            Err(err) => retry(resource_update_error("node", "", key, err)),
        }
    }
}
