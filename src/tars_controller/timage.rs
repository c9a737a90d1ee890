// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use std::sync::Arc;

use crate::crds::{TImage, TImageBuild};
use crate::error::Error;
use crate::kubernetes_api_objects::patch::PatchBuilder;
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{invalid_key, retry, Context};

const CHECK_BUILD_OVERTIME: &str = "CHECK_BUILD_OVERTIME";
const SERVER_IMAGE_TYPE: &str = "server";
const BUILD_FAILED_PHASE: &str = "Failed";
const BUILD_OVERTIME_MESSAGE: &str = "task overtime";

/// Fails server image builds still running once the namespace's
/// `maxBuildTime` has passed.
pub struct TImageReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TImageReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TImageReconciler<C> {
        TImageReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TImageReconciler<C> {
    fn name(&self) -> &'static str {
        "timage"
    }

    fn enqueue(&self, event: EventType, obj: &Watched) -> Option<Enqueue> {
        let image = match obj {
            Watched::TImage(image) if event != EventType::Deleted => image,
            _ => return None,
        };
        if image.image_type != SERVER_IMAGE_TYPE {
            return None;
        }
        let running = image.build.as_ref()?.running.as_ref()?;
        let namespace = image.metadata.namespace.as_deref()?;
        let name = image.metadata.name.as_deref()?;
        let key = format!("{}/{}/{}/{}", namespace, name, CHECK_BUILD_OVERTIME, running.id);
        Some(Enqueue::After(key, self.ctx.config.get(namespace).max_build_time))
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let parts: Vec<&str> = key.split('/').collect();
        let (namespace, name, build_id) = match parts.as_slice() {
            [namespace, name, CHECK_BUILD_OVERTIME, build_id] if !namespace.is_empty() && !name.is_empty() => {
                (*namespace, *name, *build_id)
            }
            _ => return invalid_key(key),
        };
        let image = match self.ctx.cluster.get::<TImage>(namespace, name)? {
            Some(image) => image,
            None => return Ok(Outcome::Done),
        };
        let running = match image.build.as_ref().and_then(|b| b.running.as_ref()) {
            Some(running) if running.id == build_id => running,
            _ => return Ok(Outcome::Done),
        };

        let mut last = running.clone();
        last.phase = BUILD_FAILED_PHASE.to_string();
        last.message = BUILD_OVERTIME_MESSAGE.to_string();
        let build = TImageBuild {
            last: Some(last),
            running: None,
        };
        let patch = PatchBuilder::new().add("/build", serde_json::to_value(&build)?).build();
        match self.ctx.cluster.patch::<TImage>(namespace, name, &patch).await {
            Ok(()) => Ok(Outcome::Done),
            Err(err) => retry(resource_patch_error("timage", namespace, name, err)),
        }
    }
}
