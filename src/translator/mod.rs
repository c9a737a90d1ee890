// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Pure synthesis of the native objects a TServer is converged onto.

pub mod daemonset;
pub mod pod;
pub mod service;
pub mod statefulset;
pub mod tendpoint;

use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config_store::ConfigStore;
use crate::crds::{TEndpoint, TExitedRecord, TServer};
use crate::meta::{T_SERVER_APP_LABEL, T_SERVER_NAME_LABEL};

pub fn protocol(is_tcp: bool) -> String {
    if is_tcp {
        "TCP".to_string()
    } else {
        "UDP".to_string()
    }
}

/// The `{app, server}` pair every derived object is labelled and selected by.
pub fn server_labels(tserver: &TServer) -> BTreeMap<String, String> {
    BTreeMap::from([
        (T_SERVER_APP_LABEL.to_string(), tserver.spec.app.clone()),
        (T_SERVER_NAME_LABEL.to_string(), tserver.spec.server.clone()),
    ])
}

/// Builders bound to the per-namespace defaults they may consult.
#[derive(Clone)]
pub struct Translator {
    config: Arc<ConfigStore>,
}

impl Translator {
    pub fn new(config: Arc<ConfigStore>) -> Translator {
        Translator { config }
    }

    fn namespace(tserver: &TServer) -> &str {
        tserver.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn build_service(&self, tserver: &TServer) -> corev1::Service {
        service::build_service(tserver)
    }

    pub fn build_statefulset(&self, tserver: &TServer) -> appsv1::StatefulSet {
        statefulset::build_statefulset(tserver, &self.config.get(Self::namespace(tserver)))
    }

    pub fn build_daemonset(&self, tserver: &TServer) -> appsv1::DaemonSet {
        daemonset::build_daemonset(tserver, &self.config.get(Self::namespace(tserver)))
    }

    pub fn build_tendpoint(&self, tserver: &TServer) -> TEndpoint {
        tendpoint::build_tendpoint(tserver)
    }

    pub fn build_texitedrecord(&self, tserver: &TServer) -> TExitedRecord {
        tendpoint::build_texitedrecord(tserver)
    }
}
