// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use std::sync::Arc;

use crate::crds::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// Every kind the informers observe. Reconcilers match on the variants they
/// care about and ignore the rest.
#[derive(Clone, Debug)]
pub enum Watched {
    TServer(Arc<TServer>),
    TEndpoint(Arc<TEndpoint>),
    TExitedRecord(Arc<TExitedRecord>),
    TConfig(Arc<TConfig>),
    TAccount(Arc<TAccount>),
    TTemplate(Arc<TTemplate>),
    TTree(Arc<TTree>),
    TImage(Arc<TImage>),
    TFrameworkConfig(Arc<TFrameworkConfig>),
    Pod(Arc<corev1::Pod>),
    Service(Arc<corev1::Service>),
    StatefulSet(Arc<appsv1::StatefulSet>),
    DaemonSet(Arc<appsv1::DaemonSet>),
    PersistentVolumeClaim(Arc<corev1::PersistentVolumeClaim>),
    Node(Arc<corev1::Node>),
}

macro_rules! watched_from {
    ($variant:ident, $t:ty) => {
        impl From<Arc<$t>> for Watched {
            fn from(obj: Arc<$t>) -> Watched {
                Watched::$variant(obj)
            }
        }
    };
}

watched_from!(TServer, TServer);
watched_from!(TEndpoint, TEndpoint);
watched_from!(TExitedRecord, TExitedRecord);
watched_from!(TConfig, TConfig);
watched_from!(TAccount, TAccount);
watched_from!(TTemplate, TTemplate);
watched_from!(TTree, TTree);
watched_from!(TImage, TImage);
watched_from!(TFrameworkConfig, TFrameworkConfig);
watched_from!(Pod, corev1::Pod);
watched_from!(Service, corev1::Service);
watched_from!(StatefulSet, appsv1::StatefulSet);
watched_from!(DaemonSet, appsv1::DaemonSet);
watched_from!(PersistentVolumeClaim, corev1::PersistentVolumeClaim);
watched_from!(Node, corev1::Node);
