// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::config_store::NamespaceConfig;
use crate::crds::TServer;
use crate::kubernetes_api_objects::owner::controller_owner_refs;
use crate::translator::pod::build_pod_template;
use crate::translator::server_labels;
use crate::translator::statefulset::merge_foreign_containers;

/// The StatefulSet strategy carried over. A partition becomes maxUnavailable.
pub fn build_update_strategy(tserver: &TServer) -> appsv1::DaemonSetUpdateStrategy {
    let strategy = &tserver.spec.k8s.update_strategy;
    let partition = strategy.rolling_update.as_ref().and_then(|r| r.partition);
    appsv1::DaemonSetUpdateStrategy {
        type_: strategy.type_.clone(),
        rolling_update: partition.map(|partition| appsv1::RollingUpdateDaemonSet {
            max_unavailable: Some(IntOrString::Int(partition.max(1))),
            max_surge: None,
        }),
    }
}

pub fn build_daemonset(tserver: &TServer, config: &NamespaceConfig) -> appsv1::DaemonSet {
    appsv1::DaemonSet {
        metadata: metav1::ObjectMeta {
            name: tserver.metadata.name.clone(),
            namespace: tserver.metadata.namespace.clone(),
            labels: Some(server_labels(tserver)),
            owner_references: controller_owner_refs(tserver),
            ..Default::default()
        },
        spec: Some(appsv1::DaemonSetSpec {
            selector: metav1::LabelSelector {
                match_labels: Some(server_labels(tserver)),
                match_expressions: None,
            },
            template: build_pod_template(tserver, config),
            update_strategy: Some(build_update_strategy(tserver)),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn sync_daemonset(tserver: &TServer, config: &NamespaceConfig, daemonset: &mut appsv1::DaemonSet) {
    daemonset
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(server_labels(tserver));
    let spec = daemonset.spec.get_or_insert_with(Default::default);
    let mut template = build_pod_template(tserver, config);
    merge_foreign_containers(tserver, &spec.template, &mut template);
    spec.template = template;
    spec.update_strategy = Some(build_update_strategy(tserver));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::*;

    #[test]
    fn partition_maps_to_max_unavailable() {
        let mut ts = TServer::new("test-echo", TServerSpec::default());
        ts.spec.k8s.update_strategy = appsv1::StatefulSetUpdateStrategy {
            type_: Some("RollingUpdate".to_string()),
            rolling_update: Some(appsv1::RollingUpdateStatefulSetStrategy {
                partition: Some(0),
                max_unavailable: None,
            }),
        };
        let strategy = build_update_strategy(&ts);
        assert_eq!(strategy.type_.as_deref(), Some("RollingUpdate"));
        assert_eq!(
            strategy.rolling_update.unwrap().max_unavailable,
            Some(IntOrString::Int(1))
        );

        ts.spec.k8s.update_strategy.rolling_update = None;
        assert!(build_update_strategy(&ts).rolling_update.is_none());
    }
}
