// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;

use crate::config_store::NamespaceConfig;
use crate::crds::TServer;
use crate::kubernetes_api_objects::owner::controller_owner_refs;
use crate::meta::*;
use crate::translator::pod::build_pod_template;
use crate::translator::server_labels;

/// Claim template backing a managed local volume (or the host bind placeholder).
pub fn build_local_volume_claim_template(tserver: &TServer, name: &str) -> corev1::PersistentVolumeClaim {
    let mut labels = server_labels(tserver);
    labels.insert(T_LOCAL_VOLUME_LABEL.to_string(), name.to_string());
    corev1::PersistentVolumeClaim {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            namespace: tserver.metadata.namespace.clone(),
            labels: Some(labels.clone()),
            owner_references: controller_owner_refs(tserver),
            ..Default::default()
        },
        spec: Some(corev1::PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            selector: Some(metav1::LabelSelector {
                match_labels: Some(labels),
                match_expressions: None,
            }),
            resources: Some(corev1::ResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity("1G".to_string()))])),
                ..Default::default()
            }),
            storage_class_name: Some(T_STORAGE_CLASS_NAME.to_string()),
            volume_mode: Some("Filesystem".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn build_volume_claim_templates(tserver: &TServer) -> Vec<corev1::PersistentVolumeClaim> {
    let k8s = &tserver.spec.k8s;
    let mut templates = Vec::new();
    for mount in &k8s.mounts {
        if let Some(template) = &mount.source.persistent_volume_claim_template {
            let mut pvc = template.clone();
            pvc.metadata.name = Some(mount.name.clone());
            templates.push(pvc);
        }
        if mount.source.t_local_volume.is_some() {
            templates.push(build_local_volume_claim_template(tserver, &mount.name));
        }
    }
    if k8s.host_ipc || k8s.host_network || !k8s.host_ports.is_empty() {
        templates.push(build_local_volume_claim_template(tserver, T_HOST_BIND_PLACEHOLDER));
    }
    templates
}

pub fn build_statefulset(tserver: &TServer, config: &NamespaceConfig) -> appsv1::StatefulSet {
    let k8s = &tserver.spec.k8s;
    let templates = build_volume_claim_templates(tserver);
    appsv1::StatefulSet {
        metadata: metav1::ObjectMeta {
            name: tserver.metadata.name.clone(),
            namespace: tserver.metadata.namespace.clone(),
            labels: Some(server_labels(tserver)),
            owner_references: controller_owner_refs(tserver),
            ..Default::default()
        },
        spec: Some(appsv1::StatefulSetSpec {
            replicas: Some(k8s.replicas),
            selector: metav1::LabelSelector {
                match_labels: Some(server_labels(tserver)),
                match_expressions: None,
            },
            template: build_pod_template(tserver, config),
            volume_claim_templates: if templates.is_empty() { None } else { Some(templates) },
            service_name: tserver.metadata.name.clone().unwrap_or_default(),
            pod_management_policy: if k8s.pod_management_policy.is_empty() {
                None
            } else {
                Some(k8s.pod_management_policy.clone())
            },
            update_strategy: Some(k8s.update_strategy.clone()),
            revision_history_limit: Some(config.revision_history_limit),
            ..Default::default()
        }),
        status: None,
    }
}

/// Containers the translator does not own are carried over, so sidecars
/// injected by others survive the update.
pub fn merge_foreign_containers(tserver: &TServer, current: &corev1::PodTemplateSpec, desired: &mut corev1::PodTemplateSpec) {
    let own_name = tserver.metadata.name.clone().unwrap_or_default();
    let (current_spec, desired_spec) = match (&current.spec, desired.spec.as_mut()) {
        (Some(c), Some(d)) => (c, d),
        _ => return,
    };
    for container in &current_spec.containers {
        if container.name != own_name {
            desired_spec.containers.push(container.clone());
        }
    }
    for container in current_spec.init_containers.iter().flatten() {
        if container.name != NODE_INIT_CONTAINER_NAME {
            desired_spec.init_containers.get_or_insert_with(Vec::new).push(container.clone());
        }
    }
}

pub fn sync_statefulset(tserver: &TServer, config: &NamespaceConfig, statefulset: &mut appsv1::StatefulSet) {
    statefulset
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(server_labels(tserver));
    let spec = statefulset.spec.get_or_insert_with(Default::default);
    spec.replicas = Some(tserver.spec.k8s.replicas);
    spec.update_strategy = Some(tserver.spec.k8s.update_strategy.clone());
    let mut template = build_pod_template(tserver, config);
    merge_foreign_containers(tserver, &spec.template, &mut template);
    spec.template = template;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::*;

    fn server_with_mounts() -> TServer {
        let mut ts = TServer::new(
            "test-echo",
            TServerSpec {
                app: "Test".to_string(),
                server: "Echo".to_string(),
                k8s: TServerK8S {
                    replicas: 2,
                    mounts: vec![
                        TK8SMount {
                            name: "data".to_string(),
                            mount_path: "/data".to_string(),
                            source: TK8SMountSource {
                                t_local_volume: Some(TLocalVolume::default()),
                                ..Default::default()
                            },
                            ..Default::default()
                        },
                        TK8SMount {
                            name: "logs".to_string(),
                            mount_path: "/logs".to_string(),
                            source: TK8SMountSource {
                                empty_dir: Some(corev1::EmptyDirVolumeSource::default()),
                                ..Default::default()
                            },
                            ..Default::default()
                        },
                    ],
                    host_network: true,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        ts.metadata.namespace = Some("tars".to_string());
        ts
    }

    #[test]
    fn local_volumes_and_host_binds_become_claim_templates() {
        let templates = build_volume_claim_templates(&server_with_mounts());
        let names: Vec<_> = templates.iter().map(|t| t.metadata.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["data", "delay-bind"]);
        let spec = templates[0].spec.as_ref().unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("tars-storage-class"));
        assert_eq!(
            templates[0].metadata.labels.as_ref().unwrap().get(T_LOCAL_VOLUME_LABEL).map(String::as_str),
            Some("data")
        );
    }

    #[test]
    fn statefulset_carries_template_and_history_limit() {
        let sts = build_statefulset(&server_with_mounts(), &NamespaceConfig::default());
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.service_name, "test-echo");
        assert_eq!(spec.revision_history_limit, Some(5));
        let pod = spec.template.spec.unwrap();
        assert!(pod.init_containers.is_none());
        assert_eq!(
            pod.dns_policy.as_deref(),
            Some("ClusterFirstWithHostNet")
        );
        // The local volume is mounted from its claim, not a pod volume.
        let volumes: Vec<_> = pod.volumes.unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(volumes, vec!["logs", "host-timezone"]);
    }

    #[test]
    fn sync_keeps_foreign_containers_in_place() {
        let ts = server_with_mounts();
        let config = NamespaceConfig::default();
        let mut sts = build_statefulset(&ts, &config);
        {
            let pod = sts.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
            pod.containers.push(corev1::Container {
                name: "sidecar".to_string(),
                ..Default::default()
            });
            pod.init_containers = Some(vec![corev1::Container {
                name: "prepare".to_string(),
                ..Default::default()
            }]);
        }
        let mut changed = ts.clone();
        changed.spec.k8s.replicas = 4;
        sync_statefulset(&changed, &config, &mut sts);
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(4));
        let pod = spec.template.spec.unwrap();
        let names: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["test-echo", "sidecar"]);
        assert_eq!(pod.init_containers.unwrap()[0].name, "prepare");
    }
}
