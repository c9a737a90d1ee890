// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Field-by-field comparison of observed objects against what the translator
//! would build now. Only fields the translator sets are looked at, and values
//! the apiserver fills in by default compare equal to their absence.

use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::config_store::NamespaceConfig;
use crate::crds::{TEndpoint, TServer};
use crate::kubernetes_api_objects::quantity::equal_resource_requirements;
use crate::meta::NODE_INIT_CONTAINER_NAME;
use crate::translator::pod::{build_pod_template, template_labels};
use crate::translator::service::build_service_ports;
use crate::translator::server_labels;
use crate::translator::tendpoint::endpoint_spec;

/// Every pair of `want` is present in `have`.
pub fn contain_labels(want: &BTreeMap<String, String>, have: Option<&BTreeMap<String, String>>) -> bool {
    let have = match have {
        Some(have) => have,
        None => return want.is_empty(),
    };
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

fn equal_labels(want: &BTreeMap<String, String>, have: Option<&BTreeMap<String, String>>) -> bool {
    have.map_or(want.is_empty(), |have| have == want)
}

fn protocol_or_tcp(protocol: &Option<String>) -> &str {
    protocol.as_deref().unwrap_or("TCP")
}

pub fn equal_service_ports(want: &[corev1::ServicePort], have: &[corev1::ServicePort]) -> bool {
    want.len() == have.len()
        && want.iter().zip(have).all(|(l, r)| {
            l.name == r.name
                && l.port == r.port
                && protocol_or_tcp(&l.protocol) == protocol_or_tcp(&r.protocol)
                && l.node_port == r.node_port
                && l.target_port.clone().unwrap_or(IntOrString::Int(l.port))
                    == r.target_port.clone().unwrap_or(IntOrString::Int(r.port))
        })
}

pub fn equal_service(tserver: &TServer, service: &corev1::Service) -> bool {
    let spec = match &service.spec {
        Some(spec) => spec,
        None => return false,
    };
    let labels = server_labels(tserver);
    spec.type_.as_deref().unwrap_or("ClusterIP") == "ClusterIP"
        && spec.cluster_ip.as_deref() == Some("None")
        && contain_labels(&labels, service.metadata.labels.as_ref())
        && equal_labels(&labels, spec.selector.as_ref())
        && equal_service_ports(&build_service_ports(tserver), spec.ports.as_deref().unwrap_or_default())
}

fn equal_env_source(l: &corev1::EnvVarSource, r: &corev1::EnvVarSource) -> bool {
    let field_ref = match (&l.field_ref, &r.field_ref) {
        (None, None) => true,
        (Some(l), Some(r)) => l.field_path == r.field_path,
        _ => false,
    };
    let config_map = match (&l.config_map_key_ref, &r.config_map_key_ref) {
        (None, None) => true,
        (Some(l), Some(r)) => l.key == r.key && l.name == r.name,
        _ => false,
    };
    let resource_field = match (&l.resource_field_ref, &r.resource_field_ref) {
        (None, None) => true,
        (Some(l), Some(r)) => {
            l.resource == r.resource && l.container_name.as_deref().unwrap_or_default() == r.container_name.as_deref().unwrap_or_default()
        }
        _ => false,
    };
    let secret = match (&l.secret_key_ref, &r.secret_key_ref) {
        (None, None) => true,
        (Some(l), Some(r)) => l.key == r.key && l.name == r.name,
        _ => false,
    };
    field_ref && config_map && resource_field && secret
}

pub fn equal_env(want: &[corev1::EnvVar], have: &[corev1::EnvVar]) -> bool {
    want.len() == have.len()
        && want.iter().zip(have).all(|(l, r)| {
            l.name == r.name
                && l.value.as_deref().unwrap_or_default() == r.value.as_deref().unwrap_or_default()
                && match (&l.value_from, &r.value_from) {
                    (None, None) => true,
                    (Some(l), Some(r)) => equal_env_source(l, r),
                    _ => false,
                }
        })
}

pub fn equal_env_from(want: &[corev1::EnvFromSource], have: &[corev1::EnvFromSource]) -> bool {
    want.len() == have.len()
        && want.iter().zip(have).all(|(l, r)| {
            l.prefix.as_deref().unwrap_or_default() == r.prefix.as_deref().unwrap_or_default()
                && l.config_map_ref == r.config_map_ref
                && l.secret_ref == r.secret_ref
        })
}

// A mode the caller left out is defaulted by the apiserver and is not compared.
fn equal_mode(want: Option<i32>, have: Option<i32>) -> bool {
    want.is_none() || want == have
}

fn equal_key_paths(want: &Option<Vec<corev1::KeyToPath>>, have: &Option<Vec<corev1::KeyToPath>>) -> bool {
    let want = want.as_deref().unwrap_or_default();
    let have = have.as_deref().unwrap_or_default();
    want.len() == have.len()
        && want
            .iter()
            .zip(have)
            .all(|(l, r)| l.key == r.key && l.path == r.path && equal_mode(l.mode, r.mode))
}

fn equal_volume(l: &corev1::Volume, r: &corev1::Volume) -> bool {
    let host_path = match (&l.host_path, &r.host_path) {
        (None, None) => true,
        (Some(l), Some(r)) => {
            l.path == r.path
                && match l.type_.as_deref() {
                    None | Some("") => r.type_.as_deref().unwrap_or_default().is_empty(),
                    want => want == r.type_.as_deref(),
                }
        }
        _ => false,
    };
    let empty_dir = match (&l.empty_dir, &r.empty_dir) {
        (None, None) => true,
        (Some(l), Some(r)) => {
            l.medium.as_deref().unwrap_or_default() == r.medium.as_deref().unwrap_or_default() && l.size_limit == r.size_limit
        }
        _ => false,
    };
    let secret = match (&l.secret, &r.secret) {
        (None, None) => true,
        (Some(l), Some(r)) => {
            l.secret_name == r.secret_name
                && l.optional == r.optional
                && equal_mode(l.default_mode, r.default_mode)
                && equal_key_paths(&l.items, &r.items)
        }
        _ => false,
    };
    let config_map = match (&l.config_map, &r.config_map) {
        (None, None) => true,
        (Some(l), Some(r)) => {
            l.name == r.name
                && l.optional == r.optional
                && equal_mode(l.default_mode, r.default_mode)
                && equal_key_paths(&l.items, &r.items)
        }
        _ => false,
    };
    let claim = match (&l.persistent_volume_claim, &r.persistent_volume_claim) {
        (None, None) => true,
        (Some(l), Some(r)) => l.claim_name == r.claim_name && l.read_only.unwrap_or(false) == r.read_only.unwrap_or(false),
        _ => false,
    };
    let downward_api = match (&l.downward_api, &r.downward_api) {
        (None, None) => true,
        (Some(l), Some(r)) => {
            let want = l.items.as_deref().unwrap_or_default();
            let have = r.items.as_deref().unwrap_or_default();
            want.len() == have.len()
                && want.iter().zip(have).all(|(l, r)| {
                    l.path == r.path
                        && equal_mode(l.mode, r.mode)
                        && l.field_ref.as_ref().map(|f| &f.field_path) == r.field_ref.as_ref().map(|f| &f.field_path)
                })
        }
        _ => false,
    };
    l.name == r.name && host_path && empty_dir && secret && config_map && claim && downward_api
}

pub fn equal_volumes(want: &[corev1::Volume], have: &[corev1::Volume]) -> bool {
    want.len() == have.len() && want.iter().zip(have).all(|(l, r)| equal_volume(l, r))
}

pub fn equal_volume_mounts(want: &[corev1::VolumeMount], have: &[corev1::VolumeMount]) -> bool {
    want.len() == have.len()
        && want.iter().zip(have).all(|(l, r)| {
            l.name == r.name
                && l.mount_path == r.mount_path
                && l.read_only.unwrap_or(false) == r.read_only.unwrap_or(false)
                && l.sub_path.as_deref().unwrap_or_default() == r.sub_path.as_deref().unwrap_or_default()
                && l.sub_path_expr.as_deref().unwrap_or_default() == r.sub_path_expr.as_deref().unwrap_or_default()
                && l.mount_propagation.as_deref().unwrap_or("None") == r.mount_propagation.as_deref().unwrap_or("None")
        })
}

pub fn equal_container_ports(want: &[corev1::ContainerPort], have: &[corev1::ContainerPort]) -> bool {
    want.len() == have.len()
        && want.iter().zip(have).all(|(l, r)| {
            l.name == r.name
                && l.container_port == r.container_port
                && protocol_or_tcp(&l.protocol) == protocol_or_tcp(&r.protocol)
                && l.host_port.unwrap_or(0) == r.host_port.unwrap_or(0)
        })
}

fn equal_container(want: &corev1::Container, have: &corev1::Container) -> bool {
    want.image == have.image
        && want.image_pull_policy == have.image_pull_policy
        && want.command.as_deref().unwrap_or_default() == have.command.as_deref().unwrap_or_default()
        && want.args.as_deref().unwrap_or_default() == have.args.as_deref().unwrap_or_default()
        && equal_env(want.env.as_deref().unwrap_or_default(), have.env.as_deref().unwrap_or_default())
        && equal_env_from(
            want.env_from.as_deref().unwrap_or_default(),
            have.env_from.as_deref().unwrap_or_default(),
        )
        && equal_resource_requirements(
            &want.resources.clone().unwrap_or_default(),
            &have.resources.clone().unwrap_or_default(),
        )
        && equal_container_ports(want.ports.as_deref().unwrap_or_default(), have.ports.as_deref().unwrap_or_default())
        && equal_volume_mounts(
            want.volume_mounts.as_deref().unwrap_or_default(),
            have.volume_mounts.as_deref().unwrap_or_default(),
        )
}

fn node_init_container(spec: &corev1::PodSpec) -> Option<&corev1::Container> {
    spec.init_containers
        .iter()
        .flatten()
        .find(|c| c.name == NODE_INIT_CONTAINER_NAME)
}

/// Compares the pod template the translator governs. Containers and init
/// containers it did not inject are ignored.
pub fn equal_pod_template(tserver: &TServer, config: &NamespaceConfig, template: &corev1::PodTemplateSpec) -> bool {
    let desired = build_pod_template(tserver, config);
    let (want, have) = match (&desired.spec, &template.spec) {
        (Some(want), Some(have)) => (want, have),
        _ => return false,
    };

    if !contain_labels(&template_labels(tserver), template.metadata.as_ref().and_then(|m| m.labels.as_ref())) {
        return false;
    }
    if want.host_ipc.unwrap_or(false) != have.host_ipc.unwrap_or(false)
        || want.host_network.unwrap_or(false) != have.host_network.unwrap_or(false)
        || want.service_account_name.as_deref().unwrap_or_default() != have.service_account_name.as_deref().unwrap_or_default()
        || want.image_pull_secrets.as_deref().unwrap_or_default() != have.image_pull_secrets.as_deref().unwrap_or_default()
        || want.affinity != have.affinity
        || want.readiness_gates.as_deref().unwrap_or_default() != have.readiness_gates.as_deref().unwrap_or_default()
    {
        return false;
    }
    if !equal_volumes(want.volumes.as_deref().unwrap_or_default(), have.volumes.as_deref().unwrap_or_default()) {
        return false;
    }

    match (node_init_container(want), node_init_container(have)) {
        (None, None) => {}
        (Some(l), Some(r)) => {
            if l.image != r.image || !equal_env(l.env.as_deref().unwrap_or_default(), r.env.as_deref().unwrap_or_default()) {
                return false;
            }
        }
        _ => return false,
    }

    want.containers.iter().all(|l| match have.containers.iter().find(|r| r.name == l.name) {
        Some(r) => equal_container(l, r),
        None => false,
    })
}

fn equal_workload_identity(tserver: &TServer, labels: Option<&BTreeMap<String, String>>, selector: Option<&BTreeMap<String, String>>) -> bool {
    let want = server_labels(tserver);
    contain_labels(&want, labels) && equal_labels(&want, selector)
}

// The apiserver fills in RollingUpdate with partition 0.
fn normalized_statefulset_strategy(strategy: Option<&appsv1::StatefulSetUpdateStrategy>) -> (String, i32, Option<IntOrString>) {
    let type_ = strategy
        .and_then(|s| s.type_.clone())
        .unwrap_or_else(|| "RollingUpdate".to_string());
    let rolling = strategy.and_then(|s| s.rolling_update.as_ref());
    match type_.as_str() {
        "RollingUpdate" => (
            type_,
            rolling.and_then(|r| r.partition).unwrap_or(0),
            rolling.and_then(|r| r.max_unavailable.clone()),
        ),
        _ => (type_, 0, None),
    }
}

// The apiserver fills in RollingUpdate with maxUnavailable 1 and maxSurge 0.
fn normalized_daemonset_strategy(strategy: Option<&appsv1::DaemonSetUpdateStrategy>) -> (String, IntOrString, IntOrString) {
    let type_ = strategy
        .and_then(|s| s.type_.clone())
        .unwrap_or_else(|| "RollingUpdate".to_string());
    let rolling = strategy.and_then(|s| s.rolling_update.as_ref());
    match type_.as_str() {
        "RollingUpdate" => (
            type_,
            rolling.and_then(|r| r.max_unavailable.clone()).unwrap_or(IntOrString::Int(1)),
            rolling.and_then(|r| r.max_surge.clone()).unwrap_or(IntOrString::Int(0)),
        ),
        _ => (type_, IntOrString::Int(0), IntOrString::Int(0)),
    }
}

pub fn equal_statefulset(tserver: &TServer, config: &NamespaceConfig, statefulset: &appsv1::StatefulSet) -> bool {
    let spec = match &statefulset.spec {
        Some(spec) => spec,
        None => return false,
    };
    spec.replicas.unwrap_or(1) == tserver.spec.k8s.replicas
        && equal_workload_identity(tserver, statefulset.metadata.labels.as_ref(), spec.selector.match_labels.as_ref())
        && normalized_statefulset_strategy(Some(&tserver.spec.k8s.update_strategy))
            == normalized_statefulset_strategy(spec.update_strategy.as_ref())
        && equal_pod_template(tserver, config, &spec.template)
}

pub fn equal_daemonset(tserver: &TServer, config: &NamespaceConfig, daemonset: &appsv1::DaemonSet) -> bool {
    let spec = match &daemonset.spec {
        Some(spec) => spec,
        None => return false,
    };
    let desired = crate::translator::daemonset::build_update_strategy(tserver);
    equal_workload_identity(tserver, daemonset.metadata.labels.as_ref(), spec.selector.match_labels.as_ref())
        && normalized_daemonset_strategy(Some(&desired)) == normalized_daemonset_strategy(spec.update_strategy.as_ref())
        && equal_pod_template(tserver, config, &spec.template)
}

pub fn equal_tendpoint(tserver: &TServer, endpoint: &TEndpoint) -> bool {
    endpoint.spec == endpoint_spec(tserver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::*;
    use crate::translator::daemonset::build_daemonset;
    use crate::translator::service::build_service;
    use crate::translator::statefulset::build_statefulset;
    use crate::translator::tendpoint::build_tendpoint;

    fn tserver() -> TServer {
        let mut ts = TServer::new(
            "test-echo",
            TServerSpec {
                app: "Test".to_string(),
                server: "Echo".to_string(),
                sub_type: TServerSubType::Tars,
                tars: Some(TServerTars {
                    template: "tars.cpp".to_string(),
                    servants: vec![TServerServant {
                        name: "EchoObj".to_string(),
                        port: 10000,
                        is_tcp: true,
                        is_tars: true,
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                k8s: TServerK8S {
                    replicas: 1,
                    env: vec![corev1::EnvVar {
                        name: "MODE".to_string(),
                        value: Some("prod".to_string()),
                        value_from: None,
                    }],
                    mounts: vec![TK8SMount {
                        name: "conf".to_string(),
                        mount_path: "/conf".to_string(),
                        source: TK8SMountSource {
                            config_map: Some(corev1::ConfigMapVolumeSource {
                                name: Some("echo-conf".to_string()),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                release: Some(TServerRelease {
                    id: "v1".to_string(),
                    image: "registry/echo:v1".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        ts.metadata.namespace = Some("tars".to_string());
        ts
    }

    #[test]
    fn freshly_built_objects_are_equal() {
        let ts = tserver();
        let config = NamespaceConfig::default();
        assert!(equal_service(&ts, &build_service(&ts)));
        assert!(equal_statefulset(&ts, &config, &build_statefulset(&ts, &config)));
        assert!(equal_daemonset(&ts, &config, &build_daemonset(&ts, &config)));
        assert!(equal_tendpoint(&ts, &build_tendpoint(&ts)));
    }

    #[test]
    fn apiserver_defaults_do_not_count_as_drift() {
        let ts = tserver();
        let config = NamespaceConfig::default();
        let mut sts = build_statefulset(&ts, &config);
        {
            let spec = sts.spec.as_mut().unwrap();
            spec.update_strategy = Some(appsv1::StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(appsv1::RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    max_unavailable: None,
                }),
            });
            let pod = spec.template.spec.as_mut().unwrap();
            for volume in pod.volumes.iter_mut().flatten() {
                if let Some(cm) = volume.config_map.as_mut() {
                    cm.default_mode = Some(0o644);
                }
                if let Some(hp) = volume.host_path.as_mut() {
                    hp.type_ = Some(String::new());
                }
            }
            pod.containers[0].ports.iter_mut().flatten().for_each(|p| p.protocol = None);
            pod.containers[0].termination_message_path = Some("/dev/termination-log".to_string());
            pod.scheduler_name = Some("default-scheduler".to_string());
        }
        assert!(equal_statefulset(&ts, &config, &sts));
    }

    #[test]
    fn governed_changes_are_detected() {
        let ts = tserver();
        let config = NamespaceConfig::default();
        let sts = build_statefulset(&ts, &config);

        let mut scaled = ts.clone();
        scaled.spec.k8s.replicas = 3;
        assert!(!equal_statefulset(&scaled, &config, &sts));

        let mut released = ts.clone();
        released.spec.release.as_mut().unwrap().image = "registry/echo:v2".to_string();
        assert!(!equal_statefulset(&released, &config, &sts));

        let mut env = ts.clone();
        env.spec.k8s.env[0].value = Some("dev".to_string());
        assert!(!equal_statefulset(&env, &config, &sts));

        let mut gated = ts.clone();
        gated.spec.k8s.readiness_gates = vec!["tars.io/active".to_string()];
        assert!(!equal_daemonset(&gated, &config, &build_daemonset(&ts, &config)));
    }

    fn with_resources(ts: &mut TServer, cpu: &str, memory: &str) {
        use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
        ts.spec.k8s.resources = corev1::ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(cpu.to_string())),
                ("memory".to_string(), Quantity(memory.to_string())),
            ])),
            ..Default::default()
        };
    }

    #[test]
    fn canonicalized_quantities_are_not_drift() {
        let config = NamespaceConfig::default();
        let mut stored = tserver();
        with_resources(&mut stored, "500m", "1Gi");
        let sts = build_statefulset(&stored, &config);
        let ds = build_daemonset(&stored, &config);

        let mut ts = tserver();
        with_resources(&mut ts, "0.5", "1024Mi");
        assert!(equal_statefulset(&ts, &config, &sts));
        assert!(equal_daemonset(&ts, &config, &ds));

        with_resources(&mut ts, "1", "1Gi");
        assert!(!equal_statefulset(&ts, &config, &sts));
        assert!(!equal_daemonset(&ts, &config, &ds));
    }

    #[test]
    fn foreign_containers_are_ignored() {
        let ts = tserver();
        let config = NamespaceConfig::default();
        let mut sts = build_statefulset(&ts, &config);
        sts.spec.as_mut().unwrap().template.spec.as_mut().unwrap().containers.push(corev1::Container {
            name: "istio-proxy".to_string(),
            ..Default::default()
        });
        assert!(equal_statefulset(&ts, &config, &sts));
    }

    #[test]
    fn service_port_name_case_follows_the_translator() {
        let mut ts = tserver();
        ts.spec.tars.as_mut().unwrap().servants[0].name = "ECHOOBJ".to_string();
        let service = build_service(&tserver());
        assert!(equal_service(&ts, &service));

        ts.spec.tars.as_mut().unwrap().servants[0].port = 10002;
        assert!(!equal_service(&ts, &service));
    }
}
