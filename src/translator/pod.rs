// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;

use crate::config_store::NamespaceConfig;
use crate::crds::{AbilityAffinityType, TServer};
use crate::meta::*;
use crate::translator::{protocol, server_labels};

fn namespace(tserver: &TServer) -> String {
    tserver.metadata.namespace.clone().unwrap_or_default()
}

fn tserver_name(tserver: &TServer) -> String {
    tserver.metadata.name.clone().unwrap_or_default()
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}

fn non_empty_string(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Plain ports first, then servants. Host ports are mapped only off the host
/// network, and a servant shows up only when it is host mapped. A host port
/// names its target ignoring letter case.
pub fn build_container_ports(tserver: &TServer) -> Vec<corev1::ContainerPort> {
    let k8s = &tserver.spec.k8s;
    let host_port = |name: &str| {
        if k8s.host_network {
            None
        } else {
            k8s.host_ports
                .iter()
                .find(|hp| hp.name_ref.eq_ignore_ascii_case(name))
                .map(|hp| hp.port)
        }
    };

    let mut ports: Vec<corev1::ContainerPort> = tserver
        .spec
        .ports()
        .iter()
        .map(|p| corev1::ContainerPort {
            name: Some(p.name.clone()),
            container_port: p.port,
            protocol: Some(protocol(p.is_tcp)),
            host_port: host_port(&p.name),
            ..Default::default()
        })
        .collect();

    for servant in tserver.spec.servants() {
        if let Some(hp) = host_port(&servant.name) {
            ports.push(corev1::ContainerPort {
                name: Some(format!("p{}-{}", hp, servant.port)),
                container_port: servant.port,
                protocol: Some(protocol(servant.is_tcp)),
                host_port: Some(hp),
                ..Default::default()
            });
        }
    }
    ports
}

pub fn build_container_volume_mounts(tserver: &TServer) -> Vec<corev1::VolumeMount> {
    let k8s = &tserver.spec.k8s;
    let mut mounts: Vec<corev1::VolumeMount> = k8s
        .mounts
        .iter()
        .filter(|m| {
            !(k8s.daemon_set
                && (m.source.t_local_volume.is_some() || m.source.persistent_volume_claim_template.is_some()))
        })
        .map(|m| corev1::VolumeMount {
            name: m.name.clone(),
            read_only: if m.read_only { Some(true) } else { None },
            mount_path: m.mount_path.clone(),
            sub_path: non_empty_string(&m.sub_path),
            mount_propagation: m.mount_propagation.clone(),
            sub_path_expr: non_empty_string(&m.sub_path_expr),
        })
        .collect();

    mounts.push(corev1::VolumeMount {
        name: HOST_TIMEZONE_VOLUME.to_string(),
        mount_path: HOST_TIMEZONE_PATH.to_string(),
        ..Default::default()
    });
    if tserver.spec.is_tars() {
        mounts.push(corev1::VolumeMount {
            name: NODE_WORK_DIR_VOLUME.to_string(),
            mount_path: NODE_WORK_DIR_PATH.to_string(),
            ..Default::default()
        });
    }
    mounts
}

pub fn build_readiness_gates(tserver: &TServer) -> Option<Vec<corev1::PodReadinessGate>> {
    non_empty(
        tserver
            .spec
            .k8s
            .readiness_gates
            .iter()
            .map(|gate| corev1::PodReadinessGate {
                condition_type: gate.clone(),
            })
            .collect(),
    )
}

fn exists(key: String) -> corev1::NodeSelectorRequirement {
    corev1::NodeSelectorRequirement {
        key,
        operator: "Exists".to_string(),
        values: None,
    }
}

fn preferred(weight: i32, key: String) -> corev1::PreferredSchedulingTerm {
    corev1::PreferredSchedulingTerm {
        weight,
        preference: corev1::NodeSelectorTerm {
            match_expressions: Some(vec![exists(key)]),
            match_fields: None,
        },
    }
}

pub fn build_affinity(tserver: &TServer) -> corev1::Affinity {
    let ns = namespace(tserver);
    let spec = &tserver.spec;
    let mut requirements = spec.k8s.node_selector.clone();
    requirements.push(exists(namespace_node_label(&ns)));

    let mut preferred_terms = Vec::new();
    let mut pod_anti_affinity = None;

    if !spec.k8s.daemon_set {
        match spec.k8s.ability_affinity {
            AbilityAffinityType::AppRequired => requirements.push(exists(app_ability_label(&ns, &spec.app))),
            AbilityAffinityType::ServerRequired => {
                requirements.push(exists(server_ability_label(&ns, &spec.app, &spec.server)))
            }
            AbilityAffinityType::AppOrServerPreferred => {
                preferred_terms.push(preferred(60, server_ability_label(&ns, &spec.app, &spec.server)));
                preferred_terms.push(preferred(30, app_ability_label(&ns, &spec.app)));
            }
            AbilityAffinityType::None => {}
        }
        if spec.k8s.not_stacked {
            pod_anti_affinity = Some(corev1::PodAntiAffinity {
                required_during_scheduling_ignored_during_execution: Some(vec![corev1::PodAffinityTerm {
                    label_selector: Some(metav1::LabelSelector {
                        match_labels: Some(server_labels(tserver)),
                        match_expressions: None,
                    }),
                    namespaces: Some(vec![ns.clone()]),
                    topology_key: K8S_HOST_NAME_LABEL.to_string(),
                    ..Default::default()
                }]),
                preferred_during_scheduling_ignored_during_execution: None,
            });
        }
    }

    corev1::Affinity {
        node_affinity: Some(corev1::NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(corev1::NodeSelector {
                node_selector_terms: vec![corev1::NodeSelectorTerm {
                    match_expressions: Some(requirements),
                    match_fields: None,
                }],
            }),
            preferred_during_scheduling_ignored_during_execution: non_empty(preferred_terms),
        }),
        pod_affinity: None,
        pod_anti_affinity,
    }
}

pub fn build_volumes(tserver: &TServer) -> Vec<corev1::Volume> {
    let mut volumes: Vec<corev1::Volume> = tserver
        .spec
        .k8s
        .mounts
        .iter()
        .filter(|m| m.source.persistent_volume_claim_template.is_none() && m.source.t_local_volume.is_none())
        .map(|m| corev1::Volume {
            name: m.name.clone(),
            host_path: m.source.host_path.clone(),
            empty_dir: m.source.empty_dir.clone(),
            secret: m.source.secret.clone(),
            persistent_volume_claim: m.source.persistent_volume_claim.clone(),
            downward_api: m.source.downward_api.clone(),
            config_map: m.source.config_map.clone(),
            ..Default::default()
        })
        .collect();

    volumes.push(corev1::Volume {
        name: HOST_TIMEZONE_VOLUME.to_string(),
        host_path: Some(corev1::HostPathVolumeSource {
            path: HOST_TIMEZONE_PATH.to_string(),
            type_: None,
        }),
        ..Default::default()
    });
    if tserver.spec.is_tars() {
        volumes.push(corev1::Volume {
            name: NODE_WORK_DIR_VOLUME.to_string(),
            empty_dir: Some(corev1::EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }
    volumes
}

fn field_env(name: &str, field_path: &str) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(corev1::EnvVarSource {
            field_ref: Some(corev1::ObjectFieldSelector {
                field_path: field_path.to_string(),
                api_version: None,
            }),
            ..Default::default()
        }),
    }
}

fn value_env(name: &str, value: &str) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

/// Image of the injected node agent: the release's own, else the namespace default.
pub fn node_image(tserver: &TServer, config: &NamespaceConfig) -> String {
    let image = tserver
        .spec
        .release
        .as_ref()
        .map(|r| r.node_image.clone())
        .unwrap_or_default();
    if image.is_empty() || image == SERVICE_IMAGE_PLACEHOLDER {
        config.node_image.clone()
    } else {
        image
    }
}

pub fn build_init_containers(tserver: &TServer, config: &NamespaceConfig) -> Option<Vec<corev1::Container>> {
    if !tserver.spec.is_tars() {
        return None;
    }
    let image = node_image(tserver, config);
    if image == SERVICE_IMAGE_PLACEHOLDER {
        tracing::warn!("{}", should_not_happen_error("no node image set"));
    }

    let mut env = vec![
        field_env("Namespace", "metadata.namespace"),
        field_env("PodName", "metadata.name"),
        field_env("PodIP", "status.podIP"),
        value_env("ServerApp", &tserver.spec.app),
        value_env("ServerName", &tserver.spec.server),
    ];
    let launcher = &tserver.spec.k8s.launcher_type;
    if !launcher.is_empty() && *launcher != config.launcher_type {
        env.push(value_env("LauncherType", launcher));
    }

    Some(vec![corev1::Container {
        name: NODE_INIT_CONTAINER_NAME.to_string(),
        image: Some(image),
        image_pull_policy: Some(DEFAULT_IMAGE_PULL_POLICY.to_string()),
        env: Some(env),
        resources: Some(corev1::ResourceRequirements::default()),
        volume_mounts: Some(vec![corev1::VolumeMount {
            name: NODE_WORK_DIR_VOLUME.to_string(),
            mount_path: NODE_WORK_DIR_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }])
}

/// Release secret, plus the node image secret of a tars server, deduplicated.
pub fn build_image_pull_secrets(tserver: &TServer, config: &NamespaceConfig) -> Option<Vec<corev1::LocalObjectReference>> {
    let release = tserver.spec.release.as_ref()?;
    let secret = release.secret.clone();
    let mut node_secret = String::new();
    if tserver.spec.tars.is_some() && (!release.node_image.is_empty() || !release.node_secret.is_empty()) {
        node_secret = if release.node_secret.is_empty() {
            config.node_secret.clone()
        } else {
            release.node_secret.clone()
        };
    }

    let mut secrets = Vec::new();
    if !secret.is_empty() {
        secrets.push(corev1::LocalObjectReference { name: Some(secret.clone()) });
    }
    if !node_secret.is_empty() && node_secret != secret {
        secrets.push(corev1::LocalObjectReference { name: Some(node_secret) });
    }
    non_empty(secrets)
}

pub fn server_image(tserver: &TServer) -> String {
    tserver
        .spec
        .release
        .as_ref()
        .map(|r| r.image.clone())
        .unwrap_or_else(|| SERVICE_IMAGE_PLACEHOLDER.to_string())
}

pub fn template_labels(tserver: &TServer) -> BTreeMap<String, String> {
    let mut labels = server_labels(tserver);
    if let Some(release) = &tserver.spec.release {
        labels.insert(T_SERVER_ID_LABEL.to_string(), release.id.clone());
    }
    labels
}

pub fn build_server_container(tserver: &TServer, config: &NamespaceConfig) -> corev1::Container {
    let k8s = &tserver.spec.k8s;
    let pull_policy = if k8s.image_pull_policy.is_empty() {
        config.image_pull_policy.clone()
    } else {
        k8s.image_pull_policy.clone()
    };
    corev1::Container {
        name: tserver_name(tserver),
        image: Some(server_image(tserver)),
        command: non_empty(k8s.command.clone()),
        args: non_empty(k8s.args.clone()),
        ports: non_empty(build_container_ports(tserver)),
        env_from: non_empty(k8s.env_from.clone()),
        env: non_empty(k8s.env.clone()),
        resources: Some(k8s.resources.clone()),
        volume_mounts: non_empty(build_container_volume_mounts(tserver)),
        image_pull_policy: Some(pull_policy),
        ..Default::default()
    }
}

pub fn build_pod_template(tserver: &TServer, config: &NamespaceConfig) -> corev1::PodTemplateSpec {
    let k8s = &tserver.spec.k8s;
    let dns_policy = if k8s.host_network {
        "ClusterFirstWithHostNet"
    } else {
        "ClusterFirst"
    };

    corev1::PodTemplateSpec {
        metadata: Some(metav1::ObjectMeta {
            name: Some(tserver_name(tserver)),
            labels: Some(template_labels(tserver)),
            ..Default::default()
        }),
        spec: Some(corev1::PodSpec {
            volumes: non_empty(build_volumes(tserver)),
            init_containers: build_init_containers(tserver, config),
            containers: vec![build_server_container(tserver, config)],
            restart_policy: Some("Always".to_string()),
            dns_policy: Some(dns_policy.to_string()),
            service_account_name: non_empty_string(&k8s.service_account),
            host_network: Some(k8s.host_network),
            host_ipc: Some(k8s.host_ipc),
            image_pull_secrets: build_image_pull_secrets(tserver, config),
            affinity: Some(build_affinity(tserver)),
            dns_config: Some(corev1::PodDNSConfig {
                options: Some(vec![corev1::PodDNSConfigOption {
                    name: Some("ndots".to_string()),
                    value: Some("2".to_string()),
                }]),
                ..Default::default()
            }),
            readiness_gates: build_readiness_gates(tserver),
            enable_service_links: Some(false),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::*;

    fn tars_server() -> TServer {
        let mut ts = TServer::new(
            "test-echo",
            TServerSpec {
                app: "Test".to_string(),
                server: "Echo".to_string(),
                sub_type: TServerSubType::Tars,
                tars: Some(TServerTars {
                    template: "tars.cpp".to_string(),
                    servants: vec![
                        TServerServant {
                            name: "EchoObj".to_string(),
                            port: 10000,
                            is_tcp: true,
                            is_tars: true,
                            ..Default::default()
                        },
                        TServerServant {
                            name: "AdminObj".to_string(),
                            port: 10001,
                            is_tcp: true,
                            ..Default::default()
                        },
                    ],
                    ports: vec![TServerPort {
                        name: "http".to_string(),
                        port: 8080,
                        is_tcp: true,
                    }],
                    ..Default::default()
                }),
                k8s: TServerK8S {
                    host_ports: vec![TK8SHostPort {
                        name_ref: "EchoObj".to_string(),
                        port: 20000,
                    }],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        ts.metadata.namespace = Some("tars".to_string());
        ts
    }

    #[test]
    fn only_host_mapped_servants_become_container_ports() {
        let ports = build_container_ports(&tars_server());
        let names: Vec<_> = ports.iter().map(|p| p.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["http", "p20000-10000"]);
        assert_eq!(ports[1].host_port, Some(20000));
        assert_eq!(ports[0].host_port, None);
    }

    #[test]
    fn host_port_reference_ignores_case() {
        let mut ts = tars_server();
        ts.spec.k8s.host_ports = vec![
            TK8SHostPort {
                name_ref: "ECHOOBJ".to_string(),
                port: 20000,
            },
            TK8SHostPort {
                name_ref: "Http".to_string(),
                port: 80,
            },
        ];
        let ports = build_container_ports(&ts);
        let mapped: Vec<_> = ports.iter().map(|p| (p.name.clone().unwrap(), p.host_port)).collect();
        assert_eq!(
            mapped,
            vec![("http".to_string(), Some(80)), ("p20000-10000".to_string(), Some(20000))]
        );
    }

    #[test]
    fn host_network_disables_host_port_mapping() {
        let mut ts = tars_server();
        ts.spec.k8s.host_network = true;
        let ports = build_container_ports(&ts);
        assert_eq!(ports.len(), 1);
        assert!(ports.iter().all(|p| p.name.as_deref() != Some(NODE_SERVANT_NAME)));
    }

    #[test]
    fn tars_servers_get_node_init_container_and_work_dir() {
        let mut ts = tars_server();
        ts.spec.k8s.launcher_type = "foreground".to_string();
        let config = NamespaceConfig {
            node_image: "registry/tarsnode:v2".to_string(),
            ..Default::default()
        };
        let init = build_init_containers(&ts, &config).unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, "tarsnode");
        assert_eq!(init[0].image.as_deref(), Some("registry/tarsnode:v2"));
        let env = init[0].env.as_ref().unwrap();
        assert_eq!(env.last().unwrap().name, "LauncherType");

        let mounts = build_container_volume_mounts(&ts);
        assert_eq!(mounts.last().unwrap().name, NODE_WORK_DIR_VOLUME);
        let volumes = build_volumes(&ts);
        assert_eq!(volumes.len(), 2);
    }

    #[test]
    fn affinity_always_requires_namespace_node_label() {
        let mut ts = tars_server();
        ts.spec.k8s.ability_affinity = AbilityAffinityType::AppOrServerPreferred;
        ts.spec.k8s.not_stacked = true;
        let affinity = build_affinity(&ts);
        let node = affinity.node_affinity.unwrap();
        let required = node.required_during_scheduling_ignored_during_execution.unwrap();
        let exprs = required.node_selector_terms[0].match_expressions.clone().unwrap();
        assert_eq!(exprs.len(), 1);
        assert_eq!(exprs[0].key, "tars.io/node.tars");
        let preferred = node.preferred_during_scheduling_ignored_during_execution.unwrap();
        assert_eq!(preferred[0].weight, 60);
        assert_eq!(
            preferred[0].preference.match_expressions.as_ref().unwrap()[0].key,
            "tars.io/ability.tars.Test-Echo"
        );
        assert_eq!(preferred[1].weight, 30);
        assert!(affinity.pod_anti_affinity.is_some());

        ts.spec.k8s.daemon_set = true;
        let affinity = build_affinity(&ts);
        assert!(affinity.pod_anti_affinity.is_none());
        assert!(affinity
            .node_affinity
            .unwrap()
            .preferred_during_scheduling_ignored_during_execution
            .is_none());
    }

    #[test]
    fn pull_secrets_are_deduplicated() {
        let mut ts = tars_server();
        ts.spec.release = Some(TServerRelease {
            id: "v1".to_string(),
            image: "registry/echo:v1".to_string(),
            secret: "pull".to_string(),
            node_image: "registry/tarsnode:v1".to_string(),
            node_secret: "pull".to_string(),
            ..Default::default()
        });
        let secrets = build_image_pull_secrets(&ts, &NamespaceConfig::default()).unwrap();
        assert_eq!(secrets.len(), 1);

        ts.spec.release.as_mut().unwrap().secret = String::new();
        ts.spec.release.as_mut().unwrap().node_secret = String::new();
        assert!(build_image_pull_secrets(&ts, &NamespaceConfig::default()).is_none());
    }
}
