// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Objects shared by the reconciler, admission and scenario tests. Everything
//! lives in namespace `tars` and belongs to the `Test.Echo` server.

use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use std::collections::BTreeMap;

use crate::crds::*;
use crate::meta::*;

pub const NAMESPACE: &str = "tars";

fn server_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (T_SERVER_APP_LABEL.to_string(), "Test".to_string()),
        (T_SERVER_NAME_LABEL.to_string(), "Echo".to_string()),
    ])
}

fn tserver_with(spec: TServerSpec) -> TServer {
    let mut tserver = TServer::new("test-echo", spec);
    tserver.metadata.namespace = Some(NAMESPACE.to_string());
    tserver.metadata.uid = Some("uid-test-echo".to_string());
    tserver.metadata.labels = Some(server_labels());
    tserver
}

pub fn normal_tserver() -> TServer {
    tserver_with(TServerSpec {
        app: "Test".to_string(),
        server: "Echo".to_string(),
        sub_type: TServerSubType::Normal,
        normal: Some(TServerNormal {
            ports: vec![TServerPort {
                name: "main".to_string(),
                port: 9000,
                is_tcp: true,
            }],
        }),
        k8s: TServerK8S {
            replicas: 1,
            ..Default::default()
        },
        release: Some(TServerRelease {
            id: "v1".to_string(),
            image: "registry/echo:v1".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn tars_tserver() -> TServer {
    tserver_with(TServerSpec {
        app: "Test".to_string(),
        server: "Echo".to_string(),
        sub_type: TServerSubType::Tars,
        tars: Some(TServerTars {
            template: "tars.cpp".to_string(),
            servants: vec![TServerServant {
                name: "EchoObj".to_string(),
                port: 10000,
                thread: 3,
                connection: 1000,
                capacity: 1000,
                timeout: 60000,
                is_tars: true,
                is_tcp: true,
            }],
            ..Default::default()
        }),
        k8s: TServerK8S {
            replicas: 1,
            ..Default::default()
        },
        ..Default::default()
    })
}

pub fn local_volume_mount(name: &str) -> TK8SMount {
    TK8SMount {
        name: name.to_string(),
        mount_path: format!("/{}", name),
        source: TK8SMountSource {
            t_local_volume: Some(TLocalVolume::default()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn condition(type_: &str, status: &str, reason: &str, message: &str) -> corev1::PodCondition {
    let non_empty = |s: &str| if s.is_empty() { None } else { Some(s.to_string()) };
    corev1::PodCondition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: non_empty(reason),
        message: non_empty(message),
        ..Default::default()
    }
}

/// A pod of `test-echo`, Ready or not.
pub fn server_pod(name: &str, ready: bool) -> corev1::Pod {
    corev1::Pod {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{}", name)),
            labels: Some(server_labels()),
            ..Default::default()
        },
        spec: None,
        status: Some(corev1::PodStatus {
            pod_ip: Some("10.0.0.8".to_string()),
            host_ip: Some("192.168.0.3".to_string()),
            phase: Some("Running".to_string()),
            conditions: Some(vec![condition("Ready", if ready { "True" } else { "False" }, "", "")]),
            ..Default::default()
        }),
    }
}

pub fn tconfig(name: &str, version: &str, activated: bool) -> TConfig {
    let mut labels = server_labels();
    labels.insert(T_CONFIG_NAME_LABEL.to_string(), "echo.conf".to_string());
    labels.insert(T_CONFIG_POD_SEQ_LABEL.to_string(), MASTER_POD_SEQ.to_string());
    labels.insert(T_CONFIG_VERSION_LABEL.to_string(), version.to_string());
    labels.insert(T_CONFIG_ACTIVATED_LABEL.to_string(), activated.to_string());
    TConfig {
        metadata: metav1::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        app: "Test".to_string(),
        server: "Echo".to_string(),
        pod_seq: MASTER_POD_SEQ.to_string(),
        config_name: "echo.conf".to_string(),
        version: version.to_string(),
        config_content: "threads = 2".to_string(),
        activated,
        ..Default::default()
    }
}

pub fn tars_tree(apps: &[&str]) -> TTree {
    TTree {
        metadata: metav1::ObjectMeta {
            name: Some(FIXED_TTREE_RESOURCE_NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        businesses: vec![TTreeBusiness {
            name: "Platform".to_string(),
            ..Default::default()
        }],
        apps: apps
            .iter()
            .map(|app| TTreeApp {
                name: app.to_string(),
                business_ref: "Platform".to_string(),
                ..Default::default()
            })
            .collect(),
    }
}

pub fn ttemplate(name: &str, parent: &str) -> TTemplate {
    let mut template = TTemplate::new(
        name,
        TTemplateSpec {
            content: "<tars></tars>".to_string(),
            parent: parent.to_string(),
        },
    );
    template.metadata.namespace = Some(NAMESPACE.to_string());
    template
}
