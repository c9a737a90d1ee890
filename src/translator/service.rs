// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crds::TServer;
use crate::kubernetes_api_objects::owner::controller_owner_refs;
use crate::translator::{protocol, server_labels};

fn service_port(name: &str, port: i32, is_tcp: bool) -> corev1::ServicePort {
    corev1::ServicePort {
        name: Some(name.to_lowercase()),
        protocol: Some(protocol(is_tcp)),
        port,
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    }
}

/// Servants first, then plain ports. Names are lowercased.
pub fn build_service_ports(tserver: &TServer) -> Vec<corev1::ServicePort> {
    let mut ports = Vec::new();
    if let Some(tars) = &tserver.spec.tars {
        for servant in &tars.servants {
            ports.push(service_port(&servant.name, servant.port, servant.is_tcp));
        }
        for port in &tars.ports {
            ports.push(service_port(&port.name, port.port, port.is_tcp));
        }
    }
    if let Some(normal) = &tserver.spec.normal {
        for port in &normal.ports {
            ports.push(service_port(&port.name, port.port, port.is_tcp));
        }
    }
    ports
}

pub fn build_service(tserver: &TServer) -> corev1::Service {
    corev1::Service {
        metadata: metav1::ObjectMeta {
            name: tserver.metadata.name.clone(),
            namespace: tserver.metadata.namespace.clone(),
            labels: Some(server_labels(tserver)),
            owner_references: controller_owner_refs(tserver),
            ..metav1::ObjectMeta::default()
        },
        spec: Some(corev1::ServiceSpec {
            ports: Some(build_service_ports(tserver)),
            selector: Some(server_labels(tserver)),
            cluster_ip: Some("None".to_string()),
            type_: Some("ClusterIP".to_string()),
            ..corev1::ServiceSpec::default()
        }),
        ..Default::default()
    }
}

pub fn sync_service(tserver: &TServer, service: &mut corev1::Service) {
    service
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(server_labels(tserver));
    let spec = service.spec.get_or_insert_with(Default::default);
    spec.ports = Some(build_service_ports(tserver));
    spec.selector = Some(server_labels(tserver));
}
