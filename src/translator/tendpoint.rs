// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

use crate::crds::{TEndpoint, TEndpointSpec, TExitedRecord, TServer};
use crate::kubernetes_api_objects::owner::controller_owner_refs;
use crate::translator::server_labels;

/// The routing relevant part of a TServer, as mirrored on its TEndpoint.
pub fn endpoint_spec(tserver: &TServer) -> TEndpointSpec {
    let spec = &tserver.spec;
    TEndpointSpec {
        app: spec.app.clone(),
        server: spec.server.clone(),
        sub_type: spec.sub_type,
        important: spec.important,
        tars: spec.tars.clone(),
        normal: spec.normal.clone(),
        host_ports: spec.k8s.host_ports.clone(),
        release: spec.release.clone(),
    }
}

pub fn build_tendpoint(tserver: &TServer) -> TEndpoint {
    TEndpoint {
        metadata: metav1::ObjectMeta {
            name: tserver.metadata.name.clone(),
            namespace: tserver.metadata.namespace.clone(),
            labels: Some(server_labels(tserver)),
            owner_references: controller_owner_refs(tserver),
            ..Default::default()
        },
        spec: endpoint_spec(tserver),
        status: None,
    }
}

/// Rewrites the mirrored spec in place. Labels set by others survive; the
/// server pair is put back.
pub fn sync_tendpoint(tserver: &TServer, endpoint: &mut TEndpoint) {
    endpoint
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(server_labels(tserver));
    endpoint.metadata.owner_references = controller_owner_refs(tserver);
    endpoint.spec = endpoint_spec(tserver);
}

pub fn build_texitedrecord(tserver: &TServer) -> TExitedRecord {
    TExitedRecord {
        metadata: metav1::ObjectMeta {
            name: tserver.metadata.name.clone(),
            namespace: tserver.metadata.namespace.clone(),
            labels: Some(server_labels(tserver)),
            owner_references: controller_owner_refs(tserver),
            ..Default::default()
        },
        app: tserver.spec.app.clone(),
        server: tserver.spec.server.clone(),
        pods: Vec::new(),
    }
}
