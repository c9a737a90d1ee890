// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Label/annotation vocabulary, fixed names and defaults shared by the
//! translator, the reconcilers and the admission webhook.

use std::time::Duration;

pub const GROUP: &str = "k8s.tars.io";
pub const VERSION: &str = "v1beta3";

// Node eligibility. A node carrying `tars.io/node.<namespace>` may run pods of
// that namespace; `tars.io/ability.<namespace>.<app>[-<server>]` marks app pools.
pub const TARS_NODE_LABEL: &str = "tars.io/node";
pub const TARS_ABILITY_LABEL_PREFIX: &str = "tars.io/ability";

pub const T_SERVER_APP_LABEL: &str = "tars.io/ServerApp";
pub const T_SERVER_NAME_LABEL: &str = "tars.io/ServerName";
pub const T_SUB_TYPE_LABEL: &str = "tars.io/SubType";
pub const T_SERVER_ID_LABEL: &str = "tars.io/ServerID";
pub const T_TEMPLATE_LABEL: &str = "tars.io/Template";
pub const T_TEMPLATE_PARENT_LABEL: &str = "tars.io/Parent";

pub const T_CONFIG_NAME_LABEL: &str = "tars.io/ConfigName";
pub const T_CONFIG_VERSION_LABEL: &str = "tars.io/Version";
pub const T_CONFIG_ACTIVATED_LABEL: &str = "tars.io/Activated";
pub const T_CONFIG_POD_SEQ_LABEL: &str = "tars.io/PodSeq";
pub const T_CONFIG_DELETING_LABEL: &str = "tars.io/Deleting";
pub const T_CONFIG_DEACTIVATE_LABEL: &str = "tars.io/Deactivate";

pub const T_LOCAL_VOLUME_LABEL: &str = "tars.io/LocalVolume";
pub const T_LOCAL_VOLUME_UID_ANNOTATION: &str = "tars.io/LocalVolumeUID";
pub const T_LOCAL_VOLUME_GID_ANNOTATION: &str = "tars.io/LocalVolumeGID";
pub const T_LOCAL_VOLUME_MODE_ANNOTATION: &str = "tars.io/LocalVolumeMode";

pub const K8S_HOST_NAME_LABEL: &str = "kubernetes.io/hostname";

pub const T_POD_READINESS_GATE: &str = "tars.io/active";

pub const T_MAX_REPLICAS_ANNOTATION: &str = "tars.io/MaxReplicas";
pub const T_MIN_REPLICAS_ANNOTATION: &str = "tars.io/MinReplicas";

// Reserved for the injected node agent; user ports may not take either.
pub const NODE_SERVANT_NAME: &str = "nodeobj";
pub const NODE_SERVANT_PORT: i32 = 19385;

pub const FIXED_TTREE_RESOURCE_NAME: &str = "tars-tree";
pub const FIXED_TFRAMEWORK_CONFIG_RESOURCE_NAME: &str = "tars-framework";
pub const NODE_TIMAGE_NAME: &str = "node";
pub const DEFAULT_NODE_RELEASE_PREFIX: &str = "default";

pub const T_STORAGE_CLASS_NAME: &str = "tars-storage-class";
pub const T_HOST_BIND_PLACEHOLDER: &str = "delay-bind";

pub const MAX_TSERVER_NAME: usize = 59;

pub const SERVICE_IMAGE_PLACEHOLDER: &str = " ";

pub const NODE_INIT_CONTAINER_NAME: &str = "tarsnode";
pub const NODE_WORK_DIR_VOLUME: &str = "tarsnode-work-dir";
pub const NODE_WORK_DIR_PATH: &str = "/usr/local/app/tars/tarsnode";
pub const HOST_TIMEZONE_VOLUME: &str = "host-timezone";
pub const HOST_TIMEZONE_PATH: &str = "/etc/localtime";

pub const MASTER_POD_SEQ: &str = "m";

pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "tars-system";
pub const DEFAULT_CONTROLLER_USERNAME: &str = "tars-controller";
pub const KUBERNETES_SYSTEM_ACCOUNT_PREFIX: &str = "system:serviceaccount:kube-system:";
pub const DEFAULT_MAX_RECORD_LEN: usize = 60;
pub const DEFAULT_MAX_TCONFIG_HISTORY: usize = 10;
pub const DEFAULT_MAX_IMAGE_BUILD_TIME: u64 = 480;
pub const DEFAULT_WORKLOAD_HISTORY_LIMIT: i32 = 5;
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "Always";

// Exited pods already journaled are searched for only in the newest entries.
pub const EXITED_RECORD_CHECK_LEN: usize = 12;

pub const STATEFULSET_SETTLE_DELAY: Duration = Duration::from_secs(3);
pub const WORKLOAD_SETTLE_DELAY: Duration = Duration::from_secs(1);

pub const RESOURCE_OUT_CONTROL_REASON: &str = "OutControl";

pub fn controller_username(controller_namespace: &str) -> String {
    format!(
        "system:serviceaccount:{}:{}",
        controller_namespace, DEFAULT_CONTROLLER_USERNAME
    )
}

/// Name every derived object of a TServer takes.
pub fn tserver_name(app: &str, server: &str) -> String {
    format!("{}-{}", app.to_lowercase(), server.to_lowercase())
}

pub fn namespace_node_label(namespace: &str) -> String {
    format!("{}.{}", TARS_NODE_LABEL, namespace)
}

pub fn app_ability_label(namespace: &str, app: &str) -> String {
    format!("{}.{}.{}", TARS_ABILITY_LABEL_PREFIX, namespace, app)
}

pub fn server_ability_label(namespace: &str, app: &str, server: &str) -> String {
    format!("{}.{}.{}-{}", TARS_ABILITY_LABEL_PREFIX, namespace, app, server)
}

pub fn resource_get_error(kind: &str, namespace: &str, name: &str, err: impl std::fmt::Display) -> String {
    format!("get {} {}/{} error: {}", kind, namespace, name, err)
}

pub fn resource_create_error(kind: &str, namespace: &str, name: &str, err: impl std::fmt::Display) -> String {
    format!("create {} {}/{} error: {}", kind, namespace, name, err)
}

pub fn resource_update_error(kind: &str, namespace: &str, name: &str, err: impl std::fmt::Display) -> String {
    format!("update {} {}/{} error: {}", kind, namespace, name, err)
}

pub fn resource_patch_error(kind: &str, namespace: &str, name: &str, err: impl std::fmt::Display) -> String {
    format!("patch {} {}/{} error: {}", kind, namespace, name, err)
}

pub fn resource_delete_error(kind: &str, namespace: &str, name: &str, err: impl std::fmt::Display) -> String {
    format!("delete {} {}/{} err: {}", kind, namespace, name, err)
}

pub fn resource_delete_collection_error(kind: &str, selector: &str, err: impl std::fmt::Display) -> String {
    format!("deleteCollection {} selector({}) err: {}", kind, selector, err)
}

pub fn resource_selector_error(namespace: &str, kind: &str, err: impl std::fmt::Display) -> String {
    format!("selector {}/{} error: {}", namespace, kind, err)
}

pub fn resource_out_control_error(kind: &str, namespace: &str, name: &str, owner_namespace: &str, owner_name: &str) -> String {
    format!(
        "{} {}/{} already exists but not managed by {}/{}",
        kind, namespace, name, owner_namespace, owner_name
    )
}

pub fn resource_exist_error(kind: &str, namespace: &str, name: &str) -> String {
    format!("{} {}/{} already exists", kind, namespace, name)
}

pub fn resource_not_exist_error(kind: &str, namespace: &str, name: &str) -> String {
    format!("{} {}/{} not exists", kind, namespace, name)
}

pub fn field_immutable_error(kind: &str, field: &str) -> String {
    format!("{} resource filed \"{}\" is immutable", kind, field)
}

pub fn resource_invalid_error(kind: &str, msg: impl std::fmt::Display) -> String {
    format!("{} resource is invalid : {}", kind, msg)
}

pub fn should_not_happen_error(msg: impl std::fmt::Display) -> String {
    format!("should not happen : {}", msg)
}
