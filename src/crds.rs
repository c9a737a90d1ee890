// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube_core::{NamespaceResourceScope, Resource};
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::meta::{GROUP, VERSION};

#[derive(Default, Debug, Clone, Copy, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq, Eq)]
pub enum TServerSubType {
    #[serde(rename = "tars")]
    Tars,
    #[default]
    #[serde(rename = "normal")]
    Normal,
}

impl std::fmt::Display for TServerSubType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TServerSubType::Tars => write!(f, "tars"),
            TServerSubType::Normal => write!(f, "normal"),
        }
    }
}

#[derive(Default, Debug, Clone, Copy, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq, Eq)]
pub enum AbilityAffinityType {
    AppRequired,
    ServerRequired,
    AppOrServerPreferred,
    #[default]
    None,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TServerServant {
    pub name: String,
    pub port: i32,
    #[serde(default)]
    pub thread: i32,
    #[serde(default)]
    pub connection: i32,
    #[serde(default)]
    pub capacity: i32,
    #[serde(default)]
    pub timeout: i32,
    #[serde(default)]
    pub is_tars: bool,
    #[serde(default)]
    pub is_tcp: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TServerPort {
    pub name: String,
    pub port: i32,
    #[serde(default)]
    pub is_tcp: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TServerTars {
    pub template: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub async_thread: i32,
    #[serde(default)]
    pub servants: Vec<TServerServant>,
    #[serde(default)]
    pub ports: Vec<TServerPort>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct TServerNormal {
    #[serde(default)]
    pub ports: Vec<TServerPort>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TK8SHostPort {
    pub name_ref: String,
    pub port: i32,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct TLocalVolume {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub gid: String,
    #[serde(default)]
    pub mode: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TK8SMountSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_path: Option<corev1::HostPathVolumeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<corev1::EmptyDirVolumeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<corev1::SecretVolumeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<corev1::PersistentVolumeClaimVolumeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_template: Option<corev1::PersistentVolumeClaim>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_local_volume: Option<TLocalVolume>,
    #[serde(rename = "downwardAPI", skip_serializing_if = "Option::is_none")]
    pub downward_api: Option<corev1::DownwardAPIVolumeSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<corev1::ConfigMapVolumeSource>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TK8SMount {
    pub name: String,
    pub source: TK8SMountSource,
    #[serde(default)]
    pub read_only: bool,
    pub mount_path: String,
    #[serde(default)]
    pub sub_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_propagation: Option<String>,
    #[serde(default)]
    pub sub_path_expr: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TServerK8S {
    #[serde(default)]
    pub service_account: String,
    #[serde(default)]
    pub env: Vec<corev1::EnvVar>,
    #[serde(default)]
    pub env_from: Vec<corev1::EnvFromSource>,
    #[serde(rename = "hostIPC", default)]
    pub host_ipc: bool,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default)]
    pub host_ports: Vec<TK8SHostPort>,
    #[serde(default)]
    pub mounts: Vec<TK8SMount>,
    #[serde(default)]
    pub daemon_set: bool,
    #[serde(default)]
    pub node_selector: Vec<corev1::NodeSelectorRequirement>,
    #[serde(default)]
    pub ability_affinity: AbilityAffinityType,
    #[serde(default)]
    pub not_stacked: bool,
    #[serde(default)]
    pub pod_management_policy: String,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub readiness_gates: Vec<String>,
    #[serde(default)]
    pub resources: corev1::ResourceRequirements,
    #[serde(default)]
    pub update_strategy: appsv1::StatefulSetUpdateStrategy,
    #[serde(default)]
    pub image_pull_policy: String,
    #[serde(default)]
    pub launcher_type: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TServerRelease {
    pub id: String,
    pub image: String,
    #[serde(default)]
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<metav1::Time>,
    #[serde(default)]
    pub node_image: String,
    #[serde(default)]
    pub node_secret: String,
}

#[derive(kube::CustomResource, Default, Debug, Clone, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[kube(group = "k8s.tars.io", version = "v1beta3", kind = "TServer")]
#[kube(shortname = "ts", namespaced)]
#[kube(status = "TServerStatus")]
#[serde(rename_all = "camelCase")]
pub struct TServerSpec {
    pub app: String,
    pub server: String,
    pub sub_type: TServerSubType,
    #[serde(default)]
    pub important: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tars: Option<TServerTars>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal: Option<TServerNormal>,
    #[serde(default)]
    pub k8s: TServerK8S,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<TServerRelease>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TServerStatus {
    pub replicas: i32,
    pub ready_replicas: i32,
    pub current_replicas: i32,
    pub selector: String,
}

impl Default for TServer {
    fn default() -> Self {
        Self {
            metadata: metav1::ObjectMeta::default(),
            spec: TServerSpec::default(),
            status: None,
        }
    }
}

#[derive(kube::CustomResource, Default, Debug, Clone, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[kube(group = "k8s.tars.io", version = "v1beta3", kind = "TEndpoint")]
#[kube(shortname = "te", namespaced)]
#[kube(status = "TEndpointStatus")]
#[serde(rename_all = "camelCase")]
pub struct TEndpointSpec {
    pub app: String,
    pub server: String,
    pub sub_type: TServerSubType,
    #[serde(default)]
    pub important: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tars: Option<TServerTars>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal: Option<TServerNormal>,
    #[serde(default)]
    pub host_ports: Vec<TK8SHostPort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<TServerRelease>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TEndpointPodStatus {
    pub uid: String,
    pub name: String,
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<metav1::Time>,
    #[serde(default)]
    pub container_statuses: Vec<corev1::ContainerStatus>,
    pub setting_state: String,
    pub present_state: String,
    pub present_message: String,
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct TEndpointStatus {
    #[serde(default)]
    pub pods: Vec<TEndpointPodStatus>,
}

impl Default for TEndpoint {
    fn default() -> Self {
        Self {
            metadata: metav1::ObjectMeta::default(),
            spec: TEndpointSpec::default(),
            status: None,
        }
    }
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TAccountAuthenticationToken {
    pub name: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<metav1::Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<metav1::Time>,
    #[serde(default)]
    pub valid: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TAccountAuthentication {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcrypt_password: Option<String>,
    #[serde(default)]
    pub tokens: Vec<TAccountAuthenticationToken>,
    #[serde(default)]
    pub activated: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TAccountAuthorization {
    pub flag: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<metav1::Time>,
}

#[derive(kube::CustomResource, Default, Debug, Clone, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[kube(group = "k8s.tars.io", version = "v1beta3", kind = "TAccount")]
#[kube(shortname = "tac", namespaced)]
pub struct TAccountSpec {
    pub username: String,
    #[serde(default)]
    pub extra: Vec<String>,
    #[serde(default)]
    pub authentication: TAccountAuthentication,
    #[serde(default)]
    pub authorization: Vec<TAccountAuthorization>,
}

impl Default for TAccount {
    fn default() -> Self {
        Self {
            metadata: metav1::ObjectMeta::default(),
            spec: TAccountSpec::default(),
        }
    }
}

#[derive(kube::CustomResource, Default, Debug, Clone, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[kube(group = "k8s.tars.io", version = "v1beta3", kind = "TTemplate")]
#[kube(shortname = "tt", namespaced)]
pub struct TTemplateSpec {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parent: String,
}

impl Default for TTemplate {
    fn default() -> Self {
        Self {
            metadata: metav1::ObjectMeta::default(),
            spec: TTemplateSpec::default(),
        }
    }
}

// The kinds below keep their payload at the top level of the object, next to
// metadata, so they carry a hand written Resource impl instead of the derive.
macro_rules! top_level_resource {
    ($t:ty, $kind:literal, $plural:literal) => {
        impl Resource for $t {
            type DynamicType = ();
            type Scope = NamespaceResourceScope;

            fn kind(_: &()) -> Cow<'_, str> {
                Cow::Borrowed($kind)
            }

            fn group(_: &()) -> Cow<'_, str> {
                Cow::Borrowed(GROUP)
            }

            fn version(_: &()) -> Cow<'_, str> {
                Cow::Borrowed(VERSION)
            }

            fn plural(_: &()) -> Cow<'_, str> {
                Cow::Borrowed($plural)
            }

            fn meta(&self) -> &metav1::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut metav1::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TExitedPod {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "nodeIP", default)]
    pub node_ip: String,
    #[serde(rename = "podIP", default)]
    pub pod_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<metav1::Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_time: Option<metav1::Time>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
pub struct TExitedRecord {
    #[serde(default)]
    pub metadata: metav1::ObjectMeta,
    pub app: String,
    pub server: String,
    #[serde(default)]
    pub pods: Vec<TExitedPod>,
}

top_level_resource!(TExitedRecord, "TExitedRecord", "texitedrecords");

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TConfig {
    #[serde(default)]
    pub metadata: metav1::ObjectMeta,
    pub app: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub pod_seq: String,
    pub config_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub config_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<metav1::Time>,
    #[serde(default)]
    pub update_person: String,
    #[serde(default)]
    pub update_reason: String,
    #[serde(default)]
    pub activated: bool,
}

top_level_resource!(TConfig, "TConfig", "tconfigs");

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TTreeBusiness {
    pub name: String,
    #[serde(default)]
    pub show: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default)]
    pub create_person: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<metav1::Time>,
    #[serde(default)]
    pub mark: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TTreeApp {
    pub name: String,
    #[serde(default)]
    pub business_ref: String,
    #[serde(default)]
    pub create_person: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<metav1::Time>,
    #[serde(default)]
    pub mark: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
pub struct TTree {
    #[serde(default)]
    pub metadata: metav1::ObjectMeta,
    #[serde(default)]
    pub businesses: Vec<TTreeBusiness>,
    #[serde(default)]
    pub apps: Vec<TTreeApp>,
}

top_level_resource!(TTree, "TTree", "ttrees");

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TFrameworkImageBuild {
    #[serde(default)]
    pub max_build_time: u64,
    #[serde(default)]
    pub tag_format: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
pub struct TFrameworkImageRegistry {
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub secret: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TFrameworkRecordLimit {
    #[serde(default)]
    pub texited_pod: usize,
    #[serde(default)]
    pub tconfig_history: usize,
    #[serde(default)]
    pub timage_release: usize,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
pub struct TFrameworkNodeImage {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub secret: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TFrameworkConfig {
    #[serde(default)]
    pub metadata: metav1::ObjectMeta,
    #[serde(default)]
    pub image_build: TFrameworkImageBuild,
    #[serde(default)]
    pub image_registry: TFrameworkImageRegistry,
    #[serde(default)]
    pub record_limit: TFrameworkRecordLimit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_image: Option<TFrameworkNodeImage>,
    #[serde(default)]
    pub up_chain: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub expand: BTreeMap<String, serde_json::Value>,
}

top_level_resource!(TFrameworkConfig, "TFrameworkConfig", "tframeworkconfigs");

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TImageRelease {
    pub id: String,
    pub image: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub create_person: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<metav1::Time>,
    #[serde(default)]
    pub mark: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TImageBuildState {
    pub id: String,
    #[serde(default)]
    pub base_image: String,
    #[serde(default)]
    pub base_image_secret: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub server_type: String,
    #[serde(default)]
    pub create_person: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<metav1::Time>,
    #[serde(default)]
    pub mark: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub handler: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
pub struct TImageBuild {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<TImageBuildState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<TImageBuildState>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TImage {
    #[serde(default)]
    pub metadata: metav1::ObjectMeta,
    pub image_type: String,
    #[serde(default)]
    pub supported_type: Vec<String>,
    #[serde(default)]
    pub releases: Vec<TImageRelease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<TImageBuild>,
    #[serde(default)]
    pub mark: String,
}

top_level_resource!(TImage, "TImage", "timages");

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
pub struct TDeployApprove {
    pub person: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<metav1::Time>,
    #[serde(default)]
    pub reason: String,
    pub result: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, PartialEq)]
pub struct TDeploy {
    #[serde(default)]
    pub metadata: metav1::ObjectMeta,
    pub apply: TServerSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approve: Option<TDeployApprove>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed: Option<bool>,
}

top_level_resource!(TDeploy, "TDeploy", "tdeploys");

impl TServerSpec {
    pub fn is_tars(&self) -> bool {
        self.sub_type == TServerSubType::Tars
    }

    /// Servants of a tars server, empty for every other subtype.
    pub fn servants(&self) -> &[TServerServant] {
        match (&self.sub_type, &self.tars) {
            (TServerSubType::Tars, Some(tars)) => &tars.servants,
            _ => &[],
        }
    }

    /// Plain ports, taken from whichever payload the subtype selects.
    pub fn ports(&self) -> &[TServerPort] {
        match self.sub_type {
            TServerSubType::Tars => self.tars.as_ref().map(|t| t.ports.as_slice()).unwrap_or(&[]),
            TServerSubType::Normal => self.normal.as_ref().map(|n| n.ports.as_slice()).unwrap_or(&[]),
        }
    }
}
