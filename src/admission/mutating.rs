// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Mutating admission. Stamps the labels every selector in the controller
//! relies on, fills defaults the writer may leave out, and hashes account
//! passwords. A request is dispatched on `"{OPERATION}/{Kind}"` like
//! validation; a mutation either yields an RFC 6902 patch or a rejection.

use chrono::{DateTime, Utc};
use json_patch::Patch;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use md5::{Digest, Md5};
use serde_json::{json, Value};
use sha1::Sha1;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::admission::Request;
use crate::config_store::NamespaceConfig;
use crate::crds::{TAccount, TConfig, TFrameworkConfig, TImage, TServer, TServerSubType, TTemplate};
use crate::kubernetes_api_objects::patch::{escape_segment, label_path, PatchBuilder};
use crate::meta::*;
use crate::shim_layer::Cluster;

const BCRYPT_COST: u32 = 6;
const PASSWORD_PATTERN: &str = r"^[\x21-\x7e]{6,32}$";
const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

fn time_value(now: DateTime<Utc>) -> Result<Value, String> {
    serde_json::to_value(metav1::Time(now)).map_err(|err| format!("encode time failed: {}", err))
}

fn annotation_path(key: &str) -> String {
    format!("/metadata/annotations/{}", escape_segment(key))
}

/// Adds the labels map first when the object carries none, so the label
/// adds that follow have a parent.
fn with_labels(builder: PatchBuilder, labels: Option<&BTreeMap<String, String>>) -> PatchBuilder {
    match labels {
        Some(_) => builder,
        None => builder.add("/metadata/labels", json!({})),
    }
}

fn build(builder: PatchBuilder) -> Option<Patch> {
    if builder.is_empty() {
        None
    } else {
        Some(builder.build())
    }
}

/// `{timestamp}-{digest}` where the timestamp orders versions of one config
/// and the digest of the name keeps same-second versions of different configs
/// apart.
pub fn tconfig_version(name: &str, now: DateTime<Utc>) -> String {
    let digest: String = Md5::digest(name.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), digest)
}

pub fn mutate_tconfig(config: &TConfig, create: bool, now: DateTime<Utc>) -> Result<Option<Patch>, String> {
    let version = if create {
        tconfig_version(config.metadata.name.as_deref().unwrap_or_default(), now)
    } else {
        config.version.clone()
    };
    let mut builder = with_labels(PatchBuilder::new(), config.metadata.labels.as_ref())
        .add(label_path(T_SERVER_APP_LABEL), json!(config.app))
        .add(label_path(T_SERVER_NAME_LABEL), json!(config.server))
        .add(label_path(T_CONFIG_NAME_LABEL), json!(config.config_name))
        .add(label_path(T_CONFIG_POD_SEQ_LABEL), json!(config.pod_seq))
        .add(label_path(T_CONFIG_ACTIVATED_LABEL), json!(config.activated.to_string()))
        .add(label_path(T_CONFIG_VERSION_LABEL), json!(version));
    if create {
        builder = builder.add("/version", json!(version)).add("/updateTime", time_value(now)?);
    }
    Ok(build(builder))
}

pub fn mutate_ttemplate(template: &TTemplate) -> Option<Patch> {
    let labels = template.metadata.labels.as_ref();
    if template.metadata.name.as_ref() == Some(&template.spec.parent) {
        if labels.map_or(false, |l| l.contains_key(T_TEMPLATE_PARENT_LABEL)) {
            return build(PatchBuilder::new().remove(label_path(T_TEMPLATE_PARENT_LABEL)));
        }
        return None;
    }
    build(with_labels(PatchBuilder::new(), labels).add(label_path(T_TEMPLATE_PARENT_LABEL), json!(template.spec.parent)))
}

fn unique_gates<'a>(first: Option<&'a str>, gates: &'a [String]) -> Vec<&'a str> {
    let mut out: Vec<&str> = first.into_iter().collect();
    for gate in gates {
        if !out.contains(&gate.as_str()) {
            out.push(gate);
        }
    }
    out
}

/// `tars.io/MinReplicas` and `tars.io/MaxReplicas` bound the replica count,
/// each a number below 100.
fn replica_bounds(tserver: &TServer) -> Result<(i32, i32), String> {
    let parse = |key: &str, fallback: i32| -> Result<i32, String> {
        let value = match tserver.metadata.annotations.as_ref().and_then(|a| a.get(key)) {
            Some(value) => value,
            None => return Ok(fallback),
        };
        let well_formed = matches!(value.len(), 1 | 2)
            && value.chars().all(|c| c.is_ascii_digit())
            && !(value.len() == 2 && value.starts_with('0'));
        if !well_formed {
            return Err(resource_invalid_error("tserver", "unexpected annotation format"));
        }
        value
            .parse()
            .map_err(|_| resource_invalid_error("tserver", "unexpected annotation format"))
    };
    let min = parse(T_MIN_REPLICAS_ANNOTATION, i32::MIN)?;
    let max = parse(T_MAX_REPLICAS_ANNOTATION, i32::MAX)?;
    if min > max {
        return Err(resource_invalid_error("tserver", "unexpected annotation value"));
    }
    Ok((min, max))
}

/// `config` supplies the namespace default node image for tars servers whose
/// release does not pin one.
pub fn mutate_tserver(tserver: &TServer, config: &NamespaceConfig, now: DateTime<Utc>) -> Result<Option<Patch>, String> {
    let spec = &tserver.spec;
    let labels = tserver.metadata.labels.as_ref();
    let mut builder = with_labels(PatchBuilder::new(), labels)
        .add(label_path(T_SERVER_APP_LABEL), json!(spec.app))
        .add(label_path(T_SERVER_NAME_LABEL), json!(spec.server))
        .add(label_path(T_SUB_TYPE_LABEL), json!(spec.sub_type.to_string()));

    if let Some(tars) = &spec.tars {
        builder = builder
            .add(label_path(T_TEMPLATE_LABEL), json!(tars.template))
            .add(
                "/spec/k8s/readinessGates",
                json!(unique_gates(Some(T_POD_READINESS_GATE), &spec.k8s.readiness_gates)),
            );
    }
    if spec.normal.is_some() {
        if labels.map_or(false, |l| l.contains_key(T_TEMPLATE_LABEL)) {
            builder = builder.remove(label_path(T_TEMPLATE_LABEL));
        }
        if !spec.k8s.readiness_gates.is_empty() {
            builder = builder.add("/spec/k8s/readinessGates", json!(unique_gates(None, &spec.k8s.readiness_gates)));
        }
    }
    if !spec.k8s.host_ports.is_empty() || spec.k8s.host_ipc {
        builder = builder.add("/spec/k8s/notStacked", json!(true));
    }

    let (min, max) = replica_bounds(tserver)?;
    let release = match &spec.release {
        Some(release) => release,
        None => return Ok(build(builder.add("/spec/k8s/replicas", json!(0)))),
    };
    builder = builder
        .add("/spec/k8s/replicas", json!(spec.k8s.replicas.max(min).min(max)))
        .add(label_path(T_SERVER_ID_LABEL), json!(release.id));
    if release.time.is_none() {
        builder = builder.add("/spec/release/time", time_value(now)?);
    }
    match spec.sub_type {
        TServerSubType::Tars if release.node_image.is_empty() => {
            if config.node_image == SERVICE_IMAGE_PLACEHOLDER {
                return Err(resource_invalid_error("tserver", "no default node image has been set"));
            }
            builder = builder
                .add("/spec/release/nodeImage", json!(config.node_image))
                .add("/spec/release/nodeSecret", json!(config.node_secret));
        }
        TServerSubType::Normal => {
            if !release.node_image.is_empty() {
                builder = builder.remove("/spec/release/nodeImage");
            }
            if !release.node_secret.is_empty() {
                builder = builder.remove("/spec/release/nodeSecret");
            }
        }
        _ => {}
    }
    Ok(build(builder))
}

fn valid_password(password: &str) -> bool {
    (6..=32).contains(&password.len()) && password.bytes().all(|b| (0x21..=0x7e).contains(&b))
}

/// Web logins compare against bcrypt of the hex SHA-1 of the password.
pub fn hash_password(password: &str) -> Result<String, String> {
    let digest: String = Sha1::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    bcrypt::hash(digest, BCRYPT_COST).map_err(|err| format!("hash password failed: {}", err))
}

/// A plain password is replaced by its hash. Any password change revokes the
/// issued tokens, and the last-applied annotation is dropped so the plain
/// text does not linger there.
pub fn mutate_taccount(new: &TAccount, old: Option<&TAccount>) -> Result<Option<Patch>, String> {
    let mut builder = PatchBuilder::new();
    if new
        .metadata
        .annotations
        .as_ref()
        .map_or(false, |a| a.contains_key(LAST_APPLIED_ANNOTATION))
    {
        builder = builder.remove(annotation_path(LAST_APPLIED_ANNOTATION));
    }

    let authentication = &new.spec.authentication;
    let password_changed = match &authentication.password {
        Some(password) => {
            if !valid_password(password) {
                return Err(format!("password should match pattern {}", PASSWORD_PATTERN));
            }
            builder = builder
                .remove("/spec/authentication/password")
                .add("/spec/authentication/bcryptPassword", json!(hash_password(password)?));
            true
        }
        None => old.map_or(true, |old| old.spec.authentication.bcrypt_password != authentication.bcrypt_password),
    };
    if password_changed {
        builder = builder.add("/spec/authentication/tokens", json!([]));
    }
    Ok(build(builder))
}

/// Mutating counterpart of [`crate::admission::Validator`]; reads the namespace defaults from
/// the same caches.
pub struct Mutator<C: Cluster> {
    cluster: Arc<C>,
}

impl<C: Cluster> Mutator<C> {
    pub fn new(cluster: Arc<C>) -> Mutator<C> {
        Mutator { cluster }
    }

    fn namespace_config(&self, namespace: &str) -> Result<NamespaceConfig, String> {
        let framework = self
            .cluster
            .get::<TFrameworkConfig>(namespace, FIXED_TFRAMEWORK_CONFIG_RESOURCE_NAME)
            .map_err(|err| resource_get_error("tframeworkconfig", namespace, FIXED_TFRAMEWORK_CONFIG_RESOURCE_NAME, err))?;
        let node = self
            .cluster
            .get::<TImage>(namespace, NODE_TIMAGE_NAME)
            .map_err(|err| resource_get_error("timage", namespace, NODE_TIMAGE_NAME, err))?;
        Ok(NamespaceConfig::resolve(framework.as_deref(), node.as_deref()))
    }

    pub fn mutate(&self, req: &Request) -> Result<Option<Patch>, String> {
        self.mutate_at(req, Utc::now())
    }

    pub fn mutate_at(&self, req: &Request, now: DateTime<Utc>) -> Result<Option<Patch>, String> {
        let key = format!("{}/{}", req.operation, req.kind);
        match key.as_str() {
            "CREATE/TServer" | "UPDATE/TServer" => {
                let tserver: TServer = req.object()?;
                let config = self.namespace_config(&req.namespace)?;
                mutate_tserver(&tserver, &config, now)
            }
            "CREATE/TConfig" => mutate_tconfig(&req.object::<TConfig>()?, true, now),
            "UPDATE/TConfig" => mutate_tconfig(&req.object::<TConfig>()?, false, now),
            "CREATE/TTemplate" | "UPDATE/TTemplate" => Ok(mutate_ttemplate(&req.object::<TTemplate>()?)),
            "CREATE/TAccount" => mutate_taccount(&req.object::<TAccount>()?, None),
            "UPDATE/TAccount" => {
                let old: TAccount = req.old_object()?;
                mutate_taccount(&req.object::<TAccount>()?, Some(&old))
            }
            _ => Err(format!(
                "unsupported mutating {} {}.{}",
                req.operation, req.version, req.kind
            )),
        }
    }
}
