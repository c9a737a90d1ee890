// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! TConfig rules. Activating a version marks its activated siblings
//! `tars.io/Deactivate`; deleting an activated master marks its slaves
//! `tars.io/Deleting`. The controller finishes both phases.

use serde_json::json;
use tracing::*;

use crate::admission::{Request, Validator};
use crate::crds::TConfig;
use crate::kubernetes_api_objects::patch::{label_path, PatchBuilder};
use crate::kubernetes_api_objects::selector::Selector;
use crate::meta::*;
use crate::shim_layer::Cluster;

const DEACTIVATING: &str = "Deactivating";
const DELETING: &str = "Deleting";

fn has_label(config: &TConfig, key: &str) -> bool {
    config.metadata.labels.as_ref().map_or(false, |l| l.contains_key(key))
}

fn namespace_of(config: &TConfig) -> &str {
    config.metadata.namespace.as_deref().unwrap_or_default()
}

fn name_of(config: &TConfig) -> &str {
    config.metadata.name.as_deref().unwrap_or_default()
}

fn config_selector(config: &TConfig) -> Selector {
    Selector::new()
        .equals(T_SERVER_APP_LABEL, &config.app)
        .equals(T_SERVER_NAME_LABEL, &config.server)
        .equals(T_CONFIG_NAME_LABEL, &config.config_name)
}

async fn mark<C: Cluster>(cluster: &C, namespace: &str, names: &[String], label: &str, value: &str) -> Result<(), String> {
    let patch = PatchBuilder::new().add(label_path(label), json!(value)).build();
    for name in names {
        if let Err(err) = cluster.patch::<TConfig>(namespace, name, &patch).await {
            let msg = resource_patch_error("tconfig", namespace, name, err);
            error!("{}", msg);
            return Err(msg);
        }
    }
    Ok(())
}

/// Marks every other activated version of the same tuple for deactivation.
async fn prepare_activate<C: Cluster>(cluster: &C, config: &TConfig) -> Result<(), String> {
    let namespace = namespace_of(config);
    let selector = config_selector(config)
        .equals(T_CONFIG_POD_SEQ_LABEL, &config.pod_seq)
        .equals(T_CONFIG_ACTIVATED_LABEL, "true");
    let siblings: Vec<String> = cluster
        .list::<TConfig>(namespace, &selector)
        .map_err(|err| resource_selector_error(namespace, "tconfig", err))?
        .iter()
        .filter_map(|c| c.metadata.name.clone())
        .filter(|name| name != name_of(config))
        .collect();
    mark(cluster, namespace, &siblings, T_CONFIG_DEACTIVATE_LABEL, DEACTIVATING).await
}

async fn prepare_delete<C: Cluster>(cluster: &C, config: &TConfig) -> Result<(), String> {
    let namespace = namespace_of(config);
    let name = name_of(config);
    if config.pod_seq != MASTER_POD_SEQ {
        let selector = config_selector(config).equals(T_CONFIG_POD_SEQ_LABEL, &config.pod_seq);
        let others: Vec<String> = cluster
            .list::<TConfig>(namespace, &selector)
            .map_err(|err| resource_selector_error(namespace, "tconfig", err))?
            .iter()
            .filter_map(|c| c.metadata.name.clone())
            .filter(|n| n != name)
            .collect();
        return mark(cluster, namespace, &others, T_CONFIG_DELETING_LABEL, DELETING).await;
    }

    let relatives = cluster
        .list::<TConfig>(namespace, &config_selector(config))
        .map_err(|err| resource_selector_error(namespace, "tconfig", err))?;
    let mut doomed = Vec::new();
    for relative in relatives {
        let relative_name = name_of(&relative);
        if relative_name == name {
            continue;
        }
        let pod_seq = relative
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(T_CONFIG_POD_SEQ_LABEL))
            .filter(|seq| !seq.is_empty());
        match pod_seq {
            None => {
                let msg = should_not_happen_error(format!(
                    "resource tconfig {}/{} labels[{}] value is nil",
                    namespace, relative_name, T_CONFIG_POD_SEQ_LABEL
                ));
                error!("{}", msg);
                return Err(msg);
            }
            Some(seq) if seq != MASTER_POD_SEQ => {
                return Err(format!(
                    "cannot delete tconfig {}/{} because it is reference by anther tconfig",
                    namespace, name
                ));
            }
            Some(_) => doomed.push(relative_name.to_string()),
        }
    }
    mark(cluster, namespace, &doomed, T_CONFIG_DELETING_LABEL, DELETING).await
}

pub async fn validate_create<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    let config: TConfig = req.object()?;
    for label in [T_CONFIG_DEACTIVATE_LABEL, T_CONFIG_DELETING_LABEL] {
        if has_label(&config, label) {
            return Err(format!("can not set label [{}] when create", label));
        }
    }

    if config.pod_seq != MASTER_POD_SEQ {
        let namespace = namespace_of(&config);
        let selector = config_selector(&config)
            .equals(T_CONFIG_POD_SEQ_LABEL, MASTER_POD_SEQ)
            .equals(T_CONFIG_ACTIVATED_LABEL, "true")
            .does_not_exist(T_CONFIG_DEACTIVATE_LABEL)
            .does_not_exist(T_CONFIG_DELETING_LABEL);
        let masters = validator
            .cluster()
            .list::<TConfig>(namespace, &selector)
            .map_err(|err| resource_selector_error(namespace, "tconfig", err))?;
        if masters.is_empty() {
            return Err("no activated master tconfig found".to_string());
        }
    }

    if config.activated {
        prepare_activate(validator.cluster(), &config).await
    } else {
        Ok(())
    }
}

pub async fn validate_update<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    if validator.is_controller(&req.username) {
        return Ok(());
    }
    let new: TConfig = req.object()?;
    let old: TConfig = req.old_object()?;
    if has_label(&old, T_CONFIG_DELETING_LABEL) {
        return Err("can not update deleting tconfig".to_string());
    }

    let frozen = [
        ("/app", new.app == old.app),
        ("/server", new.server == old.server),
        ("/podSeq", new.pod_seq == old.pod_seq),
        ("/configName", new.config_name == old.config_name),
        ("/configContent", new.config_content == old.config_content),
        ("/version", new.version == old.version),
        ("/updateTime", new.update_time == old.update_time),
        ("/updatePerson", new.update_person == old.update_person),
        ("/updateReason", new.update_reason == old.update_reason),
    ];
    if let Some((field, _)) = frozen.iter().find(|(_, same)| !same) {
        return Err(field_immutable_error("tconfig", field));
    }

    match (old.activated, new.activated) {
        (true, false) => Err("only use authorized account can update /activated from true to false".to_string()),
        (false, true) => prepare_activate(validator.cluster(), &new).await,
        _ => Ok(()),
    }
}

pub async fn validate_delete<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    if validator.is_privileged(&req.username) {
        return Ok(());
    }
    let config: TConfig = req.old_object()?;
    if !config.activated || has_label(&config, T_CONFIG_DEACTIVATE_LABEL) || has_label(&config, T_CONFIG_DELETING_LABEL) {
        return Ok(());
    }
    prepare_delete(validator.cluster(), &config).await
}
