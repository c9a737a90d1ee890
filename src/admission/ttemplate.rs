// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::admission::{Request, Validator};
use crate::crds::{TServer, TTemplate};
use crate::kubernetes_api_objects::selector::Selector;
use crate::meta::*;
use crate::shim_layer::Cluster;

pub fn validate_upsert<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    let template: TTemplate = req.object()?;
    let parent = &template.spec.parent;
    if parent.is_empty() {
        return Err(resource_invalid_error(
            "ttemplate",
            "value of filed \".spec.parent\" should not empty ",
        ));
    }
    if template.metadata.name.as_ref() == Some(parent) {
        return Ok(());
    }
    let namespace = template.metadata.namespace.as_deref().unwrap_or_default();
    match validator.cluster().get::<TTemplate>(namespace, parent) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(resource_not_exist_error("ttemplate", namespace, parent)),
        Err(err) => Err(resource_get_error("ttemplate", namespace, parent, err)),
    }
}

/// A template stays while a TServer or a child template points at it.
pub fn validate_delete<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    if validator.is_privileged(&req.username) {
        return Ok(());
    }
    let template: TTemplate = req.old_object()?;
    let namespace = template.metadata.namespace.as_deref().unwrap_or_default();
    let name = template.metadata.name.as_deref().unwrap_or_default();
    let cluster = validator.cluster();

    let users = cluster
        .list::<TServer>(namespace, &Selector::new().equals(T_TEMPLATE_LABEL, name))
        .map_err(|err| resource_selector_error(namespace, "tservers", err))?;
    if !users.is_empty() {
        return Err(format!(
            "cannot delete ttemplate {}/{} because it is reference by some tserver",
            namespace, name
        ));
    }
    let children = cluster
        .list::<TTemplate>(namespace, &Selector::new().equals(T_TEMPLATE_PARENT_LABEL, name))
        .map_err(|err| resource_selector_error(namespace, "ttemplates", err))?;
    if !children.is_empty() {
        return Err(format!(
            "cannot delete ttemplate {}/{} because it is reference by some ttemplate",
            namespace, name
        ));
    }
    Ok(())
}
