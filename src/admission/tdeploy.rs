// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::admission::tserver::validate_tserver;
use crate::admission::{Request, Validator};
use crate::crds::{TDeploy, TServer};
use crate::meta::*;
use crate::shim_layer::Cluster;

pub fn validate_create<C: Cluster>(_validator: &Validator<C>, req: &Request) -> Result<(), String> {
    let deploy: TDeploy = req.object()?;
    if deploy.approve.is_some() {
        return Err("should not set /approve field when create tdeploy resource".to_string());
    }
    if deploy.deployed.is_some() {
        return Err("should not set /deployed field when create tdeploy resource".to_string());
    }
    Ok(())
}

/// Approval freezes the deploy and requires the TServer it would create to be
/// absent and valid.
pub fn validate_update<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    if validator.is_controller(&req.username) {
        return Ok(());
    }
    let new: TDeploy = req.object()?;
    let old: TDeploy = req.old_object()?;
    if new.deployed != old.deployed {
        return Err("only use authorized account can set \"/deployed\" field".to_string());
    }
    if old.approve.is_some() {
        if new.apply != old.apply {
            return Err(field_immutable_error("tserver", "/apply"));
        }
        if new.approve != old.approve {
            return Err(field_immutable_error("tserver", "/approve"));
        }
        return Ok(());
    }
    if !new.approve.as_ref().map_or(false, |a| a.result) {
        return Ok(());
    }

    let namespace = new.metadata.namespace.clone().unwrap_or_default();
    let name = tserver_name(&new.apply.app, &new.apply.server);
    match validator.cluster().get::<TServer>(&namespace, &name) {
        Ok(None) => {}
        Ok(Some(_)) => return Err(resource_exist_error("tserver", &namespace, &name)),
        Err(err) => return Err(resource_get_error("tserver", &namespace, &name, err)),
    }
    let mut candidate = TServer::new(&name, new.apply);
    candidate.metadata.namespace = Some(namespace);
    validate_tserver(validator.cluster(), &candidate, None)
}
