// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use ahash::AHashSet;

use crate::admission::{Request, Validator};
use crate::crds::{TServer, TTemplate};
use crate::meta::*;
use crate::shim_layer::Cluster;

fn invalid(msg: impl std::fmt::Display) -> String {
    resource_invalid_error("tserver", msg)
}

fn immutable(field: &str) -> String {
    field_immutable_error("tserver", field)
}

/// Registers one port under its case-folded name and its number.
fn claim_port(
    names: &mut AHashSet<String>,
    values: &mut AHashSet<i32>,
    what: &str,
    name: &str,
    port: i32,
) -> Result<(), String> {
    if !names.insert(name.to_lowercase()) {
        return Err(invalid(format!("duplicate {} name value {}", what, name)));
    }
    if !values.insert(port) {
        return Err(invalid(format!("duplicate port value {}", port)));
    }
    Ok(())
}

/// `nodeobj` belongs to the injected node agent, in any letter case.
fn check_reserved_name(what: &str, name: &str) -> Result<(), String> {
    if name.eq_ignore_ascii_case(NODE_SERVANT_NAME) {
        return Err(invalid(format!("{} name value should not equal {}", what, NODE_SERVANT_NAME)));
    }
    Ok(())
}

fn check_identity(new: &TServer, old: &TServer) -> Result<(), String> {
    if new.spec.app != old.spec.app {
        return Err(immutable(".spec.app"));
    }
    if new.spec.server != old.spec.server {
        return Err(immutable(".spec.server"));
    }
    if new.spec.sub_type != old.spec.sub_type {
        return Err(immutable(".spec.subType"));
    }
    if old.spec.tars.is_none() && new.spec.tars.is_some() {
        return Err(immutable(".spec.tars"));
    }
    if old.spec.normal.is_none() && new.spec.normal.is_some() {
        return Err(immutable(".spec.normal"));
    }
    Ok(())
}

/// Every rule a TServer spec has to satisfy, on its own and against `old`.
pub fn validate_tserver<C: Cluster>(cluster: &C, new: &TServer, old: Option<&TServer>) -> Result<(), String> {
    if let Some(old) = old {
        check_identity(new, old)?;
    }

    let namespace = new.metadata.namespace.as_deref().unwrap_or_default();
    let name = new.metadata.name.as_deref().unwrap_or_default();
    if name != tserver_name(&new.spec.app, &new.spec.server) {
        return Err(invalid("unexpected resource name"));
    }
    if name.len() >= MAX_TSERVER_NAME {
        return Err(invalid(format!(
            "length of resource name should less then {}",
            MAX_TSERVER_NAME
        )));
    }

    let mut names = AHashSet::new();
    let mut values = AHashSet::new();
    if let Some(tars) = &new.spec.tars {
        for servant in &tars.servants {
            check_reserved_name("servants", &servant.name)?;
            if servant.port == NODE_SERVANT_PORT {
                return Err(invalid(format!("servants port value should not equal {}", NODE_SERVANT_PORT)));
            }
            claim_port(&mut names, &mut values, "servant", &servant.name, servant.port)?;
        }
        for port in &tars.ports {
            check_reserved_name("port", &port.name)?;
            if port.port == NODE_SERVANT_PORT {
                return Err(invalid(format!("port value should not equal {}", NODE_SERVANT_PORT)));
            }
            claim_port(&mut names, &mut values, "port", &port.name, port.port)?;
        }
        let template = &tars.template;
        match cluster.get::<TTemplate>(namespace, template) {
            Ok(Some(_)) => {}
            Ok(None) => return Err(resource_not_exist_error("ttemplate", namespace, template)),
            Err(err) => return Err(resource_get_error("ttemplate", namespace, template, err)),
        }
    } else if let Some(normal) = &new.spec.normal {
        for port in &normal.ports {
            check_reserved_name("port", &port.name)?;
            claim_port(&mut names, &mut values, "port", &port.name, port.port)?;
        }
    }

    let k8s = &new.spec.k8s;
    let mut name_refs = AHashSet::new();
    let mut host_ports = AHashSet::new();
    for host_port in &k8s.host_ports {
        let name_ref = host_port.name_ref.to_lowercase();
        if !names.contains(&name_ref) {
            return Err(invalid(format!("port name {} not exist", host_port.name_ref)));
        }
        if !name_refs.insert(name_ref) {
            return Err(invalid(format!("duplicate nameRef value {}", host_port.name_ref)));
        }
        if !host_ports.insert(host_port.port) {
            return Err(invalid(format!("duplicate port value {}", host_port.port)));
        }
    }

    let mut mounts = AHashSet::new();
    for mount in &k8s.mounts {
        if !mounts.insert(mount.name.as_str()) {
            return Err(invalid(format!("duplicate .mounts.name value {}", mount.name)));
        }
        let claims_storage =
            mount.source.t_local_volume.is_some() || mount.source.persistent_volume_claim_template.is_some();
        if claims_storage && k8s.daemon_set {
            return Err(invalid(
                "can not use TLocalVolume and PersistentVolumeClaimTemplate when .daemonSet value is true",
            ));
        }
    }
    Ok(())
}

pub fn validate_create<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    let new: TServer = req.object()?;
    validate_tserver(validator.cluster(), &new, None)
}

pub fn validate_update<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    let new: TServer = req.object()?;
    let old: TServer = req.old_object()?;
    validate_tserver(validator.cluster(), &new, Some(&old))
}
