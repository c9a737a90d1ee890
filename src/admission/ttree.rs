// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use ahash::AHashSet;

use crate::admission::{Request, Validator};
use crate::crds::{TServer, TTree};
use crate::kubernetes_api_objects::selector::Selector;
use crate::meta::*;
use crate::shim_layer::Cluster;

fn invalid(msg: impl std::fmt::Display) -> String {
    resource_invalid_error("ttree", msg)
}

fn validate_ttree<C: Cluster>(cluster: &C, new: &TTree, old: Option<&TTree>) -> Result<(), String> {
    let mut businesses = AHashSet::new();
    for business in &new.businesses {
        if !businesses.insert(business.name.as_str()) {
            return Err(invalid(format!("duplicate business name : {}", business.name)));
        }
    }
    let mut apps = AHashSet::new();
    for app in &new.apps {
        if !apps.insert(app.name.as_str()) {
            return Err(invalid(format!("duplicate app name : {}", app.name)));
        }
        if !app.business_ref.is_empty() && !businesses.contains(app.business_ref.as_str()) {
            return Err(invalid(format!("business/{} not exist", app.business_ref)));
        }
    }

    let old = match old {
        Some(old) => old,
        None => return Ok(()),
    };
    let namespace = new.metadata.namespace.as_deref().unwrap_or_default();
    for removed in old.apps.iter().filter(|a| !apps.contains(a.name.as_str())) {
        let selector = Selector::new().equals(T_SERVER_APP_LABEL, &removed.name);
        let users = cluster
            .list::<TServer>(namespace, &selector)
            .map_err(|err| resource_selector_error(namespace, "tservers", err))?;
        if !users.is_empty() {
            return Err(invalid(format!(
                "cannot delete ttree/apps[{}] because it is reference by some tserver",
                removed.name
            )));
        }
    }
    Ok(())
}

pub fn validate_create<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    let tree: TTree = req.object()?;
    let refused = || "create ttree operation is defined".to_string();
    if tree.metadata.name.as_deref() != Some(FIXED_TTREE_RESOURCE_NAME) {
        return Err(refused());
    }
    let namespace = tree.metadata.namespace.as_deref().unwrap_or_default();
    match validator.cluster().get::<TTree>(namespace, FIXED_TTREE_RESOURCE_NAME) {
        Ok(None) => validate_ttree(validator.cluster(), &tree, None),
        _ => Err(refused()),
    }
}

pub fn validate_update<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    if validator.is_controller(&req.username) {
        return Ok(());
    }
    let new: TTree = req.object()?;
    let old: TTree = req.old_object()?;
    validate_ttree(validator.cluster(), &new, Some(&old))
}

pub fn validate_delete<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    if validator.is_privileged(&req.username) {
        return Ok(());
    }
    let tree: TTree = req.old_object()?;
    if tree.metadata.name.as_deref() == Some(FIXED_TTREE_RESOURCE_NAME) {
        return Err("delete ttree operation is defined".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::tests::{request, validator, CONTROLLER};
    use crate::admission::Operation;
    use crate::crds::TTreeApp;
    use crate::unit_tests::fixtures::{normal_tserver, tars_tree};

    #[tokio::test]
    async fn only_one_fixed_tree() {
        let (cluster, validator) = validator();
        let tree = tars_tree(&["Test"]);
        let req = request(Operation::Create, "TTree", Some(&tree), None);
        assert_eq!(validator.validate(&req).await, Ok(()));
        cluster.insert(&tree);
        assert_eq!(validator.validate(&req).await.unwrap_err(), "create ttree operation is defined");

        let mut delete = request(Operation::Delete, "TTree", None, Some(&tree));
        assert_eq!(validator.validate(&delete).await.unwrap_err(), "delete ttree operation is defined");
        delete.username = CONTROLLER.to_string();
        assert_eq!(validator.validate(&delete).await, Ok(()));
    }

    #[tokio::test]
    async fn apps_need_known_businesses_and_free_names() {
        let (cluster, validator) = validator();
        let old = tars_tree(&["Test", "Base"]);
        let mut new = old.clone();
        new.apps.push(TTreeApp {
            name: "Mail".to_string(),
            business_ref: "Billing".to_string(),
            ..Default::default()
        });
        let req = request(Operation::Update, "TTree", Some(&new), Some(&old));
        assert!(validator.validate(&req).await.unwrap_err().ends_with("business/Billing not exist"));

        cluster.insert(&normal_tserver());
        let shrunk = tars_tree(&["Base"]);
        let req = request(Operation::Update, "TTree", Some(&shrunk), Some(&old));
        assert!(validator
            .validate(&req)
            .await
            .unwrap_err()
            .contains("cannot delete ttree/apps[Test]"));
        let shrunk = tars_tree(&["Test"]);
        let req = request(Operation::Update, "TTree", Some(&shrunk), Some(&old));
        assert_eq!(validator.validate(&req).await, Ok(()));
    }
}
