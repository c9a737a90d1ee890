// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Validating admission for the tars kinds. A request is dispatched on
//! `"{OPERATION}/{Kind}"`; a rejection carries the message shown to the writer.

pub mod taccount;
pub mod tconfig;
pub mod mutating;
pub mod tdeploy;
pub mod tserver;
pub mod ttemplate;
pub mod ttree;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::meta::{controller_username, KUBERNETES_SYSTEM_ACCOUNT_PREFIX};
use crate::shim_layer::Cluster;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
            Operation::Connect => write!(f, "CONNECT"),
        }
    }
}

/// The parts of an admission review the rules look at. Objects stay raw JSON
/// until the rule for their kind decodes them.
#[derive(Clone, Debug)]
pub struct Request {
    pub operation: Operation,
    pub kind: String,
    pub version: String,
    pub namespace: String,
    pub username: String,
    pub object: Option<Value>,
    pub old_object: Option<Value>,
}

impl Request {
    pub fn object<K: DeserializeOwned>(&self) -> Result<K, String> {
        decode(&self.kind, self.object.as_ref())
    }

    pub fn old_object<K: DeserializeOwned>(&self) -> Result<K, String> {
        decode(&self.kind, self.old_object.as_ref())
    }
}

fn decode<K: DeserializeOwned>(kind: &str, value: Option<&Value>) -> Result<K, String> {
    let value = value.ok_or_else(|| format!("request carries no {} object", kind))?;
    serde_json::from_value(value.clone()).map_err(|err| format!("decode {} failed: {}", kind, err))
}

pub struct Validator<C: Cluster> {
    cluster: Arc<C>,
    controller_username: String,
}

impl<C: Cluster> Validator<C> {
    pub fn new(cluster: Arc<C>, controller_namespace: &str) -> Validator<C> {
        Validator {
            cluster,
            controller_username: controller_username(controller_namespace),
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn is_controller(&self, username: &str) -> bool {
        username == self.controller_username
    }

    /// The controller itself or a kube-system service account, which the
    /// delete rules let through.
    pub fn is_privileged(&self, username: &str) -> bool {
        self.is_controller(username) || username.starts_with(KUBERNETES_SYSTEM_ACCOUNT_PREFIX)
    }

    pub async fn validate(&self, req: &Request) -> Result<(), String> {
        let key = format!("{}/{}", req.operation, req.kind);
        match key.as_str() {
            "CREATE/TServer" => tserver::validate_create(self, req),
            "UPDATE/TServer" => tserver::validate_update(self, req),
            "DELETE/TServer" => Ok(()),

            "CREATE/TConfig" => tconfig::validate_create(self, req).await,
            "UPDATE/TConfig" => tconfig::validate_update(self, req).await,
            "DELETE/TConfig" => tconfig::validate_delete(self, req).await,

            "CREATE/TTemplate" | "UPDATE/TTemplate" => ttemplate::validate_upsert(self, req),
            "DELETE/TTemplate" => ttemplate::validate_delete(self, req),

            "CREATE/TTree" => ttree::validate_create(self, req),
            "UPDATE/TTree" => ttree::validate_update(self, req),
            "DELETE/TTree" => ttree::validate_delete(self, req),

            "CREATE/TAccount" => taccount::validate_create(self, req),
            "UPDATE/TAccount" => taccount::validate_update(self, req),
            "DELETE/TAccount" => Ok(()),

            "CREATE/TDeploy" => tdeploy::validate_create(self, req),
            "UPDATE/TDeploy" => tdeploy::validate_update(self, req),
            "DELETE/TDeploy" => Ok(()),

            _ => Err(format!(
                "unsupported validating {} {}.{}",
                req.operation, req.version, req.kind
            )),
        }
    }
}
