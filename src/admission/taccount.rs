// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use md5::{Digest, Md5};

use crate::admission::{Request, Validator};
use crate::crds::TAccount;
use crate::meta::resource_invalid_error;
use crate::shim_layer::Cluster;

/// Lowercase hex MD5 of the username, the only name a TAccount may take.
pub fn account_name(username: &str) -> String {
    Md5::digest(username.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn validate_taccount(account: &TAccount) -> Result<(), String> {
    if account.metadata.name.as_deref() != Some(account_name(&account.spec.username).as_str()) {
        return Err(resource_invalid_error("taccount", "unexpected resource name"));
    }
    Ok(())
}

pub fn validate_create<C: Cluster>(_validator: &Validator<C>, req: &Request) -> Result<(), String> {
    validate_taccount(&req.object()?)
}

pub fn validate_update<C: Cluster>(validator: &Validator<C>, req: &Request) -> Result<(), String> {
    if validator.is_controller(&req.username) {
        return Ok(());
    }
    validate_taccount(&req.object()?)
}
