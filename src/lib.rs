// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod admission;
pub mod config_store;
pub mod crds;
pub mod diff;
pub mod error;
pub mod kubernetes_api_objects;
pub mod meta;
pub mod shim_layer;
pub mod tars_controller;
pub mod translator;
#[cfg(test)]
mod unit_tests;

pub use error::Error;
