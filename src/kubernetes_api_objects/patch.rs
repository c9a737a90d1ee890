// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation, ReplaceOperation};
use serde_json::Value;

/// Escapes one path segment, so label keys like `tars.io/Version` address a
/// single member.
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

pub fn label_path(key: &str) -> String {
    format!("/metadata/labels/{}", escape_segment(key))
}

#[derive(Default)]
pub struct PatchBuilder {
    operations: Vec<PatchOperation>,
}

impl PatchBuilder {
    pub fn new() -> PatchBuilder {
        PatchBuilder::default()
    }

    pub fn add(mut self, path: impl Into<String>, value: Value) -> PatchBuilder {
        self.operations.push(PatchOperation::Add(AddOperation { path: path.into(), value }));
        self
    }

    pub fn replace(mut self, path: impl Into<String>, value: Value) -> PatchBuilder {
        self.operations.push(PatchOperation::Replace(ReplaceOperation { path: path.into(), value }));
        self
    }

    pub fn remove(mut self, path: impl Into<String>) -> PatchBuilder {
        self.operations.push(PatchOperation::Remove(RemoveOperation { path: path.into() }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn build(self) -> Patch {
        Patch(self.operations)
    }
}
