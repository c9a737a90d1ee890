// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to reach the Kubernetes API: {0}")]
    Kube(#[source] kube::Error),

    #[error("Failed to (de)serialize object: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Failed to apply json patch: {0}")]
    Patch(#[source] json_patch::PatchError),

    #[error("No informer cache registered for {kind}")]
    CacheMissing { kind: String },

    #[error("Invalid queue key: {0}")]
    InvalidKey(String),

    #[error("{0}")]
    Invalid(String),

    #[error("{verb} {kind} {namespace}/{name}: {reason:?}")]
    Api {
        verb: &'static str,
        kind: String,
        namespace: String,
        name: String,
        reason: APIError,
    },
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Error::Kube(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err)
    }
}

/// The apiserver failure classes the reconcilers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum APIError {
    ObjectNotFound,
    ObjectAlreadyExists,
    BadRequest,
    Conflict,
    Invalid,
    InternalError,
    Timeout,
    ServerTimeout,
    Other,
}

impl APIError {
    pub fn from_reason(reason: &str) -> APIError {
        match reason {
            "NotFound" => APIError::ObjectNotFound,
            "AlreadyExists" => APIError::ObjectAlreadyExists,
            "BadRequest" => APIError::BadRequest,
            "Conflict" => APIError::Conflict,
            "Invalid" => APIError::Invalid,
            "InternalError" => APIError::InternalError,
            "Timeout" => APIError::Timeout,
            "ServerTimeout" => APIError::ServerTimeout,
            _ => APIError::Other,
        }
    }
}

pub fn kube_error_to_api_error(error: &kube::Error) -> APIError {
    match error {
        kube::Error::Api(error_resp) => APIError::from_reason(&error_resp.reason),
        _ => APIError::Other,
    }
}

impl Error {
    pub fn api_error(&self) -> APIError {
        match self {
            Error::Kube(err) => kube_error_to_api_error(err),
            Error::Api { reason, .. } => *reason,
            _ => APIError::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_error() == APIError::ObjectNotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.api_error() == APIError::ObjectAlreadyExists
    }
}
