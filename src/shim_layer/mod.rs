// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod backoff;
pub mod cluster;
pub mod controller_runtime;
#[cfg(test)]
pub mod fake_cluster;
pub mod informer;
pub mod watched;
pub mod work_queue;

pub use cluster::{Cluster, Kind, KubeCluster};
pub use controller_runtime::{Controller, Enqueue, Outcome, Reconciler};
pub use watched::{EventType, Watched};
pub use work_queue::WorkQueue;
