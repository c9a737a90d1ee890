// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Whole control plane runs against the in-memory cluster: each watched change
//! is fanned out to every reconciler the way the informers do, and the keys
//! they claim are reconciled right away.

use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use std::sync::Arc;

use crate::admission::mutating::tests::admit;
use crate::admission::tests::request;
use crate::admission::{Operation, Validator};
use crate::config_store::{ConfigStore, NamespaceConfig};
use crate::crds::*;
use crate::meta::*;
use crate::shim_layer::fake_cluster::FakeCluster;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{reconcilers, Context};
use crate::translator::statefulset::{build_local_volume_claim_template, build_statefulset};
use crate::unit_tests::fixtures::*;

struct Plane {
    cluster: Arc<FakeCluster>,
    reconcilers: Vec<Arc<dyn Reconciler>>,
}

impl Plane {
    fn new() -> Plane {
        let cluster = FakeCluster::new();
        cluster.insert(&tars_tree(&["Test"]));
        let ctx = Context::new(cluster.clone(), Arc::new(ConfigStore::new()));
        let reconcilers = reconcilers(&ctx);
        Plane { cluster, reconcilers }
    }

    async fn deliver(&self, event: EventType, obj: Watched) -> Vec<(&'static str, Outcome)> {
        let mut outcomes = Vec::new();
        for reconciler in &self.reconcilers {
            let key = match reconciler.enqueue(event, &obj) {
                Some(Enqueue::Now(key)) | Some(Enqueue::After(key, _)) => key,
                None => continue,
            };
            outcomes.push((reconciler.name(), reconciler.reconcile(&key).await.unwrap()));
        }
        outcomes
    }

    /// Stores the TServer and delivers the matching event for it.
    async fn apply(&self, tserver: &TServer, event: EventType) -> Vec<(&'static str, Outcome)> {
        self.cluster.insert(tserver);
        self.deliver(event, Watched::from(Arc::new(tserver.clone()))).await
    }

    fn writes_to(&self, kind: &str) -> usize {
        self.cluster.calls().iter().filter(|c| c.kind == kind).count()
    }
}

fn assert_settled(outcomes: &[(&'static str, Outcome)]) {
    for (name, outcome) in outcomes {
        assert_eq!(*outcome, Outcome::Done, "reconciler {}", name);
    }
}

#[tokio::test]
async fn new_tserver_gets_service_and_statefulset() {
    let plane = Plane::new();
    assert_settled(&plane.apply(&normal_tserver(), EventType::Added).await);

    let service = plane.cluster.get::<corev1::Service>(NAMESPACE, "test-echo").unwrap().unwrap();
    let ports = service.spec.as_ref().unwrap().ports.clone().unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(
        (ports[0].name.as_deref(), ports[0].protocol.as_deref(), ports[0].port),
        (Some("main"), Some("TCP"), 9000)
    );

    let sts = plane.cluster.get::<appsv1::StatefulSet>(NAMESPACE, "test-echo").unwrap().unwrap();
    let pod_spec = sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
    assert!(pod_spec.init_containers.as_deref().unwrap_or_default().is_empty());
    assert_eq!(plane.cluster.count::<TEndpoint>(), 1);
    assert_eq!(plane.cluster.count::<TExitedRecord>(), 1);

    plane.cluster.clear_calls();
    let tserver = plane.cluster.get::<TServer>(NAMESPACE, "test-echo").unwrap().unwrap();
    assert_settled(&plane.deliver(EventType::Modified, Watched::TServer(tserver)).await);
    assert!(plane.cluster.calls().is_empty());
}

#[tokio::test]
async fn port_name_case_change_leaves_the_service_alone() {
    let plane = Plane::new();
    let mut tserver = normal_tserver();
    plane.apply(&tserver, EventType::Added).await;
    plane.cluster.clear_calls();

    tserver.spec.normal.as_mut().unwrap().ports[0].name = "Main".to_string();
    assert_settled(&plane.apply(&tserver, EventType::Modified).await);
    assert_eq!(plane.writes_to("Service"), 0);

    let old = tserver.clone();
    tserver.spec.normal.as_mut().unwrap().ports.push(TServerPort {
        name: "main".to_string(),
        port: 9001,
        is_tcp: true,
    });
    let validator = Validator::new(plane.cluster.clone(), DEFAULT_CONTROLLER_NAMESPACE);
    let req = request(Operation::Update, "TServer", Some(&tserver), Some(&old));
    assert!(validator.validate(&req).await.unwrap_err().contains("duplicate port name value main"));
}

#[tokio::test]
async fn daemonset_flag_swaps_the_workload() {
    let plane = Plane::new();
    let mut tserver = normal_tserver();
    plane.apply(&tserver, EventType::Added).await;
    let sts = plane.cluster.get::<appsv1::StatefulSet>(NAMESPACE, "test-echo").unwrap().unwrap();
    let service = plane.cluster.get::<corev1::Service>(NAMESPACE, "test-echo").unwrap().unwrap();
    plane.cluster.clear_calls();

    tserver.spec.k8s.daemon_set = true;
    assert_settled(&plane.apply(&tserver, EventType::Modified).await);
    assert_eq!(plane.cluster.count::<appsv1::StatefulSet>(), 0);
    let ds = plane.cluster.get::<appsv1::DaemonSet>(NAMESPACE, "test-echo").unwrap().unwrap();

    let container = |template: &corev1::PodTemplateSpec| template.spec.as_ref().unwrap().containers[0].clone();
    let (was, now) = (container(&sts.spec.as_ref().unwrap().template), container(&ds.spec.as_ref().unwrap().template));
    assert_eq!((was.image, was.ports), (now.image, now.ports));

    assert_eq!(plane.writes_to("Service"), 0);
    let kept = plane.cluster.get::<corev1::Service>(NAMESPACE, "test-echo").unwrap().unwrap();
    assert_eq!(kept.spec.as_ref().unwrap().selector, service.spec.as_ref().unwrap().selector);
}

#[tokio::test]
async fn deleted_tserver_leaves_nothing_behind() {
    let plane = Plane::new();
    let tserver = normal_tserver();
    plane.apply(&tserver, EventType::Added).await;
    assert_eq!(plane.cluster.count::<corev1::Service>(), 1);

    plane.cluster.delete::<TServer>(NAMESPACE, "test-echo").await.unwrap();
    let gone = Watched::from(Arc::new(tserver));
    assert_settled(&plane.deliver(EventType::Deleted, gone.clone()).await);
    assert_eq!(plane.cluster.count::<corev1::Service>(), 0);
    assert_eq!(plane.cluster.count::<appsv1::StatefulSet>(), 0);
    assert_eq!(plane.cluster.count::<appsv1::DaemonSet>(), 0);
    assert_eq!(plane.cluster.count::<TEndpoint>(), 0);
    assert_eq!(plane.cluster.count::<TExitedRecord>(), 0);

    // A replayed deletion finds nothing to do and still settles.
    assert_settled(&plane.deliver(EventType::Deleted, gone).await);
}

#[tokio::test]
async fn activating_a_version_retires_the_previous_one() {
    let plane = Plane::new();
    let written = |name: &str| {
        let mut config = tconfig(name, "", true);
        config.metadata.labels = None;
        config
    };
    admit(&plane.cluster, Operation::Create, "TConfig", &written("echo-conf-v2"), None)
        .await
        .unwrap();
    admit(&plane.cluster, Operation::Create, "TConfig", &written("echo-conf-v3"), None)
        .await
        .unwrap();

    let marked = plane.cluster.get::<TConfig>(NAMESPACE, "echo-conf-v2").unwrap().unwrap();
    assert!(marked.activated);
    assert!(marked.metadata.labels.as_ref().unwrap().contains_key(T_CONFIG_DEACTIVATE_LABEL));

    assert_settled(&plane.deliver(EventType::Modified, Watched::TConfig(marked)).await);
    let retired = plane.cluster.get::<TConfig>(NAMESPACE, "echo-conf-v2").unwrap().unwrap();
    let labels = retired.metadata.labels.clone().unwrap();
    assert!(!retired.activated);
    assert!(!labels.contains_key(T_CONFIG_DEACTIVATE_LABEL));
    assert_eq!(labels.get(T_CONFIG_ACTIVATED_LABEL).map(String::as_str), Some("false"));

    let current = plane.cluster.get::<TConfig>(NAMESPACE, "echo-conf-v3").unwrap().unwrap();
    assert!(current.activated);
}

#[tokio::test]
async fn dropped_local_volume_rebuilds_the_statefulset() {
    let plane = Plane::new();
    let mut tserver = normal_tserver();
    tserver.spec.k8s.mounts = vec![local_volume_mount("data"), local_volume_mount("logs")];
    plane.cluster.insert(&build_statefulset(&tserver, &NamespaceConfig::default()));
    let mut claim = build_local_volume_claim_template(&tserver, "logs");
    claim.metadata.name = Some("logs-test-echo-0".to_string());
    plane.cluster.insert(&claim);

    tserver.spec.k8s.mounts.pop();
    let outcomes = plane.apply(&tserver, EventType::Modified).await;
    assert!(outcomes.contains(&("statefulset", Outcome::AddAfter(STATEFULSET_SETTLE_DELAY))));
    assert_eq!(plane.cluster.count::<appsv1::StatefulSet>(), 0);
    let collections = plane.cluster.calls_of("delete_collection");
    assert_eq!(collections.len(), 1);
    assert!(collections[0].name.contains("tars.io/LocalVolume in (logs)"));
    assert_eq!(plane.cluster.count::<corev1::PersistentVolumeClaim>(), 0);
}
