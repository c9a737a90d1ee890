// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::events::Reporter;
use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use tracing::*;

use tars_controller::config_store::ConfigStore;
use tars_controller::crds::*;
use tars_controller::kubernetes_api_objects::selector::Selector;
use tars_controller::meta::*;
use tars_controller::shim_layer::informer::{wait_for_cache_sync, Informer, Store, SyncProbe};
use tars_controller::shim_layer::{Controller, Kind, KubeCluster, Watched};
use tars_controller::tars_controller::{reconcilers, Context};

#[derive(Parser)]
#[command(name = "tars-controller", about = "Reconciles TServer workloads and the tars framework resources")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the CustomResourceDefinitions as yaml
    Export,
    /// Run every reconciler against the cluster
    Run {
        /// Namespace to watch, every namespace when empty
        #[arg(long, env = "TARS_WATCH_NAMESPACE", default_value = "")]
        namespace: String,
        /// Workers per reconciler without a fixed count
        #[arg(long, env = "TARS_WORKERS", default_value_t = 3)]
        workers: usize,
    },
}

fn export() -> Result<()> {
    let crds = [TServer::crd(), TEndpoint::crd(), TAccount::crd(), TTemplate::crd()];
    let docs = crds
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    println!("{}", docs.join("---\n"));
    Ok(())
}

/// An informer feeding every controller; each filters the events it cares about.
fn informer<K>(client: &Client, namespace: &str, store: Arc<Store<K>>, controllers: &[Arc<Controller>]) -> Informer<K>
where
    K: Kind,
    Watched: From<Arc<K>>,
{
    controllers
        .iter()
        .fold(Informer::new(client.clone(), namespace, store), |informer, controller| {
            informer.handler(controller.clone())
        })
}

async fn run(namespace: String, workers: usize) -> Result<()> {
    let client = Client::try_default().await?;
    let reporter = Reporter {
        controller: DEFAULT_CONTROLLER_USERNAME.to_string(),
        instance: std::env::var("POD_NAME").ok(),
    };
    let mut cluster = KubeCluster::new(client.clone(), reporter);
    let tservers = cluster.register::<TServer>();
    let tendpoints = cluster.register::<TEndpoint>();
    let texitedrecords = cluster.register::<TExitedRecord>();
    let tconfigs = cluster.register::<TConfig>();
    let taccounts = cluster.register::<TAccount>();
    let ttemplates = cluster.register::<TTemplate>();
    let ttrees = cluster.register::<TTree>();
    let timages = cluster.register::<TImage>();
    let tframeworkconfigs = cluster.register::<TFrameworkConfig>();
    let pods = cluster.register::<corev1::Pod>();
    let services = cluster.register::<corev1::Service>();
    let statefulsets = cluster.register::<appsv1::StatefulSet>();
    let daemonsets = cluster.register::<appsv1::DaemonSet>();
    let pvcs = cluster.register::<corev1::PersistentVolumeClaim>();
    let nodes = cluster.register::<corev1::Node>();
    let probes: Vec<Arc<dyn SyncProbe>> = vec![
        tservers.clone(),
        tendpoints.clone(),
        texitedrecords.clone(),
        tconfigs.clone(),
        taccounts.clone(),
        ttemplates.clone(),
        ttrees.clone(),
        timages.clone(),
        tframeworkconfigs.clone(),
        pods.clone(),
        services.clone(),
        statefulsets.clone(),
        daemonsets.clone(),
        pvcs.clone(),
        nodes.clone(),
    ];

    let ctx = Context::new(Arc::new(cluster), Arc::new(ConfigStore::new()));
    let controllers: Vec<Arc<Controller>> = reconcilers(&ctx)
        .into_iter()
        .map(|reconciler| Arc::new(Controller::new(reconciler)))
        .collect();

    let ns = namespace.as_str();
    let workloads = Selector::new().exists(T_SERVER_APP_LABEL).exists(T_SERVER_NAME_LABEL);
    let c = controllers.as_slice();
    tokio::spawn(informer(&client, ns, tservers, c).run());
    tokio::spawn(informer(&client, ns, tendpoints, c).run());
    tokio::spawn(informer(&client, ns, texitedrecords, c).run());
    tokio::spawn(informer(&client, ns, tconfigs, c).run());
    tokio::spawn(informer(&client, ns, taccounts, c).run());
    tokio::spawn(informer(&client, ns, ttemplates, c).run());
    tokio::spawn(informer(&client, ns, ttrees, c).run());
    tokio::spawn(informer(&client, ns, timages, c).run());
    tokio::spawn(informer(&client, ns, tframeworkconfigs, c).run());
    tokio::spawn(informer(&client, ns, pods, c).labels(workloads.clone()).run());
    tokio::spawn(informer(&client, ns, services, c).labels(workloads.clone()).run());
    tokio::spawn(informer(&client, ns, statefulsets, c).labels(workloads.clone()).run());
    tokio::spawn(informer(&client, ns, daemonsets, c).labels(workloads.clone()).run());
    tokio::spawn(informer(&client, ns, pvcs, c).labels(workloads).run());
    tokio::spawn(informer(&client, "", nodes, c).run());

    info!("waiting for informer caches");
    wait_for_cache_sync(&probes).await;
    info!("caches synced, starting {} controllers", controllers.len());

    let running = join_all(controllers.into_iter().map(|controller| controller.run(workers)));
    tokio::select! {
        _ = running => warn!("every controller stopped"),
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("interrupted, shutting down");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    match Cli::parse().command {
        Command::Export => export(),
        Command::Run { namespace, workers } => {
            info!("running tars-controller");
            run(namespace, workers).await
        }
    }
}
