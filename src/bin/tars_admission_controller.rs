// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use clap::Parser;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation as AdmissionOperation};
use kube::core::DynamicObject;
use kube::runtime::events::Reporter;
use kube::Client;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::*;
use warp::{Filter, Reply};

use tars_controller::admission::mutating::Mutator;
use tars_controller::admission::{Operation, Request, Validator};
use tars_controller::crds::{TConfig, TFrameworkConfig, TImage, TServer, TTemplate, TTree};
use tars_controller::meta::*;
use tars_controller::shim_layer::informer::{wait_for_cache_sync, Informer, SyncProbe};
use tars_controller::shim_layer::KubeCluster;

#[derive(Parser)]
#[command(name = "tars-admission-controller", about = "Mutating and validating webhooks for the tars resources")]
struct Cli {
    #[arg(long, default_value = "/certs/tls.crt")]
    cert_path: String,
    #[arg(long, default_value = "/certs/tls.key")]
    key_path: String,
    #[arg(long, default_value_t = 8443)]
    port: u16,
    /// Namespace the controller service account lives in
    #[arg(long, env = "TARS_CONTROLLER_NAMESPACE", default_value = DEFAULT_CONTROLLER_NAMESPACE)]
    controller_namespace: String,
    /// Namespace to cache, every namespace when empty
    #[arg(long, env = "TARS_WATCH_NAMESPACE", default_value = "")]
    namespace: String,
}

type SharedValidator = Arc<Validator<KubeCluster>>;
type SharedMutator = Arc<Mutator<KubeCluster>>;

fn to_request(req: &AdmissionRequest<DynamicObject>) -> Result<Request, String> {
    let operation = match req.operation {
        AdmissionOperation::Create => Operation::Create,
        AdmissionOperation::Update => Operation::Update,
        AdmissionOperation::Delete => Operation::Delete,
        AdmissionOperation::Connect => Operation::Connect,
    };
    let encode = |obj: &Option<DynamicObject>| {
        obj.as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| format!("encode {} failed: {}", req.kind.kind, err))
    };
    Ok(Request {
        operation,
        kind: req.kind.kind.clone(),
        version: req.kind.version.clone(),
        namespace: req.namespace.clone().unwrap_or_default(),
        username: req.user_info.username.clone().unwrap_or_default(),
        object: encode(&req.object)?,
        old_object: encode(&req.old_object)?,
    })
}

async fn mutate_handler(body: AdmissionReview<DynamicObject>, mutator: SharedMutator) -> Result<impl Reply, Infallible> {
    let req: AdmissionRequest<_> = match body.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!("invalid request: {}", err);
            return Ok(warp::reply::json(&AdmissionResponse::invalid(err.to_string()).into_review()));
        }
    };

    let res = AdmissionResponse::from(&req);
    let mutation = match to_request(&req) {
        Ok(request) => mutator.mutate(&request),
        Err(err) => Err(err),
    };
    let res = match mutation {
        Ok(None) => res,
        Ok(Some(patch)) => match res.clone().with_patch(patch) {
            Ok(patched) => {
                debug!("mutated: {:?} {} {}", req.operation, req.kind.kind, req.name);
                patched
            }
            Err(err) => {
                error!("encode patch failed: {}", err);
                res.deny(err.to_string())
            }
        },
        Err(err) => {
            warn!("denied: {:?} {} {} ({})", req.operation, req.kind.kind, req.name, err);
            res.deny(err)
        }
    };
    Ok(warp::reply::json(&res.into_review()))
}

async fn validate_handler(body: AdmissionReview<DynamicObject>, validator: SharedValidator) -> Result<impl Reply, Infallible> {
    let req: AdmissionRequest<_> = match body.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!("invalid request: {}", err);
            return Ok(warp::reply::json(&AdmissionResponse::invalid(err.to_string()).into_review()));
        }
    };

    let res = AdmissionResponse::from(&req);
    let verdict = match to_request(&req) {
        Ok(request) => validator.validate(&request).await,
        Err(err) => Err(err),
    };
    let res = match verdict {
        Ok(()) => {
            debug!("accepted: {:?} {} {}", req.operation, req.kind.kind, req.name);
            res
        }
        Err(err) => {
            warn!("denied: {:?} {} {} ({})", req.operation, req.kind.kind, req.name, err);
            res.deny(err)
        }
    };
    Ok(warp::reply::json(&res.into_review()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let client = Client::try_default().await?;
    let reporter = Reporter {
        controller: "tars-admission-controller".to_string(),
        instance: std::env::var("POD_NAME").ok(),
    };
    let mut cluster = KubeCluster::new(client.clone(), reporter);
    let tservers = cluster.register::<TServer>();
    let tconfigs = cluster.register::<TConfig>();
    let ttemplates = cluster.register::<TTemplate>();
    let ttrees = cluster.register::<TTree>();
    let tframeworkconfigs = cluster.register::<TFrameworkConfig>();
    let timages = cluster.register::<TImage>();
    let probes: Vec<Arc<dyn SyncProbe>> = vec![
        tservers.clone(),
        tconfigs.clone(),
        ttemplates.clone(),
        ttrees.clone(),
        tframeworkconfigs.clone(),
        timages.clone(),
    ];
    let ns = cli.namespace.as_str();
    tokio::spawn(Informer::new(client.clone(), ns, tservers).run());
    tokio::spawn(Informer::new(client.clone(), ns, tconfigs).run());
    tokio::spawn(Informer::new(client.clone(), ns, ttemplates).run());
    tokio::spawn(Informer::new(client.clone(), ns, ttrees).run());
    tokio::spawn(Informer::new(client.clone(), ns, tframeworkconfigs).run());
    tokio::spawn(Informer::new(client, ns, timages).run());
    wait_for_cache_sync(&probes).await;

    let cluster = Arc::new(cluster);
    let mutator: SharedMutator = Arc::new(Mutator::new(cluster.clone()));
    let validator: SharedValidator = Arc::new(Validator::new(cluster, &cli.controller_namespace));
    let with_mutator = warp::any().map(move || mutator.clone());
    let with_validator = warp::any().map(move || validator.clone());
    let mutate = warp::path("mutate")
        .and(warp::body::json())
        .and(with_mutator)
        .and_then(mutate_handler);
    let validate = warp::path("validate")
        .and(warp::body::json())
        .and(with_validator)
        .and_then(validate_handler);
    let routes = mutate.or(validate).with(warp::trace::request());

    info!("serving admission on port {}", cli.port);
    warp::serve(warp::post().and(routes))
        .tls()
        .cert_path(&cli.cert_path)
        .key_path(&cli.key_path)
        .run(([0, 0, 0, 0], cli.port))
        .await;
    Ok(())
}
