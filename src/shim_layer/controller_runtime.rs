// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

use crate::error::Error;
use crate::shim_layer::watched::{EventType, Watched};
use crate::shim_layer::work_queue::WorkQueue;

/// What a worker does with a key after one reconcile pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Retry,
    AddAfter(Duration),
    FatalError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Enqueue {
    Now(String),
    After(String, Duration),
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Worker count this reconciler always runs with, regardless of the
    /// process wide `--workers` setting.
    fn fixed_workers(&self) -> Option<usize> {
        None
    }

    /// Maps one observed change to the key it should reconcile, if any.
    fn enqueue(&self, event: EventType, obj: &Watched) -> Option<Enqueue>;

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error>;
}

// error_policy defines the controller's behavior when the reconcile ends with an error.
pub fn error_policy(name: &str, key: &str, error: &Error) -> Outcome {
    error!("{} reconcile {} failed: {}", name, key, error);
    Outcome::Retry
}

/// One reconciler together with the queue feeding it.
pub struct Controller {
    reconciler: Arc<dyn Reconciler>,
    queue: WorkQueue,
}

impl Controller {
    pub fn new(reconciler: Arc<dyn Reconciler>) -> Controller {
        let queue = WorkQueue::new(reconciler.name());
        Controller { reconciler, queue }
    }

    pub fn name(&self) -> &'static str {
        self.reconciler.name()
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn on_event(&self, event: EventType, obj: &Watched) {
        match self.reconciler.enqueue(event, obj) {
            Some(Enqueue::Now(key)) => self.queue.add(&key),
            Some(Enqueue::After(key, delay)) => self.queue.add_after(&key, delay),
            None => {}
        }
    }

    /// Pops one key, reconciles it and disposes of it. Returns false once the
    /// queue has shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let key = match self.queue.get().await {
            Some(key) => key,
            None => return false,
        };
        debug!("Reconciling {} {}", self.name(), key);
        let outcome = match self.reconciler.reconcile(&key).await {
            Ok(outcome) => outcome,
            Err(err) => error_policy(self.name(), &key, &err),
        };
        let keep_going = match outcome {
            Outcome::Done => {
                self.queue.forget(&key);
                true
            }
            Outcome::Retry => {
                self.queue.add_rate_limited(&key);
                true
            }
            Outcome::AddAfter(delay) => {
                self.queue.add_after(&key, delay);
                true
            }
            Outcome::FatalError => {
                error!("{} hit an unrecoverable error on {}, stopping its workers", self.name(), key);
                self.queue.shutdown();
                false
            }
        };
        self.queue.done(&key);
        keep_going
    }

    pub async fn run(self: Arc<Self>, default_workers: usize) {
        let workers = self.reconciler.fixed_workers().unwrap_or(default_workers).max(1);
        info!("starting {} with {} workers", self.name(), workers);
        let handles = (0..workers).map(|_| {
            let controller = self.clone();
            tokio::spawn(async move { while controller.process_next_work_item().await {} })
        });
        for res in join_all(handles).await {
            if let Err(err) = res {
                error!("{} worker exited abnormally: {}", self.name(), err);
            }
        }
        info!("{} terminated", self.name());
    }
}
