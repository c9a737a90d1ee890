// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Watch and cache the remote Kubernetes API resources, and fan every change
//! out to the controllers that registered for it.

use ahash::AHashMap;
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

use crate::kubernetes_api_objects::selector::Selector;
use crate::shim_layer::cluster::{dynamic_api, from_dynamic, kind_of, Kind};
use crate::shim_layer::controller_runtime::Controller;
use crate::shim_layer::watched::{EventType, Watched};

fn store_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}

fn key_of<K: Kind>(obj: &K) -> String {
    let meta = obj.meta();
    store_key(
        meta.namespace.as_deref().unwrap_or_default(),
        meta.name.as_deref().unwrap_or_default(),
    )
}

/// Local mirror of one kind, keyed `namespace/name`.
pub struct Store<K> {
    objects: RwLock<AHashMap<String, Arc<K>>>,
    synced: AtomicBool,
}

impl<K: Kind> Default for Store<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kind> Store<K> {
    pub fn new() -> Store<K> {
        Store {
            objects: RwLock::new(AHashMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.objects.read().get(&store_key(namespace, name)).cloned()
    }

    pub fn list(&self, namespace: &str, selector: &Selector) -> Vec<Arc<K>> {
        self.objects
            .read()
            .values()
            .filter(|obj| namespace.is_empty() || obj.meta().namespace.as_deref() == Some(namespace))
            .filter(|obj| selector.matches(obj.meta().labels.as_ref()))
            .cloned()
            .collect()
    }

    /// Stores `obj` and reports how it changed. `None` when the stored copy
    /// already has the same resourceVersion.
    pub fn apply(&self, obj: K) -> Option<(EventType, Arc<K>)> {
        let key = key_of(&obj);
        let obj = Arc::new(obj);
        let old = self.objects.write().insert(key, obj.clone());
        match old {
            None => Some((EventType::Added, obj)),
            Some(old) if old.meta().resource_version != obj.meta().resource_version => Some((EventType::Modified, obj)),
            Some(_) => None,
        }
    }

    pub fn remove(&self, obj: K) -> Arc<K> {
        let key = key_of(&obj);
        self.objects.write().remove(&key).unwrap_or_else(|| Arc::new(obj))
    }

    /// Swaps in a full relist and returns the changes against the old content.
    pub fn replace(&self, objs: Vec<K>) -> Vec<(EventType, Arc<K>)> {
        let mut fresh = AHashMap::with_capacity(objs.len());
        for obj in objs {
            fresh.insert(key_of(&obj), Arc::new(obj));
        }
        let mut objects = self.objects.write();
        let mut changes = Vec::new();
        for (key, old) in objects.iter() {
            if !fresh.contains_key(key) {
                changes.push((EventType::Deleted, old.clone()));
            }
        }
        for (key, obj) in fresh.iter() {
            match objects.get(key) {
                None => changes.push((EventType::Added, obj.clone())),
                Some(old) if old.meta().resource_version != obj.meta().resource_version => {
                    changes.push((EventType::Modified, obj.clone()))
                }
                Some(_) => {}
            }
        }
        *objects = fresh;
        changes
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// A `HasSynced` probe that does not care about the kind behind it.
pub trait SyncProbe: Send + Sync {
    fn has_synced(&self) -> bool;
}

impl<K: Kind> SyncProbe for Store<K> {
    fn has_synced(&self) -> bool {
        Store::has_synced(self)
    }
}

pub async fn wait_for_cache_sync(probes: &[Arc<dyn SyncProbe>]) {
    while !probes.iter().all(|p| p.has_synced()) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

pub struct Informer<K> {
    client: Client,
    namespace: String,
    labels: Option<Selector>,
    store: Arc<Store<K>>,
    handlers: Vec<Arc<Controller>>,
}

impl<K> Informer<K>
where
    K: Kind,
    Watched: From<Arc<K>>,
{
    pub fn new(client: Client, namespace: &str, store: Arc<Store<K>>) -> Informer<K> {
        Informer {
            client,
            namespace: namespace.to_string(),
            labels: None,
            store,
            handlers: Vec::new(),
        }
    }

    pub fn labels(mut self, selector: Selector) -> Informer<K> {
        self.labels = Some(selector);
        self
    }

    pub fn handler(mut self, controller: Arc<Controller>) -> Informer<K> {
        self.handlers.push(controller);
        self
    }

    fn dispatch(&self, event: EventType, obj: Arc<K>) {
        let watched = Watched::from(obj);
        for controller in &self.handlers {
            controller.on_event(event, &watched);
        }
    }

    fn convert(&self, obj: &DynamicObject) -> Option<K> {
        match from_dynamic::<K>(obj) {
            Ok(obj) => Some(obj),
            Err(err) => {
                warn!("decode {} {} failed: {}", kind_of::<K>(), obj.metadata.name.as_deref().unwrap_or_default(), err);
                None
            }
        }
    }

    pub async fn run(self) {
        let mut config = watcher::Config::default();
        if let Some(selector) = &self.labels {
            config = config.labels(&selector.to_string());
        }
        let api = dynamic_api::<K>(self.client.clone(), &self.namespace);
        let stream = watcher(api, config).default_backoff();
        futures::pin_mut!(stream);
        info!("watching {}", kind_of::<K>());
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Applied(obj)) => {
                    if let Some(obj) = self.convert(&obj) {
                        if let Some((event, obj)) = self.store.apply(obj) {
                            self.dispatch(event, obj);
                        }
                    }
                }
                Ok(watcher::Event::Deleted(obj)) => {
                    if let Some(obj) = self.convert(&obj) {
                        let obj = self.store.remove(obj);
                        self.dispatch(EventType::Deleted, obj);
                    }
                }
                Ok(watcher::Event::Restarted(objs)) => {
                    let objs = objs.iter().filter_map(|obj| self.convert(obj)).collect();
                    for (event, obj) in self.store.replace(objs) {
                        self.dispatch(event, obj);
                    }
                    self.store.mark_synced();
                }
                Err(err) => warn!("watch {} failed: {}", kind_of::<K>(), err),
            }
        }
    }
}
