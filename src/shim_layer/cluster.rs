// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use ahash::AHashMap;
use async_trait::async_trait;
use core::fmt::Debug;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use kube::Client;
use kube_core::Resource;
use serde::{de::DeserializeOwned, Serialize};
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::*;

use crate::error::{kube_error_to_api_error, APIError, Error};
use crate::kubernetes_api_objects::selector::Selector;
use crate::shim_layer::informer::Store;

/// Any object kind the cluster facade can cache and write.
pub trait Kind: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<K> Kind for K where K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

pub fn kind_of<K: Kind>() -> String {
    K::kind(&()).to_string()
}

/// Read path served from the informer caches, write path sent to the apiserver.
/// An empty namespace addresses cluster scoped objects, or every namespace on list.
#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    fn get<K: Kind>(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>, Error>;

    fn list<K: Kind>(&self, namespace: &str, selector: &Selector) -> Result<Vec<Arc<K>>, Error>;

    async fn create<K: Kind>(&self, obj: &K) -> Result<(), Error>;

    async fn update<K: Kind>(&self, obj: &K) -> Result<(), Error>;

    async fn update_status<K: Kind>(&self, obj: &K) -> Result<(), Error>;

    async fn delete<K: Kind>(&self, namespace: &str, name: &str) -> Result<(), Error>;

    async fn delete_collection<K: Kind>(&self, namespace: &str, selector: &Selector) -> Result<(), Error>;

    async fn patch<K: Kind>(&self, namespace: &str, name: &str, patch: &json_patch::Patch) -> Result<(), Error>;

    /// Publishes a Warning event about `obj`. Failures are only logged.
    async fn warn<K: Kind>(&self, obj: &K, reason: &str, message: &str);
}

pub fn to_dynamic<K: Kind>(obj: &K) -> Result<DynamicObject, Error> {
    let mut value = serde_json::to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), serde_json::Value::String(K::api_version(&()).into_owned()));
        map.insert("kind".to_string(), serde_json::Value::String(K::kind(&()).into_owned()));
    }
    Ok(serde_json::from_value(value)?)
}

pub fn from_dynamic<K: Kind>(obj: &DynamicObject) -> Result<K, Error> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub struct KubeCluster {
    client: Client,
    reporter: Reporter,
    stores: AHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl KubeCluster {
    pub fn new(client: Client, reporter: Reporter) -> KubeCluster {
        KubeCluster {
            client,
            reporter,
            stores: AHashMap::new(),
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Registers the cache backing reads of `K` and hands it out for the
    /// informer to fill.
    pub fn register<K: Kind>(&mut self) -> Arc<Store<K>> {
        let store = Arc::new(Store::<K>::new());
        self.stores.insert(TypeId::of::<K>(), store.clone());
        store
    }

    fn store<K: Kind>(&self) -> Result<Arc<Store<K>>, Error> {
        self.stores
            .get(&TypeId::of::<K>())
            .cloned()
            .and_then(|store| store.downcast::<Store<K>>().ok())
            .ok_or_else(|| Error::CacheMissing { kind: kind_of::<K>() })
    }

    fn api<K: Kind>(&self, namespace: &str) -> Api<DynamicObject> {
        dynamic_api::<K>(self.client.clone(), namespace)
    }
}

pub fn dynamic_api<K: Kind>(client: Client, namespace: &str) -> Api<DynamicObject> {
    let api_resource = ApiResource::erase::<K>(&());
    if namespace.is_empty() {
        Api::all_with(client, &api_resource)
    } else {
        Api::namespaced_with(client, namespace, &api_resource)
    }
}

fn namespace_and_name<K: Kind>(obj: &K) -> (String, String) {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl Cluster for KubeCluster {
    fn get<K: Kind>(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>, Error> {
        Ok(self.store::<K>()?.get(namespace, name))
    }

    fn list<K: Kind>(&self, namespace: &str, selector: &Selector) -> Result<Vec<Arc<K>>, Error> {
        Ok(self.store::<K>()?.list(namespace, selector))
    }

    async fn create<K: Kind>(&self, obj: &K) -> Result<(), Error> {
        let (namespace, _) = namespace_and_name(obj);
        let dynamic = to_dynamic(obj)?;
        match self.api::<K>(&namespace).create(&PostParams::default(), &dynamic).await {
            Ok(_) => Ok(()),
            Err(err) if kube_error_to_api_error(&err) == APIError::ObjectAlreadyExists => Ok(()),
            Err(err) => Err(Error::Kube(err)),
        }
    }

    async fn update<K: Kind>(&self, obj: &K) -> Result<(), Error> {
        let (namespace, name) = namespace_and_name(obj);
        let dynamic = to_dynamic(obj)?;
        self.api::<K>(&namespace).replace(&name, &PostParams::default(), &dynamic).await?;
        Ok(())
    }

    async fn update_status<K: Kind>(&self, obj: &K) -> Result<(), Error> {
        let (namespace, name) = namespace_and_name(obj);
        let body = serde_json::to_vec(&to_dynamic(obj)?)?;
        self.api::<K>(&namespace).replace_status(&name, &PostParams::default(), body).await?;
        Ok(())
    }

    async fn delete<K: Kind>(&self, namespace: &str, name: &str) -> Result<(), Error> {
        match self.api::<K>(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) if kube_error_to_api_error(&err) == APIError::ObjectNotFound => Ok(()),
            Err(err) => Err(Error::Kube(err)),
        }
    }

    async fn delete_collection<K: Kind>(&self, namespace: &str, selector: &Selector) -> Result<(), Error> {
        let lp = ListParams::default().labels(&selector.to_string());
        self.api::<K>(namespace).delete_collection(&DeleteParams::default(), &lp).await?;
        Ok(())
    }

    async fn patch<K: Kind>(&self, namespace: &str, name: &str, patch: &json_patch::Patch) -> Result<(), Error> {
        self.api::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Json::<()>(patch.clone()))
            .await?;
        Ok(())
    }

    async fn warn<K: Kind>(&self, obj: &K, reason: &str, message: &str) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), obj.object_ref(&()));
        let event = Event {
            type_: KubeEventType::Warning,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(err) = recorder.publish(event).await {
            warn!("publish event {} for {} failed: {}", reason, obj.meta().name.as_deref().unwrap_or_default(), err);
        }
    }
}
