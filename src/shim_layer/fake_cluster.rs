// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! In-memory cluster used by the reconciler and admission tests.

use ahash::AHashSet;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{APIError, Error};
use crate::kubernetes_api_objects::selector::Selector;
use crate::shim_layer::cluster::{kind_of, Cluster, Kind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub verb: &'static str,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

type ObjectKey = (String, String, String);

#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    calls: Mutex<Vec<Call>>,
    fail_verbs: Mutex<AHashSet<&'static str>>,
    warnings: Mutex<Vec<(String, String)>>,
    resource_version: Mutex<u64>,
}

fn meta_of<K: Kind>(obj: &K) -> (String, String) {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

impl FakeCluster {
    pub fn new() -> Arc<FakeCluster> {
        Arc::new(FakeCluster::default())
    }

    /// Seeds an object without recording a call.
    pub fn insert<K: Kind>(&self, obj: &K) {
        let (namespace, name) = meta_of(obj);
        let value = serde_json::to_value(obj).unwrap();
        self.objects.lock().insert((kind_of::<K>(), namespace, name), value);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, verb: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.verb == verb).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn fail(&self, verb: &'static str) {
        self.fail_verbs.lock().insert(verb);
    }

    pub fn warnings(&self) -> Vec<(String, String)> {
        self.warnings.lock().clone()
    }

    pub fn count<K: Kind>(&self) -> usize {
        let kind = kind_of::<K>();
        self.objects.lock().keys().filter(|(k, _, _)| *k == kind).count()
    }

    fn record<K: Kind>(&self, verb: &'static str, namespace: &str, name: &str) -> Result<(), Error> {
        self.calls.lock().push(Call {
            verb,
            kind: kind_of::<K>(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        if self.fail_verbs.lock().contains(verb) {
            return Err(self.api_error::<K>(verb, namespace, name, APIError::InternalError));
        }
        Ok(())
    }

    fn api_error<K: Kind>(&self, verb: &'static str, namespace: &str, name: &str, reason: APIError) -> Error {
        Error::Api {
            verb,
            kind: kind_of::<K>(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason,
        }
    }

    fn next_version(&self, value: &mut Value) {
        let mut version = self.resource_version.lock();
        *version += 1;
        value["metadata"]["resourceVersion"] = Value::String(version.to_string());
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    fn get<K: Kind>(&self, namespace: &str, name: &str) -> Result<Option<Arc<K>>, Error> {
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        match self.objects.lock().get(&key) {
            Some(value) => Ok(Some(Arc::new(serde_json::from_value(value.clone())?))),
            None => Ok(None),
        }
    }

    fn list<K: Kind>(&self, namespace: &str, selector: &Selector) -> Result<Vec<Arc<K>>, Error> {
        let kind = kind_of::<K>();
        let mut objs = Vec::new();
        for ((k, ns, _), value) in self.objects.lock().iter() {
            if *k != kind || (!namespace.is_empty() && ns != namespace) {
                continue;
            }
            let obj: K = serde_json::from_value(value.clone())?;
            if selector.matches(obj.meta().labels.as_ref()) {
                objs.push(Arc::new(obj));
            }
        }
        Ok(objs)
    }

    async fn create<K: Kind>(&self, obj: &K) -> Result<(), Error> {
        let (namespace, name) = meta_of(obj);
        self.record::<K>("create", &namespace, &name)?;
        let mut value = serde_json::to_value(obj)?;
        self.next_version(&mut value);
        self.objects.lock().entry((kind_of::<K>(), namespace, name)).or_insert(value);
        Ok(())
    }

    async fn update<K: Kind>(&self, obj: &K) -> Result<(), Error> {
        let (namespace, name) = meta_of(obj);
        self.record::<K>("update", &namespace, &name)?;
        let mut value = serde_json::to_value(obj)?;
        self.next_version(&mut value);
        match self.objects.lock().get_mut(&(kind_of::<K>(), namespace.clone(), name.clone())) {
            Some(stored) => {
                *stored = value;
                Ok(())
            }
            None => Err(self.api_error::<K>("update", &namespace, &name, APIError::ObjectNotFound)),
        }
    }

    async fn update_status<K: Kind>(&self, obj: &K) -> Result<(), Error> {
        let (namespace, name) = meta_of(obj);
        self.record::<K>("update_status", &namespace, &name)?;
        let status = serde_json::to_value(obj)?.get("status").cloned().unwrap_or(Value::Null);
        match self.objects.lock().get_mut(&(kind_of::<K>(), namespace.clone(), name.clone())) {
            Some(stored) => {
                stored["status"] = status;
                Ok(())
            }
            None => Err(self.api_error::<K>("update_status", &namespace, &name, APIError::ObjectNotFound)),
        }
    }

    async fn delete<K: Kind>(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.record::<K>("delete", namespace, name)?;
        self.objects
            .lock()
            .remove(&(kind_of::<K>(), namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn delete_collection<K: Kind>(&self, namespace: &str, selector: &Selector) -> Result<(), Error> {
        self.record::<K>("delete_collection", namespace, &selector.to_string())?;
        let doomed: Vec<String> = self
            .list::<K>(namespace, selector)?
            .iter()
            .filter_map(|obj| obj.meta().name.clone())
            .collect();
        let mut objects = self.objects.lock();
        for name in doomed {
            objects.remove(&(kind_of::<K>(), namespace.to_string(), name));
        }
        Ok(())
    }

    async fn patch<K: Kind>(&self, namespace: &str, name: &str, patch: &json_patch::Patch) -> Result<(), Error> {
        self.record::<K>("patch", namespace, name)?;
        let mut objects = self.objects.lock();
        let stored = match objects.get_mut(&(kind_of::<K>(), namespace.to_string(), name.to_string())) {
            Some(stored) => stored,
            None => return Err(self.api_error::<K>("patch", namespace, name, APIError::ObjectNotFound)),
        };
        let mut patched = stored.clone();
        json_patch::patch(&mut patched, patch).map_err(Error::Patch)?;
        serde_json::from_value::<K>(patched.clone())?;
        self.next_version(&mut patched);
        *stored = patched;
        Ok(())
    }

    async fn warn<K: Kind>(&self, _obj: &K, reason: &str, message: &str) {
        self.warnings.lock().push((reason.to_string(), message.to_string()));
    }
}
