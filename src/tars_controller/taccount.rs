// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::crds::TAccount;
use crate::error::Error;
use crate::meta::*;
use crate::shim_layer::{Cluster, Enqueue, EventType, Outcome, Reconciler, Watched};
use crate::tars_controller::{invalid_key, object_key, retry, split_key, Context};

/// Drops the tokens expired at `now`. Returns the pruned account, if anything
/// was dropped, and how long until the next remaining token expires.
pub fn prune_tokens(account: &TAccount, now: DateTime<Utc>) -> (Option<TAccount>, Option<Duration>) {
    let tokens = &account.spec.authentication.tokens;
    let mut next_expiry: Option<Duration> = None;
    let mut kept = Vec::with_capacity(tokens.len());
    for token in tokens {
        match &token.expiration_time {
            // A negative remainder does not convert: the token is expired.
            Some(expiration) => {
                if let Ok(remaining) = (expiration.0 - now).to_std() {
                    next_expiry = Some(next_expiry.map_or(remaining, |d| d.min(remaining)));
                    kept.push(token.clone());
                }
            }
            None => kept.push(token.clone()),
        }
    }
    if kept.len() == tokens.len() {
        return (None, next_expiry);
    }
    let mut pruned = account.clone();
    pruned.spec.authentication.tokens = kept;
    (Some(pruned), next_expiry)
}

/// Sweeps expired tokens, waking up again when the next one runs out.
pub struct TAccountReconciler<C: Cluster> {
    ctx: Arc<Context<C>>,
}

impl<C: Cluster> TAccountReconciler<C> {
    pub fn new(ctx: Arc<Context<C>>) -> TAccountReconciler<C> {
        TAccountReconciler { ctx }
    }
}

#[async_trait]
impl<C: Cluster> Reconciler for TAccountReconciler<C> {
    fn name(&self) -> &'static str {
        "taccount"
    }

    fn enqueue(&self, _event: EventType, obj: &Watched) -> Option<Enqueue> {
        match obj {
            Watched::TAccount(account) => object_key(&account.metadata).map(Enqueue::Now),
            _ => None,
        }
    }

    async fn reconcile(&self, key: &str) -> Result<Outcome, Error> {
        let (namespace, name) = match split_key(key) {
            Some(parts) => parts,
            None => return invalid_key(key),
        };
        let account = match self.ctx.cluster.get::<TAccount>(namespace, name)? {
            Some(account) => account,
            None => return Ok(Outcome::Done),
        };

        let (pruned, next_expiry) = prune_tokens(&account, Utc::now());
        if let Some(pruned) = pruned {
            if let Err(err) = self.ctx.cluster.update(&pruned).await {
                return retry(resource_update_error("taccount", namespace, name, err));
            }
        }
        Ok(next_expiry.map_or(Outcome::Done, Outcome::AddAfter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ConfigStore;
    use crate::crds::{TAccountAuthenticationToken, TAccountSpec};
    use crate::shim_layer::fake_cluster::FakeCluster;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

    fn token(name: &str, expires_in: Option<i64>) -> TAccountAuthenticationToken {
        TAccountAuthenticationToken {
            name: name.to_string(),
            content: format!("{}-secret", name),
            expiration_time: expires_in.map(|secs| metav1::Time(Utc::now() + chrono::Duration::seconds(secs))),
            valid: true,
            ..Default::default()
        }
    }

    fn account(tokens: Vec<TAccountAuthenticationToken>) -> TAccount {
        let mut spec = TAccountSpec {
            username: "admin".to_string(),
            ..Default::default()
        };
        spec.authentication.tokens = tokens;
        let mut account = TAccount::new("21232f297a57a5a743894a0e4a801fc3", spec);
        account.metadata.namespace = Some("tars".to_string());
        account
    }

    #[test]
    fn expired_tokens_are_dropped() {
        let acc = account(vec![token("old", Some(-60)), token("soon", Some(600)), token("forever", None)]);
        let (pruned, next) = prune_tokens(&acc, Utc::now());
        let names: Vec<_> = pruned.unwrap().spec.authentication.tokens.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["soon", "forever"]);
        let next = next.unwrap();
        assert!(next <= Duration::from_secs(600) && next > Duration::from_secs(590));
    }

    #[tokio::test]
    async fn sweep_schedules_the_next_expiry() {
        let cluster = FakeCluster::new();
        let reconciler = TAccountReconciler::new(Context::new(cluster.clone(), Arc::new(ConfigStore::new())));
        cluster.insert(&account(vec![token("soon", Some(300))]));
        let key = "tars/21232f297a57a5a743894a0e4a801fc3";
        assert!(matches!(reconciler.reconcile(key).await.unwrap(), Outcome::AddAfter(_)));
        assert!(cluster.calls().is_empty());

        cluster.insert(&account(vec![token("old", Some(-1))]));
        assert_eq!(reconciler.reconcile(key).await.unwrap(), Outcome::Done);
        assert_eq!(cluster.calls_of("update").len(), 1);
        let stored = cluster.get::<TAccount>("tars", "21232f297a57a5a743894a0e4a801fc3").unwrap().unwrap();
        assert!(stored.spec.authentication.tokens.is_empty());
    }
}
