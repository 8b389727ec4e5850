//! Helper functions shared by the cluster and machine reconcilers.

use chrono::{DateTime, Utc};
use contabo_client::ContaboError;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde::Serialize;
use std::time::Duration;

/// `namespace/name`, the key for per-object backoff state
pub fn resource_key<K: Resource>(obj: &K) -> String {
    format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

pub fn requeue_secs(secs: u64) -> Action {
    Action::requeue(Duration::from_secs(secs))
}

/// True when writing `desired` would change what is stored
///
/// Unchanged status writes would retrigger watches for nothing.
pub fn status_needs_update<S: Serialize>(current: Option<&S>, desired: &S) -> bool {
    match current {
        None => true,
        Some(current) => match (serde_json::to_value(current), serde_json::to_value(desired)) {
            (Ok(a), Ok(b)) => a != b,
            _ => true,
        },
    }
}

/// Time since `since`, zero for timestamps in the future
pub fn elapsed_since(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

/// True once `since` is set and more than `limit` in the past
pub fn has_exceeded(since: Option<DateTime<Utc>>, limit: Duration, now: DateTime<Utc>) -> bool {
    since.is_some_and(|t| elapsed_since(t, now) > limit)
}

/// UTF-8 value of `key` in a Secret's data
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .or_else(|| secret.string_data.as_ref().and_then(|d| d.get(key)).cloned())
}

/// Controller owner reference pointing at `owner`
pub fn owner_reference<K: Resource<DynamicType = ()>>(owner: &K) -> Option<OwnerReference> {
    owner.controller_owner_ref(&())
}

/// Treat a provider 404 as success, for deletes of things that may already be gone
pub fn ignore_not_found(result: Result<(), ContaboError>) -> Result<(), ContaboError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Truncate a message stored in a condition
pub fn condition_message(message: impl std::fmt::Display) -> String {
    const MAX: usize = 1024;
    let mut s = message.to_string();
    if s.len() > MAX {
        let mut cut = MAX;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}
