// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mock Kubernetes API, an in-memory object store, and
//! recording fakes for events and digest resolution.

use crate::digest::{AuthContext, Resolver};
use crate::error::{Result, RiffError};
use crate::kubernetes::{EventPublisher, KubeObject, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Request, Response};
use http_body_util::BodyExt;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::client::Body;
use kube::core::ErrorResponse;
use kube::runtime::events::EventType;
use kube::{Client, ResourceExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    /// Every request seen so far as (method, path, body)
    pub fn requests(&self) -> Vec<(String, String, String)> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        // Try exact match first
        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Then the longest registered prefix
        responses
            .iter()
            .filter(|((m, p), _)| m == method && path.starts_with(p.as_str()))
            .max_by_key(|((_, p), _)| p.len())
            .map(|(_, resp)| resp.clone())
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let response = self.find_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let body: Bytes = req.into_body().collect().await?.to_bytes();
            requests.lock().unwrap().push((
                method,
                path,
                String::from_utf8_lossy(&body).into_owned(),
            ));

            let (status, body) = response.unwrap_or_else(|| {
                // Default 404 for unmatched requests
                (404, not_found_json("unknown", "unknown"))
            });
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// An API error as the object store would return it
pub fn api_error(code: u16, reason: &str) -> RiffError {
    RiffError::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("induced {reason}"),
        reason: reason.to_string(),
        code,
    }))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
    UpdateStatus,
}

struct Failure {
    verb: Verb,
    name: Option<String>,
    code: u16,
    reason: String,
}

struct FakeState<K> {
    objects: BTreeMap<(String, String), K>,
    failures: Vec<Failure>,
    writes: Vec<(Verb, String)>,
    sequence: i64,
}

/// In-memory [`ObjectStore`] mimicking the API server's write semantics:
/// generated names, UID and resourceVersion assignment, optimistic
/// concurrency and status subresource separation.
pub struct FakeStore<K> {
    state: Mutex<FakeState<K>>,
}

impl<K: KubeObject> FakeStore<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                objects: BTreeMap::new(),
                failures: Vec::new(),
                writes: Vec::new(),
                sequence: 0,
            }),
        }
    }

    /// Insert an existing object without recording a write
    pub fn seed(&self, mut obj: K) -> K {
        let mut state = self.state.lock().unwrap();
        state.stamp(&mut obj);
        let key = (obj.namespace().unwrap_or_default(), obj.name_any());
        state.objects.insert(key, obj.clone());
        obj
    }

    /// Fail the next matching call with an API error; `name` of `None` matches any object
    pub fn fail_once(&self, verb: Verb, name: Option<&str>, code: u16, reason: &str) {
        self.state.lock().unwrap().failures.push(Failure {
            verb,
            name: name.map(str::to_string),
            code,
            reason: reason.to_string(),
        });
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state.objects.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    pub fn objects(&self) -> Vec<K> {
        self.state.lock().unwrap().objects.values().cloned().collect()
    }

    /// Every successful write as (verb, object name), in order
    pub fn writes(&self) -> Vec<(Verb, String)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().unwrap().writes.clear();
    }
}

impl<K: KubeObject> Default for FakeStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: KubeObject> FakeState<K> {
    fn next(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }

    fn stamp(&mut self, obj: &mut K) {
        let seq = self.next();
        let meta = obj.meta_mut();
        if meta.name.is_none() {
            if let Some(prefix) = &meta.generate_name {
                meta.name = Some(format!("{prefix}{seq:03}"));
            }
        }
        meta.uid.get_or_insert_with(|| format!("uid-{seq}"));
        meta.resource_version = Some(seq.to_string());
        meta.creation_timestamp
            .get_or_insert_with(|| Time(DateTime::<Utc>::from_timestamp(1_700_000_000 + seq, 0).unwrap()));
        meta.generation.get_or_insert(1);
    }

    fn check(&mut self, verb: Verb, name: &str) -> Result<()> {
        let position = self.failures.iter().position(|f| {
            f.verb == verb && f.name.as_deref().map_or(true, |n| n == name)
        });
        match position {
            Some(i) => {
                let failure = self.failures.remove(i);
                Err(api_error(failure.code, &failure.reason))
            }
            None => Ok(()),
        }
    }

    fn existing(&self, obj: &K) -> Result<&K> {
        let key = (obj.namespace().unwrap_or_default(), obj.name_any());
        self.objects.get(&key).ok_or_else(|| api_error(404, "NotFound"))
    }

    fn check_resource_version(&self, obj: &K) -> Result<()> {
        let current = self.existing(obj)?;
        if obj.resource_version().is_some() && obj.resource_version() != current.resource_version() {
            return Err(api_error(409, "Conflict"));
        }
        Ok(())
    }

    /// Everything but the status from `base`, the status from `status_from`
    fn splice_status(base: &K, status_from: &K) -> Result<K> {
        let mut value = serde_json::to_value(base)?;
        let status = serde_json::to_value(status_from)?.get("status").cloned();
        match (value.as_object_mut(), status) {
            (Some(map), Some(status)) => {
                map.insert("status".to_string(), status);
            }
            (Some(map), None) => {
                map.remove("status");
            }
            _ => {}
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl<K: KubeObject> ObjectStore<K> for FakeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let mut state = self.state.lock().unwrap();
        state.check(Verb::Get, name)?;
        Ok(state.objects.get(&(namespace.to_string(), name.to_string())).cloned())
    }

    async fn list(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let mut state = self.state.lock().unwrap();
        state.check(Verb::List, "")?;
        Ok(state
            .objects
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, obj)| obj)
            .filter(|obj| labels.iter().all(|(k, v)| obj.labels().get(k) == Some(v)))
            .cloned()
            .collect())
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let mut created = obj.clone();
        created.meta_mut().namespace = Some(namespace.to_string());
        state.stamp(&mut created);
        let name = created.name_any();
        state.check(Verb::Create, &name)?;
        let key = (namespace.to_string(), name.clone());
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.objects.insert(key, created.clone());
        state.writes.push((Verb::Create, name));
        Ok(created)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let name = obj.name_any();
        state.check(Verb::Update, &name)?;
        state.check_resource_version(obj)?;
        let mut updated = FakeState::splice_status(obj, state.existing(obj)?)?;
        let seq = state.next();
        updated.meta_mut().resource_version = Some(seq.to_string());
        let key = (updated.namespace().unwrap_or_default(), name.clone());
        state.objects.insert(key, updated.clone());
        state.writes.push((Verb::Update, name));
        Ok(updated)
    }

    async fn delete(&self, obj: &K) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let name = obj.name_any();
        state.check(Verb::Delete, &name)?;
        let current = state.existing(obj)?;
        if obj.uid().is_some() && obj.uid() != current.uid() {
            return Err(api_error(409, "Conflict"));
        }
        state.objects.remove(&(obj.namespace().unwrap_or_default(), name.clone()));
        state.writes.push((Verb::Delete, name));
        Ok(())
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let name = obj.name_any();
        state.check(Verb::UpdateStatus, &name)?;
        state.check_resource_version(obj)?;
        let mut updated = FakeState::splice_status(state.existing(obj)?, obj)?;
        let seq = state.next();
        updated.meta_mut().resource_version = Some(seq.to_string());
        let key = (updated.namespace().unwrap_or_default(), name.clone());
        state.objects.insert(key, updated.clone());
        state.writes.push((Verb::UpdateStatus, name));
        Ok(updated)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: String,
}

/// [`EventPublisher`] that keeps every event in memory
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, _regarding: &ObjectReference, type_: EventType, reason: &str, note: String) {
        self.events.lock().unwrap().push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

/// [`Resolver`] answering every lookup with the same digest or failure
pub struct StaticResolver {
    answer: std::result::Result<String, String>,
    calls: Mutex<Vec<String>>,
}

impl StaticResolver {
    pub fn resolving_to(digest_ref: &str) -> Self {
        Self {
            answer: Ok(digest_ref.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            answer: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(
        &self,
        image: &str,
        _auth: &AuthContext,
        _skip_registries: &HashSet<String>,
    ) -> Result<String> {
        self.calls.lock().unwrap().push(image.to_string());
        self.answer.clone().map_err(RiffError::RegistryError)
    }
}
