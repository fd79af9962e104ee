//! In-process stand-ins for an objstore server.
//!
//! [`Store`] holds the objects; [`spawn_rest_backend`] serves it over plain
//! HTTP with axum and [`StoreExchange`] answers the QUIC JSON envelopes
//! directly, so both transports can be driven against the same state.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use objstore_client::quic::{Exchange, ExchangeResponse};
use objstore_client::{Metadata, Result};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub metadata: Metadata,
}

#[derive(Clone, Default)]
pub struct Store {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    failures: Arc<AtomicUsize>,
    requests: Arc<AtomicUsize>,
    next_etag: Arc<AtomicUsize>,
}

impl Store {
    /// The next `n` requests answer 503.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    fn should_fail(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn insert(&self, key: &str, data: Bytes, mut metadata: Metadata) -> String {
        let etag = format!("etag-{}", self.next_etag.fetch_add(1, Ordering::SeqCst));
        metadata.size = data.len() as i64;
        metadata.etag = Some(etag.clone());
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), StoredObject { data, metadata });
        etag
    }

    fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn remove(&self, key: &str) -> bool {
        self.objects.lock().unwrap().remove(key).is_some()
    }

    fn list(&self, prefix: &str) -> Vec<Value> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| {
                json!({
                    "key": key,
                    "size": obj.metadata.size,
                    "etag": obj.metadata.etag,
                    "metadata": obj.metadata.custom,
                })
            })
            .collect()
    }
}

/// Serves `store` on an ephemeral port and returns its `host:port`.
pub async fn spawn_rest_backend(store: Store) -> String {
    let app = Router::new()
        .route("/health", get(health))
        .route("/objects", get(list_objects))
        .route(
            "/objects/{key}",
            get(get_object).put(put_object).delete(delete_object),
        )
        .with_state(store);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}

fn unavailable() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response()
}

async fn health(State(store): State<Store>) -> Response {
    if store.should_fail() {
        return unavailable();
    }
    Json(json!({"status": "healthy", "version": "test"})).into_response()
}

async fn list_objects(
    State(store): State<Store>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if store.should_fail() {
        return unavailable();
    }
    let prefix = params.get("prefix").map(String::as_str).unwrap_or("");
    Json(json!({"objects": store.list(prefix), "truncated": false})).into_response()
}

async fn put_object(
    State(store): State<Store>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if store.should_fail() {
        return unavailable();
    }
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    let metadata = Metadata {
        content_type: text(header::CONTENT_TYPE.as_str()),
        content_encoding: text(header::CONTENT_ENCODING.as_str()),
        custom: text("X-Object-Metadata")
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
        ..Default::default()
    };
    let etag = store.insert(&key, body, metadata);
    (
        StatusCode::CREATED,
        Json(json!({"message": "object stored", "data": {"etag": etag}})),
    )
        .into_response()
}

async fn get_object(State(store): State<Store>, Path(key): Path<String>) -> Response {
    if store.should_fail() {
        return unavailable();
    }
    let Some(obj) = store.get(&key) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut headers = HeaderMap::new();
    if let Some(content_type) = &obj.metadata.content_type {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
    }
    if let Some(etag) = &obj.metadata.etag {
        if let Ok(value) = HeaderValue::from_str(etag) {
            headers.insert(header::ETAG, value);
        }
    }
    if !obj.metadata.custom.is_empty() {
        let raw = serde_json::to_string(&obj.metadata.custom).unwrap();
        headers.insert("X-Object-Metadata", HeaderValue::from_str(&raw).unwrap());
    }
    (headers, obj.data).into_response()
}

async fn delete_object(State(store): State<Store>, Path(key): Path<String>) -> Response {
    if store.should_fail() {
        return unavailable();
    }
    if store.remove(&key) {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// Answers the QUIC JSON envelopes from a [`Store`] without any network.
pub struct StoreExchange {
    store: Store,
}

impl StoreExchange {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn dispatch(&self, method: &Method, route: &str, key: Option<String>, body: Option<Value>) -> (StatusCode, Value) {
        let store = &self.store;
        match (method.as_str(), route) {
            ("POST", "put") => {
                let body = body.unwrap_or_default();
                let key = body["key"].as_str().unwrap_or_default().to_string();
                let data = BASE64
                    .decode(body["data"].as_str().unwrap_or_default())
                    .unwrap_or_default();
                let metadata: Metadata =
                    serde_json::from_value(body["metadata"].clone()).unwrap_or_default();
                let etag = store.insert(&key, Bytes::from(data), metadata);
                (StatusCode::OK, json!({"success": true, "etag": etag}))
            }
            ("GET", "get") => match key.and_then(|k| store.get(&k)) {
                Some(obj) => (
                    StatusCode::OK,
                    json!({"data": BASE64.encode(&obj.data), "metadata": obj.metadata}),
                ),
                None => (StatusCode::NOT_FOUND, Value::Null),
            },
            ("DELETE", "delete") => match key.map(|k| store.remove(&k)) {
                Some(true) => (StatusCode::OK, Value::Null),
                _ => (StatusCode::NOT_FOUND, Value::Null),
            },
            ("GET", "exists") => {
                let exists = key.map(|k| store.contains(&k)).unwrap_or(false);
                (StatusCode::OK, json!({"exists": exists}))
            }
            ("GET", "metadata") => match key.and_then(|k| store.get(&k)) {
                Some(obj) => (StatusCode::OK, json!(obj.metadata)),
                None => (StatusCode::NOT_FOUND, Value::Null),
            },
            ("POST", "list") => {
                let prefix = body
                    .as_ref()
                    .and_then(|b| b["prefix"].as_str())
                    .unwrap_or_default()
                    .to_string();
                let objects: Vec<Value> = store
                    .list(&prefix)
                    .into_iter()
                    .map(|o| json!({"key": o["key"], "metadata": {"size": o["size"], "etag": o["etag"]}}))
                    .collect();
                (StatusCode::OK, json!({"objects": objects, "truncated": false}))
            }
            ("GET", "health") => (StatusCode::OK, json!({"status": "SERVING"})),
            _ => (StatusCode::NOT_IMPLEMENTED, Value::Null),
        }
    }
}

#[async_trait]
impl Exchange for StoreExchange {
    async fn round_trip(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<ExchangeResponse> {
        if self.store.should_fail() {
            return Ok(ExchangeResponse {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: Bytes::new(),
            });
        }

        let path = path.trim_start_matches("/api/v1/");
        let (route, query) = path.split_once('?').unwrap_or((path, ""));
        let key = query
            .strip_prefix("key=")
            .and_then(|raw| urlencoding::decode(raw).ok())
            .map(|k| k.into_owned());
        let body = body.and_then(|b| serde_json::from_slice::<Value>(&b).ok());

        let (status, reply) = self.dispatch(&method, route, key, body);
        let body = if reply.is_null() {
            Bytes::new()
        } else {
            Bytes::from(serde_json::to_vec(&reply).unwrap())
        };
        Ok(ExchangeResponse { status, body })
    }

    async fn close(&self) {}
}
