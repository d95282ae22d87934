//! In-memory LFS server and credential source for driving the client.

#![allow(dead_code)]

use lfs_batch::batch::Link;
use lfs_batch::transport::{Body, HttpRequest, HttpResponse, Method, Transport};
use lfs_batch::{AuthProvider, Meta, Operation, Result};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use url::Url;

pub const BASE: &str = "https://lfs.test/repo/";

/// Credential source handing out `Token-<generation>`.
pub struct FakeAuth {
    generation: AtomicUsize,
    refreshing: bool,
    pub fetches: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl FakeAuth {
    /// Every invalidation yields a new token.
    pub fn refreshing() -> Arc<Self> {
        Arc::new(FakeAuth::new(true))
    }

    /// Always the same token.
    pub fn constant() -> Arc<Self> {
        Arc::new(FakeAuth::new(false))
    }

    fn new(refreshing: bool) -> Self {
        FakeAuth {
            generation: AtomicUsize::new(1),
            refreshing,
            fetches: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
        }
    }

    fn link(&self, generation: usize) -> Link {
        let mut header = BTreeMap::new();
        header.insert("Authorization".to_string(), format!("Token-{}", generation));
        Link::new(Url::parse(BASE).unwrap(), header)
    }
}

impl AuthProvider for FakeAuth {
    fn get_auth(&self, _operation: Operation) -> Result<Link> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.link(self.generation.load(Ordering::SeqCst)))
    }

    fn invalidate_auth(&self, _operation: Operation, auth: &Link) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        if self.refreshing && *auth == self.link(generation) {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Blocks callers until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn closed() -> Self {
        Gate::default()
    }

    pub fn opened() -> Self {
        Gate {
            open: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }

    pub fn pass(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
    }
}

/// In-memory LFS server implementing the batch, transfer and lock endpoints.
pub struct FakeServer {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    /// Content served instead of the stored one.
    pub served: Mutex<HashMap<String, Vec<u8>>>,
    /// Fixed status for transfers (PUT/GET) of an oid.
    pub transfer_status: Mutex<HashMap<String, u16>>,
    /// Batch item errors by oid.
    pub item_errors: Mutex<HashMap<String, (u16, String)>>,
    /// Oids left out of batch responses.
    pub omitted: Mutex<HashSet<String>>,
    /// Oids returned without links.
    pub linkless: Mutex<HashSet<String>>,
    pub reject_batches: AtomicBool,
    /// Number of upcoming transfers answered with 401.
    pub unauthorized_transfers: AtomicUsize,
    pub batch_gate: Gate,
    pub transfer_delay: Mutex<Option<Duration>>,

    pub batch_sizes: Mutex<Vec<usize>>,
    pub puts: AtomicUsize,
    pub verifies: AtomicUsize,
    pub gets: AtomicUsize,
    active_transfers: AtomicUsize,
    pub max_active_transfers: AtomicUsize,

    pub locks: Mutex<Vec<Value>>,
    next_lock: AtomicUsize,
}

impl Default for FakeServer {
    fn default() -> Self {
        FakeServer {
            objects: Mutex::default(),
            served: Mutex::default(),
            transfer_status: Mutex::default(),
            item_errors: Mutex::default(),
            omitted: Mutex::default(),
            linkless: Mutex::default(),
            reject_batches: AtomicBool::new(false),
            unauthorized_transfers: AtomicUsize::new(0),
            batch_gate: Gate::opened(),
            transfer_delay: Mutex::new(None),
            batch_sizes: Mutex::default(),
            puts: AtomicUsize::new(0),
            verifies: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            active_transfers: AtomicUsize::new(0),
            max_active_transfers: AtomicUsize::new(0),
            locks: Mutex::default(),
            next_lock: AtomicUsize::new(1),
        }
    }
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeServer::default())
    }

    pub fn with_batch_gate(gate: Gate) -> Arc<Self> {
        Arc::new(FakeServer {
            batch_gate: gate,
            ..FakeServer::default()
        })
    }

    pub fn store(&self, content: &[u8]) -> Meta {
        let meta = Meta::from_content(content);
        self.objects.lock().unwrap().insert(meta.oid.clone(), content.to_vec());
        meta
    }

    pub fn batches(&self) -> usize {
        self.batch_sizes.lock().unwrap().len()
    }

    fn batch(&self, request: &HttpRequest, body: Vec<u8>) -> HttpResponse {
        self.batch_gate.pass();
        if self.reject_batches.load(Ordering::SeqCst) || request.get_header("Authorization").is_none() {
            self.batch_sizes.lock().unwrap().push(0);
            return respond(401, Vec::new());
        }
        assert_eq!(request.get_header("Accept"), Some("application/vnd.git-lfs+json"));

        let body: Value = serde_json::from_slice(&body).unwrap();
        let operation = body["operation"].as_str().unwrap().to_string();
        let requested = body["objects"].as_array().unwrap().clone();
        self.batch_sizes.lock().unwrap().push(requested.len());

        let objects = self.objects.lock().unwrap();
        let mut items = Vec::new();
        for object in requested {
            let oid = object["oid"].as_str().unwrap().to_string();
            let size = object["size"].as_i64().unwrap();
            if self.omitted.lock().unwrap().contains(&oid) {
                continue;
            }
            if let Some((code, message)) = self.item_errors.lock().unwrap().get(&oid) {
                items.push(json!({"oid": oid, "size": size, "error": {"code": code, "message": message}}));
                continue;
            }
            if self.linkless.lock().unwrap().contains(&oid) {
                items.push(json!({"oid": oid, "size": size}));
                continue;
            }
            let storage = format!("https://lfs.test/storage/{}", oid);
            let item = match (operation.as_str(), objects.get(&oid)) {
                ("upload", Some(_)) => json!({"oid": oid, "size": size}),
                ("upload", None) => json!({
                    "oid": oid,
                    "size": size,
                    "actions": {
                        "upload": {"href": storage, "header": {"X-Transfer": "upload"}},
                        "verify": {"href": format!("https://lfs.test/verify/{}", oid)}
                    }
                }),
                (_, Some(content)) => json!({
                    "oid": oid,
                    "size": content.len(),
                    "actions": {"download": {"href": storage}}
                }),
                (_, None) => json!({"oid": oid, "size": size, "error": {"code": 404, "message": "Object does not exist"}}),
            };
            items.push(item);
        }
        respond_json(200, json!({"transfer": "basic", "objects": items}))
    }

    fn transfer(&self, request: &HttpRequest, oid: &str, body: Vec<u8>) -> HttpResponse {
        let active = self.active_transfers.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_transfers.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = *self.transfer_delay.lock().unwrap() {
            thread::sleep(delay);
        }
        let response = self.transfer_inner(request, oid, body);
        self.active_transfers.fetch_sub(1, Ordering::SeqCst);
        response
    }

    fn transfer_inner(&self, request: &HttpRequest, oid: &str, body: Vec<u8>) -> HttpResponse {
        if self
            .unauthorized_transfers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return respond(401, Vec::new());
        }
        if let Some(status) = self.transfer_status.lock().unwrap().get(oid) {
            return respond(*status, Vec::new());
        }
        match request.method {
            Method::Put => {
                assert_eq!(request.get_header("X-Transfer"), Some("upload"));
                self.objects.lock().unwrap().insert(oid.to_string(), body);
                respond(200, Vec::new())
            }
            _ => {
                if let Some(content) = self.served.lock().unwrap().get(oid) {
                    return respond(200, content.clone());
                }
                match self.objects.lock().unwrap().get(oid) {
                    Some(content) => respond(200, content.clone()),
                    None => respond(404, Vec::new()),
                }
            }
        }
    }

    fn verify(&self, oid: &str, body: Vec<u8>) -> HttpResponse {
        let meta: Meta = serde_json::from_slice(&body).unwrap();
        assert_eq!(meta.oid, oid);
        match self.objects.lock().unwrap().get(oid) {
            Some(content) if content.len() as i64 == meta.size => respond(200, Vec::new()),
            _ => respond(422, Vec::new()),
        }
    }

    fn locks(&self, request: &HttpRequest, segments: &[&str], body: Vec<u8>) -> HttpResponse {
        let mut locks = self.locks.lock().unwrap();
        match (request.method, segments) {
            (Method::Post, []) => {
                let body: Value = serde_json::from_slice(&body).unwrap();
                if let Some(existing) = locks.iter().find(|lock| lock["path"] == body["path"]) {
                    return respond_json(409, json!({"message": "already created lock", "lock": existing}));
                }
                let id = self.next_lock.fetch_add(1, Ordering::SeqCst);
                let lock = json!({
                    "id": id.to_string(),
                    "path": body["path"],
                    "locked_at": "2016-05-17T15:49:06+00:00",
                    "owner": {"name": if id % 2 == 1 { "me" } else { "other" }}
                });
                locks.push(lock.clone());
                respond_json(201, json!({ "lock": lock }))
            }
            (Method::Post, ["verify"]) => {
                let body: Value = serde_json::from_slice(&body).unwrap();
                let page = page_of(&locks, body["cursor"].as_str());
                let (ours, theirs): (Vec<Value>, Vec<Value>) =
                    page.items.into_iter().partition(|lock| lock["owner"]["name"] == "me");
                respond_json(200, json!({"ours": ours, "theirs": theirs, "next_cursor": page.next}))
            }
            (Method::Post, [id, "unlock"]) => match locks.iter().position(|lock| lock["id"] == *id) {
                Some(index) => {
                    let lock = locks.remove(index);
                    respond_json(200, json!({ "lock": lock }))
                }
                None => respond(404, Vec::new()),
            },
            (Method::Get, []) => {
                let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
                let filtered: Vec<Value> = locks
                    .iter()
                    .filter(|lock| query.get("path").map_or(true, |path| lock["path"] == path.as_str()))
                    .filter(|lock| query.get("id").map_or(true, |id| lock["id"] == id.as_str()))
                    .cloned()
                    .collect();
                let page = page_of(&filtered, query.get("cursor").map(String::as_str));
                respond_json(200, json!({"locks": page.items, "next_cursor": page.next}))
            }
            _ => respond(405, Vec::new()),
        }
    }
}

struct Page {
    items: Vec<Value>,
    next: Option<String>,
}

/// Pages of one lock each; the cursor is the index.
fn page_of(locks: &[Value], cursor: Option<&str>) -> Page {
    let index: usize = cursor.map_or(0, |cursor| cursor.parse().unwrap());
    Page {
        items: locks.get(index).cloned().into_iter().collect(),
        next: (index + 1 < locks.len()).then(|| (index + 1).to_string()),
    }
}

impl Transport for FakeServer {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut request = request;
        let body = match std::mem::replace(&mut request.body, Body::Empty) {
            Body::Empty => Vec::new(),
            Body::Bytes(bytes) => bytes,
            Body::Stream { mut reader, .. } => {
                let mut content = Vec::new();
                reader.read_to_end(&mut content)?;
                content
            }
        };

        let path = request.url.path().to_string();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let response = match segments.as_slice() {
            ["repo", "objects", "batch"] => self.batch(&request, body),
            ["repo", "locks", rest @ ..] => self.locks(&request, rest, body),
            ["storage", oid] => self.transfer(&request, oid, body),
            ["verify", oid] => {
                self.verifies.fetch_add(1, Ordering::SeqCst);
                self.verify(oid, body)
            }
            _ => respond(404, Vec::new()),
        };
        match (request.method, segments.first()) {
            (Method::Put, Some(&"storage")) => {
                self.puts.fetch_add(1, Ordering::SeqCst);
            }
            (Method::Get, Some(&"storage")) => {
                self.gets.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        Ok(response)
    }
}

pub fn respond(status: u16, body: Vec<u8>) -> HttpResponse {
    HttpResponse {
        status,
        reason: "Fake".to_string(),
        headers: Vec::new(),
        body: Box::new(std::io::Cursor::new(body)),
    }
}

pub fn respond_json(status: u16, value: Value) -> HttpResponse {
    respond(status, serde_json::to_vec(&value).unwrap())
}

/// Handler collecting content that was read completely.
pub fn collecting_handler(seen: Arc<Mutex<Vec<Vec<u8>>>>) -> Arc<dyn lfs_batch::StreamHandler<Vec<u8>>> {
    Arc::new(move |stream: &mut dyn Read| -> Result<Vec<u8>> {
        let mut content = Vec::new();
        stream.read_to_end(&mut content)?;
        seen.lock().unwrap().push(content.clone());
        Ok(content)
    })
}
