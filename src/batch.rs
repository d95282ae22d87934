//! LFS Batch API types.
//!
//! The Batch API is used to request upload/download URLs for LFS objects.
//! See: https://github.com/git-lfs/git-lfs/blob/main/docs/api/batch.md

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

use crate::Meta;

/// Media type of every LFS JSON exchange.
pub const MIME_LFS_JSON: &str = "application/vnd.git-lfs+json";

/// Media type of raw object content.
pub const MIME_BINARY: &str = "application/octet-stream";

/// Single-object endpoint, relative to the LFS base URL.
pub const PATH_OBJECTS: &str = "objects";

/// Batch endpoint, relative to the LFS base URL.
pub const PATH_BATCH: &str = "objects/batch";

/// Lock endpoint, relative to the LFS base URL.
pub const PATH_LOCKS: &str = "locks";

/// Default number of objects per batch request.
pub const BATCH_SIZE: usize = 100;

/// What a batch request asks the server to do with its objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Fetch content; wire name `download`.
    Download,
    /// Send content; wire name `upload`.
    Upload,
}

impl Operation {
    /// Wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Download => "download",
            Operation::Upload => "upload",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purpose of a link returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Download,
    Upload,
    Verify,
    #[serde(rename = "self")]
    SelfLink,
}

impl LinkType {
    /// Wire name of the link type.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Download => "download",
            LinkType::Upload => "upload",
            LinkType::Verify => "verify",
            LinkType::SelfLink => "self",
        }
    }

    /// Parse a wire name; unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "download" => Some(LinkType::Download),
            "upload" => Some(LinkType::Upload),
            "verify" => Some(LinkType::Verify),
            "self" => Some(LinkType::SelfLink),
            _ => None,
        }
    }
}

/// An authorized URL plus the headers to send with it.
///
/// Used both for per-object actions and for the credentials of an
/// operation (see [`AuthProvider`](crate::AuthProvider)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Target of the request.
    pub href: Url,
    /// Headers sent verbatim with the request.
    #[serde(default)]
    pub header: BTreeMap<String, String>,
    /// Expiry as an ISO 8601 timestamp, if the server gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl Link {
    /// Create a link without expiry.
    pub fn new(href: Url, header: BTreeMap<String, String>) -> Self {
        Link {
            href,
            header,
            expires_at: None,
        }
    }

    /// Whether two links carry the same URL and headers.
    pub fn same_target(&self, other: &Link) -> bool {
        self.href == other.href && self.header == other.header
    }
}

/// Links of one object, at most one per purpose.
pub type Links = BTreeMap<LinkType, Link>;

/// Reference information for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Full ref name, such as `refs/heads/main`.
    pub name: String,
}

impl Ref {
    pub fn new(name: &str) -> Self {
        Ref {
            name: name.to_string(),
        }
    }
}

/// Body of `POST objects/batch`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    /// Requested operation.
    pub operation: Operation,
    /// Transfer adapter names offered by the client, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfers: Option<Vec<String>>,
    /// Ref the objects belong to, for servers that scope access by branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#ref: Option<Ref>,
    /// Objects to look up, by oid and size.
    pub objects: Vec<Meta>,
}

impl BatchRequest {
    /// Create a batch request for an operation.
    pub fn new(operation: Operation, objects: Vec<Meta>) -> Self {
        BatchRequest {
            operation,
            transfers: None,
            r#ref: None,
            objects,
        }
    }

    /// Batch request for `download`.
    pub fn download(objects: Vec<Meta>) -> Self {
        BatchRequest::new(Operation::Download, objects)
    }

    /// Batch request for `upload`.
    pub fn upload(objects: Vec<Meta>) -> Self {
        BatchRequest::new(Operation::Upload, objects)
    }

    /// Advertise the `basic` transfer adapter.
    pub fn with_basic_transfer(mut self) -> Self {
        self.transfers = Some(vec!["basic".to_string()]);
        self
    }

    /// Scope the request to `reference`.
    pub fn with_ref(mut self, name: &str) -> Self {
        self.r#ref = Some(Ref::new(name));
        self
    }
}

/// Server answer to a batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Adapter the server picked; `basic` when absent.
    #[serde(default = "default_transfer")]
    pub transfer: String,
    /// One item per object the server knows about, in no particular order.
    pub objects: Vec<BatchItem>,
}

fn default_transfer() -> String {
    "basic".to_string()
}

/// Per-object failure reported inside a batch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    /// Status-like code, such as 404 for an unknown object.
    pub code: u16,
    /// Human readable explanation, if any.
    #[serde(default)]
    pub message: Option<String>,
}

/// An object in a batch response: links or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBatchItem")]
pub struct BatchItem {
    /// Object id as sent by the server.
    pub oid: String,
    /// Size in bytes; negative when the server does not report one.
    pub size: i64,
    /// Set by servers that already authorized the links.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticated: Option<bool>,
    /// Links by purpose, merged from `actions` and the older `_links`.
    #[serde(rename = "actions", skip_serializing_if = "BTreeMap::is_empty")]
    pub links: Links,
    /// Set when the server refuses the object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchError>,
}

#[derive(Deserialize)]
struct RawBatchItem {
    oid: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    authenticated: Option<bool>,
    #[serde(default)]
    actions: Option<BTreeMap<String, Link>>,
    #[serde(default, rename = "_links")]
    legacy_links: Option<BTreeMap<String, Link>>,
    #[serde(default)]
    error: Option<BatchError>,
}

impl From<RawBatchItem> for BatchItem {
    fn from(raw: RawBatchItem) -> Self {
        BatchItem {
            oid: raw.oid,
            size: raw.size,
            authenticated: raw.authenticated,
            links: collect_links([raw.actions, raw.legacy_links]),
            error: raw.error,
        }
    }
}

impl BatchItem {
    /// Create an item carrying links.
    pub fn with_links(meta: Meta, links: Links) -> Self {
        BatchItem {
            oid: meta.oid,
            size: meta.size,
            authenticated: None,
            links,
            error: None,
        }
    }

    /// Create an item carrying an error.
    pub fn with_error(meta: Meta, code: u16, message: &str) -> Self {
        BatchItem {
            oid: meta.oid,
            size: meta.size,
            authenticated: None,
            links: Links::new(),
            error: Some(BatchError {
                code,
                message: Some(message.to_string()),
            }),
        }
    }

    /// Object metadata as reported by the server.
    pub fn meta(&self) -> Meta {
        Meta::new(self.oid.clone(), self.size)
    }

    /// Get a link by purpose.
    pub fn link(&self, kind: LinkType) -> Option<&Link> {
        self.links.get(&kind)
    }

    /// Link for fetching the content.
    pub fn download_action(&self) -> Option<&Link> {
        self.link(LinkType::Download)
    }

    /// Link for sending the content; absent when the server has the object.
    pub fn upload_action(&self) -> Option<&Link> {
        self.link(LinkType::Upload)
    }

    /// Link to confirm a finished upload.
    pub fn verify_action(&self) -> Option<&Link> {
        self.link(LinkType::Verify)
    }

    /// Whether the server reported a per-object error.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Legacy single-object response (`GET/POST objects`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawObjectRes")]
pub struct ObjectRes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    pub size: i64,
    #[serde(rename = "_links")]
    pub links: Links,
}

#[derive(Deserialize)]
struct RawObjectRes {
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    size: i64,
    #[serde(default, rename = "_links")]
    links: Option<BTreeMap<String, Link>>,
}

impl From<RawObjectRes> for ObjectRes {
    fn from(raw: RawObjectRes) -> Self {
        ObjectRes {
            oid: raw.oid,
            size: raw.size,
            links: collect_links([raw.links]),
        }
    }
}

impl ObjectRes {
    /// Object metadata, if the server reported an oid.
    pub fn meta(&self) -> Option<Meta> {
        self.oid.as_ref().map(|oid| Meta::new(oid.clone(), self.size))
    }
}

/// Merge link maps, later maps overriding earlier ones; unknown purposes are dropped.
fn collect_links<const N: usize>(maps: [Option<BTreeMap<String, Link>>; N]) -> Links {
    maps.into_iter()
        .flatten()
        .flatten()
        .filter_map(|(name, link)| LinkType::from_name(&name).map(|kind| (kind, link)))
        .collect()
}
