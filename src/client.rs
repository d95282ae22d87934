//! LFS HTTP client for upload/download operations.

use std::io::Read;
use std::sync::Arc;
use url::Url;

use crate::auth::{self, join, AuthProvider};
use crate::batch::{
    BatchRequest, BatchResponse, Link, LinkType, Links, ObjectRes, Operation, Ref, PATH_BATCH, PATH_LOCKS, PATH_OBJECTS,
};
use crate::io::{StreamHandler, StreamProvider, StreamValidator};
use crate::lock::{CreateLockReq, DeleteLockReq, Lock, VerifyLocksReq, VerifyLocksRes, VerifyLocksResult};
use crate::meta::UNKNOWN_SIZE;
use crate::request::{
    JsonPost, LockCreate, LockDelete, LocksList, MetaGet, MetaPost, ObjectGet, ObjectOpen, ObjectPut, ObjectVerify,
    Request,
};
use crate::transport::{Transport, UreqTransport};
use crate::{Error, Meta, Result};

/// Credential refreshes per [`Client::do_work`] call.
pub const MAX_AUTH_COUNT: u32 = 1;

/// Extra attempts after a transient (5xx) response.
pub const MAX_RETRY_COUNT: u32 = 2;

/// Redirects followed per request.
pub const MAX_REDIRECT_COUNT: u32 = 5;

/// LFS client for communicating with an LFS server.
///
/// This type is cheaply cloneable - multiple clones share the same auth
/// provider and transport.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    auth_provider: Arc<dyn AuthProvider>,
    http: Arc<dyn Transport>,
}

impl Client {
    /// Create a client talking HTTP through `ureq`.
    pub fn new(auth_provider: Arc<dyn AuthProvider>) -> Self {
        Client::with_transport(auth_provider, Arc::new(UreqTransport::new()))
    }

    /// Create a client with a custom transport.
    pub fn with_transport(auth_provider: Arc<dyn AuthProvider>, http: Arc<dyn Transport>) -> Self {
        Client {
            inner: Arc::new(ClientInner { auth_provider, http }),
        }
    }

    /// Create a client for a Git remote URL (see [`auth::create`]).
    pub fn from_git_url(git_url: &str) -> Result<Self> {
        Ok(Client::new(auth::create(git_url)?))
    }

    pub fn auth_provider(&self) -> &Arc<dyn AuthProvider> {
        &self.inner.auth_provider
    }

    /// Execute a request, following redirects and retrying transient failures.
    ///
    /// Headers of `link` are sent with every attempt. A 401 fails with
    /// [`Error::Unauthorized`] and a 403 with [`Error::Forbidden`].
    pub fn do_request<Q: Request + ?Sized>(&self, link: Option<&Link>, request: &Q, url: &Url) -> Result<Q::Output> {
        let mut url = url.clone();
        let mut redirects = 0;
        let mut retries = 0;
        loop {
            let mut http_request = request.create_request(&url)?;
            if let Some(link) = link {
                http_request.add_link_headers(&link.header);
            }
            let response = self.inner.http.execute(http_request)?;
            let status = response.status;
            if request.status_codes().contains(&status) {
                return request.process_response(response);
            }
            match status {
                401 => return Err(Error::Unauthorized { url: url.to_string() }),
                403 => return Err(Error::Forbidden { url: url.to_string() }),
                301 | 302 | 303 | 307 => {
                    let Some(location) = response.header("Location") else {
                        return Err(request_failed(status, &response.reason, &url));
                    };
                    redirects += 1;
                    if redirects > MAX_REDIRECT_COUNT {
                        return Err(Error::TooManyRedirects { url: url.to_string() });
                    }
                    let target = url.join(location)?;
                    tracing::debug!(status, from = %url, to = %target, "following redirect");
                    url = target;
                }
                500 | 502 | 503 | 504 if retries < MAX_RETRY_COUNT => {
                    retries += 1;
                    tracing::debug!(status, %url, attempt = retries, "retrying after server error");
                }
                _ => return Err(request_failed(status, &response.reason, &url)),
            }
        }
    }

    /// Run `work` with the credentials for `operation`.
    ///
    /// On 401/403 the credentials are invalidated and, if the provider hands
    /// out a different link, the work runs once more.
    pub fn do_work<T>(&self, operation: Operation, mut work: impl FnMut(&Link) -> Result<T>) -> Result<T> {
        let provider = &self.inner.auth_provider;
        let mut auth = provider.get_auth(operation)?;
        let mut auth_count = 0;
        loop {
            match work(&auth) {
                Err(e) if (e.is_unauthorized() || e.is_forbidden()) && auth_count < MAX_AUTH_COUNT => {
                    tracing::debug!(%operation, error = %e, "refreshing credentials");
                    provider.invalidate_auth(operation, &auth);
                    let refreshed = provider.get_auth(operation)?;
                    if refreshed.same_target(&auth) {
                        return Err(e);
                    }
                    auth = refreshed;
                    auth_count += 1;
                }
                result => return result,
            }
        }
    }

    /// Look up a single object; `None` if the server does not have it.
    pub fn get_meta(&self, hash: &str) -> Result<Option<ObjectRes>> {
        self.do_work(Operation::Download, |auth| {
            let url = object_url(auth, hash)?;
            self.do_request(Some(auth), &MetaGet, &url)
        })
    }

    /// Request upload links for an object; `None` if it is already stored.
    pub fn post_meta(&self, meta: &Meta) -> Result<Option<ObjectRes>> {
        self.do_work(Operation::Upload, |auth| {
            self.do_request(Some(auth), &MetaPost::new(meta), &join(&auth.href, PATH_OBJECTS)?)
        })
    }

    /// Send a batch lookup.
    pub fn post_batch(&self, request: &BatchRequest) -> Result<BatchResponse> {
        self.do_work(request.operation, |auth| {
            self.do_request(
                Some(auth),
                &JsonPost::<_, BatchResponse>::new(request),
                &join(&auth.href, PATH_BATCH)?,
            )
        })
    }

    /// Upload an object unless the server already has it.
    ///
    /// Returns `false` if nothing was uploaded.
    pub fn put_object(&self, provider: &dyn StreamProvider, meta: &Meta) -> Result<bool> {
        match self.post_meta(meta)? {
            Some(res) => self.put_object_with_links(provider, meta, &res.links),
            None => Ok(false),
        }
    }

    /// Upload an object through links from a lookup.
    ///
    /// Returns `false` if there is no upload link (object already stored).
    pub fn put_object_with_links(&self, provider: &dyn StreamProvider, meta: &Meta, links: &Links) -> Result<bool> {
        let Some(upload) = links.get(&LinkType::Upload) else {
            return Ok(false);
        };
        self.do_request(Some(upload), &ObjectPut::new(provider, meta.size), &upload.href)?;
        if let Some(verify) = links.get(&LinkType::Verify) {
            self.do_request(Some(verify), &ObjectVerify::new(meta), &verify.href)?;
        }
        Ok(true)
    }

    /// Download an object by hash.
    pub fn get_object<T>(&self, hash: &str, handler: &dyn StreamHandler<T>) -> Result<T> {
        let res = self
            .get_meta(hash)?
            .ok_or_else(|| Error::NotFound(hash.to_string()))?;
        let meta = Meta::new(hash, res.meta().map_or(UNKNOWN_SIZE, |meta| meta.size));
        self.get_object_with_links(&meta, &res.links, handler)
    }

    /// Download an object through links from a lookup.
    pub fn get_object_with_links<T>(&self, meta: &Meta, links: &Links, handler: &dyn StreamHandler<T>) -> Result<T> {
        let link = download_link(meta, links)?;
        self.do_request(Some(link), &ObjectGet::new(meta, handler), &link.href)
    }

    /// Open an object by hash as a validating reader.
    pub fn open_object(&self, hash: &str) -> Result<StreamValidator<Box<dyn Read + Send>>> {
        let res = self
            .get_meta(hash)?
            .ok_or_else(|| Error::NotFound(hash.to_string()))?;
        let meta = Meta::new(hash, res.meta().map_or(UNKNOWN_SIZE, |meta| meta.size));
        self.open_object_with_links(&meta, &res.links)
    }

    /// Open an object through links from a lookup.
    ///
    /// The reader owns the response body; validation errors surface from
    /// `read` at the latest when the end of the content is reached.
    pub fn open_object_with_links(&self, meta: &Meta, links: &Links) -> Result<StreamValidator<Box<dyn Read + Send>>> {
        let link = download_link(meta, links)?;
        self.do_request(Some(link), &ObjectOpen::new(meta), &link.href)
    }

    /// Compute the metadata of a content source.
    pub fn generate_meta(&self, provider: &dyn StreamProvider) -> Result<Meta> {
        Ok(Meta::from_reader(provider.stream()?)?)
    }

    /// Create a lock on a path.
    ///
    /// Fails with [`Error::LockConflict`] if the path is already locked.
    pub fn lock(&self, path: &str, r#ref: Option<&Ref>) -> Result<Lock> {
        self.do_work(Operation::Upload, |auth| {
            let request = LockCreate::new(CreateLockReq {
                path: path.to_string(),
                r#ref: r#ref.cloned(),
            });
            self.do_request(Some(auth), &request, &join(&auth.href, PATH_LOCKS)?)
        })
    }

    /// Delete a lock; `None` if no such lock exists.
    pub fn unlock(&self, id: &str, force: bool, r#ref: Option<&Ref>) -> Result<Option<Lock>> {
        self.do_work(Operation::Upload, |auth| {
            let mut url = join(&auth.href, PATH_LOCKS)?;
            url.path_segments_mut()
                .map_err(|_| Error::InvalidUrl(auth.href.to_string()))?
                .push(id)
                .push("unlock");
            let request = LockDelete::new(DeleteLockReq {
                force,
                r#ref: r#ref.cloned(),
            });
            self.do_request(Some(auth), &request, &url)
        })
    }

    /// List locks, optionally filtered by path and/or id.
    pub fn list_locks(&self, path: Option<&str>, id: Option<&str>, r#ref: Option<&Ref>) -> Result<Vec<Lock>> {
        self.do_work(Operation::Download, |auth| {
            let mut locks = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let mut url = join(&auth.href, PATH_LOCKS)?;
                {
                    let mut query = url.query_pairs_mut();
                    if let Some(path) = path {
                        query.append_pair("path", path);
                    }
                    if let Some(id) = id {
                        query.append_pair("id", id);
                    }
                    if let Some(r#ref) = r#ref {
                        query.append_pair("refspec", &r#ref.name);
                    }
                    if let Some(cursor) = &cursor {
                        query.append_pair("cursor", cursor);
                    }
                }
                let page = self.do_request(Some(auth), &LocksList, &url)?;
                locks.extend(page.locks);
                match page.next_cursor.filter(|next| !next.is_empty()) {
                    Some(next) => cursor = Some(next),
                    None => return Ok(locks),
                }
            }
        })
    }

    /// List locks relevant to a push, split into ours and theirs.
    pub fn verify_locks(&self, r#ref: Option<&Ref>) -> Result<VerifyLocksResult> {
        self.do_work(Operation::Upload, |auth| {
            let url = join(&auth.href, &format!("{}/verify", PATH_LOCKS))?;
            let mut result = VerifyLocksResult::default();
            let mut cursor: Option<String> = None;
            loop {
                let body = VerifyLocksReq {
                    cursor: cursor.take(),
                    r#ref: r#ref.cloned(),
                    limit: None,
                };
                let page: VerifyLocksRes = self.do_request(Some(auth), &JsonPost::new(&body), &url)?;
                result.ours.extend(page.ours);
                result.theirs.extend(page.theirs);
                match page.next_cursor.filter(|next| !next.is_empty()) {
                    Some(next) => cursor = Some(next),
                    None => return Ok(result),
                }
            }
        })
    }
}

fn object_url(auth: &Link, hash: &str) -> Result<Url> {
    let mut url = join(&auth.href, PATH_OBJECTS)?;
    url.path_segments_mut()
        .map_err(|_| Error::InvalidUrl(auth.href.to_string()))?
        .pop_if_empty()
        .push(hash);
    Ok(url)
}

fn download_link<'a>(meta: &Meta, links: &'a Links) -> Result<&'a Link> {
    links
        .get(&LinkType::Download)
        .ok_or_else(|| Error::NotFound(meta.oid.clone()))
}

fn request_failed(status: u16, reason: &str, url: &Url) -> Error {
    Error::RequestFailed {
        status,
        reason: reason.to_string(),
        url: url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BasicAuthProvider;
    use crate::transport::{HttpRequest, HttpResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport answering with canned (status, headers, body) tuples.
    struct Canned {
        responses: Mutex<VecDeque<(u16, Vec<(String, String)>, &'static str)>>,
        seen: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(responses: Vec<(u16, Vec<(String, String)>, &'static str)>) -> Arc<Self> {
            Arc::new(Canned {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Canned {
        fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().unwrap().push(request.url.to_string());
            let (status, headers, body) = self.responses.lock().unwrap().pop_front().expect("unexpected request");
            Ok(HttpResponse {
                status,
                reason: "Reason".into(),
                headers,
                body: Box::new(body.as_bytes()),
            })
        }
    }

    fn client(transport: Arc<Canned>) -> Client {
        let href = Url::parse("https://example.com/repo.git/info/lfs/").unwrap();
        Client::with_transport(Arc::new(BasicAuthProvider::new(&href, Some("u"), Some("p")).unwrap()), transport)
    }

    fn location(target: &str) -> Vec<(String, String)> {
        vec![("Location".to_string(), target.to_string())]
    }

    #[test]
    fn test_redirect_then_success() {
        let transport = Canned::new(vec![
            (302, location("/moved"), ""),
            (200, vec![], r#"{"oid":"abc","size":3}"#),
        ]);
        let client = client(Arc::clone(&transport));
        let res = client.get_meta("abc").unwrap().unwrap();
        assert_eq!(res.size, 3);
        assert_eq!(
            *transport.seen.lock().unwrap(),
            vec!["https://example.com/repo.git/info/lfs/objects/abc", "https://example.com/moved"]
        );
    }

    #[test]
    fn test_too_many_redirects() {
        let responses = (0..6).map(|n| (301, location(&format!("/r{}", n)), "")).collect();
        let client = client(Canned::new(responses));
        assert!(matches!(client.get_meta("abc"), Err(Error::TooManyRedirects { .. })));
    }

    #[test]
    fn test_redirect_without_location() {
        let client = client(Canned::new(vec![(302, vec![], "")]));
        assert!(matches!(
            client.get_meta("abc"),
            Err(Error::RequestFailed { status: 302, .. })
        ));
    }

    #[test]
    fn test_transient_retry() {
        let transport = Canned::new(vec![(503, vec![], ""), (502, vec![], ""), (404, vec![], "")]);
        let client = client(Arc::clone(&transport));
        assert!(client.get_meta("abc").unwrap().is_none());
        assert_eq!(transport.seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_transient_retry_exhausted() {
        let client = client(Canned::new(vec![(500, vec![], ""), (500, vec![], ""), (500, vec![], "")]));
        assert!(matches!(
            client.get_meta("abc"),
            Err(Error::RequestFailed { status: 500, .. })
        ));
    }

    #[test]
    fn test_other_status() {
        let client = client(Canned::new(vec![(418, vec![], "")]));
        assert!(matches!(
            client.get_meta("abc"),
            Err(Error::RequestFailed { status: 418, .. })
        ));
    }

    #[test]
    fn test_unauthorized_with_constant_credentials() {
        // Basic auth hands out the same link again: no second attempt
        let transport = Canned::new(vec![(401, vec![], "")]);
        let client = client(Arc::clone(&transport));
        assert!(client.get_meta("abc").unwrap_err().is_unauthorized());
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_put_object_already_stored() {
        let transport = Canned::new(vec![(200, vec![], "")]);
        let client = client(Arc::clone(&transport));
        let content = b"hello".to_vec();
        let meta = client.generate_meta(&content).unwrap();
        assert!(!client.put_object(&content, &meta).unwrap());
    }

    #[test]
    fn test_get_object_missing() {
        let client = client(Canned::new(vec![(404, vec![], "")]));
        let handler = |_: &mut dyn Read| -> Result<()> { Ok(()) };
        assert!(client.get_object("abc", &handler).unwrap_err().is_not_found());
    }
}
