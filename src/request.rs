//! Typed requests run by [`Client::do_request`](crate::Client::do_request).
//!
//! A [`Request`] builds a fresh [`HttpRequest`] for every attempt (redirects
//! and retries re-create it), declares which status codes count as success
//! and decodes a successful response.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read};
use std::marker::PhantomData;
use url::Url;

use crate::batch::{ObjectRes, MIME_BINARY, MIME_LFS_JSON};
use crate::io::{StreamHandler, StreamProvider, StreamValidator};
use crate::lock::{CreateLockReq, CreateLockRes, DeleteLockReq, Lock, LockConflictRes, LocksRes};
use crate::transport::{Body, HttpRequest, HttpResponse, Method};
use crate::{Error, Meta, Result};

const SUCCESS: &[u16] = &[200];

/// One logical HTTP exchange.
pub trait Request {
    type Output;

    /// Build the request for `url`.
    fn create_request(&self, url: &Url) -> Result<HttpRequest>;

    /// Status codes handed to [`process_response`](Request::process_response).
    fn status_codes(&self) -> &[u16] {
        SUCCESS
    }

    fn process_response(&self, response: HttpResponse) -> Result<Self::Output>;
}

fn json_request<T: Serialize + ?Sized>(method: Method, url: &Url, body: &T) -> Result<HttpRequest> {
    Ok(HttpRequest::new(method, url)
        .header("Accept", MIME_LFS_JSON)
        .header("Content-Type", MIME_LFS_JSON)
        .body(Body::Bytes(serde_json::to_vec(body)?)))
}

/// POST a JSON document and decode a JSON response.
pub struct JsonPost<'a, Req: ?Sized, Res> {
    body: &'a Req,
    _response: PhantomData<fn() -> Res>,
}

impl<'a, Req: Serialize + ?Sized, Res: DeserializeOwned> JsonPost<'a, Req, Res> {
    pub fn new(body: &'a Req) -> Self {
        JsonPost {
            body,
            _response: PhantomData,
        }
    }
}

impl<Req: Serialize + ?Sized, Res: DeserializeOwned> Request for JsonPost<'_, Req, Res> {
    type Output = Res;

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        json_request(Method::Post, url, self.body)
    }

    fn process_response(&self, response: HttpResponse) -> Result<Res> {
        response.into_json()
    }
}

/// Look up a single object; `None` if the server does not have it.
pub struct MetaGet;

impl Request for MetaGet {
    type Output = Option<ObjectRes>;

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        Ok(HttpRequest::new(Method::Get, url).header("Accept", MIME_LFS_JSON))
    }

    fn status_codes(&self) -> &[u16] {
        &[200, 404]
    }

    fn process_response(&self, response: HttpResponse) -> Result<Option<ObjectRes>> {
        match response.status {
            200 => Ok(Some(response.into_json()?)),
            _ => Ok(None),
        }
    }
}

/// Request upload links for a single object; `None` if it is already stored.
pub struct MetaPost<'a> {
    meta: &'a Meta,
}

impl<'a> MetaPost<'a> {
    pub fn new(meta: &'a Meta) -> Self {
        MetaPost { meta }
    }
}

impl Request for MetaPost<'_> {
    type Output = Option<ObjectRes>;

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        json_request(Method::Post, url, self.meta)
    }

    fn status_codes(&self) -> &[u16] {
        &[200, 202]
    }

    fn process_response(&self, response: HttpResponse) -> Result<Option<ObjectRes>> {
        match response.status {
            202 => Ok(Some(response.into_json()?)),
            _ => Ok(None),
        }
    }
}

/// PUT object content to an upload link.
pub struct ObjectPut<'a> {
    provider: &'a dyn StreamProvider,
    size: i64,
}

impl<'a> ObjectPut<'a> {
    pub fn new(provider: &'a dyn StreamProvider, size: i64) -> Self {
        ObjectPut { provider, size }
    }
}

impl Request for ObjectPut<'_> {
    type Output = ();

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        Ok(HttpRequest::new(Method::Put, url)
            .header("Content-Type", MIME_BINARY)
            .body(Body::Stream {
                reader: self.provider.stream()?,
                length: u64::try_from(self.size).ok(),
            }))
    }

    fn status_codes(&self) -> &[u16] {
        &[200, 201]
    }

    fn process_response(&self, _response: HttpResponse) -> Result<()> {
        Ok(())
    }
}

/// Confirm an upload through a verify link.
pub struct ObjectVerify<'a> {
    meta: &'a Meta,
}

impl<'a> ObjectVerify<'a> {
    pub fn new(meta: &'a Meta) -> Self {
        ObjectVerify { meta }
    }
}

impl Request for ObjectVerify<'_> {
    type Output = ();

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        json_request(Method::Post, url, self.meta)
    }

    fn process_response(&self, _response: HttpResponse) -> Result<()> {
        Ok(())
    }
}

/// Download content and pass it, validated, to a handler.
pub struct ObjectGet<'a, T> {
    meta: &'a Meta,
    handler: &'a dyn StreamHandler<T>,
}

impl<'a, T> ObjectGet<'a, T> {
    pub fn new(meta: &'a Meta, handler: &'a dyn StreamHandler<T>) -> Self {
        ObjectGet { meta, handler }
    }
}

impl<T> Request for ObjectGet<'_, T> {
    type Output = T;

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        Ok(HttpRequest::new(Method::Get, url).header("Accept", MIME_BINARY))
    }

    fn process_response(&self, response: HttpResponse) -> Result<T> {
        let mut stream = StreamValidator::new(response.body, self.meta.clone());
        let value = self.handler.accept(&mut stream)?;
        // The handler may stop short of the end, where the digest is checked.
        io::copy(&mut stream, &mut io::sink())?;
        Ok(value)
    }
}

/// Download content as a validating reader that owns the response body.
pub struct ObjectOpen<'a> {
    meta: &'a Meta,
}

impl<'a> ObjectOpen<'a> {
    pub fn new(meta: &'a Meta) -> Self {
        ObjectOpen { meta }
    }
}

impl Request for ObjectOpen<'_> {
    type Output = StreamValidator<Box<dyn Read + Send>>;

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        Ok(HttpRequest::new(Method::Get, url).header("Accept", MIME_BINARY))
    }

    fn process_response(&self, response: HttpResponse) -> Result<Self::Output> {
        Ok(StreamValidator::new(response.body, self.meta.clone()))
    }
}

/// Create a lock; a 409 becomes [`Error::LockConflict`].
pub(crate) struct LockCreate {
    body: CreateLockReq,
}

impl LockCreate {
    pub(crate) fn new(body: CreateLockReq) -> Self {
        LockCreate { body }
    }
}

impl Request for LockCreate {
    type Output = Lock;

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        json_request(Method::Post, url, &self.body)
    }

    fn status_codes(&self) -> &[u16] {
        &[201, 409]
    }

    fn process_response(&self, response: HttpResponse) -> Result<Lock> {
        if response.status == 409 {
            let conflict: LockConflictRes = response.into_json()?;
            return Err(Error::LockConflict {
                message: conflict.message,
                lock: Box::new(conflict.lock),
            });
        }
        let created: CreateLockRes = response.into_json()?;
        Ok(created.lock)
    }
}

/// Delete a lock; `None` if the server does not know it.
pub(crate) struct LockDelete {
    body: DeleteLockReq,
}

impl LockDelete {
    pub(crate) fn new(body: DeleteLockReq) -> Self {
        LockDelete { body }
    }
}

impl Request for LockDelete {
    type Output = Option<Lock>;

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        json_request(Method::Post, url, &self.body)
    }

    fn status_codes(&self) -> &[u16] {
        &[200, 404]
    }

    fn process_response(&self, response: HttpResponse) -> Result<Option<Lock>> {
        match response.status {
            200 => {
                let deleted: CreateLockRes = response.into_json()?;
                Ok(Some(deleted.lock))
            }
            _ => Ok(None),
        }
    }
}

/// List one page of locks; filters travel in the query string.
pub(crate) struct LocksList;

impl Request for LocksList {
    type Output = LocksRes;

    fn create_request(&self, url: &Url) -> Result<HttpRequest> {
        Ok(HttpRequest::new(Method::Get, url).header("Accept", MIME_LFS_JSON))
    }

    fn process_response(&self, response: HttpResponse) -> Result<LocksRes> {
        response.into_json()
    }
}
