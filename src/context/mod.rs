//! Per-exchange context handed down the handler chain.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    net::SocketAddr,
};

use crate::http::{CookieLedger, Request, Response};

/// Type-erased extensions map, used by handler units to pass state to the units
/// after them without knowing each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Mutable state for one request/response exchange.
///
/// A session builds a fresh `Context` for every request, passes it by `&mut`
/// through the handler chain, and writes whatever ended up in the response slot.
/// An exchange whose handlers leave the slot empty writes nothing.
pub struct Context {
    request: Request,
    response: Option<Response>,
    remote_addr: SocketAddr,
    cookies: CookieLedger,
    extensions: Extensions,
}

impl Context {
    /// Creates a context for `request`, seeding the cookie ledger from its
    /// `Cookie` headers.
    pub fn new(request: Request, remote_addr: SocketAddr) -> Self {
        let cookies = CookieLedger::from_request_headers(request.headers());
        Self {
            request,
            response: None,
            remote_addr,
            cookies,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Address of the peer on the other end of the connection.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The response staged by the chain so far, if any.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    /// Fills the response slot, returning whatever was there before.
    pub fn set_response(&mut self, response: Response) -> Option<Response> {
        self.response.replace(response)
    }

    /// Empties the response slot.
    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// The exchange's cookie ledger, seeded from the request's `Cookie` headers.
    pub fn cookies(&self) -> &CookieLedger {
        &self.cookies
    }

    pub fn cookies_mut(&mut self) -> &mut CookieLedger {
        &mut self.cookies
    }

    /// Typed per-exchange values shared between handler units.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Decodes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}
