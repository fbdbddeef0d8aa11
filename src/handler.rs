//! Route handlers.
//!
//! A handler is any `async fn(Request) -> impl Reply`, or a closure with the
//! same shape. Routes of one router hold handlers of many different concrete
//! types, so each one is erased to an [`Endpoint`] when registered:
//!
//! ```text
//! router.get("/users/:id", get_user)
//!        ↓  Handler::into_endpoint
//! Arc<dyn Endpoint>          shared by every request on the route
//!        ↓  Endpoint::invoke(request)
//! Pin<Box<dyn Future>>       awaited as the last link of the chain
//!        ↓  Reply::into_reply
//! Result<Response, Error>
//! ```
//!
//! The handler owns its [`Request`], so the future it returns is `'static`
//! and borrows nothing from the dispatcher.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Error;
use crate::request::Request;
use crate::response::{Reply, Response};

/// Future produced by an erased handler.
#[doc(hidden)]
pub type EndpointFuture = BoxFuture<'static, Result<Response, Error>>;

/// Object-safe form of a handler.
///
/// `#[doc(hidden)] pub` because it shows up in [`Handler`]'s signature.
#[doc(hidden)]
pub trait Endpoint: Send + Sync + 'static {
    fn invoke(&self, req: Request) -> EndpointFuture;
}

pub(crate) type SharedEndpoint = Arc<dyn Endpoint>;

/// Satisfied by every function usable as a route handler:
///
/// ```text
/// async fn name(req: Request) -> impl Reply
/// ```
///
/// It cannot be implemented outside this crate.
pub trait Handler: sealed::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_endpoint(self) -> Arc<dyn Endpoint>;
}

mod sealed {
    pub trait Sealed {}
}

impl<F, Fut> sealed::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Reply,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Reply,
{
    fn into_endpoint(self) -> Arc<dyn Endpoint> {
        Arc::new(FnEndpoint { f: self, _fut: PhantomData })
    }
}

struct FnEndpoint<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> Endpoint for FnEndpoint<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Reply,
{
    fn invoke(&self, req: Request) -> EndpointFuture {
        let reply = (self.f)(req);
        Box::pin(async move { reply.await.into_reply() })
    }
}
