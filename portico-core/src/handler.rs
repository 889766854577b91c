//! The handler contract and chain plumbing.
//!
//! Handlers come in two flavors with one interface: middleware forward the
//! request to `next` after (or instead of) doing their own work, and
//! responders write the response and return without calling `next`. The
//! first error short-circuits the rest of the chain.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::context::RequestCtx;
use crate::error::HandlerError;
use crate::response::ResponseWriter;

#[async_trait]
pub trait MiddlewareHandler: Send + Sync {
    async fn serve(
        &self,
        w: &mut dyn ResponseWriter,
        r: &mut RequestCtx,
        next: Next<'_>,
    ) -> Result<(), HandlerError>;
}

/// The rest of the chain from a handler's point of view: the remaining
/// handlers of the current (sub)chain, then an optional tail chain (a
/// subroute's outer `next`). An exhausted `Next` is the no-op terminator.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stack: &'a [Arc<dyn MiddlewareHandler>],
    tail: Option<&'a Next<'a>>,
}

impl<'a> Next<'a> {
    /// A chain over `stack` terminated by a no-op.
    pub fn new(stack: &'a [Arc<dyn MiddlewareHandler>]) -> Self {
        Self { stack, tail: None }
    }

    /// A chain over `stack` that continues into `tail` when exhausted.
    pub fn with_tail(stack: &'a [Arc<dyn MiddlewareHandler>], tail: &'a Next<'a>) -> Self {
        Self {
            stack,
            tail: Some(tail),
        }
    }

    /// Invoke the next link.
    pub fn serve<'s>(
        self,
        w: &'s mut dyn ResponseWriter,
        r: &'s mut RequestCtx,
    ) -> BoxFuture<'s, Result<(), HandlerError>>
    where
        'a: 's,
    {
        Box::pin(async move {
            if let Some((handler, rest)) = self.stack.split_first() {
                let next = Next {
                    stack: rest,
                    tail: self.tail,
                };
                handler.serve(w, r, next).await
            } else if let Some(tail) = self.tail {
                (*tail).serve(w, r).await
            } else {
                Ok(())
            }
        })
    }
}
