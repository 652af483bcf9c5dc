//! Acceptor and handler proxies
//!
//! The installed hooks hand the host's acceptor to [`AcceptorProxy`], which
//! wraps every per-connection handler it produces in a [`HandlerProxy`]. Each
//! message then passes through the pipeline before the original handler sees
//! it (inbound) or before it reaches the peer (outbound).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::pipeline::{Dispatch, Pipeline};
use crate::types::{ConnectionId, Direction, Message};

/// Host logic for one connection
pub trait Handler<M> {
    /// Process a message received from the peer
    fn receive(&mut self, message: M);

    /// Transmit a message to the peer
    fn send(&mut self, message: M);
}

/// Host component that accepts connections
pub trait Acceptor<M> {
    /// Handler type created per connection
    type Handler: Handler<M>;

    /// Create the handler for a new connection
    fn accept(&mut self, connection: ConnectionId) -> Self::Handler;
}

/// Message counters shared by an acceptor proxy and its handlers
#[derive(Debug, Default)]
pub struct ProxyStats {
    forwarded: AtomicU64,
    cancelled: AtomicU64,
}

impl ProxyStats {
    /// Messages delivered after dispatch
    #[inline]
    #[must_use]
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Messages dropped by a listener
    #[inline]
    #[must_use]
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn record<M>(&self, dispatch: &Dispatch<M>) {
        let counter = if dispatch.is_cancelled() {
            &self.cancelled
        } else {
            &self.forwarded
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handler wrapper that routes both directions through the pipeline
#[derive(Debug)]
pub struct HandlerProxy<H, M> {
    inner: H,
    connection: ConnectionId,
    pipeline: Arc<Pipeline<M>>,
    stats: Arc<ProxyStats>,
}

impl<H: Handler<M>, M: Message> HandlerProxy<H, M> {
    /// Wrap `inner` for `connection`
    #[must_use]
    pub fn new(inner: H, connection: ConnectionId, pipeline: Arc<Pipeline<M>>) -> Self {
        Self::with_stats(inner, connection, pipeline, Arc::default())
    }

    fn with_stats(
        inner: H,
        connection: ConnectionId,
        pipeline: Arc<Pipeline<M>>,
        stats: Arc<ProxyStats>,
    ) -> Self {
        Self {
            inner,
            connection,
            pipeline,
            stats,
        }
    }

    /// Connection this handler serves
    #[inline]
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Wrapped handler
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Counters for this handler (shared with its acceptor proxy, if any)
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    fn route(&self, direction: Direction, message: M) -> Option<M> {
        let dispatch = self.pipeline.dispatch(self.connection, direction, message);
        self.stats.record(&dispatch);
        dispatch.into_message()
    }
}

impl<H: Handler<M>, M: Message> Handler<M> for HandlerProxy<H, M> {
    fn receive(&mut self, message: M) {
        if let Some(message) = self.route(Direction::Inbound, message) {
            self.inner.receive(message);
        }
    }

    fn send(&mut self, message: M) {
        if let Some(message) = self.route(Direction::Outbound, message) {
            self.inner.send(message);
        }
    }
}

/// Acceptor wrapper that proxies every handler it creates
#[derive(Debug)]
pub struct AcceptorProxy<A, M> {
    inner: A,
    pipeline: Arc<Pipeline<M>>,
    stats: Arc<ProxyStats>,
}

impl<A: Acceptor<M>, M: Message> AcceptorProxy<A, M> {
    /// Wrap the host's acceptor
    #[must_use]
    pub fn new(inner: A, pipeline: Arc<Pipeline<M>>) -> Self {
        Self {
            inner,
            pipeline,
            stats: Arc::default(),
        }
    }

    /// Counters across all handlers created by this proxy
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    /// Shared pipeline
    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline<M>> {
        &self.pipeline
    }
}

impl<A: Acceptor<M>, M: Message> Acceptor<M> for AcceptorProxy<A, M> {
    type Handler = HandlerProxy<A::Handler, M>;

    fn accept(&mut self, connection: ConnectionId) -> Self::Handler {
        debug!(%connection, "connection accepted through proxy");
        HandlerProxy::with_stats(
            self.inner.accept(connection),
            connection,
            Arc::clone(&self.pipeline),
            Arc::clone(&self.stats),
        )
    }
}
