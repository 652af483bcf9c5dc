//! Splice Interception Pipeline
//!
//! Priority-ordered, bidirectional, short-circuiting dispatch of messages
//! between a network peer and the host, plus the rules that install it.
//!
//! # Core Concepts
//!
//! - [`Pipeline`]: Shared `kind → priority → listeners` registry and dispatcher
//! - [`Listener`]: Observes, replaces or cancels one message
//! - [`AcceptorProxy`] / [`HandlerProxy`]: Wrap the host's connection objects
//! - [`InterceptionInstaller`]: Hook rules that hand those objects to the proxies
//!
//! # Example
//!
//! ```rust,ignore
//! use splice_intercept::{Pipeline, Priority};
//!
//! let pipeline = Arc::new(Pipeline::new());
//! pipeline.register("chat", Priority::High, Arc::new(|_, _, msg| Some(msg)));
//! let acceptor = AcceptorProxy::new(host_acceptor, Arc::clone(&pipeline));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod install;
mod pipeline;
mod proxy;
mod types;

// Re-exports
pub use install::{HookCall, HookPoint, InstallConfig, InstallError, InterceptionInstaller};
pub use pipeline::{Dispatch, Listener, ListenerId, Pipeline};
pub use proxy::{Acceptor, AcceptorProxy, Handler, HandlerProxy, ProxyStats};
pub use types::{ConnectionId, Direction, Message, Priority};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
