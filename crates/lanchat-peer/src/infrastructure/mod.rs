//! Infrastructure layer for the chat peer.
//!
//! Contains OS-facing adapters: TCP and UDP sockets, the Tokio timer, the
//! console, configuration storage, and the node event loop that ties them
//! to the application layer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `lanchat_core`, but MUST NOT be imported by the `application` layer.

pub mod console;
pub mod network;
pub mod node;
pub mod storage;
pub mod timer;
