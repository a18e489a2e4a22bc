//! Application layer use cases for the chat peer.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules, here the `lanchat-core` crate) and the
//! infrastructure (OS/network/storage).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** core objects to fulfil a user goal (e.g., "keep exactly
//!   one authenticated chat session open").
//! - **Depend on abstractions** (the [`connection_handler::PeerSocket`]
//!   trait) rather than concrete TCP streams, so the whole admission logic
//!   runs in unit tests with fake sockets.
//! - **Contain no OS calls, no network I/O, no file system access**.
//!
//! # Sub-modules
//!
//! - **`connection_handler`** – Wraps one socket: frames incoming bytes,
//!   routes handshake lines to the `AuthManager`, and holds back chat
//!   messages until the connection is authenticated.
//!
//! - **`coordinator`** – The `ActiveConnectionCoordinator`.  Enforces the
//!   single-active-connection rule and turns socket and handshake events into
//!   [`coordinator::CoordinatorEvent`]s.
//!
//! - **`discovery_coordinator`** – Turns discovery announcements into
//!   connection attempts, ignoring our own broadcasts and rate-limiting
//!   retries per peer.
//!
//! - **`incoming_coordinator`** – Hands accepted sockets to the coordinator.

pub mod connection_handler;
pub mod coordinator;
pub mod discovery_coordinator;
pub mod incoming_coordinator;

#[cfg(test)]
pub(crate) mod test_support;
