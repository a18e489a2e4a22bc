//! Domain entities for LAN chat pairing.
//!
//! This module contains plain data types with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! The **domain** is the innermost layer.  Domain code:
//!
//! - Describes the concepts the whole system talks about (a connection, a
//!   peer, the shared secret).
//! - Has **no** imports from sockets, timers, or the console.
//! - Can be compiled and tested anywhere without external setup.
//!
//! Code in outer layers depends on the domain, never the other way round.

/// Connection and peer identity types.
pub mod peer;

/// The shared "three animal names" secret and how two secrets are compared.
pub mod secret;
