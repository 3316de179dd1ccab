//! Address resolution for logical services
//!
//! The tunnelling core asks an [`AddressResolver`] for the current backend
//! address of a logical service once per accepted connection. This crate
//! provides the contract plus two implementations:
//!
//! - [`SentinelResolver`]: queries Redis Sentinel for the current master
//! - [`StaticResolver`]: an in-memory table, handy for tests and fixed deployments

pub mod codec;
pub mod resolver;
pub mod sentinel;
pub mod static_table;

pub use codec::{CodecError, RespCodec, RespValue};
pub use resolver::{AddressResolver, ResolveError};
pub use sentinel::SentinelResolver;
pub use static_table::StaticResolver;
