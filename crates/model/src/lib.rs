//! An abstraction layer for different LLMs.
//!
//! This crate establishes an unified protocol for the execution core to
//! interact with various model providers, so that the core can switch
//! between them without modifying its own codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.
//!
//! Users of this crate may add some extra functionalities or wrappers,
//! depending on their own use cases. Those extra code should be placed
//! in their own crate.

#![deny(missing_docs)]

mod delta;
mod error;
mod provider;
mod request;
mod response;

pub use delta::*;
pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
