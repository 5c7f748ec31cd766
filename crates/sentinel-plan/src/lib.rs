//! Stack specification model, static validator, and DAG builder.
//!
//! Everything here is pure and synchronous: no async runtime, no executor
//! invocation. `sentinel-runtime` consumes the `Dag` this crate produces.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dag;
pub mod spec;
pub mod validate;

pub use dag::{Dag, Edge, EdgeKind, Node};
pub use spec::{AgentSpec, StackSpec, StackSpecDto};
pub use validate::Validator;
