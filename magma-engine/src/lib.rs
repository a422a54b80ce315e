//! Forward-chaining saturation engine over a finite algebraic structure.
//!
//! The engine loads a signature, compiled rule programs and optional core
//! facts into a [`magma_core::Signature`], then drives the structure to a
//! fixed point: newly derived facts become tasks, tasks fire the matching
//! rule fragments in the byte-code [`VirtualMachine`], and equivalence
//! merges run alone inside a strict critical section.

mod agenda;
mod context;
mod engine;
mod error;
mod router;
mod sampler;
mod scheduler;
pub mod snapshot;
mod vm;

pub use agenda::Agenda;
pub use context::Context;
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, Result};
pub use router::Router;
pub use sampler::Sampler;
pub use vm::{VirtualMachine, BLOCK_SIZE};
