//! Saga Domain Types
//!
//! A saga is a multi-step business transaction coordinated without a single
//! atomic commit. These types model its execution state:
//!
//! - **WorkflowInstance**: one saga execution — an ordered step list fixed at
//!   construction, an append-only result list, and a status that moves
//!   monotonically through its lifecycle.
//! - **StepResult**: the uniform outcome of one step — success, failure, or
//!   success-that-requires-approval (an approval gate, not an error).
//! - **ProcessDefinition**: a higher-level composition of typed steps
//!   (sub-workflow, rule check, policy check, custom) executed in order.
//! - **RuleOutcome / PolicyOutcome**: decisions returned by the external
//!   rules and policy gates, as plain data.
//!
//! # Design Principles
//!
//! 1. Step failures are data, never exceptions. A misbehaving collaborator
//!    cannot crash the engine or corrupt sibling instances.
//! 2. The paused state is plain data. Resuming after approval reconstructs
//!    the position purely from the instance — no suspended call stack.
//! 3. Every instance is tenant-scoped and fully serializable; the instance
//!    itself is the projection exposed to callers.

#![deny(unsafe_code)]

mod errors;
mod gate;
mod ids;
mod instance;
mod process;
mod result;

pub use errors::*;
pub use gate::*;
pub use ids::*;
pub use instance::*;
pub use process::*;
pub use result::*;
