//! Saga Execution Engine
//!
//! The engine executes ordered, multi-step business transactions against
//! independent external services, with compensating rollback on failure,
//! mid-flight human-approval gates, and per-id serialization of concurrent
//! operations.
//!
//! It:
//! 1. Registers dispatch tables (per workflow type) and process definitions
//! 2. Starts workflow instances behind rules and policy gates
//! 3. Drives steps strictly sequentially, converting handler errors to data
//! 4. Compensates completed steps in reverse order on failure (best effort)
//! 5. Pauses at approval gates and resumes from externally-persisted state
//!
//! **CRITICAL**: the engine never implements business rules, storage, or
//! networking itself. It defines the contracts those collaborators satisfy
//! (`RulesGate`, `PolicyGate`, `StepHandler`) and the protocol by which it
//! calls them.

#![deny(unsafe_code)]

mod dispatch;
mod engine;
mod executor;
mod gate;

pub use dispatch::{DispatchTable, DispatchTableBuilder, StepContext, StepHandler};
pub use engine::{ProcessEngine, StartOptions, WorkflowFilter};
pub use executor::SagaExecutor;
pub use gate::{PolicyGate, RulesGate, Unrestricted};
