//! Reference business workflows
//!
//! Two complete saga definitions built on the engine's dispatch tables:
//! customer onboarding and invoice generation. Each module exposes its
//! workflow type tag, a bundle of the external services it calls, and a
//! `dispatch_table` constructor ready to register with a `ProcessEngine`.
//!
//! All side effects go through the service traits in [`services`]; the
//! workflow modules contain orchestration only.

#![deny(unsafe_code)]

pub mod invoicing;
pub mod onboarding;
pub mod services;
