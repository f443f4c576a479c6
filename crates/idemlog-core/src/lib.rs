//! idemlog Core — shared event model and store abstractions.
//!
//! This crate defines the event types, the error taxonomy and the
//! `DedupStore` trait that the storage and pipeline crates build on. It
//! contains no infrastructure code.

pub mod clock;
pub mod error;
pub mod event;
pub mod store;
