//! Route modules organized by concern.

pub mod events;
pub mod health;
pub mod publish;
pub mod stats;
