//! Wire types for the sandbox allocation API and the remote debugging
//! protocols consumed by the viewer.
//!
//! This crate contains the serde-serializable types used on the wire:
//! the allocation service's request/response shapes, the screencast
//! stream messages, and the remote input-dispatch event shapes.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * 1:1 with protocol: Match the remote services' JSON shapes exactly
//! * Stable: Changes only when the wire protocol changes
//!
//! The lifecycle controller and frame renderer built on top of these
//! types live in `visor`.

pub mod allocation;
pub mod input;
pub mod screencast;

pub use allocation::*;
pub use input::*;
pub use screencast::*;
