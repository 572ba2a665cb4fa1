//! Projection data model.
//!
//! # Responsibility
//! - Define domain entity snapshots consumed by the projection core.
//! - Define row nodes, their lifecycle, and the observable child list.
//!
//! # Invariants
//! - Every entity and row is identified by a stable `EntityId`.
//! - Rows are owned by the projection cache; views only read them.

pub mod entity;
pub mod factory;
pub mod observable;
pub mod row;
