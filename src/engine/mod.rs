//! Engine modules: the pure planning layer.
//!
//! The engine sits between the declared topology (what the target storage
//! should look like) and the executor (which commands run, in what order).

pub mod plan;
