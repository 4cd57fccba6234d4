//! Existence hints recorded from observed writes and deletes.

pub mod cache;
