//! Activity logging: JSONL append-only writer fed by a background logger thread.

pub mod activity;
pub mod jsonl;
