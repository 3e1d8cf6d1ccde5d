//! Gateway tests against real JSON database files.
//!
//! - Every operation on the default table and on named tables
//! - Ten concurrent calls per operation leave the file valid
//! - Calls on one identity never overlap; different identities run in parallel
//! - Timeouts, lock release policy and the open/close lifecycle

mod lifecycle;
mod operations;
