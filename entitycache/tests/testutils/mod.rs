//! Test utilities for EntityCache integration tests
//!
//! - ScriptedBackend: in-memory store with gates and scripted failures
//! - CacheFixture: cache + backend + manual clock wired together

#![allow(dead_code)]

pub mod backend;
pub mod fixture;
