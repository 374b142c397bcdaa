//
// test_utils/mod.rs
//
// Shared helpers for unit and integration tests
//

pub mod fixture_workspace;
