//
// lib.rs
//
// Library root. The binary in main.rs only parses arguments and starts the
// server; integration tests link against this crate directly.
//

pub mod backend;
pub mod builtins;
pub mod config;
pub mod cross_file;
pub mod handlers;
pub mod parser_pool;
pub mod position;
pub mod reserved_words;
pub mod scope;
pub mod script;
pub mod state;
pub mod symbols;
pub mod utf16;

// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
