//
// cross_file/mod.rs
//
// Cross-file awareness: `source` detection, path resolution and resolution
// across the source graph
//

use std::collections::HashMap;

pub mod content_provider;
pub mod path_resolve;
pub mod resolve;
pub mod revalidation;
pub mod source_detect;

pub use content_provider::*;
pub use path_resolve::*;
pub use resolve::*;
pub use revalidation::*;
pub use source_detect::*;

/// Environment snapshot used to expand `source` targets. Captured once at
/// startup and passed explicitly to every resolution call.
pub type Env = HashMap<String, String>;

/// Snapshot of the current process environment.
pub fn capture_env() -> Env {
    std::env::vars().collect()
}
