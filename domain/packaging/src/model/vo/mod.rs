pub mod script;
pub mod wallclock;

#[rustfmt::skip]
pub use {
    script::{ArrayScriptSpec, SectionResources, WrapperKind, WrapperScriptSpec},
    wallclock::Wallclock,
};

use std::collections::HashMap;

/// Placeholder values resolved by the caller for one submit cycle, keyed by
/// template variable name.
pub type ResolvedParams = HashMap<String, String>;
