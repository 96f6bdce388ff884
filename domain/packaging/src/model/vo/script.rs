use std::collections::BTreeMap;

use serde::Serialize;

use super::wallclock::Wallclock;

/// Dispatch pattern encoded by a wrapper script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperKind {
    /// Jobs are sourced one after another inside the same allocation.
    Vertical,
    /// Jobs are backgrounded concurrently behind a wait barrier.
    Horizontal,
    /// Outer sequential loop, concurrent jobs inside each group.
    VerticalHorizontal,
    /// Concurrent groups, sequential jobs inside each group.
    HorizontalVertical,
}

/// Per-section resource figures embedded into wrapper scripts so the dispatch
/// logic can size its inner steps.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SectionResources {
    pub processors_per_node: u32,
    pub sections: BTreeMap<String, SectionUsage>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct SectionUsage {
    pub processors: u32,
    pub tasks: u32,
}

impl SectionResources {
    /// Records a section the first time it is seen; later jobs of the same
    /// section keep the first job's figures.
    pub fn record(&mut self, section: &str, processors: u32, tasks: u32) {
        self.sections
            .entry(section.to_owned())
            .or_insert(SectionUsage { processors, tasks });
    }
}

/// Everything the renderer needs for an array common script.
#[derive(Clone, Debug, Serialize)]
pub struct ArrayScriptSpec {
    /// Shared timestamp, also the base name of the per-index input files.
    pub name: String,
    /// "[1-N]" for N jobs.
    pub size_id: String,
    pub wallclock: Wallclock,
    pub processors: u32,
    pub directives: Vec<String>,
}

/// Everything the renderer needs for a thread-family common script.
#[derive(Clone, Debug, Serialize)]
pub struct WrapperScriptSpec {
    pub kind: WrapperKind,
    pub name: String,
    pub experiment_id: String,
    pub queue: String,
    pub project: String,
    pub wallclock: Wallclock,
    pub processors: u32,
    pub threads: u32,
    pub method: String,
    pub dependency: Option<String>,
    pub root_dir: String,
    pub directives: Vec<String>,
    /// Per-job script file names; flat kinds carry a single group, hybrid
    /// kinds one inner list per dispatch unit.
    pub script_groups: Vec<Vec<String>>,
    pub resources: SectionResources,
}
