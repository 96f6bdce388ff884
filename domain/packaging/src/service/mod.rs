use std::path::Path;

use async_trait::async_trait;

use crate::exception::PackagingResult;
use crate::model::entity::{Job, Package};
use crate::model::vo::{ArrayScriptSpec, ResolvedParams, WrapperScriptSpec};

/// Contract over a remote batch system: file staging, remote execution,
/// submission and marker cleanup. Concrete transports live outside this core.
#[async_trait]
pub trait PlatformService: Send + Sync {
    fn name(&self) -> &str;

    /// Serial queue of the platform's serial sibling, used by single-core
    /// packages.
    fn serial_queue(&self) -> &str;

    fn processors_per_node(&self) -> u32;

    fn project(&self) -> &str;

    fn root_dir(&self) -> &str;

    fn remote_log_dir(&self) -> &str;

    /// Whether [`remove_multiple_files`](Self::remove_multiple_files) is
    /// available; platforms without it fall back to per-file removal.
    fn supports_multiple_remove(&self) -> bool;

    async fn send_file(&self, local_path: &Path, check: bool) -> anyhow::Result<()>;

    async fn send_command(&self, command: &str) -> anyhow::Result<()>;

    async fn check_remote_log_dir(&self) -> anyhow::Result<()>;

    async fn remove_stat_file(&self, job_name: &str) -> anyhow::Result<()>;

    async fn remove_completed_file(&self, job_name: &str) -> anyhow::Result<()>;

    /// Removes a space-separated list of remote paths in one round trip.
    async fn remove_multiple_files(&self, paths: &str) -> anyhow::Result<bool>;

    /// Submits a staged script; `None` means the platform did not hand back
    /// an id.
    async fn submit_job(
        &self,
        script_name: &str,
        hold: bool,
        export: &str,
    ) -> anyhow::Result<Option<String>>;
}

/// Pure script generation: per-job scripts from templates, plus the common
/// scripts that array and thread-family packages submit in their place.
#[async_trait]
pub trait ScriptRenderService: Send + Sync {
    /// Renders the job's template with the resolved parameters. Fails when
    /// the template file is missing while the project type requires one, or
    /// when a placeholder has no resolved value.
    async fn render_job_script(&self, job: &Job, params: &ResolvedParams)
        -> PackagingResult<String>;

    /// Common script of a job-array package; the array index selects which
    /// per-index input file to source.
    fn render_array_script(&self, spec: &ArrayScriptSpec) -> PackagingResult<String>;

    /// Common script of a thread-family package, dispatching to the per-job
    /// scripts according to the wrapper kind.
    fn render_wrapper_script(&self, spec: &WrapperScriptSpec) -> PackagingResult<String>;

    /// Strict pre-submission check: unlike
    /// [`render_job_script`](Self::render_job_script), which leaves unresolved
    /// placeholders empty, this fails on any placeholder without a value so
    /// the caller can warn before anything reaches the platform.
    async fn check_job_script(&self, job: &Job, params: &ResolvedParams) -> PackagingResult<()>;
}

/// Drives one package through script generation, staging and submission,
/// strictly in that order.
#[async_trait]
pub trait PackageSubmitService: Send + Sync {
    /// On success every job in the package carries a platform id and is
    /// marked submitted. With `only_generate` the sequence stops after
    /// script generation and the platform is never touched.
    async fn submit(
        &self,
        package: &mut Package,
        params: &ResolvedParams,
        only_generate: bool,
        hold: bool,
    ) -> PackagingResult<()>;
}
