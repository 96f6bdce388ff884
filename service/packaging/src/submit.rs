use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain_packaging::exception::{PackagingException, PackagingResult};
use domain_packaging::model::entity::{CheckPolicy, Job, Package, PackagingStrategy};
use domain_packaging::model::vo::{ArrayScriptSpec, ResolvedParams, WrapperScriptSpec};
use domain_packaging::service::{PackageSubmitService, PlatformService, ScriptRenderService};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;

const WRAPPER_BUNDLE: &str = "wrapper_scripts.tar";

/// Drives a package through its submit sequence: check, generate scripts,
/// stage files, submit. Each step runs to completion before the next starts;
/// a failure aborts the rest of the sequence.
pub struct PackageSubmitServiceImpl {
    platform: Arc<dyn PlatformService>,
    renderer: Arc<dyn ScriptRenderService>,
    project: ProjectConfig,
}

/// Local artifacts of one generation pass, file names relative to the tmp
/// directory.
#[derive(Debug, Default)]
struct GeneratedScripts {
    job_scripts: Vec<String>,
    wrapped_scripts: Vec<String>,
    input_files: Vec<String>,
    common_script: Option<String>,
}

#[async_trait]
impl PackageSubmitService for PackageSubmitServiceImpl {
    async fn submit(
        &self,
        package: &mut Package,
        params: &ResolvedParams,
        only_generate: bool,
        hold: bool,
    ) -> PackagingResult<()> {
        self.check_jobs(package.jobs(), params).await?;
        let directives = package.aggregate_directives();

        debug!(package = package.name(), "creating scripts");
        let scripts = self.create_scripts(package, params, &directives).await?;
        if only_generate {
            return Ok(());
        }
        debug!(package = package.name(), "sending files");
        self.send_files(package, &scripts).await?;
        debug!(package = package.name(), "submitting");
        self.do_submission(package, &scripts, hold).await
    }
}

impl PackageSubmitServiceImpl {
    pub fn new(
        platform: Arc<dyn PlatformService>,
        renderer: Arc<dyn ScriptRenderService>,
        project: ProjectConfig,
    ) -> Self {
        Self {
            platform,
            renderer,
            project,
        }
    }

    /// Pre-submission validation of every check-on-submission job. Large
    /// batches are split into contiguous chunks over a bounded worker pool;
    /// any worker failure fails the whole batch.
    async fn check_jobs(&self, jobs: &[Job], params: &ResolvedParams) -> PackagingResult<()> {
        let candidates: Vec<Job> = jobs
            .iter()
            .filter(|j| j.check_policy == CheckPolicy::OnSubmission)
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        let pool = validation_pool_size(jobs.len());
        if candidates.len() <= pool {
            for job in &candidates {
                check_one(self.renderer.as_ref(), job, params).await?;
            }
            return Ok(());
        }

        let params = Arc::new(params.clone());
        let chunk_size = (candidates.len() + pool - 1) / pool;
        let mut workers = JoinSet::new();
        for chunk in candidates.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let renderer = Arc::clone(&self.renderer);
            let params = Arc::clone(&params);
            workers.spawn(async move {
                for job in &chunk {
                    check_one(renderer.as_ref(), job, &params).await?;
                }
                Ok::<(), PackagingException>(())
            });
        }
        while let Some(joined) = workers.join_next().await {
            joined.map_err(anyhow::Error::new)??;
        }
        Ok(())
    }

    async fn create_scripts(
        &self,
        package: &Package,
        params: &ResolvedParams,
        directives: &[String],
    ) -> PackagingResult<GeneratedScripts> {
        tokio::fs::create_dir_all(&self.project.tmp_dir).await.map_err(anyhow::Error::new)?;

        let mut scripts = GeneratedScripts::default();
        let mut contents = Vec::with_capacity(package.jobs().len());
        for job in package.jobs() {
            let content = self.renderer.render_job_script(job, params).await?;
            let file = job.script_file_name();
            self.write_script(&file, &content).await?;
            scripts.job_scripts.push(file);
            contents.push(content);
        }

        match package.strategy() {
            PackagingStrategy::Simple => {}
            PackagingStrategy::SimpleWrapped => {
                for job in package.jobs() {
                    let file = job.wrapped_script_file_name();
                    self.write_script(&file, &wrapped_script(job)).await?;
                    scripts.wrapped_scripts.push(file);
                }
            }
            PackagingStrategy::Array { size_id } => {
                // The common script dereferences the per-index files, so they
                // share its timestamp base name.
                let timestamp = Utc::now().timestamp().to_string();
                for (index, content) in contents.iter().enumerate() {
                    let file = format!("{timestamp}.{index}");
                    self.write_script(&file, content).await?;
                    scripts.input_files.push(file);
                }
                let spec = ArrayScriptSpec {
                    name: timestamp.clone(),
                    size_id: size_id.clone(),
                    wallclock: package.wallclock(),
                    processors: package.processors(),
                    directives: directives.to_vec(),
                };
                let content = self.renderer.render_array_script(&spec)?;
                let file = format!("{timestamp}.cmd");
                self.write_script(&file, &content).await?;
                scripts.common_script = Some(file);
            }
            PackagingStrategy::Wrapped { kind, .. } => {
                let spec = WrapperScriptSpec {
                    kind: *kind,
                    name: package.name().to_owned(),
                    experiment_id: package.experiment_id().to_owned(),
                    queue: package.resolve_queue(self.platform.serial_queue()).to_owned(),
                    project: self.platform.project().to_owned(),
                    wallclock: package.wallclock(),
                    processors: package.processors(),
                    threads: package.threads(),
                    method: package.method().to_owned(),
                    dependency: package.dependency().map(str::to_owned),
                    root_dir: self.platform.root_dir().to_owned(),
                    directives: directives.to_vec(),
                    script_groups: package.script_groups(),
                    resources: package.section_resources(self.platform.processors_per_node()),
                };
                let content = self.renderer.render_wrapper_script(&spec)?;
                let file = format!("{}.cmd", package.name());
                self.write_script(&file, &content).await?;
                scripts.common_script = Some(file);
            }
        }
        Ok(scripts)
    }

    /// Stages everything the submission references: per-job scripts before
    /// input files and common scripts, and every file before any submit call.
    async fn send_files(&self, package: &Package, scripts: &GeneratedScripts) -> PackagingResult<()> {
        match package.strategy() {
            PackagingStrategy::Simple | PackagingStrategy::SimpleWrapped => {
                for file in scripts.job_scripts.iter().chain(&scripts.wrapped_scripts) {
                    self.platform.send_file(&self.local_path(file), true).await?;
                }
            }
            PackagingStrategy::Array { .. } => {
                for file in scripts.job_scripts.iter().chain(&scripts.input_files) {
                    self.platform.send_file(&self.local_path(file), true).await?;
                }
                self.platform.send_file(&self.local_path(self.common(scripts)?), true).await?;
            }
            PackagingStrategy::Wrapped { .. } => {
                debug!("check remote dir");
                self.platform.check_remote_log_dir().await?;
                if self.platform.supports_multiple_remove() {
                    let stale: String = package
                        .jobs()
                        .iter()
                        .map(|j| {
                            format!(" {}/{}", self.platform.remote_log_dir(), j.script_file_name())
                        })
                        .collect();
                    self.platform.remove_multiple_files(&stale).await?;
                }
                let bundle = self.bundle_scripts(&scripts.job_scripts)?;
                self.platform.send_file(&bundle, false).await?;
                self.platform
                    .send_command(&format!(
                        "cd {}; tar -xf {}",
                        self.platform.remote_log_dir(),
                        WRAPPER_BUNDLE
                    ))
                    .await?;
                self.platform.send_file(&self.local_path(self.common(scripts)?), true).await?;
            }
        }
        Ok(())
    }

    async fn do_submission(
        &self,
        package: &mut Package,
        scripts: &GeneratedScripts,
        hold: bool,
    ) -> PackagingResult<()> {
        match package.strategy().clone() {
            PackagingStrategy::Simple | PackagingStrategy::SimpleWrapped => {
                let submit_scripts = if scripts.wrapped_scripts.is_empty() {
                    scripts.job_scripts.clone()
                } else {
                    scripts.wrapped_scripts.clone()
                };
                for (index, script) in submit_scripts.iter().enumerate() {
                    self.clear_markers(&package.jobs()[index]).await?;
                    let id = self.submit_script(package, script, hold).await?;
                    let job = &mut package.jobs_mut()[index];
                    job.mark_submitted(id);
                    info!(job = %job.name, "submitted");
                }
            }
            PackagingStrategy::Array { .. } => {
                for job in package.jobs() {
                    self.clear_markers(job).await?;
                }
                let package_id =
                    self.submit_script(package, self.common(scripts)?, hold).await?;
                for (index, job) in package.jobs_mut().iter_mut().enumerate() {
                    job.mark_submitted(format!("{package_id}[{index}]"));
                    info!(job = %job.name, "submitted");
                }
            }
            PackagingStrategy::Wrapped { .. } => {
                if self.platform.supports_multiple_remove() {
                    for job in package.jobs() {
                        self.clear_local_markers(job).await;
                    }
                    let markers: String = package
                        .jobs()
                        .iter()
                        .map(|j| {
                            let dir = self.platform.remote_log_dir();
                            format!(" {}/{} {}/{}", dir, j.stat_marker(), dir, j.completed_marker())
                        })
                        .collect();
                    self.platform.remove_multiple_files(&markers).await?;
                } else {
                    for job in package.jobs() {
                        self.clear_markers(job).await?;
                    }
                }
                let package_id =
                    self.submit_script(package, self.common(scripts)?, hold).await?;
                for job in package.jobs_mut() {
                    job.mark_submitted(package_id.clone());
                    info!(job = %job.name, "submitted");
                }
            }
        }
        Ok(())
    }

    /// A submission that comes back without an id is a failure, not a no-op;
    /// the caller decides whether to retry or abort.
    async fn submit_script(
        &self,
        package: &Package,
        script: &str,
        hold: bool,
    ) -> PackagingResult<String> {
        self.platform
            .submit_job(script, hold, package.export())
            .await?
            .ok_or_else(|| PackagingException::SubmissionFailed {
                platform: self.platform.name().to_owned(),
                script: script.to_owned(),
            })
    }

    /// Clears stale run markers, local and remote, so a resubmitted job is
    /// never misread as already complete.
    async fn clear_markers(&self, job: &Job) -> PackagingResult<()> {
        self.clear_local_markers(job).await;
        self.platform.remove_stat_file(&job.name).await?;
        self.platform.remove_completed_file(&job.name).await?;
        Ok(())
    }

    /// Missing local markers are the normal case, removal failures are not
    /// worth failing a submission over.
    async fn clear_local_markers(&self, job: &Job) {
        let _ = tokio::fs::remove_file(self.project.tmp_dir.join(job.completed_marker())).await;
        let _ = tokio::fs::remove_file(self.project.tmp_dir.join(job.stat_marker())).await;
    }

    fn bundle_scripts(&self, files: &[String]) -> PackagingResult<PathBuf> {
        let tar_path = self.project.tmp_dir.join(WRAPPER_BUNDLE);
        let tar_file = std::fs::File::create(&tar_path).map_err(anyhow::Error::new)?;
        let mut builder = tar::Builder::new(tar_file);
        for file in files {
            builder
                .append_path_with_name(self.project.tmp_dir.join(file), file)
                .map_err(anyhow::Error::new)?;
        }
        builder.finish().map_err(anyhow::Error::new)?;
        Ok(tar_path)
    }

    async fn write_script(&self, file_name: &str, content: &str) -> PackagingResult<()> {
        let path = self.project.tmp_dir.join(file_name);
        tokio::fs::write(&path, content).await.map_err(anyhow::Error::new)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(anyhow::Error::new)?;
        }
        Ok(())
    }

    fn local_path(&self, file_name: &str) -> PathBuf {
        self.project.tmp_dir.join(file_name)
    }

    fn common<'a>(&self, scripts: &'a GeneratedScripts) -> PackagingResult<&'a str> {
        scripts
            .common_script
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("package has no common script").into())
    }
}

async fn check_one(
    renderer: &dyn ScriptRenderService,
    job: &Job,
    params: &ResolvedParams,
) -> PackagingResult<()> {
    match renderer.check_job_script(job, params).await {
        Ok(()) => {
            debug!(job = %job.name, "script check ok");
            Ok(())
        }
        // Empty variables are advisory, submission carries on.
        Err(PackagingException::UnresolvedVariable { reason, .. }) => {
            if job.check_warnings {
                warn!(job = %job.name, %reason, "on-submission script has empty variables");
            } else {
                debug!(job = %job.name, %reason, "script check failed");
            }
            Ok(())
        }
        Err(err @ PackagingException::MissingTemplate { .. }) => Err(err),
        Err(_) => Err(PackagingException::MissingTemplate {
            job: job.name.clone(),
            template: job.template.clone(),
        }),
    }
}

fn validation_pool_size(job_count: usize) -> usize {
    let cores = std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1);
    cores * band_multiplier(job_count)
}

/// The pool grows step-wise with the batch size.
fn band_multiplier(job_count: usize) -> usize {
    match job_count {
        n if n > 10000 => 5,
        n if n > 7500 => 4,
        n if n > 5000 => 3,
        n if n > 2500 => 2,
        _ => 1,
    }
}


/// Wrapped-simple packages submit this thin shell in place of the plain
/// script.
fn wrapped_script(job: &Job) -> String {
    format!("#!/bin/bash\nsource {}\n", job.script_file_name())
}
