use chrono::Utc;
use rand::Rng;

use crate::exception::{PackagingException, PackagingResult};
use crate::model::entity::job::Job;
use crate::model::vo::{SectionResources, Wallclock, WrapperKind};

const WRAPPER_PREFIX: &str = "WRAP";

/// A submission unit aggregating one or more jobs under one packaging
/// strategy, destined for a single platform.
///
/// Packages live for one submit cycle: built from a batch of ready jobs,
/// driven through script generation, staging and submission, then dropped.
#[derive(Clone, Debug)]
pub struct Package {
    name: String,
    strategy: PackagingStrategy,
    jobs: Vec<Job>,
    experiment_id: String,
    platform_name: String,
    queue: String,
    export: String,
    processors: u32,
    threads: u32,
    wallclock: Wallclock,
    dependency: Option<String>,
    method: String,
}

/// Packaging strategy tag; each variant carries only the fields its dispatch
/// actually needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PackagingStrategy {
    /// One submission call per job.
    Simple,
    /// Simple, but an extra wrapped script variant is generated, staged and
    /// submitted in place of the plain one.
    SimpleWrapped,
    /// One platform job-array with per-index dispatch.
    Array { size_id: String },
    /// One common script fanning out to the per-job scripts.
    Wrapped {
        kind: WrapperKind,
        /// Sizes of the inner dispatch units; flat kinds carry one group.
        group_sizes: Vec<usize>,
    },
}

/// Package-level overrides for thread-family packages, resolved from the
/// wrapper configuration by the caller.
#[derive(Clone, Debug, Default)]
pub struct WrapperOptions {
    pub queue: Option<String>,
    pub export: Option<String>,
    pub dependency: Option<String>,
    pub method: Option<String>,
}

impl Package {
    pub fn simple(jobs: Vec<Job>) -> PackagingResult<Self> {
        Self::plain(jobs, PackagingStrategy::Simple)
    }

    pub fn simple_wrapped(jobs: Vec<Job>) -> PackagingResult<Self> {
        Self::plain(jobs, PackagingStrategy::SimpleWrapped)
    }

    fn plain(jobs: Vec<Job>, strategy: PackagingStrategy) -> PackagingResult<Self> {
        let (experiment_id, platform_name) = validate(&jobs)?;
        let export = jobs[0].export.clone();
        let queue = jobs[0].queue.clone();
        Ok(Self {
            name: experiment_id.clone(),
            strategy,
            experiment_id,
            platform_name,
            queue,
            export,
            processors: jobs.iter().map(|j| j.processors).max().unwrap_or(1),
            threads: jobs[0].threads,
            wallclock: jobs.iter().map(|j| j.wallclock).max().unwrap_or_default(),
            dependency: None,
            method: String::new(),
            jobs,
        })
    }

    /// N jobs submitted as one platform job-array; wallclock and processors
    /// are the ceiling over all member jobs.
    pub fn array(jobs: Vec<Job>) -> PackagingResult<Self> {
        let (experiment_id, platform_name) = validate(&jobs)?;
        let size_id = format!("[1-{}]", jobs.len());
        let export = jobs[0].export.clone();
        let queue = jobs[0].queue.clone();
        Ok(Self {
            name: experiment_id.clone(),
            strategy: PackagingStrategy::Array { size_id },
            experiment_id,
            platform_name,
            queue,
            export,
            processors: jobs.iter().map(|j| j.processors).max().unwrap_or(1),
            threads: jobs[0].threads,
            wallclock: jobs.iter().map(|j| j.wallclock).max().unwrap_or_default(),
            dependency: None,
            method: String::new(),
            jobs,
        })
    }

    /// Sequential execution inside one allocation: wallclocks are summed,
    /// processors and threads track the largest single job's request.
    pub fn vertical(jobs: Vec<Job>, options: WrapperOptions) -> PackagingResult<Self> {
        let (experiment_id, platform_name) = validate(&jobs)?;
        // First job wins processor ties, its thread count rides along.
        let widest = jobs
            .iter()
            .reduce(|best, job| if job.processors > best.processors { job } else { best })
            .ok_or(PackagingException::EmptyPackage)?;
        let processors = widest.processors;
        let threads = widest.threads;
        let wallclock = jobs.iter().map(|j| j.wallclock).sum();
        let group_sizes = vec![jobs.len()];
        Ok(Self::wrapped(
            jobs,
            experiment_id,
            platform_name,
            WrapperKind::Vertical,
            group_sizes,
            processors,
            threads,
            wallclock,
            options,
        ))
    }

    /// Concurrent execution inside one allocation: processors are summed,
    /// wallclock tracks the longest single job.
    pub fn horizontal(jobs: Vec<Job>, options: WrapperOptions) -> PackagingResult<Self> {
        let (experiment_id, platform_name) = validate(&jobs)?;
        let processors = jobs.iter().map(|j| j.processors).sum();
        let threads = jobs.last().map(|j| j.threads).unwrap_or(1);
        let wallclock = jobs.iter().map(|j| j.wallclock).max().unwrap_or_default();
        let group_sizes = vec![jobs.len()];
        Ok(Self::wrapped(
            jobs,
            experiment_id,
            platform_name,
            WrapperKind::Horizontal,
            group_sizes,
            processors,
            threads,
            wallclock,
            options,
        ))
    }

    /// Two-level grouping; total processors and wallclock come from the
    /// caller rather than being derived from the member jobs.
    pub fn hybrid(
        kind: WrapperKind,
        job_lists: Vec<Vec<Job>>,
        processors: u32,
        total_wallclock: Wallclock,
        options: WrapperOptions,
    ) -> PackagingResult<Self> {
        let group_sizes: Vec<usize> = job_lists.iter().map(|g| g.len()).collect();
        let jobs: Vec<Job> = job_lists.into_iter().flatten().collect();
        let (experiment_id, platform_name) = validate(&jobs)?;
        let threads = jobs[0].threads;
        Ok(Self::wrapped(
            jobs,
            experiment_id,
            platform_name,
            kind,
            group_sizes,
            processors,
            threads,
            total_wallclock,
            options,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn wrapped(
        jobs: Vec<Job>,
        experiment_id: String,
        platform_name: String,
        kind: WrapperKind,
        group_sizes: Vec<usize>,
        processors: u32,
        threads: u32,
        wallclock: Wallclock,
        options: WrapperOptions,
    ) -> Self {
        let export = resolve_export(&jobs, options.export.as_deref());
        let queue = options.queue.unwrap_or_else(|| jobs[0].queue.clone());
        let name = compose_name(&experiment_id, processors, jobs.len());
        Self {
            name,
            strategy: PackagingStrategy::Wrapped { kind, group_sizes },
            experiment_id,
            platform_name,
            queue,
            export,
            processors,
            threads,
            wallclock,
            dependency: options.dependency,
            method: options.method.unwrap_or_else(|| "wrap".to_owned()),
            jobs,
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn jobs_mut(&mut self) -> &mut [Job] {
        &mut self.jobs
    }

    /// Hands the jobs back to the caller once the submit cycle is over.
    pub fn into_jobs(self) -> Vec<Job> {
        self.jobs
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> &PackagingStrategy {
        &self.strategy
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    pub fn processors(&self) -> u32 {
        self.processors
    }

    pub fn threads(&self) -> u32 {
        self.threads
    }

    pub fn wallclock(&self) -> Wallclock {
        self.wallclock
    }

    pub fn export(&self) -> &str {
        &self.export
    }

    pub fn dependency(&self) -> Option<&str> {
        self.dependency.as_deref()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Effective queue: single-core packages fall back to the platform's
    /// serial queue, many batch schedulers require it.
    pub fn resolve_queue<'a>(&'a self, serial_queue: &'a str) -> &'a str {
        if self.processors == 1 {
            serial_queue
        } else {
            &self.queue
        }
    }

    /// Per-job script names split into the wrapper's dispatch units.
    pub fn script_groups(&self) -> Vec<Vec<String>> {
        let mut names = self.jobs.iter().map(Job::script_file_name);
        match &self.strategy {
            PackagingStrategy::Wrapped { group_sizes, .. } => group_sizes
                .iter()
                .map(|&size| names.by_ref().take(size).collect())
                .collect(),
            _ => vec![names.collect()],
        }
    }

    /// Section resource figures for the wrapper script, first job of each
    /// section wins.
    pub fn section_resources(&self, processors_per_node: u32) -> SectionResources {
        let mut resources = SectionResources {
            processors_per_node,
            ..Default::default()
        };
        for job in &self.jobs {
            resources.record(&job.section, job.processors, job.tasks);
        }
        resources
    }

    /// Custom directives of all member jobs merged into one ordered set.
    pub fn aggregate_directives(&self) -> Vec<String> {
        let mut directives: Vec<String> =
            self.jobs.iter().flat_map(|j| j.custom_directives.iter().cloned()).collect();
        directives.sort();
        directives.dedup();
        directives
    }
}

fn validate(jobs: &[Job]) -> PackagingResult<(String, String)> {
    let first = jobs.first().ok_or(PackagingException::EmptyPackage)?;
    for job in jobs {
        if job.platform_name.is_empty() || job.platform_name != first.platform_name {
            return Err(PackagingException::MixedPlatforms {
                job: job.name.clone(),
                platform: job.platform_name.clone(),
                expected: first.platform_name.clone(),
            });
        }
    }
    Ok((first.experiment_id.clone(), first.platform_name.clone()))
}

/// Package-level override wins when set and not "none", the first job's
/// export directive is the fallback.
fn resolve_export(jobs: &[Job], package_export: Option<&str>) -> String {
    match package_export {
        Some(export) if !export.eq_ignore_ascii_case("none") => export.to_owned(),
        _ => jobs[0].export.clone(),
    }
}

/// The random salt only exists to keep names of packages created within the
/// same wall-clock second apart.
fn compose_name(experiment_id: &str, processors: u32, job_count: usize) -> String {
    let salt: u32 = rand::thread_rng().gen_range(1..10000);
    format!(
        "{}_{}_{}{}_{}_{}",
        experiment_id,
        WRAPPER_PREFIX,
        Utc::now().timestamp(),
        salt,
        processors,
        job_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::PackagingException;
    use crate::model::entity::job::Job;

    fn job(name: &str, platform: &str, processors: u32, wallclock: &str) -> Job {
        Job {
            name: name.into(),
            experiment_id: "a000".into(),
            section: "SIM".into(),
            platform_name: platform.into(),
            queue: "normal".into(),
            processors,
            threads: 1,
            tasks: 1,
            wallclock: wallclock.parse().unwrap(),
            export: "none".into(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_package_is_rejected() {
        assert!(matches!(
            Package::simple(vec![]),
            Err(PackagingException::EmptyPackage)
        ));
    }

    #[test]
    fn mixed_platforms_are_rejected() {
        let jobs = vec![job("j0", "marenostrum", 1, "00:10"), job("j1", "local", 1, "00:10")];
        assert!(matches!(
            Package::simple(jobs),
            Err(PackagingException::MixedPlatforms { .. })
        ));
    }

    #[test]
    fn array_size_id_covers_all_jobs() {
        let jobs = vec![
            job("j0", "mn", 2, "00:30"),
            job("j1", "mn", 4, "01:00"),
            job("j2", "mn", 1, "00:10"),
        ];
        let package = Package::array(jobs).unwrap();
        match package.strategy() {
            PackagingStrategy::Array { size_id } => assert_eq!(size_id, "[1-3]"),
            other => panic!("unexpected strategy {other:?}"),
        }
        assert_eq!(package.processors(), 4);
        assert_eq!(package.wallclock().to_string(), "01:00");
    }

    #[test]
    fn vertical_sums_wallclock_and_keeps_widest_job() {
        let jobs = vec![
            job("j0", "mn", 2, "00:30"),
            job("j1", "mn", 8, "01:00"),
            job("j2", "mn", 4, "00:45"),
        ];
        let package = Package::vertical(jobs, WrapperOptions::default()).unwrap();
        assert_eq!(package.wallclock().to_string(), "02:15");
        assert!(package.wallclock() >= "01:00".parse().unwrap());
        assert_eq!(package.processors(), 8);
    }

    #[test]
    fn vertical_processor_tie_keeps_the_first_job_threads() {
        let mut j0 = job("j0", "mn", 8, "00:30");
        j0.threads = 4;
        let mut j1 = job("j1", "mn", 8, "00:45");
        j1.threads = 2;
        let package = Package::vertical(vec![j0, j1], WrapperOptions::default()).unwrap();
        assert_eq!(package.processors(), 8);
        assert_eq!(package.threads(), 4);
    }

    #[test]
    fn horizontal_sums_processors_and_keeps_longest_wallclock() {
        let jobs = vec![
            job("j0", "mn", 2, "00:30"),
            job("j1", "mn", 8, "01:00"),
            job("j2", "mn", 4, "00:45"),
        ];
        let package = Package::horizontal(jobs, WrapperOptions::default()).unwrap();
        assert_eq!(package.processors(), 14);
        assert_eq!(package.wallclock().to_string(), "01:00");
    }

    #[test]
    fn single_core_package_falls_back_to_serial_queue() {
        let jobs = vec![job("j0", "mn", 1, "00:10")];
        let package = Package::vertical(jobs, WrapperOptions::default()).unwrap();
        assert_eq!(package.resolve_queue("serial"), "serial");

        let jobs = vec![job("j0", "mn", 4, "00:10")];
        let package = Package::vertical(jobs, WrapperOptions::default()).unwrap();
        assert_eq!(package.resolve_queue("serial"), "normal");
    }

    #[test]
    fn wrapper_name_embeds_processors_and_job_count() {
        let jobs = vec![job("j0", "mn", 2, "00:30"), job("j1", "mn", 3, "00:30")];
        let package = Package::horizontal(jobs, WrapperOptions::default()).unwrap();
        assert!(package.name().starts_with("a000_WRAP_"));
        assert!(package.name().ends_with("_5_2"));
    }

    #[test]
    fn hybrid_flattens_groups_and_keeps_caller_totals() {
        let groups = vec![
            vec![job("j0", "mn", 2, "00:30"), job("j1", "mn", 2, "00:30")],
            vec![job("j2", "mn", 2, "00:30")],
        ];
        let package = Package::hybrid(
            WrapperKind::VerticalHorizontal,
            groups,
            16,
            "03:00".parse().unwrap(),
            WrapperOptions::default(),
        )
        .unwrap();
        assert_eq!(package.jobs().len(), 3);
        assert_eq!(package.processors(), 16);
        assert_eq!(package.wallclock().to_string(), "03:00");
        assert_eq!(
            package.script_groups(),
            vec![vec!["j0.cmd".to_owned(), "j1.cmd".to_owned()], vec!["j2.cmd".to_owned()]]
        );
    }

    #[test]
    fn wrapper_export_override_wins_over_job_export() {
        let mut j0 = job("j0", "mn", 2, "00:30");
        j0.export = "export PATH=/opt/bin:$PATH".into();
        let package = Package::horizontal(
            vec![j0.clone()],
            WrapperOptions {
                export: Some("export MODULES=intel".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(package.export(), "export MODULES=intel");

        // "none" at package level means no override.
        let package = Package::horizontal(
            vec![j0],
            WrapperOptions {
                export: Some("none".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(package.export(), "export PATH=/opt/bin:$PATH");
    }

    #[test]
    fn directives_are_merged_and_deduplicated() {
        let mut j0 = job("j0", "mn", 2, "00:30");
        let mut j1 = job("j1", "mn", 2, "00:30");
        j0.custom_directives.insert("#BATCH --exclusive".into());
        j1.custom_directives.insert("#BATCH --exclusive".into());
        j1.custom_directives.insert("#BATCH --constraint=highmem".into());
        let package = Package::horizontal(vec![j0, j1], WrapperOptions::default()).unwrap();
        assert_eq!(
            package.aggregate_directives(),
            vec![
                "#BATCH --constraint=highmem".to_owned(),
                "#BATCH --exclusive".to_owned()
            ]
        );
    }
}
