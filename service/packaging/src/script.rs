use std::path::PathBuf;

use async_trait::async_trait;
use domain_packaging::exception::{PackagingException, PackagingResult};
use domain_packaging::model::entity::Job;
use domain_packaging::model::vo::{
    ArrayScriptSpec, ResolvedParams, WrapperKind, WrapperScriptSpec,
};
use domain_packaging::service::ScriptRenderService;
use handlebars::Handlebars;
use serde_json::json;

use crate::config::ProjectConfig;

/// Batch-scheduler header lines of the array common script. The array index
/// picks the per-index input file staged next to it.
const ARRAY_SCRIPT: &str = r#"#!/bin/bash
#SBATCH -J {{name}}
#SBATCH --array={{range}}
#SBATCH -n {{processors}}
#SBATCH -t {{wallclock}}
{{#each directives}}
{{{this}}}
{{/each}}

idx=$((SLURM_ARRAY_TASK_ID - 1))
source {{name}}.$idx
"#;

const WRAPPER_HEADER: &str = r#"#!/bin/bash
###############################################################################
#                 {{name}} ({{method}} wrapper)
###############################################################################
#SBATCH -J {{name}}
{{#if queue}}
#SBATCH -p {{queue}}
{{/if}}
{{#if project}}
#SBATCH -A {{project}}
{{/if}}
#SBATCH -n {{processors}}
#SBATCH --cpus-per-task={{threads}}
#SBATCH -t {{wallclock}}
{{#if dependency}}
#SBATCH --dependency=afterok:{{dependency}}
{{/if}}
{{#each directives}}
{{{this}}}
{{/each}}
export PROCESSORS_PER_NODE={{resources.processors_per_node}}
{{#each resources.sections}}
export {{@key}}_PROCESSORS={{this.processors}}
export {{@key}}_TASKS={{this.tasks}}
{{/each}}

cd {{root_dir}}
"#;

/// Sequential sourcing inside one allocation.
const SOURCE_SEQUENTIAL_BODY: &str = r#"{{#each script_groups}}
{{#each this}}
source {{this}}
{{/each}}
{{/each}}
"#;

/// Backgrounded jobs behind a wait barrier; with several groups the barriers
/// make the groups run one after another.
const FANOUT_WAIT_BODY: &str = r#"{{#each script_groups}}
{{#each this}}
bash {{this}} &
{{/each}}
wait
{{/each}}
"#;

/// Concurrent groups, sequential jobs inside each group.
const BACKGROUND_GROUPS_BODY: &str = r#"{{#each script_groups}}
(
{{#each this}}
source {{this}}
{{/each}}
) &
{{/each}}
wait
"#;

/// Handlebars-backed implementation of [`ScriptRenderService`].
///
/// Per-job templates live under the project directory; array and wrapper
/// common scripts are composed from the built-in templates above.
pub struct HandlebarsRenderService {
    project_dir: PathBuf,
    project_type: String,
}

impl HandlebarsRenderService {
    pub fn new(project: &ProjectConfig) -> Self {
        Self {
            project_dir: project.project_dir.clone(),
            project_type: project.project_type.clone(),
        }
    }

    async fn job_template(&self, job: &Job) -> PackagingResult<Option<String>> {
        let path = self.project_dir.join(&job.template);
        match tokio::fs::read_to_string(&path).await {
            Ok(template) => Ok(Some(template)),
            // A project of type "none" carries no templates of its own; the
            // job runs a stub script.
            Err(_) if self.project_type.eq_ignore_ascii_case("none") => Ok(None),
            Err(_) => Err(PackagingException::MissingTemplate {
                job: job.name.clone(),
                template: job.template.clone(),
            }),
        }
    }

    fn render(
        job_name: &str,
        template: &str,
        params: &ResolvedParams,
        strict: bool,
    ) -> PackagingResult<String> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(strict);
        registry
            .register_template_string("job_script", template)
            .map_err(anyhow::Error::new)?;
        registry.render("job_script", params).map_err(|e| {
            PackagingException::UnresolvedVariable {
                job: job_name.to_owned(),
                reason: e.desc,
            }
        })
    }
}

#[async_trait]
impl ScriptRenderService for HandlebarsRenderService {
    async fn render_job_script(
        &self,
        job: &Job,
        params: &ResolvedParams,
    ) -> PackagingResult<String> {
        let Some(template) = self.job_template(job).await? else {
            return Ok("#!/bin/bash\n".to_owned());
        };
        Self::render(&job.name, &template, params, false)
    }

    fn render_array_script(&self, spec: &ArrayScriptSpec) -> PackagingResult<String> {
        let data = json!({
            "name": spec.name,
            "range": spec.size_id.trim_matches(|c| c == '[' || c == ']'),
            "processors": spec.processors,
            "wallclock": spec.wallclock.to_string(),
            "directives": spec.directives,
        });
        let mut registry = Handlebars::new();
        registry
            .register_template_string("array_script", ARRAY_SCRIPT)
            .map_err(anyhow::Error::new)?;
        Ok(registry.render("array_script", &data).map_err(anyhow::Error::new)?)
    }

    fn render_wrapper_script(&self, spec: &WrapperScriptSpec) -> PackagingResult<String> {
        let body = match spec.kind {
            WrapperKind::Vertical => SOURCE_SEQUENTIAL_BODY,
            WrapperKind::Horizontal | WrapperKind::VerticalHorizontal => FANOUT_WAIT_BODY,
            WrapperKind::HorizontalVertical => BACKGROUND_GROUPS_BODY,
        };
        let template = [WRAPPER_HEADER, body].concat();
        let mut registry = Handlebars::new();
        registry
            .register_template_string("wrapper_script", template)
            .map_err(anyhow::Error::new)?;
        Ok(registry.render("wrapper_script", spec).map_err(anyhow::Error::new)?)
    }

    async fn check_job_script(&self, job: &Job, params: &ResolvedParams) -> PackagingResult<()> {
        let Some(template) = self.job_template(job).await? else {
            return Ok(());
        };
        Self::render(&job.name, &template, params, true).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use domain_packaging::model::vo::SectionResources;
    use indoc::indoc;

    use super::*;

    fn renderer(project_type: &str, project_dir: &std::path::Path) -> HandlebarsRenderService {
        HandlebarsRenderService::new(&ProjectConfig {
            project_type: project_type.into(),
            project_dir: project_dir.into(),
            ..Default::default()
        })
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("packaging-script-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn wrapper_spec(kind: WrapperKind, groups: Vec<Vec<String>>) -> WrapperScriptSpec {
        WrapperScriptSpec {
            kind,
            name: "a000_WRAP_1".into(),
            experiment_id: "a000".into(),
            queue: "normal".into(),
            project: "bsc32".into(),
            wallclock: "02:00".parse().unwrap(),
            processors: 8,
            threads: 1,
            method: "wrap".into(),
            dependency: None,
            root_dir: "/remote/a000".into(),
            directives: vec!["#SBATCH --exclusive".into()],
            script_groups: groups,
            resources: SectionResources::default(),
        }
    }

    #[tokio::test]
    async fn job_script_renders_placeholders() {
        let dir = scratch_dir("render");
        std::fs::write(
            dir.join("sim.sh"),
            indoc! {"
                #!/bin/bash
                srun model -n {{NUMPROC}}
            "},
        )
        .unwrap();
        let job = Job {
            name: "a000_sim".into(),
            template: "sim.sh".into(),
            ..Default::default()
        };
        let params = HashMap::from([("NUMPROC".to_owned(), "64".to_owned())]);
        let script =
            renderer("git", &dir).render_job_script(&job, &params).await.unwrap();
        assert_eq!(
            script,
            indoc! {"
                #!/bin/bash
                srun model -n 64
            "}
        );
    }

    #[tokio::test]
    async fn missing_template_is_fatal_unless_project_type_is_none() {
        let dir = scratch_dir("missing");
        let job = Job {
            name: "a000_sim".into(),
            template: "nowhere.sh".into(),
            ..Default::default()
        };
        let params = HashMap::new();

        let err = renderer("git", &dir).render_job_script(&job, &params).await.unwrap_err();
        assert!(matches!(err, PackagingException::MissingTemplate { .. }));

        let script =
            renderer("none", &dir).render_job_script(&job, &params).await.unwrap();
        assert_eq!(script, "#!/bin/bash\n");
    }

    #[tokio::test]
    async fn check_is_strict_but_generation_is_not() {
        let dir = scratch_dir("strict");
        std::fs::write(dir.join("sim.sh"), "echo {{MISSING_VALUE}}\n").unwrap();
        let job = Job {
            name: "a000_sim".into(),
            template: "sim.sh".into(),
            ..Default::default()
        };
        let params = HashMap::new();
        let renderer = renderer("git", &dir);

        let err = renderer.check_job_script(&job, &params).await.unwrap_err();
        assert!(matches!(err, PackagingException::UnresolvedVariable { .. }));
        // Generation mirrors the lenient behavior: the placeholder renders
        // empty instead of failing.
        assert_eq!(renderer.render_job_script(&job, &params).await.unwrap(), "echo \n");
    }

    #[test]
    fn array_script_dispatches_on_the_task_index() {
        let dir = scratch_dir("array");
        let spec = ArrayScriptSpec {
            name: "1700000000".into(),
            size_id: "[1-3]".into(),
            wallclock: "01:00".parse().unwrap(),
            processors: 4,
            directives: vec![],
        };
        let script = renderer("git", &dir).render_array_script(&spec).unwrap();
        assert!(script.contains("#SBATCH --array=1-3"));
        assert!(script.contains("idx=$((SLURM_ARRAY_TASK_ID - 1))"));
        assert!(script.contains("source 1700000000.$idx"));
    }

    #[test]
    fn vertical_wrapper_sources_jobs_in_order() {
        let dir = scratch_dir("vertical");
        let spec = wrapper_spec(
            WrapperKind::Vertical,
            vec![vec!["j0.cmd".into(), "j1.cmd".into(), "j2.cmd".into()]],
        );
        let script = renderer("git", &dir).render_wrapper_script(&spec).unwrap();
        let first = script.find("source j0.cmd").unwrap();
        let second = script.find("source j1.cmd").unwrap();
        let third = script.find("source j2.cmd").unwrap();
        assert!(first < second && second < third);
        assert!(script.contains("#SBATCH -p normal"));
        assert!(script.contains("#SBATCH --exclusive"));
        assert!(script.contains("cd /remote/a000"));
        assert!(!script.contains("wait"));
    }

    #[test]
    fn horizontal_wrapper_backgrounds_jobs_behind_a_wait_barrier() {
        let dir = scratch_dir("horizontal");
        let spec = wrapper_spec(
            WrapperKind::Horizontal,
            vec![vec!["j0.cmd".into(), "j1.cmd".into()]],
        );
        let script = renderer("git", &dir).render_wrapper_script(&spec).unwrap();
        let first = script.find("bash j0.cmd &").unwrap();
        let second = script.find("bash j1.cmd &").unwrap();
        let barrier = script.find("\nwait").unwrap();
        assert!(first < second && second < barrier);
    }

    #[test]
    fn hybrid_wrappers_nest_both_patterns() {
        let dir = scratch_dir("hybrid");
        let groups = vec![
            vec!["j0.cmd".to_owned(), "j1.cmd".to_owned()],
            vec!["j2.cmd".to_owned()],
        ];

        let vh = renderer("git", &dir)
            .render_wrapper_script(&wrapper_spec(WrapperKind::VerticalHorizontal, groups.clone()))
            .unwrap();
        // Two sequential groups, each with its own barrier.
        assert_eq!(vh.matches("wait").count(), 2);
        assert!(vh.contains("bash j0.cmd &"));

        let hv = renderer("git", &dir)
            .render_wrapper_script(&wrapper_spec(WrapperKind::HorizontalVertical, groups))
            .unwrap();
        // Two backgrounded subshells joined by one barrier.
        assert_eq!(hv.matches(") &").count(), 2);
        assert_eq!(hv.matches("wait").count(), 1);
        assert!(hv.contains("source j0.cmd"));
    }

    #[test]
    fn dependency_directive_appears_only_when_set() {
        let dir = scratch_dir("dependency");
        let mut spec = wrapper_spec(WrapperKind::Vertical, vec![vec!["j0.cmd".into()]]);
        let without = renderer("git", &dir).render_wrapper_script(&spec).unwrap();
        assert!(!without.contains("--dependency"));

        spec.dependency = Some("41".into());
        let with = renderer("git", &dir).render_wrapper_script(&spec).unwrap();
        assert!(with.contains("#SBATCH --dependency=afterok:41"));
    }
}
