use std::path::Path;

use async_trait::async_trait;
use mockall::mock;

use crate::exception::PackagingResult;
use crate::model::entity::{Job, Package};
use crate::model::vo::{ArrayScriptSpec, ResolvedParams, WrapperScriptSpec};
use crate::service::{PackageSubmitService, PlatformService, ScriptRenderService};

mock! {
    pub PlatformService {}
    #[async_trait]
    impl PlatformService for PlatformService {
        fn name(&self) -> &str;
        fn serial_queue(&self) -> &str;
        fn processors_per_node(&self) -> u32;
        fn project(&self) -> &str;
        fn root_dir(&self) -> &str;
        fn remote_log_dir(&self) -> &str;
        fn supports_multiple_remove(&self) -> bool;
        async fn send_file(&self, local_path: &Path, check: bool) -> anyhow::Result<()>;
        async fn send_command(&self, command: &str) -> anyhow::Result<()>;
        async fn check_remote_log_dir(&self) -> anyhow::Result<()>;
        async fn remove_stat_file(&self, job_name: &str) -> anyhow::Result<()>;
        async fn remove_completed_file(&self, job_name: &str) -> anyhow::Result<()>;
        async fn remove_multiple_files(&self, paths: &str) -> anyhow::Result<bool>;
        async fn submit_job(
            &self,
            script_name: &str,
            hold: bool,
            export: &str,
        ) -> anyhow::Result<Option<String>>;
    }
}

mock! {
    pub ScriptRenderService {}
    #[async_trait]
    impl ScriptRenderService for ScriptRenderService {
        async fn render_job_script(
            &self,
            job: &Job,
            params: &ResolvedParams,
        ) -> PackagingResult<String>;
        fn render_array_script(&self, spec: &ArrayScriptSpec) -> PackagingResult<String>;
        fn render_wrapper_script(&self, spec: &WrapperScriptSpec) -> PackagingResult<String>;
        async fn check_job_script(&self, job: &Job, params: &ResolvedParams) -> PackagingResult<()>;
    }
}

mock! {
    pub PackageSubmitService {}
    #[async_trait]
    impl PackageSubmitService for PackageSubmitService {
        async fn submit(
            &self,
            package: &mut Package,
            params: &ResolvedParams,
            only_generate: bool,
            hold: bool,
        ) -> PackagingResult<()>;
    }
}
