use thiserror::Error;

pub type PackagingResult<T> = Result<T, PackagingException>;

#[derive(Error, Debug)]
pub enum PackagingException {
    #[error("No jobs given, a package needs at least one job.")]
    EmptyPackage,

    #[error("Only one platform per package, job {job} targets {platform} but the package targets {expected}.")]
    MixedPlatforms {
        job: String,
        platform: String,
        expected: String,
    },

    #[error("Template [{template}] of job {job} does not exist under the project directory at submission time.")]
    MissingTemplate { job: String, template: String },

    #[error("Template of job {job} has an unresolved variable: {reason}.")]
    UnresolvedVariable { job: String, reason: String },

    #[error("Invalid wallclock literal: {literal}, expected HH:MM.")]
    InvalidWallclock { literal: String },

    #[error("Platform {platform} returned no id when submitting {script}.")]
    SubmissionFailed { platform: String, script: String },

    #[error("Packaging internal error: {source}")]
    InternalError {
        #[from]
        source: anyhow::Error,
    },
}

impl PackagingException {
    /// Fatal errors abort a whole submit cycle, the rest may be reported
    /// per package while the batch carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyPackage
                | Self::MixedPlatforms { .. }
                | Self::MissingTemplate { .. }
                | Self::InvalidWallclock { .. }
        )
    }
}
