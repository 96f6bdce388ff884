use std::sync::Arc;

use domain_packaging::exception::{PackagingException, PackagingResult};
use domain_packaging::model::entity::Package;
use domain_packaging::model::vo::ResolvedParams;
use domain_packaging::service::PackageSubmitService;
use tracing::{info, warn};

/// Drives a batch of packages through one submit cycle, in order.
pub struct SubmissionOrchestrator {
    submit_service: Arc<dyn PackageSubmitService>,
}

/// What one cycle did, package by package.
#[derive(Debug, Default)]
pub struct SubmissionReport {
    /// Names of packages submitted (or generated) successfully.
    pub submitted: Vec<String>,
    /// The package that stopped the cycle, if any.
    pub failure: Option<PackageFailure>,
    /// Names of packages never attempted because of the failure.
    pub skipped: Vec<String>,
}

#[derive(Debug)]
pub struct PackageFailure {
    pub package: String,
    pub error: PackagingException,
}

impl SubmissionReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

impl SubmissionOrchestrator {
    pub fn new(submit_service: Arc<dyn PackageSubmitService>) -> Self {
        Self { submit_service }
    }

    /// Submits the packages one after another. A recoverable failure stops
    /// the cycle and is reported together with the packages it left behind;
    /// the caller retries them next cycle. Broken package definitions are
    /// returned as errors instead since no retry can fix them.
    pub async fn submit_all(
        &self,
        packages: &mut [Package],
        params: &ResolvedParams,
        only_generate: bool,
        hold: bool,
    ) -> PackagingResult<SubmissionReport> {
        let mut report = SubmissionReport::default();
        let mut failed_at = None;
        for (index, package) in packages.iter_mut().enumerate() {
            match self.submit_service.submit(package, params, only_generate, hold).await {
                Ok(()) => {
                    info!(package = package.name(), "package submitted");
                    report.submitted.push(package.name().to_owned());
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    warn!(
                        package = package.name(),
                        error = %error,
                        "package submission failed, skipping the rest of the batch"
                    );
                    report.failure = Some(PackageFailure {
                        package: package.name().to_owned(),
                        error,
                    });
                    failed_at = Some(index);
                    break;
                }
            }
        }
        if let Some(index) = failed_at {
            report.skipped =
                packages[index + 1..].iter().map(|p| p.name().to_owned()).collect();
        }
        Ok(report)
    }
}
