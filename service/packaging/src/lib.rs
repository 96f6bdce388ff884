mod config;
mod orchestrate;
mod script;
mod submit;

#[rustfmt::skip]
pub use {
    config::{ProjectConfig, WrapperConfig},
    orchestrate::{PackageFailure, SubmissionOrchestrator, SubmissionReport},
    script::HandlebarsRenderService,
    submit::PackageSubmitServiceImpl,
};
