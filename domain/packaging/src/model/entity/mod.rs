pub mod job;
pub mod package;

#[rustfmt::skip]
pub use {
    job::{CheckPolicy, Job, JobStatus},
    package::{Package, PackagingStrategy, WrapperOptions},
};
