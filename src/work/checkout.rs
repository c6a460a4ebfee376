use crate::error_sink::ErrorCode;
use crate::storage::Resource;
use crate::version::VersionId;
use crate::work::context::{JobContext, JobKind};
use crate::work::job::{self, Job, JobOutcome, StepFailure, WorkServices};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

const CHECKOUT_FAILED: StepFailure = StepFailure {
    code: ErrorCode::CheckoutFailed,
    title: "Checkout Failed",
    user_message: "I failed to download the resource from the server.",
};

/// Download one version's metadata and data into the local file system.
/// No new version is issued.
#[derive(Debug)]
pub struct CheckoutResourceJob {
    resource: Resource,
    services: WorkServices,
}

impl CheckoutResourceJob {
    pub fn new(version: VersionId, path: impl Into<PathBuf>, services: WorkServices) -> Self {
        Self {
            resource: Resource::for_checkout(version, path),
            services,
        }
    }
}

#[async_trait]
impl Job for CheckoutResourceJob {
    fn kind(&self) -> JobKind {
        JobKind::CheckoutResource
    }

    fn services(&self) -> &WorkServices {
        &self.services
    }

    async fn run(self, ctx: Arc<JobContext>) -> JobOutcome {
        let Self {
            mut resource,
            services,
        } = self;

        let Some(timer) = job::begin(&ctx, &services) else {
            return job::finish(&ctx, resource);
        };
        if ctx.should_stop() {
            return job::finish(&ctx, resource);
        }

        let subscription = job::watch_data(&ctx, &resource);
        let fetched = timer
            .guard(resource.checkout_from_remote(&services.store))
            .await;
        drop(subscription);
        if let Err(e) = fetched {
            job::fail_step(&ctx, "checkout", &resource, &e, CHECKOUT_FAILED);
            return job::finish(&ctx, resource);
        }

        job::complete(&ctx, resource)
    }
}
