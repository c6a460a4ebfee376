use crate::error_sink::ErrorCode;
use crate::storage::Resource;
use crate::work::context::{JobContext, JobKind};
use crate::work::job::{self, Job, JobOutcome, StepFailure, WorkServices};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const VERSION_FAILED: StepFailure = StepFailure {
    code: ErrorCode::VersionAuthorityFailed,
    title: "Version Not Created",
    user_message: "I could not create a version for the new resource.",
};

const STORE_FAILED: StepFailure = StepFailure {
    code: ErrorCode::CreateResourceOnServerFailed,
    title: "Resource Creation Failed",
    user_message: "I failed to create the resource on the server.",
};

/// Store a brand new resource: first version, metadata and data.
#[derive(Debug)]
pub struct CreateResourceJob {
    resource: Resource,
    services: WorkServices,
}

impl CreateResourceJob {
    pub fn new(resource: Resource, services: WorkServices) -> Self {
        Self { resource, services }
    }
}

#[async_trait]
impl Job for CreateResourceJob {
    fn kind(&self) -> JobKind {
        JobKind::CreateResource
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

        match timer.guard(services.versions.create_new_version(None)).await {
            Ok(version) => {
                debug!(job_id = ctx.id(), version = %version.id, "Version issued");
                resource.assign_version(&version);
            }
            Err(e) => {
                job::fail_step(&ctx, "create version", &resource, &e, VERSION_FAILED);
                return job::finish(&ctx, resource);
            }
        }
        if ctx.should_stop() {
            return job::finish(&ctx, resource);
        }

        let subscription = job::watch_data(&ctx, &resource);
        let stored = timer.guard(resource.create_on_remote(&services.store)).await;
        drop(subscription);
        if let Err(e) = stored {
            job::fail_step(&ctx, "create on server", &resource, &e, STORE_FAILED);
            return job::finish(&ctx, resource);
        }

        job::complete(&ctx, resource)
    }
}
