use crate::error::{Error, Result};
use crate::error_sink::ErrorCode;
use crate::storage::Resource;
use crate::version::ResourceId;
use crate::work::context::{JobContext, JobKind};
use crate::work::job::{self, Job, JobOutcome, StepFailure, WorkServices};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const VERSION_FAILED: StepFailure = StepFailure {
    code: ErrorCode::VersionAuthorityFailed,
    title: "Version Not Created",
    user_message: "I could not create a new version of the resource.",
};

const STORE_FAILED: StepFailure = StepFailure {
    code: ErrorCode::UpdateResourceOnServerFailed,
    title: "Resource Update Failed",
    user_message: "I failed to update the resource on the server.",
};

/// Store the resource's current metadata and data as its next version.
#[derive(Debug)]
pub struct UpdateResourceJob {
    resource: Resource,
    owner: ResourceId,
    services: WorkServices,
}

impl UpdateResourceJob {
    /// Fails unless `resource` already belongs to a stored resource.
    pub fn new(resource: Resource, services: WorkServices) -> Result<Self> {
        let owner = resource
            .meta
            .resource
            .ok_or_else(|| Error::protocol("Update requires an existing resource"))?;
        Ok(Self {
            resource,
            owner,
            services,
        })
    }
}

#[async_trait]
impl Job for UpdateResourceJob {
    fn kind(&self) -> JobKind {
        JobKind::UpdateResource
    }

    fn services(&self) -> &WorkServices {
        &self.services
    }

    async fn run(self, ctx: Arc<JobContext>) -> JobOutcome {
        let Self {
            mut resource,
            owner,
            services,
        } = self;

        let Some(timer) = job::begin(&ctx, &services) else {
            return job::finish(&ctx, resource);
        };
        if ctx.should_stop() {
            return job::finish(&ctx, resource);
        }

        match timer
            .guard(services.versions.create_new_version(Some(owner)))
            .await
        {
            Ok(version) => {
                debug!(
                    job_id = ctx.id(),
                    version = %version.id,
                    number = version.number,
                    "Version issued"
                );
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
        let stored = timer.guard(resource.update_on_remote(&services.store)).await;
        drop(subscription);
        if let Err(e) = stored {
            job::fail_step(&ctx, "update on server", &resource, &e, STORE_FAILED);
            return job::finish(&ctx, resource);
        }

        job::complete(&ctx, resource)
    }
}
