// Jobs this worker knows how to run

use async_trait::async_trait;
use jobwire_core::{Job, JobError, JobRegistry};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Welcome {
    #[serde(rename = "userId")]
    pub user_id: u64,
}

/// Greets a newly registered user
pub struct SendWelcomeEmail;

#[async_trait]
impl Job for SendWelcomeEmail {
    const NAME: &'static str = "SendWelcomeEmail";
    type Payload = Welcome;

    async fn should_send(&self, payload: &Welcome) -> Result<bool, JobError> {
        // user 0 is the anonymous placeholder account
        Ok(payload.user_id != 0)
    }

    async fn handle(&self, payload: &Welcome) -> Result<(), JobError> {
        info!(user_id = payload.user_id, "Sending welcome email");
        Ok(())
    }

    async fn on_failure(&self, error: &JobError, payload: &Welcome) -> Result<(), JobError> {
        warn!(user_id = payload.user_id, error = %error, "Welcome email not sent");
        Ok(())
    }
}

pub fn registry() -> jobwire_core::Result<JobRegistry> {
    let mut registry = JobRegistry::new();
    registry.register_job::<SendWelcomeEmail, _>(|| SendWelcomeEmail)?;
    Ok(registry)
}
