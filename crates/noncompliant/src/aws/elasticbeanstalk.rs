//! Elastic Beanstalk environments and applications.
//!
//! No scenario provisions these. The cleanup sweep deletes them when they
//! carry the cleanup tag.
use aws_sdk_elasticbeanstalk::types::EnvironmentStatus;

use crate::{
    aws::{
        error::{ClassifyExt, NotFoundExt},
        Aws,
    },
    wait::{wait_for, WaitConfig},
};

/// Terminates an environment, along with the instances and load balancer
/// it manages, and waits until it is terminated.
pub async fn terminate_environment(
    aws: &Aws,
    application: &str,
    environment: &str,
) -> anyhow::Result<()> {
    let client = &aws_sdk_elasticbeanstalk::Client::new(aws.as_ref());
    let terminated = client
        .terminate_environment()
        .environment_name(environment)
        .force_terminate(true)
        .send()
        .await
        .classify("TerminateEnvironment")
        .or_not_found()?;
    if terminated.is_none() {
        log::info!("  environment {environment} is already gone");
        return Ok(());
    }
    wait_for(&WaitConfig::slow(), None, environment, move || async move {
        let described = client
            .describe_environments()
            .application_name(application)
            .environment_names(environment)
            .send()
            .await
            .classify("DescribeEnvironments")?;
        Ok(described
            .environments()
            .iter()
            .all(|e| e.status() == Some(&EnvironmentStatus::Terminated)))
    })
    .await
}

/// Deletes an application and its versions, terminating what is left of
/// its environments.
pub async fn delete_application(aws: &Aws, name: &str) -> anyhow::Result<()> {
    aws_sdk_elasticbeanstalk::Client::new(aws.as_ref())
        .delete_application()
        .application_name(name)
        .terminate_env_by_force(true)
        .send()
        .await
        .classify("DeleteApplication")
        .or_not_found()?;
    Ok(())
}
