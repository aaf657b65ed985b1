//! CloudTrail trails.
use aws_sdk_cloudtrail::types::Tag;

use crate::{
    self as nc,
    aws::{
        error::{AwsError, ClassifyExt, NotFoundExt},
        Aws,
    },
    remote::Remote,
    settings::Tags,
    wait::{retry, WaitConfig},
    HasDependencies, Resource,
};

/// Delivery of trail events into a CloudWatch Logs log group.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct CloudWatchLogsDelivery {
    pub log_group_arn: Remote<String>,
    /// Role CloudTrail assumes to write into the log group.
    pub role_arn: Remote<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct Trail {
    pub name: String,
    /// Bucket the trail delivers to. Its policy must already allow CloudTrail.
    pub bucket: Remote<String>,
    pub cloud_watch_logs: Option<CloudWatchLogsDelivery>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrailOutput {
    pub name: String,
    pub arn: String,
}

impl Trail {
    /// Log group and role ARNs, or empty strings which clear the integration.
    fn cloud_watch_logs_arns(&self) -> anyhow::Result<(String, String)> {
        Ok(match &self.cloud_watch_logs {
            Some(delivery) => (delivery.log_group_arn.get()?, delivery.role_arn.get()?),
            None => (String::new(), String::new()),
        })
    }
}

/// Freshly created delivery roles and freshly put bucket policies take a
/// while before CloudTrail sees them.
fn is_retryable(e: &AwsError) -> bool {
    e.is_retryable() || e.code.as_deref() == Some("InsufficientS3BucketPolicyException")
}

/// Stops and deletes a trail. `name` may also be the trail's ARN.
pub async fn delete_trail(aws: &Aws, name: &str) -> anyhow::Result<()> {
    let client = aws_sdk_cloudtrail::Client::new(aws.as_ref());
    let stopped = client
        .stop_logging()
        .name(name)
        .send()
        .await
        .classify("StopLogging")
        .or_not_found()?;
    if stopped.is_none() {
        log::info!("  trail {} is already gone", name);
        return Ok(());
    }
    client
        .delete_trail()
        .name(name)
        .send()
        .await
        .classify("DeleteTrail")
        .or_not_found()?;
    Ok(())
}

impl Resource for Trail {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = TrailOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<TrailOutput> {
        let client = &aws_sdk_cloudtrail::Client::new(aws.as_ref());
        let bucket = &self.bucket.get()?;
        let (log_group_arn, role_arn) = self.cloud_watch_logs_arns()?;
        let (log_group_arn, role_arn) = (
            &Some(log_group_arn).filter(|s| !s.is_empty()),
            &Some(role_arn).filter(|s| !s.is_empty()),
        );
        let mut tags = vec![];
        for (k, v) in &self.tags {
            tags.push(Tag::builder().key(k).value(v).build()?);
        }
        let tags = &tags;

        let created = retry(
            &WaitConfig::default(),
            None,
            "CreateTrail",
            is_retryable,
            move || async move {
                client
                    .create_trail()
                    .name(&self.name)
                    .s3_bucket_name(bucket)
                    .set_cloud_watch_logs_log_group_arn(log_group_arn.clone())
                    .set_cloud_watch_logs_role_arn(role_arn.clone())
                    .set_tags_list(Some(tags.clone()))
                    .send()
                    .await
                    .classify("CreateTrail")
            },
        )
        .await?;
        let arn = created
            .trail_arn()
            .ok_or_else(|| anyhow::anyhow!("CreateTrail returned no ARN for {}", self.name))?
            .to_owned();
        log::info!("  created trail {arn}");

        client
            .start_logging()
            .name(&self.name)
            .send()
            .await
            .classify("StartLogging")?;
        Ok(TrailOutput {
            name: self.name.clone(),
            arn,
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &TrailOutput,
    ) -> anyhow::Result<TrailOutput> {
        anyhow::ensure!(
            self.name == previous_local.name,
            "trail {} cannot be renamed, destroy it first",
            previous_local.name
        );
        let client = &aws_sdk_cloudtrail::Client::new(aws.as_ref());
        let bucket = &self.bucket.get()?;
        let (log_group_arn, role_arn) = &self.cloud_watch_logs_arns()?;
        if log_group_arn.is_empty() {
            log::info!("  removing CloudWatch Logs delivery from {}", self.name);
        } else {
            log::info!("  delivering {} to {log_group_arn}", self.name);
        }
        retry(
            &WaitConfig::default(),
            None,
            "UpdateTrail",
            is_retryable,
            move || async move {
                client
                    .update_trail()
                    .name(&self.name)
                    .s3_bucket_name(bucket)
                    .cloud_watch_logs_log_group_arn(log_group_arn)
                    .cloud_watch_logs_role_arn(role_arn)
                    .send()
                    .await
                    .classify("UpdateTrail")
            },
        )
        .await?;
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &TrailOutput) -> anyhow::Result<()> {
        delete_trail(aws, &self.name).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aws::error::ErrorKind;

    fn error(code: &str) -> AwsError {
        AwsError {
            kind: ErrorKind::from_code(Some(code), None),
            operation: "CreateTrail".into(),
            code: Some(code.into()),
            message: String::new(),
        }
    }

    #[test]
    fn bucket_policy_propagation_is_retried() {
        assert!(is_retryable(&error("InsufficientS3BucketPolicyException")));
        assert!(is_retryable(&error("InvalidCloudWatchLogsRoleArnException")));
        assert!(!is_retryable(&error("InvalidTrailNameException")));
    }
}
