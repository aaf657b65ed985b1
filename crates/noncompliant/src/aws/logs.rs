//! CloudWatch Logs log groups.
use std::collections::HashMap;

use crate::{
    self as nc,
    aws::{
        error::{ClassifyExt, ErrorKind, NotFoundExt},
        Aws,
    },
    settings::Tags,
    HasDependencies, Resource,
};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct LogGroup {
    pub name: String,
    pub retention_days: Option<i32>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogGroupOutput {
    pub name: String,
    /// Ends in `:*`, the form CloudTrail expects.
    pub arn: String,
}

impl LogGroup {
    async fn put_retention(&self, client: &aws_sdk_cloudwatchlogs::Client) -> anyhow::Result<()> {
        match self.retention_days {
            Some(days) => {
                client
                    .put_retention_policy()
                    .log_group_name(&self.name)
                    .retention_in_days(days)
                    .send()
                    .await
                    .classify("PutRetentionPolicy")?;
            }
            None => {
                client
                    .delete_retention_policy()
                    .log_group_name(&self.name)
                    .send()
                    .await
                    .classify("DeleteRetentionPolicy")
                    .or_not_found()?;
            }
        }
        Ok(())
    }

    async fn arn(&self, client: &aws_sdk_cloudwatchlogs::Client) -> anyhow::Result<String> {
        let described = client
            .describe_log_groups()
            .log_group_name_prefix(&self.name)
            .send()
            .await
            .classify("DescribeLogGroups")?;
        described
            .log_groups()
            .iter()
            .find(|group| group.log_group_name() == Some(self.name.as_str()))
            .and_then(|group| group.arn())
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("log group {} was not found after creating it", self.name))
    }
}

pub async fn delete_log_group(aws: &Aws, name: &str) -> anyhow::Result<()> {
    aws_sdk_cloudwatchlogs::Client::new(aws.as_ref())
        .delete_log_group()
        .log_group_name(name)
        .send()
        .await
        .classify("DeleteLogGroup")
        .or_not_found()?;
    Ok(())
}

impl Resource for LogGroup {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = LogGroupOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<LogGroupOutput> {
        let client = aws_sdk_cloudwatchlogs::Client::new(aws.as_ref());
        let tags: HashMap<String, String> = self.tags.clone().into_iter().collect();
        match client
            .create_log_group()
            .log_group_name(&self.name)
            .set_tags(Some(tags))
            .send()
            .await
            .classify("CreateLogGroup")
        {
            Ok(_) => log::info!("  created log group {}", self.name),
            Err(e) if e.kind == ErrorKind::AlreadyExists => {
                log::warn!("  log group {} already exists, reusing it", self.name)
            }
            Err(e) => return Err(e.into()),
        }
        if self.retention_days.is_some() {
            self.put_retention(&client).await?;
        }
        Ok(LogGroupOutput {
            name: self.name.clone(),
            arn: self.arn(&client).await?,
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &LogGroupOutput,
    ) -> anyhow::Result<LogGroupOutput> {
        anyhow::ensure!(
            self.name == previous_local.name,
            "log group {} cannot be renamed, destroy it first",
            previous_local.name
        );
        let client = aws_sdk_cloudwatchlogs::Client::new(aws.as_ref());
        if self.retention_days != previous_local.retention_days {
            self.put_retention(&client).await?;
        }
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &LogGroupOutput) -> anyhow::Result<()> {
        delete_log_group(aws, &self.name).await
    }
}
