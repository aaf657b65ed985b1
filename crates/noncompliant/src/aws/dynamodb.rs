//! DynamoDB tables.
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, PointInTimeRecoverySpecification,
    ScalarAttributeType, TableStatus, Tag,
};

use crate::{
    self as nc,
    aws::{
        error::{AwsError, ClassifyExt, NotFoundExt},
        Aws,
    },
    settings::Tags,
    wait::{retry, wait_for, WaitConfig},
    HasDependencies, Resource,
};

/// An on-demand table keyed by a single string partition key.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct Table {
    pub name: String,
    pub partition_key: String,
    pub point_in_time_recovery: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TableOutput {
    pub name: String,
    pub arn: String,
}

async fn table_status(
    client: &aws_sdk_dynamodb::Client,
    name: &str,
) -> anyhow::Result<Option<TableStatus>> {
    let described = client
        .describe_table()
        .table_name(name)
        .send()
        .await
        .classify("DescribeTable")
        .or_not_found()?;
    Ok(described.and_then(|d| d.table().and_then(|t| t.table_status().cloned())))
}

impl Table {
    async fn set_point_in_time_recovery(
        &self,
        client: &aws_sdk_dynamodb::Client,
    ) -> anyhow::Result<()> {
        log::info!(
            "  point-in-time recovery of {}: {}",
            self.name,
            if self.point_in_time_recovery {
                "enabled"
            } else {
                "disabled"
            }
        );
        let specification = &PointInTimeRecoverySpecification::builder()
            .point_in_time_recovery_enabled(self.point_in_time_recovery)
            .build()?;
        let name = self.name.as_str();
        // Continuous backups become available a little after the table is active
        retry(
            &WaitConfig::default(),
            None,
            "UpdateContinuousBackups",
            AwsError::is_retryable,
            move || async move {
                client
                    .update_continuous_backups()
                    .table_name(name)
                    .point_in_time_recovery_specification(specification.clone())
                    .send()
                    .await
                    .classify("UpdateContinuousBackups")
            },
        )
        .await?;
        Ok(())
    }
}

pub async fn delete_table(aws: &Aws, name: &str) -> anyhow::Result<()> {
    let client = &aws_sdk_dynamodb::Client::new(aws.as_ref());
    let deleted = retry(
        &WaitConfig::default(),
        None,
        "DeleteTable",
        AwsError::is_retryable,
        move || async move {
            client
                .delete_table()
                .table_name(name)
                .send()
                .await
                .classify("DeleteTable")
                .or_not_found()
        },
    )
    .await?;
    if deleted.is_none() {
        log::info!("  table {name} is already gone");
        return Ok(());
    }
    wait_for(&WaitConfig::default(), None, name, move || async move {
        Ok(table_status(client, name).await?.is_none())
    })
    .await
}

impl Resource for Table {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = TableOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<TableOutput> {
        let client = &aws_sdk_dynamodb::Client::new(aws.as_ref());
        let mut tags = vec![];
        for (k, v) in &self.tags {
            tags.push(Tag::builder().key(k).value(v).build()?);
        }
        let created = client
            .create_table()
            .table_name(&self.name)
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name(&self.partition_key)
                    .attribute_type(ScalarAttributeType::S)
                    .build()?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name(&self.partition_key)
                    .key_type(KeyType::Hash)
                    .build()?,
            )
            .billing_mode(BillingMode::PayPerRequest)
            .set_tags(Some(tags))
            .send()
            .await
            .classify("CreateTable")?;
        let arn = created
            .table_description()
            .and_then(|t| t.table_arn())
            .ok_or_else(|| anyhow::anyhow!("CreateTable returned no ARN for {}", self.name))?
            .to_owned();
        log::info!("  created table {arn}");

        let name = self.name.as_str();
        wait_for(&WaitConfig::default(), None, name, move || async move {
            Ok(table_status(client, name).await? == Some(TableStatus::Active))
        })
        .await?;

        if self.point_in_time_recovery {
            self.set_point_in_time_recovery(client).await?;
        }
        Ok(TableOutput {
            name: self.name.clone(),
            arn,
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &TableOutput,
    ) -> anyhow::Result<TableOutput> {
        anyhow::ensure!(
            self.name == previous_local.name && self.partition_key == previous_local.partition_key,
            "table {} can only change its point-in-time recovery, destroy it first",
            previous_local.name
        );
        if self.point_in_time_recovery != previous_local.point_in_time_recovery {
            let client = aws_sdk_dynamodb::Client::new(aws.as_ref());
            self.set_point_in_time_recovery(&client).await?;
        }
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &TableOutput) -> anyhow::Result<()> {
        delete_table(aws, &self.name).await
    }
}
