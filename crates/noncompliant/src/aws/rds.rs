//! RDS database instances.
use aws_sdk_rds::types::Tag;

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

/// A single-AZ database instance.
///
/// The master password is generated and kept in Secrets Manager by RDS, so
/// no secret ever reaches the store.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct DbInstance {
    pub identifier: String,
    pub engine: String,
    pub instance_class: String,
    pub allocated_storage: i32,
    pub master_username: String,
    pub storage_encrypted: bool,
    pub deletion_protection: bool,
    pub tags: Tags,
}

impl DbInstance {
    /// The smallest MySQL instance that is still realistic.
    pub fn small_mysql(identifier: impl Into<String>, tags: Tags) -> Self {
        DbInstance {
            identifier: identifier.into(),
            engine: "mysql".into(),
            instance_class: "db.t3.micro".into(),
            allocated_storage: 20,
            master_username: "admin".into(),
            storage_encrypted: true,
            deletion_protection: false,
            tags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DbInstanceOutput {
    pub identifier: String,
    pub arn: String,
    /// The `db-...` id AWS Config reports instances by.
    pub resource_id: String,
}

/// Status of the instance, `None` once it no longer exists.
async fn status(client: &aws_sdk_rds::Client, identifier: &str) -> anyhow::Result<Option<String>> {
    let described = client
        .describe_db_instances()
        .db_instance_identifier(identifier)
        .send()
        .await
        .classify("DescribeDBInstances")
        .or_not_found()?;
    Ok(described.and_then(|d| {
        d.db_instances()
            .first()
            .and_then(|i| i.db_instance_status().map(str::to_owned))
    }))
}

async fn wait_available(client: &aws_sdk_rds::Client, identifier: &str) -> anyhow::Result<()> {
    wait_for(&WaitConfig::slow(), None, identifier, move || async move {
        let status = status(client, identifier).await?;
        log::debug!("  {identifier} is {status:?}");
        Ok(status.as_deref() == Some("available"))
    })
    .await
}

async fn set_deletion_protection(
    client: &aws_sdk_rds::Client,
    identifier: &str,
    enabled: bool,
) -> Result<Option<()>, AwsError> {
    log::info!("  deletion protection of {identifier}: {enabled}");
    client
        .modify_db_instance()
        .db_instance_identifier(identifier)
        .deletion_protection(enabled)
        .apply_immediately(true)
        .send()
        .await
        .classify("ModifyDBInstance")
        .or_not_found()
        .map(|found| found.map(|_| ()))
}

/// Lifts deletion protection, deletes the instance without a final
/// snapshot and waits until it is gone.
pub async fn delete_instance(aws: &Aws, identifier: &str) -> anyhow::Result<()> {
    let client = &aws_sdk_rds::Client::new(aws.as_ref());
    // Protection may have been turned on by hand, and
    // an instance mid transition refuses modifications for a while
    let found = retry(
        &WaitConfig::slow(),
        None,
        "ModifyDBInstance",
        AwsError::is_retryable,
        move || set_deletion_protection(client, identifier, false),
    )
    .await?;
    if found.is_none() {
        log::info!("  database instance {identifier} is already gone");
        return Ok(());
    }
    retry(
        &WaitConfig::slow(),
        None,
        "DeleteDBInstance",
        AwsError::is_retryable,
        move || async move {
            client
                .delete_db_instance()
                .db_instance_identifier(identifier)
                .skip_final_snapshot(true)
                .delete_automated_backups(true)
                .send()
                .await
                .classify("DeleteDBInstance")
                .or_not_found()
        },
    )
    .await?;
    log::info!("  deleting database instance {identifier}, this takes several minutes");
    wait_for(&WaitConfig::slow(), None, identifier, move || async move {
        Ok(status(client, identifier).await?.is_none())
    })
    .await
}

impl Resource for DbInstance {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = DbInstanceOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<DbInstanceOutput> {
        let client = aws_sdk_rds::Client::new(aws.as_ref());
        let tags = self
            .tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();
        client
            .create_db_instance()
            .db_instance_identifier(&self.identifier)
            .engine(&self.engine)
            .db_instance_class(&self.instance_class)
            .allocated_storage(self.allocated_storage)
            .master_username(&self.master_username)
            .manage_master_user_password(true)
            .storage_encrypted(self.storage_encrypted)
            .deletion_protection(self.deletion_protection)
            .publicly_accessible(false)
            .backup_retention_period(0)
            .set_tags(Some(tags))
            .send()
            .await
            .classify("CreateDBInstance")?;
        log::info!(
            "  creating database instance {}, this takes several minutes",
            self.identifier
        );
        wait_available(&client, &self.identifier).await?;

        let described = client
            .describe_db_instances()
            .db_instance_identifier(&self.identifier)
            .send()
            .await
            .classify("DescribeDBInstances")?;
        let instance = described
            .db_instances()
            .first()
            .ok_or_else(|| anyhow::anyhow!("database instance {} vanished", self.identifier))?;
        Ok(DbInstanceOutput {
            identifier: self.identifier.clone(),
            arn: instance.db_instance_arn().unwrap_or_default().to_owned(),
            resource_id: instance.dbi_resource_id().unwrap_or_default().to_owned(),
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &DbInstanceOutput,
    ) -> anyhow::Result<DbInstanceOutput> {
        let mut unchanged = previous_local.clone();
        unchanged.deletion_protection = self.deletion_protection;
        unchanged.tags = self.tags.clone();
        anyhow::ensure!(
            &unchanged == self,
            "database instance {} can only change its deletion protection, destroy it first",
            previous_local.identifier
        );
        let client = aws_sdk_rds::Client::new(aws.as_ref());
        if self.deletion_protection != previous_local.deletion_protection {
            set_deletion_protection(&client, &self.identifier, self.deletion_protection).await?;
            wait_available(&client, &self.identifier).await?;
        }
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &DbInstanceOutput) -> anyhow::Result<()> {
        delete_instance(aws, &self.identifier).await
    }
}
