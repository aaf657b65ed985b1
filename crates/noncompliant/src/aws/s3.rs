//! S3 buckets and bucket level configuration.
use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketLoggingStatus, BucketVersioningStatus,
    CreateBucketConfiguration, Delete, Destination, LoggingEnabled, ObjectIdentifier,
    ReplicationConfiguration, ReplicationRule, ReplicationRuleStatus, Tag, Tagging,
    VersioningConfiguration,
};

use crate::{
    self as nc,
    aws::{
        error::{AwsError, ClassifyExt, ErrorKind, NotFoundExt},
        Aws,
    },
    remote::Remote,
    settings::Tags,
    wait::{retry, wait_for, WaitConfig},
    HasDependencies, Resource,
};

fn tagging(tags: &Tags) -> anyhow::Result<Tagging> {
    let mut tag_set = vec![];
    for (k, v) in tags {
        tag_set.push(Tag::builder().key(k).value(v).build()?);
    }
    Ok(Tagging::builder().set_tag_set(Some(tag_set)).build()?)
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct Bucket {
    pub name: String,
    pub region: String,
    pub versioning: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BucketOutput {
    pub name: String,
    pub arn: String,
    pub region: String,
}

impl Bucket {
    async fn put_versioning(&self, client: &aws_sdk_s3::Client) -> anyhow::Result<()> {
        let status = if self.versioning {
            BucketVersioningStatus::Enabled
        } else {
            BucketVersioningStatus::Suspended
        };
        log::info!("  setting versioning of {} to {status:?}", self.name);
        client
            .put_bucket_versioning()
            .bucket(&self.name)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await
            .classify("PutBucketVersioning")?;
        Ok(())
    }

    fn output(&self) -> BucketOutput {
        BucketOutput {
            name: self.name.clone(),
            arn: format!("arn:aws:s3:::{}", self.name),
            region: self.region.clone(),
        }
    }
}

/// Deletes every object version and delete marker in `bucket`.
async fn empty_bucket(client: &aws_sdk_s3::Client, bucket: &str) -> anyhow::Result<()> {
    let mut key_marker: Option<String> = None;
    let mut version_marker: Option<String> = None;
    loop {
        let page = client
            .list_object_versions()
            .bucket(bucket)
            .set_key_marker(key_marker.take())
            .set_version_id_marker(version_marker.take())
            .send()
            .await
            .classify("ListObjectVersions")?;

        let mut objects = vec![];
        for version in page.versions() {
            if let Some(key) = version.key() {
                objects.push(
                    ObjectIdentifier::builder()
                        .key(key)
                        .set_version_id(version.version_id().map(str::to_owned))
                        .build()?,
                );
            }
        }
        for marker in page.delete_markers() {
            if let Some(key) = marker.key() {
                objects.push(
                    ObjectIdentifier::builder()
                        .key(key)
                        .set_version_id(marker.version_id().map(str::to_owned))
                        .build()?,
                );
            }
        }
        if !objects.is_empty() {
            log::info!("  deleting {} object version(s) from {bucket}", objects.len());
            client
                .delete_objects()
                .bucket(bucket)
                .delete(
                    Delete::builder()
                        .set_objects(Some(objects))
                        .quiet(true)
                        .build()?,
                )
                .send()
                .await
                .classify("DeleteObjects")?;
        }

        if page.is_truncated() != Some(true) {
            return Ok(());
        }
        key_marker = page.next_key_marker().map(str::to_owned);
        version_marker = page.next_version_id_marker().map(str::to_owned);
    }
}

/// Deletes every object version and delete marker of a bucket, then the
/// bucket itself.
pub async fn delete_bucket(aws: &Aws, region: &str, name: &str) -> anyhow::Result<()> {
    let client = aws.s3_in(region);
    match empty_bucket(&client, name).await {
        Ok(()) => {}
        Err(e) if e.downcast_ref::<AwsError>().is_some_and(AwsError::is_not_found) => {
            log::info!("  bucket {} is already gone", name);
            return Ok(());
        }
        Err(e) => return Err(e),
    }
    client
        .delete_bucket()
        .bucket(name)
        .send()
        .await
        .classify("DeleteBucket")
        .or_not_found()?;
    Ok(())
}

impl Resource for Bucket {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = BucketOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<BucketOutput> {
        let client = aws.s3_in(&self.region);
        let mut request = client.create_bucket().bucket(&self.name);
        // us-east-1 is the default location and must not be named
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        match request.send().await.classify("CreateBucket") {
            Ok(_) => log::info!("  created bucket {} in {}", self.name, self.region),
            Err(e) if e.kind == ErrorKind::AlreadyExists => {
                log::warn!("  bucket {} already exists in this account, reusing it", self.name)
            }
            Err(e) => return Err(e.into()),
        }

        let client = &client;
        wait_for(&WaitConfig::default(), None, &self.name, move || async move {
            Ok(client
                .head_bucket()
                .bucket(&self.name)
                .send()
                .await
                .classify("HeadBucket")
                .or_not_found()?
                .is_some())
        })
        .await?;

        client
            .put_bucket_tagging()
            .bucket(&self.name)
            .tagging(tagging(&self.tags)?)
            .send()
            .await
            .classify("PutBucketTagging")?;
        if self.versioning {
            self.put_versioning(&client).await?;
        }
        Ok(self.output())
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        _previous_remote: &BucketOutput,
    ) -> anyhow::Result<BucketOutput> {
        anyhow::ensure!(
            self.name == previous_local.name && self.region == previous_local.region,
            "bucket {} cannot be renamed or moved, destroy it first",
            previous_local.name
        );
        let client = aws.s3_in(&self.region);
        if self.versioning != previous_local.versioning {
            self.put_versioning(&client).await?;
        }
        if self.tags != previous_local.tags {
            client
                .put_bucket_tagging()
                .bucket(&self.name)
                .tagging(tagging(&self.tags)?)
                .send()
                .await
                .classify("PutBucketTagging")?;
        }
        Ok(self.output())
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &BucketOutput) -> anyhow::Result<()> {
        delete_bucket(aws, &self.region, &self.name).await
    }
}

/// Server access logging of a bucket into another bucket.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct BucketLogging {
    pub bucket: Remote<String>,
    pub region: String,
    pub target_bucket: String,
    pub target_prefix: String,
}

impl BucketLogging {
    async fn put(&self, aws: &Aws) -> anyhow::Result<String> {
        let bucket = self.bucket.get()?;
        log::info!(
            "  logging {bucket} to s3://{}/{}",
            self.target_bucket,
            self.target_prefix
        );
        aws.s3_in(&self.region)
            .put_bucket_logging()
            .bucket(&bucket)
            .bucket_logging_status(
                BucketLoggingStatus::builder()
                    .logging_enabled(
                        LoggingEnabled::builder()
                            .target_bucket(&self.target_bucket)
                            .target_prefix(&self.target_prefix)
                            .build()?,
                    )
                    .build(),
            )
            .send()
            .await
            .classify("PutBucketLogging")?;
        Ok(bucket)
    }
}

impl Resource for BucketLogging {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = String;

    async fn create(&self, aws: &Aws) -> anyhow::Result<String> {
        self.put(aws).await
    }

    async fn update(&self, aws: &Aws, _: &Self, _: &String) -> anyhow::Result<String> {
        self.put(aws).await
    }

    async fn delete(&self, aws: &Aws, bucket: &String) -> anyhow::Result<()> {
        // An empty status turns logging off
        aws.s3_in(&self.region)
            .put_bucket_logging()
            .bucket(bucket)
            .bucket_logging_status(BucketLoggingStatus::builder().build())
            .send()
            .await
            .classify("PutBucketLogging")
            .or_not_found()?;
        Ok(())
    }
}

/// A bucket policy, as a JSON document.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct BucketPolicy {
    pub bucket: Remote<String>,
    pub region: String,
    pub policy: String,
}

impl BucketPolicy {
    async fn put(&self, aws: &Aws) -> anyhow::Result<String> {
        let bucket = self.bucket.get()?;
        aws.s3_in(&self.region)
            .put_bucket_policy()
            .bucket(&bucket)
            .policy(&self.policy)
            .send()
            .await
            .classify("PutBucketPolicy")?;
        Ok(bucket)
    }
}

impl Resource for BucketPolicy {
    type Provider = Aws;
    type Error = anyhow::Error;
    /// The bucket name, available once the policy is in place.
    type Output = String;

    async fn create(&self, aws: &Aws) -> anyhow::Result<String> {
        self.put(aws).await
    }

    async fn update(&self, aws: &Aws, _: &Self, _: &String) -> anyhow::Result<String> {
        self.put(aws).await
    }

    async fn delete(&self, aws: &Aws, bucket: &String) -> anyhow::Result<()> {
        aws.s3_in(&self.region)
            .delete_bucket_policy()
            .bucket(bucket)
            .send()
            .await
            .classify("DeleteBucketPolicy")
            .or_not_found()?;
        Ok(())
    }
}

/// Replication of every object of a bucket into a bucket in another region.
///
/// Both buckets must be versioned.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct BucketReplication {
    pub bucket: Remote<String>,
    pub region: String,
    pub role_arn: Remote<String>,
    pub destination_bucket_arn: Remote<String>,
}

impl BucketReplication {
    async fn put(&self, aws: &Aws) -> anyhow::Result<String> {
        let bucket = self.bucket.get()?;
        let destination = self.destination_bucket_arn.get()?;
        log::info!("  replicating {bucket} to {destination}");
        #[allow(deprecated)]
        let rule = ReplicationRule::builder()
            .id("replicate-everything")
            .prefix("")
            .status(ReplicationRuleStatus::Enabled)
            .destination(Destination::builder().bucket(destination).build()?)
            .build()?;
        let configuration = ReplicationConfiguration::builder()
            .role(self.role_arn.get()?)
            .rules(rule)
            .build()?;

        let client = &aws.s3_in(&self.region);
        let (bucket_name, configuration) = (&bucket, &configuration);
        // The replication role may not be usable by S3 right away
        retry(
            &WaitConfig::default(),
            None,
            "PutBucketReplication",
            |e: &AwsError| e.is_retryable() || e.code.as_deref() == Some("InvalidRequest"),
            move || async move {
                client
                    .put_bucket_replication()
                    .bucket(bucket_name)
                    .replication_configuration(configuration.clone())
                    .send()
                    .await
                    .classify("PutBucketReplication")
            },
        )
        .await?;
        Ok(bucket)
    }
}

impl Resource for BucketReplication {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = String;

    async fn create(&self, aws: &Aws) -> anyhow::Result<String> {
        self.put(aws).await
    }

    async fn update(&self, aws: &Aws, _: &Self, _: &String) -> anyhow::Result<String> {
        self.put(aws).await
    }

    async fn delete(&self, aws: &Aws, bucket: &String) -> anyhow::Result<()> {
        aws.s3_in(&self.region)
            .delete_bucket_replication()
            .bucket(bucket)
            .send()
            .await
            .classify("DeleteBucketReplication")
            .or_not_found()?;
        Ok(())
    }
}
