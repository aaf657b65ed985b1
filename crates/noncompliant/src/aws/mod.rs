//! AWS resources.
//!
//! Every resource here is a [`Resource`](crate::Resource) with
//! `Provider = Aws` and `Error = anyhow::Error`. Deleting a resource that is
//! already gone succeeds, so a teardown can always be re-run.
use aws_config::{BehaviorVersion, Region};
pub use aws_config::SdkConfig;
use anyhow::Context;

use crate::Store;

pub mod autoscaling;
pub mod cloudtrail;
pub mod config;
pub mod dynamodb;
pub mod ec2;
pub mod elasticbeanstalk;
pub mod elbv2;
pub mod error;
pub mod iam;
pub mod lambda;
pub mod logs;
pub mod opensearch;
pub mod rds;
pub mod redshift;
pub mod s3;
pub mod securityhub;
pub mod wafv2;

/// A wrapper around the AWS `SdkConfig`, the provider of every AWS resource.
#[derive(Clone, Debug)]
pub struct Aws(pub SdkConfig);

impl AsRef<SdkConfig> for Aws {
    fn as_ref(&self) -> &SdkConfig {
        &self.0
    }
}

impl Aws {
    /// Loads credentials and region from the environment, the shared config
    /// files or the instance metadata, overriding the region if given.
    pub async fn load(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        Aws(loader.load().await)
    }

    pub fn region(&self) -> Option<&str> {
        self.0.region().map(|r| r.as_ref())
    }

    /// An S3 client talking to `region`.
    ///
    /// Buckets in other regions than the configured one (replication
    /// destinations) need their own client.
    pub fn s3_in(&self, region: &str) -> aws_sdk_s3::Client {
        let config = aws_sdk_s3::config::Builder::from(&self.0)
            .region(Region::new(region.to_owned()))
            .build();
        aws_sdk_s3::Client::from_conf(config)
    }

    /// The id of the account the credentials belong to.
    pub async fn account_id(&self) -> anyhow::Result<String> {
        let identity = aws_sdk_sts::Client::new(&self.0)
            .get_caller_identity()
            .send()
            .await?;
        let account = identity
            .account()
            .context("the caller identity has no account")?;
        Ok(account.to_owned())
    }

    /// A provider with no credentials. Plans work, every call fails before
    /// a request is sent.
    #[cfg(test)]
    pub(crate) fn offline(region: &str) -> Self {
        Aws(SdkConfig::builder()
            .region(Region::new(region.to_owned()))
            .behavior_version(BehaviorVersion::latest())
            .build())
    }
}

/// Registers every AWS resource type with `store`, so that any of them left
/// in its directory can be destroyed.
pub fn register_all(store: &mut Store<Aws>) {
    store
        .register::<autoscaling::AutoScalingGroup>()
        .register::<cloudtrail::Trail>()
        .register::<dynamodb::Table>()
        .register::<ec2::LaunchTemplate>()
        .register::<ec2::SecurityGroup>()
        .register::<elbv2::TargetGroup>()
        .register::<iam::Role>()
        .register::<iam::User>()
        .register::<lambda::Function>()
        .register::<lambda::FunctionPermission>()
        .register::<logs::LogGroup>()
        .register::<rds::DbInstance>()
        .register::<s3::Bucket>()
        .register::<s3::BucketLogging>()
        .register::<s3::BucketPolicy>()
        .register::<s3::BucketReplication>();
}
