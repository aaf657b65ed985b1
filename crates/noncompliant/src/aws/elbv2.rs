//! Elastic Load Balancing target groups and load balancers.
use aws_sdk_elasticloadbalancingv2::types::{ProtocolEnum, Tag, TargetTypeEnum};

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

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct TargetGroup {
    pub name: String,
    pub vpc_id: String,
    pub port: i32,
    pub health_check_path: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TargetGroupOutput {
    pub name: String,
    pub arn: String,
}

/// Deletes a load balancer and waits until its listeners let go of their
/// target groups.
pub async fn delete_load_balancer(aws: &Aws, arn: &str) -> anyhow::Result<()> {
    let client = &aws_sdk_elasticloadbalancingv2::Client::new(aws.as_ref());
    let deleted = client
        .delete_load_balancer()
        .load_balancer_arn(arn)
        .send()
        .await
        .classify("DeleteLoadBalancer")
        .or_not_found()?;
    if deleted.is_none() {
        log::info!("  load balancer {arn} is already gone");
        return Ok(());
    }
    wait_for(&WaitConfig::default(), None, arn, move || async move {
        let described = client
            .describe_load_balancers()
            .load_balancer_arns(arn)
            .send()
            .await
            .classify("DescribeLoadBalancers")
            .or_not_found()?;
        Ok(described.map_or(true, |d| d.load_balancers().is_empty()))
    })
    .await
}

pub async fn delete_target_group(aws: &Aws, arn: &str) -> anyhow::Result<()> {
    let client = &aws_sdk_elasticloadbalancingv2::Client::new(aws.as_ref());
    // Stays in use until the group that registered it is fully gone
    retry(
        &WaitConfig::default().with_timeout(std::time::Duration::from_secs(300)),
        None,
        "DeleteTargetGroup",
        AwsError::is_retryable,
        move || async move {
            client
                .delete_target_group()
                .target_group_arn(arn)
                .send()
                .await
                .classify("DeleteTargetGroup")
                .or_not_found()
        },
    )
    .await?;
    Ok(())
}

impl Resource for TargetGroup {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = TargetGroupOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<TargetGroupOutput> {
        let mut tags = vec![];
        for (k, v) in &self.tags {
            tags.push(Tag::builder().key(k).value(v).build()?);
        }
        let created = aws_sdk_elasticloadbalancingv2::Client::new(aws.as_ref())
            .create_target_group()
            .name(&self.name)
            .protocol(ProtocolEnum::Http)
            .port(self.port)
            .vpc_id(&self.vpc_id)
            .target_type(TargetTypeEnum::Instance)
            .health_check_path(&self.health_check_path)
            .set_tags(Some(tags))
            .send()
            .await
            .classify("CreateTargetGroup")?;
        let arn = created
            .target_groups()
            .first()
            .and_then(|group| group.target_group_arn())
            .ok_or_else(|| anyhow::anyhow!("CreateTargetGroup returned no ARN for {}", self.name))?
            .to_owned();
        log::info!("  created target group {arn}");
        Ok(TargetGroupOutput {
            name: self.name.clone(),
            arn,
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &TargetGroupOutput,
    ) -> anyhow::Result<TargetGroupOutput> {
        anyhow::ensure!(
            self.name == previous_local.name
                && self.vpc_id == previous_local.vpc_id
                && self.port == previous_local.port,
            "target group {} can only change its health check, destroy it first",
            previous_local.name
        );
        aws_sdk_elasticloadbalancingv2::Client::new(aws.as_ref())
            .modify_target_group()
            .target_group_arn(&previous_remote.arn)
            .health_check_path(&self.health_check_path)
            .send()
            .await
            .classify("ModifyTargetGroup")?;
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, previous_remote: &TargetGroupOutput) -> anyhow::Result<()> {
        delete_target_group(aws, &previous_remote.arn).await
    }
}
