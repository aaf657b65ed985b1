//! Auto Scaling groups.
use aws_sdk_autoscaling::types::{LaunchTemplateSpecification, LifecycleState, Tag};

use crate::{
    self as nc,
    aws::{
        error::{AwsError, ClassifyExt, NotFoundExt},
        Aws,
    },
    remote::Remote,
    settings::Tags,
    wait::{retry, wait_for, WaitConfig},
    HasDependencies, Resource,
};

/// How the group decides an instance is unhealthy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, HasDependencies,
)]
pub enum HealthCheckType {
    /// Only EC2 status checks.
    Ec2,
    /// Status checks plus the target group health checks.
    Elb,
}

impl HealthCheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthCheckType::Ec2 => "EC2",
            HealthCheckType::Elb => "ELB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct AutoScalingGroup {
    pub name: String,
    pub launch_template_id: Remote<String>,
    pub subnet_ids: Vec<String>,
    pub target_group_arns: Vec<Remote<String>>,
    pub health_check_type: HealthCheckType,
    pub health_check_grace_period: i32,
    pub min_size: i32,
    pub max_size: i32,
    pub desired_capacity: i32,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AutoScalingGroupOutput {
    pub name: String,
    pub arn: String,
}

impl AutoScalingGroup {
    fn target_group_arns(&self) -> anyhow::Result<Vec<String>> {
        let mut arns = vec![];
        for arn in &self.target_group_arns {
            arns.push(arn.get()?);
        }
        Ok(arns)
    }

    /// Describes the group, `None` once it no longer exists.
    async fn describe(
        client: &aws_sdk_autoscaling::Client,
        name: &str,
    ) -> anyhow::Result<Option<aws_sdk_autoscaling::types::AutoScalingGroup>> {
        let described = client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .classify("DescribeAutoScalingGroups")?;
        Ok(described.auto_scaling_groups().first().cloned())
    }

    async fn wait_in_service(&self, client: &aws_sdk_autoscaling::Client) -> anyhow::Result<()> {
        let desired = usize::try_from(self.desired_capacity).unwrap_or_default();
        let name = self.name.as_str();
        wait_for(&WaitConfig::slow(), None, name, move || async move {
            let Some(group) = Self::describe(client, name).await? else {
                return Ok(false);
            };
            let in_service = group
                .instances()
                .iter()
                .filter(|i| i.lifecycle_state() == Some(&LifecycleState::InService))
                .count();
            log::debug!("  {name} has {in_service}/{desired} instance(s) in service");
            Ok(in_service >= desired)
        })
        .await
    }
}

/// Force deletes a group, terminating its instances, and waits until it is gone.
pub async fn delete_group(aws: &Aws, name: &str) -> anyhow::Result<()> {
    let client = &aws_sdk_autoscaling::Client::new(aws.as_ref());
    let deleted = retry(
        &WaitConfig::default(),
        None,
        "DeleteAutoScalingGroup",
        AwsError::is_retryable,
        move || async move {
            client
                .delete_auto_scaling_group()
                .auto_scaling_group_name(name)
                .force_delete(true)
                .send()
                .await
                .classify("DeleteAutoScalingGroup")
                .or_not_found()
        },
    )
    .await?;
    if deleted.is_none() {
        log::info!("  auto scaling group {name} is already gone");
        return Ok(());
    }
    // Terminating instances keep the group around for minutes
    wait_for(&WaitConfig::slow(), None, name, move || async move {
        Ok(AutoScalingGroup::describe(client, name).await?.is_none())
    })
    .await
}

impl Resource for AutoScalingGroup {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = AutoScalingGroupOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<AutoScalingGroupOutput> {
        let client = aws_sdk_autoscaling::Client::new(aws.as_ref());
        let mut tags = vec![];
        for (k, v) in &self.tags {
            tags.push(
                Tag::builder()
                    .key(k)
                    .value(v)
                    .propagate_at_launch(true)
                    .build()?,
            );
        }
        client
            .create_auto_scaling_group()
            .auto_scaling_group_name(&self.name)
            .launch_template(
                LaunchTemplateSpecification::builder()
                    .launch_template_id(self.launch_template_id.get()?)
                    .version("$Latest")
                    .build(),
            )
            .vpc_zone_identifier(self.subnet_ids.join(","))
            .set_target_group_arns(Some(self.target_group_arns()?))
            .health_check_type(self.health_check_type.as_str())
            .health_check_grace_period(self.health_check_grace_period)
            .min_size(self.min_size)
            .max_size(self.max_size)
            .desired_capacity(self.desired_capacity)
            .set_tags(Some(tags))
            .send()
            .await
            .classify("CreateAutoScalingGroup")?;
        log::info!(
            "  created auto scaling group {} with {} health checks",
            self.name,
            self.health_check_type.as_str()
        );
        self.wait_in_service(&client).await?;
        let arn = Self::describe(&client, &self.name)
            .await?
            .and_then(|group| group.auto_scaling_group_arn().map(str::to_owned))
            .ok_or_else(|| anyhow::anyhow!("auto scaling group {} has no ARN", self.name))?;
        Ok(AutoScalingGroupOutput {
            name: self.name.clone(),
            arn,
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &AutoScalingGroupOutput,
    ) -> anyhow::Result<AutoScalingGroupOutput> {
        anyhow::ensure!(
            self.name == previous_local.name,
            "auto scaling group {} cannot be renamed, destroy it first",
            previous_local.name
        );
        let client = aws_sdk_autoscaling::Client::new(aws.as_ref());
        log::info!(
            "  setting health check type of {} to {}",
            self.name,
            self.health_check_type.as_str()
        );
        client
            .update_auto_scaling_group()
            .auto_scaling_group_name(&self.name)
            .launch_template(
                LaunchTemplateSpecification::builder()
                    .launch_template_id(self.launch_template_id.get()?)
                    .version("$Latest")
                    .build(),
            )
            .vpc_zone_identifier(self.subnet_ids.join(","))
            .health_check_type(self.health_check_type.as_str())
            .health_check_grace_period(self.health_check_grace_period)
            .min_size(self.min_size)
            .max_size(self.max_size)
            .desired_capacity(self.desired_capacity)
            .send()
            .await
            .classify("UpdateAutoScalingGroup")?;

        let current = self.target_group_arns()?;
        let previous = previous_local.target_group_arns().unwrap_or_default();
        let detached: Vec<String> = previous
            .iter()
            .filter(|arn| !current.contains(arn))
            .cloned()
            .collect();
        if !detached.is_empty() {
            client
                .detach_load_balancer_target_groups()
                .auto_scaling_group_name(&self.name)
                .set_target_group_arns(Some(detached))
                .send()
                .await
                .classify("DetachLoadBalancerTargetGroups")?;
        }
        let attached: Vec<String> = current
            .iter()
            .filter(|arn| !previous.contains(arn))
            .cloned()
            .collect();
        if !attached.is_empty() {
            client
                .attach_load_balancer_target_groups()
                .auto_scaling_group_name(&self.name)
                .set_target_group_arns(Some(attached))
                .send()
                .await
                .classify("AttachLoadBalancerTargetGroups")?;
        }
        self.wait_in_service(&client).await?;
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &AutoScalingGroupOutput) -> anyhow::Result<()> {
        delete_group(aws, &self.name).await
    }
}
