//! EC2 security groups, launch templates, instances and VPC lookups.
use aws_sdk_ec2::types::{
    Filter, InstanceStateName, InstanceType, IpPermission, IpRange, RequestLaunchTemplateData,
    ResourceType, Tag, TagSpecification,
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

fn tag_specification(resource_type: ResourceType, tags: &Tags) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource_type)
        .set_tags(Some(
            tags.iter()
                .map(|(k, v)| Tag::builder().key(k).value(v).build())
                .collect(),
        ))
        .build()
}

/// Tags to put and tags to remove to get from `previous` to `tags`.
fn tag_changes(previous: &Tags, tags: &Tags) -> (Vec<Tag>, Vec<Tag>) {
    let put = tags
        .iter()
        .filter(|(k, v)| previous.get(*k) != Some(*v))
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect();
    let removed = previous
        .keys()
        .filter(|k| !tags.contains_key(*k))
        .map(|k| Tag::builder().key(k).build())
        .collect();
    (put, removed)
}

/// Ids of the subnets in `vpc_id`.
pub async fn subnets_in_vpc(aws: &Aws, vpc_id: &str) -> anyhow::Result<Vec<String>> {
    let described = aws_sdk_ec2::Client::new(aws.as_ref())
        .describe_subnets()
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .send()
        .await
        .classify("DescribeSubnets")?;
    let mut subnets: Vec<String> = described
        .subnets()
        .iter()
        .filter_map(|subnet| subnet.subnet_id())
        .map(str::to_owned)
        .collect();
    subnets.sort();
    anyhow::ensure!(!subnets.is_empty(), "VPC {vpc_id} has no subnets");
    Ok(subnets)
}

/// Terminates an instance and waits until it is terminated, which releases
/// its network interfaces and security groups.
pub async fn terminate_instance(aws: &Aws, id: &str) -> anyhow::Result<()> {
    let client = &aws_sdk_ec2::Client::new(aws.as_ref());
    let terminated = client
        .terminate_instances()
        .instance_ids(id)
        .send()
        .await
        .classify("TerminateInstances")
        .or_not_found()?;
    if terminated.is_none() {
        log::info!("  instance {id} is already gone");
        return Ok(());
    }
    wait_for(&WaitConfig::slow(), None, id, move || async move {
        let described = client
            .describe_instances()
            .instance_ids(id)
            .send()
            .await
            .classify("DescribeInstances")
            .or_not_found()?;
        let state = described.as_ref().and_then(|d| {
            d.reservations()
                .iter()
                .flat_map(|r| r.instances())
                .find_map(|i| i.state().and_then(|s| s.name()).cloned())
        });
        Ok(matches!(state, None | Some(InstanceStateName::Terminated)))
    })
    .await
}

/// One inbound rule of a security group.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct IngressRule {
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub cidr: String,
    pub description: String,
}

impl IngressRule {
    /// SSH from anywhere.
    pub fn ssh_from_anywhere() -> Self {
        IngressRule {
            protocol: "tcp".into(),
            from_port: 22,
            to_port: 22,
            cidr: "0.0.0.0/0".into(),
            description: "SSH from anywhere".into(),
        }
    }

    fn permission(&self) -> IpPermission {
        IpPermission::builder()
            .ip_protocol(&self.protocol)
            .from_port(self.from_port)
            .to_port(self.to_port)
            .ip_ranges(
                IpRange::builder()
                    .cidr_ip(&self.cidr)
                    .description(&self.description)
                    .build(),
            )
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct SecurityGroup {
    pub name: String,
    pub description: String,
    pub vpc_id: String,
    pub ingress: Vec<IngressRule>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SecurityGroupOutput {
    pub id: String,
    pub name: String,
}

async fn authorize(
    client: &aws_sdk_ec2::Client,
    group_id: &str,
    rules: &[&IngressRule],
) -> anyhow::Result<()> {
    if rules.is_empty() {
        return Ok(());
    }
    log::info!("  authorizing {} ingress rule(s) on {group_id}", rules.len());
    client
        .authorize_security_group_ingress()
        .group_id(group_id)
        .set_ip_permissions(Some(rules.iter().map(|r| r.permission()).collect()))
        .send()
        .await
        .classify("AuthorizeSecurityGroupIngress")?;
    Ok(())
}

pub async fn delete_security_group(aws: &Aws, group_id: &str) -> anyhow::Result<()> {
    let client = &aws_sdk_ec2::Client::new(aws.as_ref());
    // Network interfaces of deleted instances release the group late
    retry(
        &WaitConfig::default().with_timeout(std::time::Duration::from_secs(300)),
        None,
        "DeleteSecurityGroup",
        AwsError::is_retryable,
        move || async move {
            client
                .delete_security_group()
                .group_id(group_id)
                .send()
                .await
                .classify("DeleteSecurityGroup")
                .or_not_found()
        },
    )
    .await?;
    Ok(())
}

impl Resource for SecurityGroup {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = SecurityGroupOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<SecurityGroupOutput> {
        let client = aws_sdk_ec2::Client::new(aws.as_ref());
        let created = client
            .create_security_group()
            .group_name(&self.name)
            .description(&self.description)
            .vpc_id(&self.vpc_id)
            .tag_specifications(tag_specification(ResourceType::SecurityGroup, &self.tags))
            .send()
            .await
            .classify("CreateSecurityGroup")?;
        let id = created
            .group_id()
            .ok_or_else(|| anyhow::anyhow!("CreateSecurityGroup returned no id for {}", self.name))?
            .to_owned();
        log::info!("  created security group {id}");
        authorize(&client, &id, &self.ingress.iter().collect::<Vec<_>>()).await?;
        Ok(SecurityGroupOutput {
            id,
            name: self.name.clone(),
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &SecurityGroupOutput,
    ) -> anyhow::Result<SecurityGroupOutput> {
        anyhow::ensure!(
            self.name == previous_local.name && self.vpc_id == previous_local.vpc_id,
            "security group {} cannot be renamed or moved, destroy it first",
            previous_local.name
        );
        let client = aws_sdk_ec2::Client::new(aws.as_ref());
        let group_id = &previous_remote.id;
        let removed: Vec<IpPermission> = previous_local
            .ingress
            .iter()
            .filter(|rule| !self.ingress.contains(rule))
            .map(IngressRule::permission)
            .collect();
        if !removed.is_empty() {
            log::info!("  revoking {} ingress rule(s) on {group_id}", removed.len());
            client
                .revoke_security_group_ingress()
                .group_id(group_id)
                .set_ip_permissions(Some(removed))
                .send()
                .await
                .classify("RevokeSecurityGroupIngress")
                .or_not_found()?;
        }
        let added: Vec<&IngressRule> = self
            .ingress
            .iter()
            .filter(|rule| !previous_local.ingress.contains(rule))
            .collect();
        authorize(&client, group_id, &added).await?;
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, previous_remote: &SecurityGroupOutput) -> anyhow::Result<()> {
        delete_security_group(aws, &previous_remote.id).await
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct LaunchTemplate {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LaunchTemplateOutput {
    pub id: String,
    pub name: String,
}

impl LaunchTemplate {
    fn data(&self) -> RequestLaunchTemplateData {
        RequestLaunchTemplateData::builder()
            .image_id(&self.image_id)
            .instance_type(InstanceType::from(self.instance_type.as_str()))
            .build()
    }
}

pub async fn delete_launch_template(aws: &Aws, id: &str) -> anyhow::Result<()> {
    aws_sdk_ec2::Client::new(aws.as_ref())
        .delete_launch_template()
        .launch_template_id(id)
        .send()
        .await
        .classify("DeleteLaunchTemplate")
        .or_not_found()?;
    Ok(())
}

impl Resource for LaunchTemplate {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = LaunchTemplateOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<LaunchTemplateOutput> {
        let created = aws_sdk_ec2::Client::new(aws.as_ref())
            .create_launch_template()
            .launch_template_name(&self.name)
            .launch_template_data(self.data())
            .tag_specifications(tag_specification(ResourceType::LaunchTemplate, &self.tags))
            .send()
            .await
            .classify("CreateLaunchTemplate")?;
        let id = created
            .launch_template()
            .and_then(|template| template.launch_template_id())
            .ok_or_else(|| anyhow::anyhow!("CreateLaunchTemplate returned no id for {}", self.name))?
            .to_owned();
        log::info!("  created launch template {id}");
        Ok(LaunchTemplateOutput {
            id,
            name: self.name.clone(),
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &LaunchTemplateOutput,
    ) -> anyhow::Result<LaunchTemplateOutput> {
        anyhow::ensure!(
            self.name == previous_local.name,
            "launch template {} cannot be renamed, destroy it first",
            previous_local.name
        );
        let client = aws_sdk_ec2::Client::new(aws.as_ref());
        if self.image_id != previous_local.image_id
            || self.instance_type != previous_local.instance_type
        {
            let created = client
                .create_launch_template_version()
                .launch_template_id(&previous_remote.id)
                .launch_template_data(self.data())
                .send()
                .await
                .classify("CreateLaunchTemplateVersion")?;
            let version = created
                .launch_template_version()
                .and_then(|v| v.version_number())
                .ok_or_else(|| anyhow::anyhow!("no version number for {}", previous_remote.id))?;
            log::info!("  making version {version} of {} the default", previous_remote.id);
            client
                .modify_launch_template()
                .launch_template_id(&previous_remote.id)
                .default_version(version.to_string())
                .send()
                .await
                .classify("ModifyLaunchTemplate")?;
        }

        // Tags live on the template itself, not on its versions
        let (put, removed) = tag_changes(&previous_local.tags, &self.tags);
        if !put.is_empty() {
            client
                .create_tags()
                .resources(&previous_remote.id)
                .set_tags(Some(put))
                .send()
                .await
                .classify("CreateTags")?;
        }
        if !removed.is_empty() {
            client
                .delete_tags()
                .resources(&previous_remote.id)
                .set_tags(Some(removed))
                .send()
                .await
                .classify("DeleteTags")?;
        }
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, previous_remote: &LaunchTemplateOutput) -> anyhow::Result<()> {
        delete_launch_template(aws, &previous_remote.id).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ssh_rule_is_open_to_the_world() {
        let permission = IngressRule::ssh_from_anywhere().permission();
        assert_eq!(Some("tcp"), permission.ip_protocol());
        assert_eq!(Some(22), permission.from_port());
        assert_eq!(
            Some("0.0.0.0/0"),
            permission.ip_ranges().first().and_then(|r| r.cidr_ip())
        );
    }

    #[test]
    fn only_changed_tags_are_touched() {
        let previous = Tags::from([
            ("noncompliant:rule".to_owned(), "asg".to_owned()),
            ("owner".to_owned(), "ci".to_owned()),
            ("stale".to_owned(), "yes".to_owned()),
        ]);
        let tags = Tags::from([
            ("noncompliant:rule".to_owned(), "asg".to_owned()),
            ("owner".to_owned(), "qa".to_owned()),
            ("team".to_owned(), "sec".to_owned()),
        ]);
        let (put, removed) = tag_changes(&previous, &tags);
        let put: Vec<_> = put.iter().map(|t| (t.key(), t.value())).collect();
        assert_eq!(
            vec![(Some("owner"), Some("qa")), (Some("team"), Some("sec"))],
            put
        );
        let removed: Vec<_> = removed.iter().map(|t| t.key()).collect();
        assert_eq!(vec![Some("stale")], removed);

        let (put, removed) = tag_changes(&tags, &tags);
        assert!(put.is_empty() && removed.is_empty());
    }
}
