//! IAM roles and users.
use std::collections::BTreeMap;

use aws_sdk_iam::types::Tag;

use crate::{
    self as nc,
    aws::{
        error::{ClassifyExt, NotFoundExt},
        Aws,
    },
    settings::Tags,
    wait::{wait_for, WaitConfig},
    HasDependencies, Resource,
};

fn iam_tags(tags: &Tags) -> anyhow::Result<Vec<Tag>> {
    let mut iam_tags = vec![];
    for (k, v) in tags {
        iam_tags.push(Tag::builder().key(k).value(v).build()?);
    }
    Ok(iam_tags)
}

/// A trust policy letting `service` assume a role.
pub fn service_trust_policy(service: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

/// A policy document made of a single `Allow` statement.
pub fn allow_policy(actions: &[&str], resources: &[String]) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": actions,
            "Resource": resources
        }]
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct Role {
    pub name: String,
    pub assume_role_policy: String,
    /// Inline policies by name.
    pub policies: BTreeMap<String, String>,
    pub managed_policy_arns: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RoleOutput {
    pub name: String,
    pub arn: String,
}

impl Role {
    async fn put_policy(
        &self,
        client: &aws_sdk_iam::Client,
        name: &str,
        document: &str,
    ) -> anyhow::Result<()> {
        log::info!("  putting inline policy {name} on {}", self.name);
        client
            .put_role_policy()
            .role_name(&self.name)
            .policy_name(name)
            .policy_document(document)
            .send()
            .await
            .classify("PutRolePolicy")?;
        Ok(())
    }

    async fn attach(&self, client: &aws_sdk_iam::Client, arn: &str) -> anyhow::Result<()> {
        log::info!("  attaching {arn} to {}", self.name);
        client
            .attach_role_policy()
            .role_name(&self.name)
            .policy_arn(arn)
            .send()
            .await
            .classify("AttachRolePolicy")?;
        Ok(())
    }
}

/// Deletes a role along with every policy attached to it.
pub async fn delete_role(aws: &Aws, name: &str) -> anyhow::Result<()> {
    let client = aws_sdk_iam::Client::new(aws.as_ref());
    // Policies attached outside of this definition would block deletion too
    let Some(inline) = client
        .list_role_policies()
        .role_name(name)
        .send()
        .await
        .classify("ListRolePolicies")
        .or_not_found()?
    else {
        log::info!("  role {} is already gone", name);
        return Ok(());
    };
    for policy in inline.policy_names() {
        client
            .delete_role_policy()
            .role_name(name)
            .policy_name(policy)
            .send()
            .await
            .classify("DeleteRolePolicy")
            .or_not_found()?;
    }
    let attached = client
        .list_attached_role_policies()
        .role_name(name)
        .send()
        .await
        .classify("ListAttachedRolePolicies")?;
    for arn in attached.attached_policies().iter().filter_map(|p| p.policy_arn()) {
        client
            .detach_role_policy()
            .role_name(name)
            .policy_arn(arn)
            .send()
            .await
            .classify("DetachRolePolicy")
            .or_not_found()?;
    }
    client
        .delete_role()
        .role_name(name)
        .send()
        .await
        .classify("DeleteRole")
        .or_not_found()?;
    Ok(())
}

impl Resource for Role {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = RoleOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<RoleOutput> {
        let client = aws_sdk_iam::Client::new(aws.as_ref());
        let created = client
            .create_role()
            .role_name(&self.name)
            .assume_role_policy_document(&self.assume_role_policy)
            .set_tags(Some(iam_tags(&self.tags)?))
            .send()
            .await
            .classify("CreateRole")?;
        let arn = created
            .role()
            .map(|role| role.arn().to_owned())
            .ok_or_else(|| anyhow::anyhow!("CreateRole returned no role for {}", self.name))?;
        log::info!("  created role {arn}");

        for (name, document) in &self.policies {
            self.put_policy(&client, name, document).await?;
        }
        for arn in &self.managed_policy_arns {
            self.attach(&client, arn).await?;
        }

        // IAM is eventually consistent, readers in other services may still
        // miss the role after this.
        let client = &client;
        wait_for(&WaitConfig::default(), None, &self.name, move || async move {
            Ok(client
                .get_role()
                .role_name(&self.name)
                .send()
                .await
                .classify("GetRole")
                .or_not_found()?
                .is_some())
        })
        .await?;

        Ok(RoleOutput {
            name: self.name.clone(),
            arn,
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &RoleOutput,
    ) -> anyhow::Result<RoleOutput> {
        anyhow::ensure!(
            self.name == previous_local.name,
            "role {} cannot be renamed, destroy it first",
            previous_local.name
        );
        let client = aws_sdk_iam::Client::new(aws.as_ref());
        if self.assume_role_policy != previous_local.assume_role_policy {
            client
                .update_assume_role_policy()
                .role_name(&self.name)
                .policy_document(&self.assume_role_policy)
                .send()
                .await
                .classify("UpdateAssumeRolePolicy")?;
        }
        for name in previous_local.policies.keys() {
            if !self.policies.contains_key(name) {
                client
                    .delete_role_policy()
                    .role_name(&self.name)
                    .policy_name(name)
                    .send()
                    .await
                    .classify("DeleteRolePolicy")
                    .or_not_found()?;
            }
        }
        for (name, document) in &self.policies {
            if previous_local.policies.get(name) != Some(document) {
                self.put_policy(&client, name, document).await?;
            }
        }
        for arn in &previous_local.managed_policy_arns {
            if !self.managed_policy_arns.contains(arn) {
                client
                    .detach_role_policy()
                    .role_name(&self.name)
                    .policy_arn(arn)
                    .send()
                    .await
                    .classify("DetachRolePolicy")
                    .or_not_found()?;
            }
        }
        for arn in &self.managed_policy_arns {
            if !previous_local.managed_policy_arns.contains(arn) {
                self.attach(&client, arn).await?;
            }
        }
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &RoleOutput) -> anyhow::Result<()> {
        delete_role(aws, &self.name).await
    }
}

/// An IAM user, optionally with managed policies attached directly.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct User {
    pub name: String,
    pub managed_policy_arns: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UserOutput {
    pub name: String,
    pub arn: String,
    /// The `AIDA...` id AWS Config reports users by.
    pub user_id: String,
}

async fn attach_user_policy(
    client: &aws_sdk_iam::Client,
    user: &str,
    arn: &str,
) -> anyhow::Result<()> {
    log::info!("  attaching {arn} to user {user}");
    client
        .attach_user_policy()
        .user_name(user)
        .policy_arn(arn)
        .send()
        .await
        .classify("AttachUserPolicy")?;
    Ok(())
}

async fn detach_user_policy(
    client: &aws_sdk_iam::Client,
    user: &str,
    arn: &str,
) -> anyhow::Result<()> {
    log::info!("  detaching {arn} from user {user}");
    client
        .detach_user_policy()
        .user_name(user)
        .policy_arn(arn)
        .send()
        .await
        .classify("DetachUserPolicy")
        .or_not_found()?;
    Ok(())
}

/// Deletes a user along with every policy attached to it.
pub async fn delete_user(aws: &Aws, name: &str) -> anyhow::Result<()> {
    let client = aws_sdk_iam::Client::new(aws.as_ref());
    let Some(attached) = client
        .list_attached_user_policies()
        .user_name(name)
        .send()
        .await
        .classify("ListAttachedUserPolicies")
        .or_not_found()?
    else {
        log::info!("  user {} is already gone", name);
        return Ok(());
    };
    for arn in attached.attached_policies().iter().filter_map(|p| p.policy_arn()) {
        detach_user_policy(&client, name, arn).await?;
    }
    let inline = client
        .list_user_policies()
        .user_name(name)
        .send()
        .await
        .classify("ListUserPolicies")?;
    for policy in inline.policy_names() {
        client
            .delete_user_policy()
            .user_name(name)
            .policy_name(policy)
            .send()
            .await
            .classify("DeleteUserPolicy")
            .or_not_found()?;
    }
    client
        .delete_user()
        .user_name(name)
        .send()
        .await
        .classify("DeleteUser")
        .or_not_found()?;
    Ok(())
}

impl Resource for User {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = UserOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<UserOutput> {
        let client = aws_sdk_iam::Client::new(aws.as_ref());
        let created = client
            .create_user()
            .user_name(&self.name)
            .set_tags(Some(iam_tags(&self.tags)?))
            .send()
            .await
            .classify("CreateUser")?;
        let user = created
            .user()
            .ok_or_else(|| anyhow::anyhow!("CreateUser returned no user for {}", self.name))?;
        log::info!("  created user {}", user.arn());
        for arn in &self.managed_policy_arns {
            attach_user_policy(&client, &self.name, arn).await?;
        }
        Ok(UserOutput {
            name: self.name.clone(),
            arn: user.arn().to_owned(),
            user_id: user.user_id().to_owned(),
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &UserOutput,
    ) -> anyhow::Result<UserOutput> {
        anyhow::ensure!(
            self.name == previous_local.name,
            "user {} cannot be renamed, destroy it first",
            previous_local.name
        );
        let client = aws_sdk_iam::Client::new(aws.as_ref());
        for arn in &previous_local.managed_policy_arns {
            if !self.managed_policy_arns.contains(arn) {
                detach_user_policy(&client, &self.name, arn).await?;
            }
        }
        for arn in &self.managed_policy_arns {
            if !previous_local.managed_policy_arns.contains(arn) {
                attach_user_policy(&client, &self.name, arn).await?;
            }
        }
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &UserOutput) -> anyhow::Result<()> {
        delete_user(aws, &self.name).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn policy_documents() {
        let trust: serde_json::Value =
            serde_json::from_str(&service_trust_policy("lambda.amazonaws.com")).unwrap();
        assert_eq!(
            "lambda.amazonaws.com",
            trust["Statement"][0]["Principal"]["Service"]
        );

        let policy: serde_json::Value = serde_json::from_str(&allow_policy(
            &["logs:CreateLogStream", "logs:PutLogEvents"],
            &["arn:aws:logs:us-east-1:123456789012:log-group:trail:*".to_owned()],
        ))
        .unwrap();
        assert_eq!("Allow", policy["Statement"][0]["Effect"]);
        assert_eq!(2, policy["Statement"][0]["Action"].as_array().unwrap().len());
    }
}
