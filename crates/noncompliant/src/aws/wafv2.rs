//! WAFv2 web ACLs, deleted by the cleanup sweep.
use aws_config::Region;
use aws_sdk_wafv2::types::Scope;

use crate::{
    aws::{
        error::{AwsError, ClassifyExt, NotFoundExt},
        Aws,
    },
    wait::{retry, WaitConfig},
};

/// A web ACL as named by its ARN,
/// `arn:aws:wafv2:<region>:<account>:<scope>/webacl/<name>/<id>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebAcl {
    pub arn: String,
    pub name: String,
    pub id: String,
    /// CloudFront web ACLs have the `global` scope and live in us-east-1.
    pub cloudfront: bool,
}

impl WebAcl {
    fn scope(&self) -> Scope {
        if self.cloudfront {
            Scope::Cloudfront
        } else {
            Scope::Regional
        }
    }

    fn client(&self, aws: &Aws) -> aws_sdk_wafv2::Client {
        if self.cloudfront {
            let config = aws_sdk_wafv2::config::Builder::from(aws.as_ref())
                .region(Region::new("us-east-1"))
                .build();
            aws_sdk_wafv2::Client::from_conf(config)
        } else {
            aws_sdk_wafv2::Client::new(aws.as_ref())
        }
    }
}

/// Disassociates a regional web ACL from its load balancers and APIs, then
/// deletes it.
pub async fn delete_web_acl(aws: &Aws, acl: &WebAcl) -> anyhow::Result<()> {
    let client = &acl.client(aws);
    if !acl.cloudfront {
        let associated = client
            .list_resources_for_web_acl()
            .web_acl_arn(&acl.arn)
            .send()
            .await
            .classify("ListResourcesForWebACL")
            .or_not_found()?;
        let Some(associated) = associated else {
            log::info!("  web ACL {} is already gone", acl.name);
            return Ok(());
        };
        for resource in associated.resource_arns() {
            log::info!("  disassociating {} from {resource}", acl.name);
            client
                .disassociate_web_acl()
                .resource_arn(resource)
                .send()
                .await
                .classify("DisassociateWebACL")
                .or_not_found()?;
        }
    }

    // Every write changes the lock token, so it is read right before deleting
    retry(
        &WaitConfig::default(),
        None,
        "DeleteWebACL",
        AwsError::is_retryable,
        move || async move {
            let Some(current) = client
                .get_web_acl()
                .name(&acl.name)
                .scope(acl.scope())
                .id(&acl.id)
                .send()
                .await
                .classify("GetWebACL")
                .or_not_found()?
            else {
                return Ok(());
            };
            client
                .delete_web_acl()
                .name(&acl.name)
                .scope(acl.scope())
                .id(&acl.id)
                .set_lock_token(current.lock_token().map(str::to_owned))
                .send()
                .await
                .classify("DeleteWebACL")
                .or_not_found()?;
            Ok(())
        },
    )
    .await?;
    Ok(())
}
