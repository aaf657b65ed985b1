//! OpenSearch Service domains, deleted by the cleanup sweep.
use crate::{
    aws::{
        error::{ClassifyExt, NotFoundExt},
        Aws,
    },
    wait::{wait_for, WaitConfig},
};

/// Deletes a domain and waits until it no longer describes.
pub async fn delete_domain(aws: &Aws, name: &str) -> anyhow::Result<()> {
    let client = &aws_sdk_opensearch::Client::new(aws.as_ref());
    let deleted = client
        .delete_domain()
        .domain_name(name)
        .send()
        .await
        .classify("DeleteDomain")
        .or_not_found()?;
    if deleted.is_none() {
        log::info!("  domain {name} is already gone");
        return Ok(());
    }
    wait_for(&WaitConfig::slow(), None, name, move || async move {
        let described = client
            .describe_domain()
            .domain_name(name)
            .send()
            .await
            .classify("DescribeDomain")
            .or_not_found()?;
        Ok(described.is_none())
    })
    .await
}
