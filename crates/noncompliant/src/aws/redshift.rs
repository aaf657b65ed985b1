//! Redshift clusters, deleted by the cleanup sweep.
use crate::{
    aws::{
        error::{AwsError, ClassifyExt, NotFoundExt},
        Aws,
    },
    wait::{retry, wait_for, WaitConfig},
};

/// Deletes a cluster without a final snapshot and waits until it is gone.
///
/// A cluster that is still being created or resized refuses the delete, so
/// that is retried.
pub async fn delete_cluster(aws: &Aws, identifier: &str) -> anyhow::Result<()> {
    let client = &aws_sdk_redshift::Client::new(aws.as_ref());
    let deleted = retry(
        &WaitConfig::slow(),
        None,
        "DeleteCluster",
        AwsError::is_retryable,
        move || async move {
            client
                .delete_cluster()
                .cluster_identifier(identifier)
                .skip_final_cluster_snapshot(true)
                .send()
                .await
                .classify("DeleteCluster")
                .or_not_found()
        },
    )
    .await?;
    if deleted.is_none() {
        log::info!("  cluster {identifier} is already gone");
        return Ok(());
    }
    wait_for(&WaitConfig::slow(), None, identifier, move || async move {
        let described = client
            .describe_clusters()
            .cluster_identifier(identifier)
            .send()
            .await
            .classify("DescribeClusters")
            .or_not_found()?;
        Ok(described.is_none())
    })
    .await
}
