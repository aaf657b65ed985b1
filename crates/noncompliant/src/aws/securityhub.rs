//! Security Hub.
use crate::aws::{
    error::{ClassifyExt, ErrorKind},
    Aws,
};

/// Enables Security Hub with its default standards, unless it already is.
///
/// Findings for the scenarios show up in Security Hub as well as in AWS
/// Config once this is on.
pub async fn ensure_enabled(aws: &Aws) -> anyhow::Result<()> {
    let enabled = aws_sdk_securityhub::Client::new(aws.as_ref())
        .enable_security_hub()
        .enable_default_standards(true)
        .send()
        .await
        .classify("EnableSecurityHub");
    match enabled {
        Ok(_) => log::info!("enabled Security Hub"),
        Err(e) if e.kind == ErrorKind::AlreadyExists => {
            log::info!("Security Hub is already enabled")
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
