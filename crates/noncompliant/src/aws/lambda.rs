//! Lambda functions and their resource policies.
use std::collections::HashMap;

use aws_sdk_lambda::{
    primitives::Blob,
    types::{FunctionCode, LastUpdateStatus, Runtime, State},
};

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

/// A function deployed from a zip archive on disk.
///
/// The archive's digest is part of the definition, so rebuilding the archive
/// shows up as a change and updates the function code.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct Function {
    pub name: String,
    pub role_arn: Remote<String>,
    pub runtime: String,
    pub handler: String,
    pub zip_path: String,
    pub zip_sha256: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionOutput {
    pub name: String,
    pub arn: String,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        role_arn: Remote<String>,
        zip_path: impl AsRef<std::path::Path>,
        tags: Tags,
    ) -> anyhow::Result<Self> {
        let zip_path = zip_path.as_ref();
        let zip_sha256 = crate::utils::sha256_digest(zip_path)?;
        anyhow::ensure!(
            zip_sha256.is_some(),
            "function archive {} does not exist",
            zip_path.display()
        );
        Ok(Function {
            name: name.into(),
            role_arn,
            runtime: "nodejs20.x".into(),
            handler: "index.handler".into(),
            zip_path: zip_path.display().to_string(),
            zip_sha256,
            tags,
        })
    }

    async fn zip(&self) -> anyhow::Result<Blob> {
        let bytes = tokio::fs::read(&self.zip_path)
            .await
            .map_err(|e| anyhow::anyhow!("could not read {}: {e}", self.zip_path))?;
        Ok(Blob::new(bytes))
    }

    /// Waits until the function has settled after a create or an update.
    async fn wait_ready(client: &aws_sdk_lambda::Client, name: &str) -> anyhow::Result<()> {
        wait_for(&WaitConfig::default(), None, name, move || async move {
            let configuration = client
                .get_function_configuration()
                .function_name(name)
                .send()
                .await
                .classify("GetFunctionConfiguration")?;
            anyhow::ensure!(
                configuration.state() != Some(&State::Failed),
                "function {name} failed: {}",
                configuration.state_reason().unwrap_or("no reason given")
            );
            Ok(configuration.state() == Some(&State::Active)
                && configuration.last_update_status() != Some(&LastUpdateStatus::InProgress))
        })
        .await
    }
}

pub async fn delete_function(aws: &Aws, name: &str) -> anyhow::Result<()> {
    aws_sdk_lambda::Client::new(aws.as_ref())
        .delete_function()
        .function_name(name)
        .send()
        .await
        .classify("DeleteFunction")
        .or_not_found()?;
    Ok(())
}

impl Resource for Function {
    type Provider = Aws;
    type Error = anyhow::Error;
    type Output = FunctionOutput;

    async fn create(&self, aws: &Aws) -> anyhow::Result<FunctionOutput> {
        let client = &aws_sdk_lambda::Client::new(aws.as_ref());
        let code = &FunctionCode::builder().zip_file(self.zip().await?).build();
        let role = &self.role_arn.get()?;
        let tags: &HashMap<String, String> = &self.tags.clone().into_iter().collect();

        // The execution role may not be assumable by Lambda right after creation
        let created = retry(
            &WaitConfig::default(),
            None,
            "CreateFunction",
            AwsError::is_retryable,
            move || async move {
                client
                    .create_function()
                    .function_name(&self.name)
                    .role(role)
                    .runtime(Runtime::from(self.runtime.as_str()))
                    .handler(&self.handler)
                    .code(code.clone())
                    .set_tags(Some(tags.clone()))
                    .send()
                    .await
                    .classify("CreateFunction")
            },
        )
        .await?;
        let arn = created
            .function_arn()
            .ok_or_else(|| anyhow::anyhow!("CreateFunction returned no ARN for {}", self.name))?
            .to_owned();
        log::info!("  created function {arn}");
        Self::wait_ready(client, &self.name).await?;
        Ok(FunctionOutput {
            name: self.name.clone(),
            arn,
        })
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &FunctionOutput,
    ) -> anyhow::Result<FunctionOutput> {
        anyhow::ensure!(
            self.name == previous_local.name,
            "function {} cannot be renamed, destroy it first",
            previous_local.name
        );
        let client = aws_sdk_lambda::Client::new(aws.as_ref());
        if self.zip_sha256 != previous_local.zip_sha256 {
            log::info!("  updating code of {}", self.name);
            client
                .update_function_code()
                .function_name(&self.name)
                .zip_file(self.zip().await?)
                .send()
                .await
                .classify("UpdateFunctionCode")?;
            Self::wait_ready(&client, &self.name).await?;
        }
        let role = self.role_arn.get()?;
        if role != previous_local.role_arn.get().unwrap_or_default()
            || self.runtime != previous_local.runtime
            || self.handler != previous_local.handler
        {
            log::info!("  updating configuration of {}", self.name);
            client
                .update_function_configuration()
                .function_name(&self.name)
                .role(role)
                .runtime(Runtime::from(self.runtime.as_str()))
                .handler(&self.handler)
                .send()
                .await
                .classify("UpdateFunctionConfiguration")?;
            Self::wait_ready(&client, &self.name).await?;
        }
        Ok(previous_remote.clone())
    }

    async fn delete(&self, aws: &Aws, _previous_remote: &FunctionOutput) -> anyhow::Result<()> {
        delete_function(aws, &self.name).await
    }
}

/// A statement in a function's resource policy.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
pub struct FunctionPermission {
    pub function_name: Remote<String>,
    pub statement_id: String,
    pub action: String,
    /// `*` makes the function public.
    pub principal: String,
}

impl FunctionPermission {
    /// Lets anyone invoke the function.
    pub fn public_invoke(function_name: Remote<String>) -> Self {
        FunctionPermission {
            function_name,
            statement_id: "public-invoke".into(),
            action: "lambda:InvokeFunction".into(),
            principal: "*".into(),
        }
    }

    async fn add(&self, client: &aws_sdk_lambda::Client) -> anyhow::Result<String> {
        let function_name = self.function_name.get()?;
        log::info!(
            "  allowing {} to {} {function_name}",
            self.principal,
            self.action
        );
        client
            .add_permission()
            .function_name(&function_name)
            .statement_id(&self.statement_id)
            .action(&self.action)
            .principal(&self.principal)
            .send()
            .await
            .classify("AddPermission")?;
        Ok(function_name)
    }
}

async fn remove_permission(
    client: &aws_sdk_lambda::Client,
    function_name: &str,
    statement_id: &str,
) -> anyhow::Result<()> {
    client
        .remove_permission()
        .function_name(function_name)
        .statement_id(statement_id)
        .send()
        .await
        .classify("RemovePermission")
        .or_not_found()?;
    Ok(())
}

impl Resource for FunctionPermission {
    type Provider = Aws;
    type Error = anyhow::Error;
    /// Name of the function the statement belongs to.
    type Output = String;

    async fn create(&self, aws: &Aws) -> anyhow::Result<String> {
        self.add(&aws_sdk_lambda::Client::new(aws.as_ref())).await
    }

    async fn update(
        &self,
        aws: &Aws,
        previous_local: &Self,
        previous_remote: &String,
    ) -> anyhow::Result<String> {
        let client = aws_sdk_lambda::Client::new(aws.as_ref());
        remove_permission(&client, previous_remote, &previous_local.statement_id).await?;
        self.add(&client).await
    }

    async fn delete(&self, aws: &Aws, previous_remote: &String) -> anyhow::Result<()> {
        log::info!(
            "  removing statement {} from {previous_remote}",
            self.statement_id
        );
        remove_permission(
            &aws_sdk_lambda::Client::new(aws.as_ref()),
            previous_remote,
            &self.statement_id,
        )
        .await
    }
}
