use std::collections::BTreeMap;

use crate::{
    aws::{
        iam::{allow_policy, service_trust_policy, Role},
        s3::{Bucket, BucketReplication},
        Aws,
    },
    Error, Store,
};

use super::{Env, Posture, Scenario, Target};

/// A versioned bucket that replicates nowhere.
///
/// Remediation adds a versioned bucket in `DESTINATION_REGION`, a role S3
/// replicates with and the replication configuration itself.
pub struct S3Replication;

impl Scenario for S3Replication {
    fn rule(&self) -> &'static str {
        "s3-bucket-replication-enabled"
    }

    fn summary(&self) -> &'static str {
        "versioned S3 bucket without cross-region replication"
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let rule = self.rule();
        let source_name = settings.bucket_name(rule, "source", &settings.region);
        let source = store.resource(
            "source-bucket",
            Bucket {
                name: source_name.clone(),
                region: settings.region.clone(),
                versioning: true,
                tags: settings.tags(rule),
            },
        )?;
        let target = Target::new("AWS::S3::Bucket", source.remote(|b| b.name.clone()));
        if !posture.is_compliant() {
            return Ok(vec![target]);
        }

        let destination_region = settings.require_destination_region()?;
        let destination_name = settings.bucket_name(rule, "replica", destination_region);
        let destination = store.resource(
            "destination-bucket",
            Bucket {
                name: destination_name.clone(),
                region: destination_region.to_owned(),
                versioning: true,
                tags: settings.tags(rule),
            },
        )?;

        let source_arn = format!("arn:aws:s3:::{source_name}");
        let destination_arn = format!("arn:aws:s3:::{destination_name}");
        let mut policies = BTreeMap::new();
        policies.insert(
            "read-source-configuration".to_owned(),
            allow_policy(
                &["s3:GetReplicationConfiguration", "s3:ListBucket"],
                &[source_arn.clone()],
            ),
        );
        policies.insert(
            "read-source-objects".to_owned(),
            allow_policy(
                &[
                    "s3:GetObjectVersionForReplication",
                    "s3:GetObjectVersionAcl",
                    "s3:GetObjectVersionTagging",
                ],
                &[format!("{source_arn}/*")],
            ),
        );
        policies.insert(
            "replicate".to_owned(),
            allow_policy(
                &["s3:ReplicateObject", "s3:ReplicateDelete", "s3:ReplicateTags"],
                &[format!("{destination_arn}/*")],
            ),
        );
        let role = store.resource(
            "replication-role",
            Role {
                name: settings.name(rule, "role", 64),
                assume_role_policy: service_trust_policy("s3.amazonaws.com"),
                policies,
                managed_policy_arns: vec![],
                tags: settings.tags(rule),
            },
        )?;

        store.resource(
            "replication",
            BucketReplication {
                bucket: source.remote(|b| b.name.clone()),
                region: settings.region.clone(),
                role_arn: role.remote(|r| r.arn.clone()),
                destination_bucket_arn: destination.remote(|b| b.arn.clone()),
            },
        )?;
        Ok(vec![target])
    }
}
