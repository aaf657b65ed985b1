use std::collections::BTreeMap;

use crate::{
    aws::{
        cloudtrail::{CloudWatchLogsDelivery, Trail},
        iam::{allow_policy, service_trust_policy, Role},
        logs::LogGroup,
        s3::{Bucket, BucketPolicy},
        Aws,
    },
    Error, Store,
};

use super::{Env, Posture, Scenario, Target};

/// The policy CloudTrail needs on its delivery bucket.
fn delivery_policy(bucket: &str, account_id: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "CloudTrailAclCheck",
                "Effect": "Allow",
                "Principal": { "Service": "cloudtrail.amazonaws.com" },
                "Action": "s3:GetBucketAcl",
                "Resource": format!("arn:aws:s3:::{bucket}")
            },
            {
                "Sid": "CloudTrailWrite",
                "Effect": "Allow",
                "Principal": { "Service": "cloudtrail.amazonaws.com" },
                "Action": "s3:PutObject",
                "Resource": format!("arn:aws:s3:::{bucket}/AWSLogs/{account_id}/*"),
                "Condition": {
                    "StringEquals": { "s3:x-amz-acl": "bucket-owner-full-control" }
                }
            }
        ]
    })
    .to_string()
}

/// A trail that delivers to S3 only.
///
/// Remediation adds a log group and the role CloudTrail writes into it with.
pub struct CloudTrailCloudWatchLogs;

impl Scenario for CloudTrailCloudWatchLogs {
    fn rule(&self) -> &'static str {
        "cloud-trail-cloud-watch-logs-enabled"
    }

    fn summary(&self) -> &'static str {
        "CloudTrail trail not integrated with CloudWatch Logs"
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let rule = self.rule();
        let bucket_name = settings.bucket_name(rule, "trail", &settings.region);
        let bucket = store.resource(
            "trail-bucket",
            Bucket {
                name: bucket_name.clone(),
                region: settings.region.clone(),
                versioning: false,
                tags: settings.tags(rule),
            },
        )?;
        let policy = store.resource(
            "trail-bucket-policy",
            BucketPolicy {
                bucket: bucket.remote(|b| b.name.clone()),
                region: settings.region.clone(),
                policy: delivery_policy(&bucket_name, &settings.account_id),
            },
        )?;

        let cloud_watch_logs = if posture.is_compliant() {
            let log_group_name = settings.name(rule, "trail-events", 512);
            let log_group = store.resource(
                "log-group",
                LogGroup {
                    name: log_group_name.clone(),
                    retention_days: Some(1),
                    tags: settings.tags(rule),
                },
            )?;
            let mut policies = BTreeMap::new();
            policies.insert(
                "deliver-trail-events".to_owned(),
                allow_policy(
                    &["logs:CreateLogStream", "logs:PutLogEvents"],
                    &[format!(
                        "arn:aws:logs:{}:{}:log-group:{log_group_name}:*",
                        settings.region, settings.account_id
                    )],
                ),
            );
            let role = store.resource(
                "log-delivery-role",
                Role {
                    name: settings.name(rule, "role", 64),
                    assume_role_policy: service_trust_policy("cloudtrail.amazonaws.com"),
                    policies,
                    managed_policy_arns: vec![],
                    tags: settings.tags(rule),
                },
            )?;
            Some(CloudWatchLogsDelivery {
                log_group_arn: log_group.remote(|g| g.arn.clone()),
                role_arn: role.remote(|r| r.arn.clone()),
            })
        } else {
            None
        };

        let trail = store.resource(
            "trail",
            Trail {
                name: settings.name(rule, "trail", 128),
                // Reading through the policy orders the trail after it
                bucket: policy.remote(|bucket| bucket.clone()),
                cloud_watch_logs,
                tags: settings.tags(rule),
            },
        )?;
        Ok(vec![Target::new(
            "AWS::CloudTrail::Trail",
            trail.remote(|t| t.name.clone()),
        )])
    }
}
