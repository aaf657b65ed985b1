//! Compliance scenarios.
//!
//! A scenario declares the resources that make one AWS Config rule report a
//! finding, and optionally the shape those resources take once the finding is
//! remediated. Declaring never talks to AWS, the [`runner`](crate::runner)
//! plans and applies what was declared.
use snafu::OptionExt;

use crate::{
    aws::Aws, remote::Remote, settings::Settings, Error, MissingSettingSnafu, Store,
    UnknownScenarioSnafu,
};

mod autoscaling_elb_healthcheck;
mod cloudtrail_cloudwatch_logs;
mod dynamodb_pitr;
mod iam_user_no_policies;
mod lambda_public_access;
mod rds_deletion_protection;
mod restricted_ssh;
mod s3_logging;
mod s3_replication;
mod s3_versioning;

pub use autoscaling_elb_healthcheck::AutoScalingElbHealthCheck;
pub use cloudtrail_cloudwatch_logs::CloudTrailCloudWatchLogs;
pub use dynamodb_pitr::DynamoDbPointInTimeRecovery;
pub use iam_user_no_policies::IamUserNoPolicies;
pub use lambda_public_access::LambdaPublicAccess;
pub use rds_deletion_protection::RdsDeletionProtection;
pub use restricted_ssh::RestrictedSsh;
pub use s3_logging::S3Logging;
pub use s3_replication::S3Replication;
pub use s3_versioning::S3Versioning;

/// Which side of the rule the declared resources land on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Posture {
    NonCompliant,
    Compliant,
}

impl Posture {
    pub fn is_compliant(self) -> bool {
        self == Posture::Compliant
    }
}

impl core::fmt::Display for Posture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Posture::NonCompliant => "non-compliant",
            Posture::Compliant => "compliant",
        })
    }
}

/// A resource AWS Config evaluates the rule against.
#[derive(Clone, Debug)]
pub struct Target {
    /// The AWS Config resource type, ie `AWS::S3::Bucket`.
    pub resource_type: &'static str,
    /// The id AWS Config knows the resource by.
    pub resource_id: Remote<String>,
}

impl Target {
    pub fn new(resource_type: &'static str, resource_id: Remote<String>) -> Self {
        Self {
            resource_type,
            resource_id,
        }
    }
}

/// Everything a scenario may read while declaring.
///
/// Values that need a lookup against AWS are resolved by the runner before
/// declaring, and only for scenarios that ask for them.
#[derive(Clone, Debug)]
pub struct Env {
    pub settings: Settings,
    pub subnet_ids: Option<Vec<String>>,
}

impl Env {
    pub fn new(settings: Settings) -> Self {
        Env {
            settings,
            subnet_ids: None,
        }
    }

    pub fn require_subnet_ids(&self) -> Result<Vec<String>, Error> {
        self.subnet_ids
            .clone()
            .filter(|ids| !ids.is_empty())
            .context(MissingSettingSnafu { name: "VPC_ID" })
    }
}

pub trait Scenario {
    /// Identifier of the AWS Config managed rule the scenario trips.
    fn rule(&self) -> &'static str;

    /// One line describing the non-compliant shape.
    fn summary(&self) -> &'static str;

    /// Whether the scenario has a compliant shape to remediate to.
    fn remediable(&self) -> bool {
        true
    }

    /// Whether [`Env::subnet_ids`] must be resolved before declaring.
    fn needs_subnets(&self) -> bool {
        false
    }

    /// Declares the scenario's resources in the given posture.
    ///
    /// Resources declared for one posture but not the other are destroyed
    /// when switching between them.
    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error>;
}

/// Every scenario, sorted by rule.
pub fn all() -> Vec<Box<dyn Scenario>> {
    let mut scenarios: Vec<Box<dyn Scenario>> = vec![
        Box::new(AutoScalingElbHealthCheck),
        Box::new(CloudTrailCloudWatchLogs),
        Box::new(DynamoDbPointInTimeRecovery),
        Box::new(IamUserNoPolicies),
        Box::new(LambdaPublicAccess),
        Box::new(RdsDeletionProtection),
        Box::new(RestrictedSsh),
        Box::new(S3Logging),
        Box::new(S3Replication),
        Box::new(S3Versioning),
    ];
    scenarios.sort_by_key(|s| s.rule());
    scenarios
}

/// Looks a scenario up by its rule identifier.
pub fn find(rule: &str) -> Result<Box<dyn Scenario>, Error> {
    all()
        .into_iter()
        .find(|s| s.rule() == rule)
        .context(UnknownScenarioSnafu { rule })
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;
    use crate::Action;

    fn env() -> Env {
        let mut settings = Settings::new("us-east-1", "123456789012");
        settings.vpc_id = Some("vpc-0123456789abcdef0".into());
        settings.ec2_ami_id = Some("ami-0123456789abcdef0".into());
        settings.logging_bucket_name = Some("access-logs".into());
        settings.destination_region = Some("us-west-2".into());
        let zip = std::path::Path::new(std::env!("CARGO_WORKSPACE_DIR"))
            .join("test_output/scenario_function.zip");
        std::fs::create_dir_all(zip.parent().unwrap()).unwrap();
        std::fs::write(&zip, b"PK\x05\x06").unwrap();
        settings.lambda_zip_path = Some(zip);
        Env {
            settings,
            subnet_ids: Some(vec!["subnet-a".into(), "subnet-b".into()]),
        }
    }

    #[test]
    fn rules_are_unique_and_findable() {
        let rules: Vec<_> = all().iter().map(|s| s.rule()).collect();
        let unique: HashSet<_> = rules.iter().collect();
        assert_eq!(10, rules.len());
        assert_eq!(rules.len(), unique.len());
        for rule in rules {
            assert_eq!(rule, find(rule).unwrap().rule());
        }
        assert!(matches!(
            find("no-such-rule"),
            Err(Error::UnknownScenario { .. })
        ));
    }

    #[test]
    fn every_scenario_plans_both_postures_without_aws() {
        let _ = env_logger::builder().is_test(true).try_init();
        let env = env();
        for scenario in all() {
            for posture in [Posture::NonCompliant, Posture::Compliant] {
                let path = std::path::Path::new(std::env!("CARGO_WORKSPACE_DIR"))
                    .join("test_output/scenarios")
                    .join(scenario.rule());
                let _ = std::fs::remove_dir_all(&path);
                let mut store = Store::new(&path, Aws::offline("us-east-1"));
                let targets = scenario.declare(&env, &mut store, posture).unwrap();
                assert!(!targets.is_empty(), "{} declares no targets", scenario.rule());
                let plan = store.plan().unwrap();
                assert!(plan.warnings.is_empty());
                assert!(
                    plan.actions.iter().all(|a| a.action == Action::Create),
                    "{} {posture}: {plan}",
                    scenario.rule()
                );
            }
        }
    }

    #[test]
    fn missing_settings_fail_before_any_call() {
        let env = Env::new(Settings::new("us-east-1", "123456789012"));
        let path = std::path::Path::new(std::env!("CARGO_WORKSPACE_DIR"))
            .join("test_output/scenarios_missing_settings");
        let mut store = Store::new(&path, Aws::offline("us-east-1"));
        let err = find("restricted-ssh")
            .unwrap()
            .declare(&env, &mut store, Posture::NonCompliant)
            .unwrap_err();
        assert!(matches!(err, Error::MissingSetting { name: "VPC_ID" }));
    }
}
