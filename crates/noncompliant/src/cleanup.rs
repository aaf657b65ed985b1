//! Bulk deletion of everything carrying the cleanup tag.
//!
//! The Resource Groups Tagging API lists tagged resources by ARN across
//! services. Each ARN is dispatched to the delete function of its service,
//! dependents first, one call at a time with a fixed delay in between.
use std::{str::FromStr, time::Duration};

use aws_sdk_resourcegroupstagging::types::TagFilter;
use snafu::OptionExt;
use tokio_util::sync::CancellationToken;

use crate::{
    aws::{
        self,
        error::{AwsError, ClassifyExt},
        Aws,
    },
    settings::TagPair,
    wait::{retry, WaitConfig},
    Error, InvalidArnSnafu,
};

/// `arn:partition:service:region:account:resource`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl FromStr for Arn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(6, ':');
        let mut next = || parts.next().context(InvalidArnSnafu { arn: s });
        let prefix = next()?;
        let partition = next()?;
        let service = next()?;
        let region = next()?;
        let account_id = next()?;
        let resource = next()?;
        snafu::ensure!(
            prefix == "arn" && !partition.is_empty() && !service.is_empty() && !resource.is_empty(),
            InvalidArnSnafu { arn: s }
        );
        Ok(Arn {
            partition: partition.to_owned(),
            service: service.to_owned(),
            region: region.to_owned(),
            account_id: account_id.to_owned(),
            resource: resource.to_owned(),
        })
    }
}

impl core::fmt::Display for Arn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

impl Arn {
    /// Splits the resource part on its first `/` or `:`.
    fn split_resource(&self) -> (Option<&str>, &str) {
        match self.resource.find(['/', ':']) {
            Some(at) => (Some(&self.resource[..at]), &self.resource[at + 1..]),
            None => (None, &self.resource),
        }
    }

    /// `role` in `role/path/name`, `None` for bare resources like buckets.
    pub fn resource_type(&self) -> Option<&str> {
        self.split_resource().0
    }

    /// `path/name` in `role/path/name`.
    pub fn resource_id(&self) -> &str {
        self.split_resource().1
    }
}

/// How a tagged resource gets deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteTarget {
    AutoScalingGroup { name: String },
    Environment { application: String, name: String },
    Instance { id: String },
    Function { name: String },
    DbInstance { identifier: String },
    Cluster { identifier: String },
    Domain { name: String },
    Trail { arn: String },
    WebAcl(aws::wafv2::WebAcl),
    Application { name: String },
    LoadBalancer { arn: String },
    TargetGroup { arn: String },
    LaunchTemplate { id: String },
    SecurityGroup { id: String },
    Table { name: String },
    LogGroup { name: String },
    Bucket { name: String },
    Role { name: String },
    User { name: String },
}

impl DeleteTarget {
    /// The delete target of `arn`, `None` for services this sweep does not
    /// handle.
    pub fn from_arn(arn: &Arn) -> Option<Self> {
        let id = arn.resource_id();
        let last_segment = || id.rsplit('/').next().unwrap_or(id).to_owned();
        let target = match (arn.service.as_str(), arn.resource_type()) {
            ("s3", None) => DeleteTarget::Bucket { name: id.to_owned() },
            ("iam", Some("role")) => DeleteTarget::Role {
                name: last_segment(),
            },
            ("iam", Some("user")) => DeleteTarget::User {
                name: last_segment(),
            },
            ("ec2", Some("instance")) => DeleteTarget::Instance { id: id.to_owned() },
            ("ec2", Some("security-group")) => DeleteTarget::SecurityGroup { id: id.to_owned() },
            ("ec2", Some("launch-template")) => DeleteTarget::LaunchTemplate { id: id.to_owned() },
            // Classic load balancers have no type segment and a different API
            ("elasticloadbalancing", Some("loadbalancer"))
                if ["app/", "net/", "gwy/"].iter().any(|kind| id.starts_with(kind)) =>
            {
                DeleteTarget::LoadBalancer {
                    arn: arn.to_string(),
                }
            }
            ("elasticloadbalancing", Some("targetgroup")) => DeleteTarget::TargetGroup {
                arn: arn.to_string(),
            },
            ("autoscaling", Some("autoScalingGroup")) => {
                let (_, name) = id.split_once("autoScalingGroupName/")?;
                DeleteTarget::AutoScalingGroup {
                    name: name.to_owned(),
                }
            }
            ("cloudtrail", Some("trail")) => DeleteTarget::Trail {
                arn: arn.to_string(),
            },
            ("logs", Some("log-group")) => DeleteTarget::LogGroup {
                name: id.trim_end_matches(":*").to_owned(),
            },
            // Streams and indexes live under the table and go with it
            ("dynamodb", Some("table")) if !id.contains('/') => DeleteTarget::Table {
                name: id.to_owned(),
            },
            ("lambda", Some("function")) => DeleteTarget::Function {
                // Drop a version or alias qualifier
                name: id.split(':').next().unwrap_or(id).to_owned(),
            },
            ("rds", Some("db")) => DeleteTarget::DbInstance {
                identifier: id.to_owned(),
            },
            ("redshift", Some("cluster")) => DeleteTarget::Cluster {
                identifier: id.to_owned(),
            },
            ("es", Some("domain")) => DeleteTarget::Domain { name: id.to_owned() },
            ("elasticbeanstalk", Some("environment")) => {
                let (application, name) = id.split_once('/')?;
                DeleteTarget::Environment {
                    application: application.to_owned(),
                    name: name.to_owned(),
                }
            }
            ("elasticbeanstalk", Some("application")) => DeleteTarget::Application {
                name: id.to_owned(),
            },
            ("wafv2", Some(scope @ ("regional" | "global"))) => {
                let mut parts = id.split('/');
                let (Some("webacl"), Some(name), Some(acl_id), None) =
                    (parts.next(), parts.next(), parts.next(), parts.next())
                else {
                    return None;
                };
                DeleteTarget::WebAcl(aws::wafv2::WebAcl {
                    arn: arn.to_string(),
                    name: name.to_owned(),
                    id: acl_id.to_owned(),
                    cloudfront: scope == "global",
                })
            }
            _ => return None,
        };
        Some(target)
    }

    /// Lower goes first. Resources are deleted before the ones they use.
    pub fn priority(&self) -> u8 {
        match self {
            DeleteTarget::AutoScalingGroup { .. } | DeleteTarget::Environment { .. } => 0,
            DeleteTarget::Instance { .. }
            | DeleteTarget::Function { .. }
            | DeleteTarget::DbInstance { .. }
            | DeleteTarget::Cluster { .. }
            | DeleteTarget::Domain { .. }
            | DeleteTarget::Trail { .. }
            | DeleteTarget::WebAcl(_)
            | DeleteTarget::Application { .. } => 1,
            DeleteTarget::LoadBalancer { .. } => 2,
            DeleteTarget::TargetGroup { .. } => 3,
            DeleteTarget::LaunchTemplate { .. } | DeleteTarget::SecurityGroup { .. } => 4,
            DeleteTarget::Table { .. } | DeleteTarget::LogGroup { .. } => 5,
            DeleteTarget::Bucket { .. } => 6,
            DeleteTarget::Role { .. } | DeleteTarget::User { .. } => 7,
        }
    }

    pub async fn delete(&self, aws: &Aws) -> anyhow::Result<()> {
        match self {
            DeleteTarget::AutoScalingGroup { name } => aws::autoscaling::delete_group(aws, name).await,
            DeleteTarget::Environment { application, name } => {
                aws::elasticbeanstalk::terminate_environment(aws, application, name).await
            }
            DeleteTarget::Instance { id } => aws::ec2::terminate_instance(aws, id).await,
            DeleteTarget::Function { name } => aws::lambda::delete_function(aws, name).await,
            DeleteTarget::DbInstance { identifier } => {
                aws::rds::delete_instance(aws, identifier).await
            }
            DeleteTarget::Cluster { identifier } => {
                aws::redshift::delete_cluster(aws, identifier).await
            }
            DeleteTarget::Domain { name } => aws::opensearch::delete_domain(aws, name).await,
            DeleteTarget::Trail { arn } => aws::cloudtrail::delete_trail(aws, arn).await,
            DeleteTarget::WebAcl(acl) => aws::wafv2::delete_web_acl(aws, acl).await,
            DeleteTarget::Application { name } => {
                aws::elasticbeanstalk::delete_application(aws, name).await
            }
            DeleteTarget::LoadBalancer { arn } => aws::elbv2::delete_load_balancer(aws, arn).await,
            DeleteTarget::TargetGroup { arn } => aws::elbv2::delete_target_group(aws, arn).await,
            DeleteTarget::LaunchTemplate { id } => aws::ec2::delete_launch_template(aws, id).await,
            DeleteTarget::SecurityGroup { id } => aws::ec2::delete_security_group(aws, id).await,
            DeleteTarget::Table { name } => aws::dynamodb::delete_table(aws, name).await,
            DeleteTarget::LogGroup { name } => aws::logs::delete_log_group(aws, name).await,
            DeleteTarget::Bucket { name } => {
                let region = aws.region().unwrap_or("us-east-1").to_owned();
                aws::s3::delete_bucket(aws, &region, name).await
            }
            DeleteTarget::Role { name } => aws::iam::delete_role(aws, name).await,
            DeleteTarget::User { name } => aws::iam::delete_user(aws, name).await,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CleanupConfig {
    pub tag: TagPair,
    /// Pause between two delete calls.
    pub delay: Duration,
    /// Only list what would be deleted.
    pub dry_run: bool,
    /// Retries of each delete call.
    pub retry: WaitConfig,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            tag: TagPair::default(),
            delay: Duration::from_secs(2),
            dry_run: true,
            retry: WaitConfig::default(),
        }
    }
}

/// What a sweep did, by ARN.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub found: usize,
    pub deleted: Vec<String>,
    /// Listed but left alone by a dry run or a cancellation.
    pub skipped: Vec<String>,
    /// ARN and error.
    pub failed: Vec<(String, String)>,
    /// No delete function for the service, or not an ARN.
    pub unsupported: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl core::fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "found {}, deleted {}, skipped {}, failed {}, unsupported {}",
            self.found,
            self.deleted.len(),
            self.skipped.len(),
            self.failed.len(),
            self.unsupported.len()
        )?;
        for (arn, e) in &self.failed {
            writeln!(f, "  failed: {arn}: {e}")?;
        }
        for arn in &self.unsupported {
            writeln!(f, "  unsupported: {arn}")?;
        }
        Ok(())
    }
}

pub struct TagCleanup {
    aws: Aws,
}

impl TagCleanup {
    pub fn new(aws: Aws) -> Self {
        TagCleanup { aws }
    }

    /// ARNs of every resource in the region tagged with `tag`.
    pub async fn scan(&self, tag: &TagPair) -> anyhow::Result<Vec<String>> {
        let client = aws_sdk_resourcegroupstagging::Client::new(self.aws.as_ref());
        let filter = TagFilter::builder()
            .key(&tag.key)
            .values(&tag.value)
            .build();
        let mut arns = vec![];
        let mut token: Option<String> = None;
        loop {
            let page = client
                .get_resources()
                .tag_filters(filter.clone())
                .set_pagination_token(token.take())
                .send()
                .await
                .classify("GetResources")?;
            arns.extend(
                page.resource_tag_mapping_list()
                    .iter()
                    .filter_map(|m| m.resource_arn())
                    .map(str::to_owned),
            );
            match page.pagination_token() {
                Some(t) if !t.is_empty() => token = Some(t.to_owned()),
                _ => break,
            }
        }
        log::info!("found {} resource(s) tagged {tag}", arns.len());
        Ok(arns)
    }

    /// Scans for the configured tag and sweeps what was found.
    pub async fn run(
        &self,
        config: &CleanupConfig,
        cancel: &CancellationToken,
    ) -> Result<CleanupReport, Error> {
        let arns = self.scan(&config.tag).await?;
        Ok(self.sweep(arns, config, cancel).await)
    }

    /// Deletes `arns`, dependents first.
    ///
    /// A failing delete is recorded and the sweep moves on.
    pub async fn sweep(
        &self,
        arns: Vec<String>,
        config: &CleanupConfig,
        cancel: &CancellationToken,
    ) -> CleanupReport {
        let mut report = CleanupReport {
            found: arns.len(),
            ..Default::default()
        };
        let mut targets = vec![];
        for arn in arns {
            match arn.parse::<Arn>().ok().as_ref().and_then(DeleteTarget::from_arn) {
                Some(target) => targets.push((arn, target)),
                None => {
                    log::warn!("no way to delete {arn}");
                    report.unsupported.push(arn);
                }
            }
        }
        targets.sort_by(|(a, x), (b, y)| x.priority().cmp(&y.priority()).then(a.cmp(b)));

        let mut first = true;
        for (arn, target) in targets {
            if config.dry_run {
                log::info!("would delete {arn}");
                report.skipped.push(arn);
                continue;
            }
            if cancel.is_cancelled() {
                report.skipped.push(arn);
                continue;
            }
            if !first {
                tokio::select! {
                    _ = tokio::time::sleep(config.delay) => {}
                    _ = cancel.cancelled() => {
                        log::warn!("cleanup cancelled");
                        report.skipped.push(arn);
                        continue;
                    }
                }
            }
            first = false;

            log::info!("deleting {arn}");
            let aws = &self.aws;
            let target = &target;
            let deleted = retry(
                &config.retry,
                Some(cancel),
                &arn,
                |e: &anyhow::Error| e.downcast_ref::<AwsError>().is_some_and(AwsError::is_retryable),
                move || target.delete(aws),
            )
            .await;
            match deleted {
                Ok(()) => report.deleted.push(arn),
                Err(e) if e.downcast_ref::<AwsError>().is_some_and(AwsError::is_not_found) => {
                    report.deleted.push(arn)
                }
                Err(e) => {
                    log::error!("could not delete {arn}: {e:#}");
                    report.failed.push((arn, format!("{e:#}")));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn target(arn: &str) -> Option<DeleteTarget> {
        DeleteTarget::from_arn(&arn.parse().unwrap())
    }

    #[test]
    fn parses_resource_type_and_id() {
        let arn: Arn = "arn:aws:iam::123456789012:role/service-role/nc-role"
            .parse()
            .unwrap();
        assert_eq!("iam", arn.service);
        assert_eq!("", arn.region);
        assert_eq!(Some("role"), arn.resource_type());
        assert_eq!("service-role/nc-role", arn.resource_id());
        assert_eq!(
            "arn:aws:iam::123456789012:role/service-role/nc-role",
            arn.to_string()
        );

        let arn: Arn = "arn:aws:logs:us-east-1:123456789012:log-group:nc-events:*"
            .parse()
            .unwrap();
        assert_eq!(Some("log-group"), arn.resource_type());
        assert_eq!("nc-events:*", arn.resource_id());

        let arn: Arn = "arn:aws:s3:::nc-bucket".parse().unwrap();
        assert_eq!(None, arn.resource_type());
        assert_eq!("nc-bucket", arn.resource_id());
    }

    #[test]
    fn rejects_what_is_not_an_arn() {
        for bad in ["", "nc-bucket", "arn:aws:s3", "urn:aws:s3:::b", "arn:aws:s3:::"] {
            assert!(
                matches!(bad.parse::<Arn>(), Err(Error::InvalidArn { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn dispatches_by_service_and_type() {
        assert_eq!(
            Some(DeleteTarget::Bucket {
                name: "nc-bucket".into()
            }),
            target("arn:aws:s3:::nc-bucket")
        );
        assert_eq!(
            Some(DeleteTarget::Role {
                name: "nc-role".into()
            }),
            target("arn:aws:iam::123456789012:role/service-role/nc-role")
        );
        assert_eq!(
            Some(DeleteTarget::AutoScalingGroup {
                name: "nc-asg".into()
            }),
            target(
                "arn:aws:autoscaling:us-east-1:123456789012:autoScalingGroup:\
                 6d1b4b4e-1111-2222-3333-444455556666:autoScalingGroupName/nc-asg"
            )
        );
        assert_eq!(
            Some(DeleteTarget::LogGroup {
                name: "nc-events".into()
            }),
            target("arn:aws:logs:us-east-1:123456789012:log-group:nc-events:*")
        );
        assert_eq!(
            Some(DeleteTarget::Function { name: "nc-fn".into() }),
            target("arn:aws:lambda:us-east-1:123456789012:function:nc-fn:3")
        );
        let tg = "arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/nc-tg/0123456789abcdef";
        assert_eq!(
            Some(DeleteTarget::TargetGroup { arn: tg.into() }),
            target(tg)
        );
        assert_eq!(
            Some(DeleteTarget::DbInstance {
                identifier: "nc-db".into()
            }),
            target("arn:aws:rds:us-east-1:123456789012:db:nc-db")
        );
        assert_eq!(
            None,
            target("arn:aws:dynamodb:us-east-1:123456789012:table/nc-table/stream/2024")
        );
    }

    #[test]
    fn dispatches_services_without_a_scenario() {
        assert_eq!(
            Some(DeleteTarget::Environment {
                application: "nc-app".into(),
                name: "nc-env".into()
            }),
            target("arn:aws:elasticbeanstalk:us-east-1:123456789012:environment/nc-app/nc-env")
        );
        assert_eq!(
            Some(DeleteTarget::Application {
                name: "nc-app".into()
            }),
            target("arn:aws:elasticbeanstalk:us-east-1:123456789012:application/nc-app")
        );
        assert_eq!(
            Some(DeleteTarget::Domain {
                name: "nc-search".into()
            }),
            target("arn:aws:es:us-east-1:123456789012:domain/nc-search")
        );
        assert_eq!(
            Some(DeleteTarget::Cluster {
                identifier: "nc-cluster".into()
            }),
            target("arn:aws:redshift:us-east-1:123456789012:cluster:nc-cluster")
        );

        let regional = "arn:aws:wafv2:us-east-1:123456789012:regional/webacl/nc-acl/0123-abcd";
        assert_eq!(
            Some(DeleteTarget::WebAcl(aws::wafv2::WebAcl {
                arn: regional.into(),
                name: "nc-acl".into(),
                id: "0123-abcd".into(),
                cloudfront: false,
            })),
            target(regional)
        );
        match target("arn:aws:wafv2:us-east-1:123456789012:global/webacl/nc-edge/4567") {
            Some(DeleteTarget::WebAcl(acl)) => {
                assert!(acl.cloudfront);
                assert_eq!("nc-edge", acl.name);
            }
            other => panic!("unexpected target: {other:?}"),
        }
    }

    #[test]
    fn unsupported_resources_are_left_alone() {
        for arn in [
            // Classic load balancers need the classic API
            "arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/nc-classic",
            "arn:aws:elasticbeanstalk:us-east-1:123456789012:applicationversion/nc-app/v1",
            "arn:aws:redshift:us-east-1:123456789012:snapshot:nc-cluster/nc-snap",
            "arn:aws:wafv2:us-east-1:123456789012:regional/ipset/nc-ips/0123",
            "arn:aws:s3:::nc-bucket/some/key",
        ] {
            assert_eq!(None, target(arn), "{arn}");
        }
        assert!(matches!(
            target("arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/net/nc/1"),
            Some(DeleteTarget::LoadBalancer { .. })
        ));
    }

    #[test]
    fn dependents_go_first() {
        let mut targets = vec![
            target("arn:aws:iam::123456789012:role/nc-role").unwrap(),
            target("arn:aws:s3:::nc-bucket").unwrap(),
            target("arn:aws:ec2:us-east-1:123456789012:security-group/sg-1").unwrap(),
            target("arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/app/nc/1")
                .unwrap(),
            target("arn:aws:ec2:us-east-1:123456789012:instance/i-1").unwrap(),
            target(
                "arn:aws:autoscaling:us-east-1:123456789012:autoScalingGroup:x:autoScalingGroupName/nc",
            )
            .unwrap(),
        ];
        targets.sort_by_key(DeleteTarget::priority);
        let kinds: Vec<_> = targets
            .iter()
            .map(|t| format!("{t:?}").split(' ').next().unwrap_or_default().to_owned())
            .collect();
        assert_eq!(
            vec![
                "AutoScalingGroup",
                "Instance",
                "LoadBalancer",
                "SecurityGroup",
                "Bucket",
                "Role"
            ],
            kinds
        );

        let environment =
            target("arn:aws:elasticbeanstalk:us-east-1:123456789012:environment/nc-app/nc-env")
                .unwrap();
        let application =
            target("arn:aws:elasticbeanstalk:us-east-1:123456789012:application/nc-app").unwrap();
        assert!(environment.priority() < application.priority());

        let acl = target("arn:aws:wafv2:us-east-1:123456789012:regional/webacl/nc/0123").unwrap();
        let load_balancer =
            target("arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/app/nc/1")
                .unwrap();
        assert!(acl.priority() < load_balancer.priority());
    }

    #[tokio::test]
    async fn dry_run_deletes_nothing() {
        let _ = env_logger::builder().is_test(true).try_init();
        let cleanup = TagCleanup::new(Aws::offline("us-east-1"));
        let report = cleanup
            .sweep(
                vec![
                    "arn:aws:s3:::nc-bucket".into(),
                    "arn:aws:iam::123456789012:role/nc-role".into(),
                    "arn:aws:redshift:us-east-1:123456789012:snapshot:nc/snap".into(),
                    "not-an-arn".into(),
                ],
                &CleanupConfig::default(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(4, report.found);
        assert!(report.deleted.is_empty());
        assert_eq!(
            vec![
                "arn:aws:s3:::nc-bucket".to_owned(),
                "arn:aws:iam::123456789012:role/nc-role".to_owned()
            ],
            report.skipped
        );
        assert_eq!(2, report.unsupported.len());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn cancelled_sweep_skips_the_rest() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let config = CleanupConfig {
            dry_run: false,
            ..Default::default()
        };
        let report = TagCleanup::new(Aws::offline("us-east-1"))
            .sweep(vec!["arn:aws:s3:::nc-bucket".into()], &config, &cancel)
            .await;
        assert_eq!(vec!["arn:aws:s3:::nc-bucket".to_owned()], report.skipped);
        assert!(report.deleted.is_empty() && report.failed.is_empty());
    }

    #[tokio::test]
    async fn forced_sweep_records_failures_and_carries_on() {
        let _ = env_logger::builder().is_test(true).try_init();
        // Without credentials every call fails before reaching AWS
        let cleanup = TagCleanup::new(Aws::offline("us-east-1"));
        let config = CleanupConfig {
            delay: Duration::from_millis(10),
            dry_run: false,
            retry: WaitConfig::default().with_timeout(Duration::from_millis(200)),
            ..Default::default()
        };
        let arns = vec![
            "arn:aws:iam::123456789012:role/nc-role".to_owned(),
            "arn:aws:s3:::nc-bucket".to_owned(),
            "arn:aws:ec2:us-east-1:123456789012:security-group/sg-1".to_owned(),
            "arn:aws:logs:us-east-1:123456789012:log-group:nc-events:*".to_owned(),
            "arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/nc-classic".to_owned(),
        ];
        let start = std::time::Instant::now();
        let report = cleanup
            .sweep(arns, &config, &CancellationToken::new())
            .await;

        assert_eq!(5, report.found);
        assert!(report.skipped.is_empty(), "{report}");
        assert!(report.deleted.is_empty(), "{report}");
        assert_eq!(
            vec!["arn:aws:elasticloadbalancing:us-east-1:123456789012:loadbalancer/nc-classic"],
            report.unsupported
        );
        // Every supported target was attempted, dependents first
        let failed: Vec<_> = report.failed.iter().map(|(arn, _)| arn.as_str()).collect();
        assert_eq!(
            vec![
                "arn:aws:ec2:us-east-1:123456789012:security-group/sg-1",
                "arn:aws:logs:us-east-1:123456789012:log-group:nc-events:*",
                "arn:aws:s3:::nc-bucket",
                "arn:aws:iam::123456789012:role/nc-role",
            ],
            failed
        );
        assert!(report.failed.iter().all(|(_, e)| !e.is_empty()));
        assert!(!report.is_clean());
        // Three pauses between four deletes
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(report.to_string().contains("failed 4"));
    }
}
