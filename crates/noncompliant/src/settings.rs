//! Run-wide configuration, physical naming and tagging.
use std::{collections::BTreeMap, path::PathBuf};

use snafu::OptionExt;

use crate::{utils::short_hash, Error, MissingSettingSnafu};

/// Tags applied to a resource, sorted so definitions compare stably.
pub type Tags = BTreeMap<String, String>;

pub const MANAGED_BY_KEY: &str = "noncompliant:managed-by";
pub const MANAGED_BY_VALUE: &str = "noncompliant";
pub const SCENARIO_KEY: &str = "noncompliant:scenario";

/// A `key=value` tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagPair {
    pub key: String,
    pub value: String,
}

impl Default for TagPair {
    fn default() -> Self {
        Self {
            key: "noncompliant:cleanup".into(),
            value: "true".into(),
        }
    }
}

impl std::str::FromStr for TagPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected 'key=value', got '{s}'"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("tag key is empty in '{s}'"));
        }
        Ok(TagPair {
            key: key.to_owned(),
            value: value.trim().to_owned(),
        })
    }
}

impl std::fmt::Display for TagPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub region: String,
    pub account_id: String,
    /// Prepended to every physical name.
    pub prefix: String,
    /// Root of the per-scenario store directories.
    pub state_dir: PathBuf,
    pub cleanup_tag: TagPair,
    pub vpc_id: Option<String>,
    pub ec2_ami_id: Option<String>,
    pub logging_bucket_name: Option<String>,
    pub destination_region: Option<String>,
    pub lambda_zip_path: Option<PathBuf>,
    pub enable_security_hub: bool,
}

impl Settings {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            prefix: "nc".into(),
            state_dir: PathBuf::from(".noncompliant"),
            cleanup_tag: TagPair::default(),
            vpc_id: None,
            ec2_ami_id: None,
            logging_bucket_name: None,
            destination_region: None,
            lambda_zip_path: None,
            enable_security_hub: false,
        }
    }

    pub fn require_vpc_id(&self) -> Result<&str, Error> {
        require(&self.vpc_id, "VPC_ID")
    }

    pub fn require_ec2_ami_id(&self) -> Result<&str, Error> {
        require(&self.ec2_ami_id, "EC2_AMI_ID")
    }

    pub fn require_logging_bucket_name(&self) -> Result<&str, Error> {
        require(&self.logging_bucket_name, "LOGGING_BUCKET_NAME")
    }

    pub fn require_destination_region(&self) -> Result<&str, Error> {
        require(&self.destination_region, "DESTINATION_REGION")
    }

    pub fn require_lambda_zip_path(&self) -> Result<&std::path::Path, Error> {
        self.lambda_zip_path
            .as_deref()
            .context(MissingSettingSnafu {
                name: "LAMBDA_ZIP_PATH",
            })
    }

    /// The store directory of one scenario.
    pub fn scenario_state_dir(&self, rule: &str) -> PathBuf {
        self.state_dir.join(rule)
    }

    /// A physical name for `suffix` within the scenario `slug`, at most
    /// `max_len` characters long.
    pub fn name(&self, slug: &str, suffix: &str, max_len: usize) -> String {
        fit(&format!("{}-{slug}-{suffix}", self.prefix), max_len)
    }

    /// A globally unique bucket name in `region`.
    ///
    /// Bucket names are shared by every account, so they carry a hash of the
    /// account id and region.
    pub fn bucket_name(&self, slug: &str, suffix: &str, region: &str) -> String {
        const MAX_BUCKET_NAME: usize = 63;
        let hash = short_hash(&format!("{}/{region}", self.account_id), 8);
        let stem = fit(
            &format!("{}-{slug}-{suffix}", self.prefix),
            MAX_BUCKET_NAME - hash.len() - 1,
        );
        format!("{stem}-{hash}")
    }

    /// The tags every taggable resource of the scenario `rule` carries.
    pub fn tags(&self, rule: &str) -> Tags {
        let mut tags = Tags::new();
        tags.insert(MANAGED_BY_KEY.into(), MANAGED_BY_VALUE.into());
        tags.insert(SCENARIO_KEY.into(), rule.into());
        tags.insert(self.cleanup_tag.key.clone(), self.cleanup_tag.value.clone());
        tags
    }
}

fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, Error> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .context(MissingSettingSnafu { name })
}

/// Lowercases `name`, replaces characters outside `[a-z0-9-]` and fits it
/// into `max_len` characters.
///
/// Names that are too long keep a hash of the full name so two long names
/// sharing a prefix stay distinct.
pub fn fit(name: &str, max_len: usize) -> String {
    let mut clean = String::with_capacity(name.len());
    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if !(c == '-' && clean.ends_with('-')) {
            clean.push(c);
        }
    }
    let clean = clean.trim_matches('-').to_owned();
    if clean.len() <= max_len {
        return clean;
    }
    let hash = short_hash(&clean, 8);
    let keep = max_len.saturating_sub(hash.len() + 1);
    let stem = clean[..keep].trim_end_matches('-');
    format!("{stem}-{hash}")
}

#[cfg(test)]
mod test {
    use super::*;

    fn settings() -> Settings {
        Settings::new("us-east-1", "123456789012")
    }

    #[test]
    fn names_are_clean_and_bounded() {
        let s = settings();
        assert_eq!("nc-restricted-ssh-sg", s.name("restricted-ssh", "sg", 255));
        assert_eq!("nc-a-b", fit("NC__a//B--", 64));

        let long = s.name("autoscaling-group-elb-healthcheck-required", "tg", 32);
        assert_eq!(32, long.len());
        assert!(long.starts_with("nc-autoscaling-group-"));
        assert_ne!(
            long,
            s.name("autoscaling-group-elb-healthcheck-required", "tg2", 32)
        );
    }

    #[test]
    fn bucket_names_depend_on_account_and_region() {
        let s = settings();
        let a = s.bucket_name("s3-bucket-replication-enabled", "source", "us-east-1");
        let b = s.bucket_name("s3-bucket-replication-enabled", "source", "eu-west-1");
        assert_ne!(a, b);
        assert!(a.len() <= 63);
        assert_eq!(a, s.bucket_name("s3-bucket-replication-enabled", "source", "us-east-1"));
    }

    #[test]
    fn missing_settings_are_named() {
        let mut s = settings();
        match s.require_vpc_id() {
            Err(Error::MissingSetting { name }) => assert_eq!("VPC_ID", name),
            other => panic!("unexpected {other:?}"),
        }
        s.vpc_id = Some("  ".into());
        assert!(s.require_vpc_id().is_err());
        s.vpc_id = Some("vpc-0abc".into());
        assert_eq!("vpc-0abc", s.require_vpc_id().unwrap());
        assert!(matches!(
            s.require_lambda_zip_path(),
            Err(Error::MissingSetting { name: "LAMBDA_ZIP_PATH" })
        ));
    }

    #[test]
    fn tag_pairs() {
        let tag: TagPair = "env = sandbox".parse().unwrap();
        assert_eq!("env", tag.key);
        assert_eq!("sandbox", tag.value);
        assert_eq!("env=sandbox", tag.to_string());
        assert!("nokey".parse::<TagPair>().is_err());
        assert!("=value".parse::<TagPair>().is_err());

        let tags = settings().tags("restricted-ssh");
        assert_eq!(Some("true"), tags.get("noncompliant:cleanup").map(String::as_str));
        assert_eq!(
            Some("restricted-ssh"),
            tags.get(SCENARIO_KEY).map(String::as_str)
        );
    }
}
