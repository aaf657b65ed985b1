use crate::{
    aws::{
        s3::{Bucket, BucketLogging},
        Aws,
    },
    Error, Store,
};

use super::{Env, Posture, Scenario, Target};

/// A bucket without server access logging.
///
/// Remediation delivers access logs into the pre-existing bucket named by
/// `LOGGING_BUCKET_NAME`, which must already grant the S3 logging service
/// write access.
pub struct S3Logging;

impl Scenario for S3Logging {
    fn rule(&self) -> &'static str {
        "s3-bucket-logging-enabled"
    }

    fn summary(&self) -> &'static str {
        "S3 bucket with server access logging disabled"
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let name = settings.bucket_name(self.rule(), "data", &settings.region);
        let bucket = store.resource(
            "bucket",
            Bucket {
                name: name.clone(),
                region: settings.region.clone(),
                versioning: false,
                tags: settings.tags(self.rule()),
            },
        )?;
        if posture.is_compliant() {
            store.resource(
                "bucket-logging",
                BucketLogging {
                    bucket: bucket.remote(|b| b.name.clone()),
                    region: settings.region.clone(),
                    target_bucket: settings.require_logging_bucket_name()?.to_owned(),
                    target_prefix: format!("{name}/"),
                },
            )?;
        }
        Ok(vec![Target::new(
            "AWS::S3::Bucket",
            bucket.remote(|b| b.name.clone()),
        )])
    }
}
