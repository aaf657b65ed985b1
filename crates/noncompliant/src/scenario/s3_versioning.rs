use crate::{aws::s3::Bucket, aws::Aws, Error, Store};

use super::{Env, Posture, Scenario, Target};

/// A bucket without versioning.
pub struct S3Versioning;

impl Scenario for S3Versioning {
    fn rule(&self) -> &'static str {
        "s3-bucket-versioning-enabled"
    }

    fn summary(&self) -> &'static str {
        "S3 bucket with versioning disabled"
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let bucket = store.resource(
            "bucket",
            Bucket {
                name: settings.bucket_name(self.rule(), "data", &settings.region),
                region: settings.region.clone(),
                versioning: posture.is_compliant(),
                tags: settings.tags(self.rule()),
            },
        )?;
        Ok(vec![Target::new(
            "AWS::S3::Bucket",
            bucket.remote(|b| b.name.clone()),
        )])
    }
}
