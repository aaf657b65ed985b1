use crate::{aws::rds::DbInstance, aws::Aws, Error, Store};

use super::{Env, Posture, Scenario, Target};

/// A MySQL instance that can be deleted by anyone allowed to.
pub struct RdsDeletionProtection;

impl Scenario for RdsDeletionProtection {
    fn rule(&self) -> &'static str {
        "rds-instance-deletion-protection-enabled"
    }

    fn summary(&self) -> &'static str {
        "RDS instance with deletion protection disabled"
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let mut instance = DbInstance::small_mysql(
            settings.name(self.rule(), "db", 63),
            settings.tags(self.rule()),
        );
        instance.deletion_protection = posture.is_compliant();
        let instance = store.resource("db-instance", instance)?;
        Ok(vec![Target::new(
            "AWS::RDS::DBInstance",
            instance.remote(|i| i.resource_id.clone()),
        )])
    }
}
