use crate::{aws::dynamodb::Table, aws::Aws, Error, Store};

use super::{Env, Posture, Scenario, Target};

/// A table without point-in-time recovery.
pub struct DynamoDbPointInTimeRecovery;

impl Scenario for DynamoDbPointInTimeRecovery {
    fn rule(&self) -> &'static str {
        "dynamodb-pitr-enabled"
    }

    fn summary(&self) -> &'static str {
        "DynamoDB table with point-in-time recovery disabled"
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let table = store.resource(
            "table",
            Table {
                name: settings.name(self.rule(), "table", 255),
                partition_key: "id".into(),
                point_in_time_recovery: posture.is_compliant(),
                tags: settings.tags(self.rule()),
            },
        )?;
        Ok(vec![Target::new(
            "AWS::DynamoDB::Table",
            table.remote(|t| t.name.clone()),
        )])
    }
}
