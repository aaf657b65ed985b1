use crate::{aws::iam::User, aws::Aws, Error, Store};

use super::{Env, Posture, Scenario, Target};

const READ_ONLY_ACCESS: &str = "arn:aws:iam::aws:policy/ReadOnlyAccess";

/// A user with a managed policy attached directly instead of through a group.
pub struct IamUserNoPolicies;

impl Scenario for IamUserNoPolicies {
    fn rule(&self) -> &'static str {
        "iam-user-no-policies-check"
    }

    fn summary(&self) -> &'static str {
        "IAM user with a policy attached directly"
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let managed_policy_arns = match posture {
            Posture::NonCompliant => vec![READ_ONLY_ACCESS.to_owned()],
            Posture::Compliant => vec![],
        };
        let user = store.resource(
            "user",
            User {
                name: settings.name(self.rule(), "user", 64),
                managed_policy_arns,
                tags: settings.tags(self.rule()),
            },
        )?;
        Ok(vec![Target::new(
            "AWS::IAM::User",
            user.remote(|u| u.user_id.clone()),
        )])
    }
}
