use crate::{
    aws::{
        ec2::{IngressRule, SecurityGroup},
        Aws,
    },
    Error, Store,
};

use super::{Env, Posture, Scenario, Target};

/// A security group open to SSH from anywhere.
pub struct RestrictedSsh;

impl Scenario for RestrictedSsh {
    fn rule(&self) -> &'static str {
        "restricted-ssh"
    }

    fn summary(&self) -> &'static str {
        "security group allowing SSH from 0.0.0.0/0"
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let ingress = match posture {
            Posture::NonCompliant => vec![IngressRule::ssh_from_anywhere()],
            Posture::Compliant => vec![],
        };
        let group = store.resource(
            "security-group",
            SecurityGroup {
                name: settings.name(self.rule(), "sg", 255),
                description: "noncompliant restricted-ssh fixture".into(),
                vpc_id: settings.require_vpc_id()?.to_owned(),
                ingress,
                tags: settings.tags(self.rule()),
            },
        )?;
        Ok(vec![Target::new(
            "AWS::EC2::SecurityGroup",
            group.remote(|g| g.id.clone()),
        )])
    }
}
