use crate::{
    aws::{
        autoscaling::{AutoScalingGroup, HealthCheckType},
        ec2::LaunchTemplate,
        elbv2::TargetGroup,
        Aws,
    },
    Error, Store,
};

use super::{Env, Posture, Scenario, Target};

/// A group behind a target group that only trusts EC2 status checks.
///
/// The group is kept at zero instances, AWS Config evaluates its
/// configuration regardless.
pub struct AutoScalingElbHealthCheck;

impl Scenario for AutoScalingElbHealthCheck {
    fn rule(&self) -> &'static str {
        "autoscaling-group-elb-healthcheck-required"
    }

    fn summary(&self) -> &'static str {
        "Auto Scaling group attached to a target group without ELB health checks"
    }

    fn needs_subnets(&self) -> bool {
        true
    }

    fn declare(
        &self,
        env: &Env,
        store: &mut Store<Aws>,
        posture: Posture,
    ) -> Result<Vec<Target>, Error> {
        let settings = &env.settings;
        let rule = self.rule();
        let vpc_id = settings.require_vpc_id()?;
        let image_id = settings.require_ec2_ami_id()?;
        let subnet_ids = env.require_subnet_ids()?;

        let template = store.resource(
            "launch-template",
            LaunchTemplate {
                name: settings.name(rule, "lt", 128),
                image_id: image_id.to_owned(),
                instance_type: "t3.micro".into(),
                tags: settings.tags(rule),
            },
        )?;
        let target_group = store.resource(
            "target-group",
            TargetGroup {
                name: settings.name(rule, "tg", 32),
                vpc_id: vpc_id.to_owned(),
                port: 80,
                health_check_path: "/".into(),
                tags: settings.tags(rule),
            },
        )?;
        let health_check_type = match posture {
            Posture::NonCompliant => HealthCheckType::Ec2,
            Posture::Compliant => HealthCheckType::Elb,
        };
        let group = store.resource(
            "auto-scaling-group",
            AutoScalingGroup {
                name: settings.name(rule, "asg", 255),
                launch_template_id: template.remote(|t| t.id.clone()),
                subnet_ids,
                target_group_arns: vec![target_group.remote(|t| t.arn.clone())],
                health_check_type,
                health_check_grace_period: 300,
                min_size: 0,
                max_size: 1,
                desired_capacity: 0,
                tags: settings.tags(rule),
            },
        )?;
        Ok(vec![Target::new(
            "AWS::AutoScaling::AutoScalingGroup",
            group.remote(|g| g.name.clone()),
        )])
    }
}
