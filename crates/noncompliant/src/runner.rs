//! Driving a scenario through its lifecycle.
//!
//! Each scenario keeps its own store under `<state_dir>/<rule>`, so
//! scenarios never see each other's resources as orphans.
use std::time::Duration;

use snafu::ensure;
use tokio_util::sync::CancellationToken;

use crate::{
    aws::{self, config::RuleCompliance, Aws},
    scenario::{Env, Posture, Scenario, Target},
    settings::Settings,
    Error, NotRemediableSnafu, Plan, Store,
};

/// A [`Target`] whose id is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub resource_type: &'static str,
    pub resource_id: String,
}

impl core::fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.resource_type, self.resource_id)
    }
}

/// What AWS Config reports for one target.
#[derive(Clone, Debug)]
pub struct Verdict {
    pub target: ResolvedTarget,
    pub evaluations: Vec<RuleCompliance>,
}

impl Verdict {
    /// The evaluation of `rule`, if AWS Config has made one yet.
    pub fn of_rule(&self, rule: &str) -> Option<&RuleCompliance> {
        self.evaluations
            .iter()
            .find(|e| e.rule_name == rule || e.rule_name.contains(rule))
    }
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    /// How long the resources stay in each posture.
    pub hold: Duration,
    pub verify: bool,
    pub remediate: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            hold: Duration::from_secs(60),
            verify: false,
            remediate: false,
        }
    }
}

pub struct Runner {
    aws: Aws,
    settings: Settings,
}

impl Runner {
    pub fn new(aws: Aws, settings: Settings) -> Self {
        Runner { aws, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// A store for `scenario` that knows every AWS resource type, so leftovers
    /// of either posture get destroyed.
    fn store(&self, scenario: &dyn Scenario) -> Store<Aws> {
        let mut store = Store::new(
            self.settings.scenario_state_dir(scenario.rule()),
            self.aws.clone(),
        );
        aws::register_all(&mut store);
        store
    }

    async fn env(&self, scenario: &dyn Scenario) -> Result<Env, Error> {
        let mut env = Env::new(self.settings.clone());
        if scenario.needs_subnets() {
            let vpc_id = self.settings.require_vpc_id()?;
            let subnet_ids = aws::ec2::subnets_in_vpc(&self.aws, vpc_id).await?;
            log::debug!("subnets of {vpc_id}: {subnet_ids:?}");
            env.subnet_ids = Some(subnet_ids);
        }
        Ok(env)
    }

    async fn declare(
        &self,
        scenario: &dyn Scenario,
        posture: Posture,
    ) -> Result<(Store<Aws>, Vec<Target>), Error> {
        let env = self.env(scenario).await?;
        let mut store = self.store(scenario);
        let targets = scenario.declare(&env, &mut store, posture)?;
        Ok((store, targets))
    }

    /// What applying `posture` would do, without doing it.
    pub async fn plan(&self, scenario: &dyn Scenario, posture: Posture) -> Result<Plan<Aws>, Error> {
        let (mut store, _) = self.declare(scenario, posture).await?;
        store.plan()
    }

    /// Brings the scenario's resources into `posture`.
    pub async fn apply(
        &self,
        scenario: &dyn Scenario,
        posture: Posture,
    ) -> Result<Vec<ResolvedTarget>, Error> {
        if self.settings.enable_security_hub {
            aws::securityhub::ensure_enabled(&self.aws).await?;
        }
        let (mut store, targets) = self.declare(scenario, posture).await?;
        let plan = store.plan()?;
        log::info!("{} ({posture}):\n{plan}", scenario.rule());
        store.apply(plan).await?;
        resolve(&targets)
    }

    /// Flips a deployed scenario into its compliant posture.
    pub async fn remediate(&self, scenario: &dyn Scenario) -> Result<Vec<ResolvedTarget>, Error> {
        ensure!(
            scenario.remediable(),
            NotRemediableSnafu {
                rule: scenario.rule()
            }
        );
        self.apply(scenario, Posture::Compliant).await
    }

    /// The plan that destroys everything the scenario has stored.
    ///
    /// Nothing is declared, so every store file is an orphan.
    pub fn destroy_plan(&self, scenario: &dyn Scenario) -> Result<(Store<Aws>, Plan<Aws>), Error> {
        let mut store = self.store(scenario);
        let plan = store.plan()?;
        Ok((store, plan))
    }

    /// Destroys everything the scenario has stored, in reverse dependency
    /// order, carrying on past failures.
    pub async fn destroy(&self, scenario: &dyn Scenario) -> Result<(), Error> {
        let (mut store, plan) = self.destroy_plan(scenario)?;
        if !plan.has_changes() {
            log::info!("{}: nothing to destroy", scenario.rule());
            return Ok(());
        }
        log::info!("{} (destroy):\n{plan}", scenario.rule());
        store.teardown(plan).await?;
        // Only succeeds once the directory is empty
        let _ = std::fs::remove_dir(store.path());
        Ok(())
    }

    /// The targets of a deployed scenario, read from its store.
    pub async fn deployed_targets(
        &self,
        scenario: &dyn Scenario,
    ) -> Result<Vec<ResolvedTarget>, Error> {
        let (_, targets) = self.declare(scenario, Posture::NonCompliant).await?;
        resolve(&targets)
    }

    /// Asks AWS Config how it evaluates each target.
    pub async fn verify(&self, targets: &[ResolvedTarget]) -> Result<Vec<Verdict>, Error> {
        let mut verdicts = vec![];
        for target in targets {
            let evaluations =
                aws::config::compliance_of(&self.aws, target.resource_type, &target.resource_id)
                    .await?;
            if evaluations.is_empty() {
                log::warn!("AWS Config has not evaluated {target} yet");
            }
            for evaluation in &evaluations {
                log::info!(
                    "{target}: {} is {}",
                    evaluation.rule_name,
                    evaluation.compliance
                );
            }
            verdicts.push(Verdict {
                target: target.clone(),
                evaluations,
            });
        }
        Ok(verdicts)
    }

    /// Provisions the non-compliant posture, holds, optionally verifies and
    /// remediates, then tears everything down.
    ///
    /// The teardown runs even when an earlier step failed or `cancel` fired.
    /// The first error is returned.
    pub async fn run(
        &self,
        scenario: &dyn Scenario,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let exercised = self.exercise(scenario, options, cancel).await;
        if let Err(e) = &exercised {
            log::error!("{} failed, tearing down: {e}", scenario.rule());
        }
        let destroyed = self.destroy(scenario).await;
        exercised?;
        destroyed
    }

    async fn exercise(
        &self,
        scenario: &dyn Scenario,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let targets = self.apply(scenario, Posture::NonCompliant).await?;
        for target in &targets {
            log::info!("non-compliant: {target}");
        }
        if !hold(options.hold, cancel).await {
            return Ok(());
        }
        if options.verify {
            self.verify(&targets).await?;
        }
        if !options.remediate {
            return Ok(());
        }

        let targets = self.remediate(scenario).await?;
        for target in &targets {
            log::info!("remediated: {target}");
        }
        if !hold(options.hold, cancel).await {
            return Ok(());
        }
        if options.verify {
            self.verify(&targets).await?;
        }
        Ok(())
    }
}

fn resolve(targets: &[Target]) -> Result<Vec<ResolvedTarget>, Error> {
    let mut resolved = vec![];
    for target in targets {
        resolved.push(ResolvedTarget {
            resource_type: target.resource_type,
            resource_id: target.resource_id.get()?,
        });
    }
    Ok(resolved)
}

/// Waits `duration`, returning `false` if `cancel` fired first.
pub async fn hold(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    log::info!("holding for {}s", duration.as_secs());
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => {
            log::warn!("hold cancelled");
            false
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Fixed;

    impl Scenario for Fixed {
        fn rule(&self) -> &'static str {
            "fixed-rule"
        }

        fn summary(&self) -> &'static str {
            "no compliant shape"
        }

        fn remediable(&self) -> bool {
            false
        }

        fn declare(
            &self,
            _env: &Env,
            _store: &mut Store<Aws>,
            _posture: Posture,
        ) -> Result<Vec<Target>, Error> {
            Ok(vec![])
        }
    }

    fn runner(name: &str) -> Runner {
        let mut settings = Settings::new("us-east-1", "123456789012");
        settings.state_dir = std::path::Path::new(std::env!("CARGO_WORKSPACE_DIR"))
            .join("test_output/runner")
            .join(name);
        let _ = std::fs::remove_dir_all(&settings.state_dir);
        Runner::new(Aws::offline("us-east-1"), settings)
    }

    #[tokio::test]
    async fn remediating_without_a_compliant_shape_fails() {
        let runner = runner("not_remediable");
        let err = runner.remediate(&Fixed).await.unwrap_err();
        assert!(matches!(err, Error::NotRemediable { rule } if rule == "fixed-rule"));
    }

    #[tokio::test]
    async fn destroying_nothing_makes_no_calls() {
        let _ = env_logger::builder().is_test(true).try_init();
        let runner = runner("destroy_nothing");
        let scenario = crate::scenario::find("s3-bucket-versioning-enabled").unwrap();
        runner.destroy(scenario.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn plan_reads_the_scenario_store() {
        let runner = runner("plan");
        let scenario = crate::scenario::find("dynamodb-pitr-enabled").unwrap();
        let plan = runner
            .plan(scenario.as_ref(), Posture::NonCompliant)
            .await
            .unwrap();
        assert_eq!(1, plan.actions.len());
        assert_eq!("table", plan.actions[0].id);
        assert!(plan.has_changes());
    }

    #[tokio::test]
    async fn undeployed_targets_do_not_resolve() {
        let runner = runner("undeployed");
        let scenario = crate::scenario::find("iam-user-no-policies-check").unwrap();
        let err = runner.deployed_targets(scenario.as_ref()).await.unwrap_err();
        assert!(matches!(err, Error::RemoteUnresolved { .. }));
    }

    #[tokio::test]
    async fn cancelled_hold_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let start = std::time::Instant::now();
        assert!(!hold(Duration::from_secs(60), &cancel).await);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(hold(Duration::ZERO, &CancellationToken::new()).await);
    }

    fn no_hold() -> RunOptions {
        RunOptions {
            hold: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failed_apply_is_returned_after_teardown() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut settings = runner("failed_apply").settings().clone();
        settings.vpc_id = Some("vpc-0abc".into());
        let runner = Runner::new(Aws::offline("us-east-1"), settings);
        let scenario = crate::scenario::find("restricted-ssh").unwrap();

        let err = runner
            .run(scenario.as_ref(), &no_hold(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Create { ref name, .. } if name == "security-group"),
            "{err}"
        );
        let state_dir = runner.settings().scenario_state_dir(scenario.rule());
        let leftovers = std::fs::read_dir(&state_dir).map_or(0, |dir| dir.count());
        assert_eq!(0, leftovers, "{state_dir:?}");
        let (_, plan) = runner.destroy_plan(scenario.as_ref()).unwrap();
        assert!(!plan.has_changes());
    }

    #[tokio::test]
    async fn first_error_wins_over_a_failed_teardown() {
        let _ = env_logger::builder().is_test(true).try_init();
        let runner = runner("failed_teardown");
        let scenario = crate::scenario::find("restricted-ssh").unwrap();

        // A table left behind by an earlier run
        let state_dir = runner.settings().scenario_state_dir(scenario.rule());
        std::fs::create_dir_all(&state_dir).unwrap();
        let stored = serde_json::json!({
            "name": "table",
            "local": aws::dynamodb::Table {
                name: "nc-table".into(),
                partition_key: "id".into(),
                point_in_time_recovery: false,
                tags: Default::default(),
            },
            "remote": aws::dynamodb::TableOutput {
                name: "nc-table".into(),
                arn: "arn:aws:dynamodb:us-east-1:123456789012:table/nc-table".into(),
            },
            "type_name": std::any::type_name::<aws::dynamodb::Table>(),
        });
        std::fs::write(state_dir.join("table.json"), stored.to_string()).unwrap();

        // No VPC_ID, so declaring fails, and deleting the table fails offline
        let err = runner
            .run(scenario.as_ref(), &no_hold(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::MissingSetting { name } if name == "VPC_ID"),
            "{err}"
        );
        // The teardown keeps what it could not delete
        assert!(state_dir.join("table.json").exists());
        match runner.destroy(scenario.as_ref()).await.unwrap_err() {
            Error::Teardown { failures } => {
                assert_eq!(1, failures.len());
                assert!(failures[0].starts_with("table"), "{failures:?}");
            }
            e => panic!("unexpected error: {e}"),
        }
    }
}
