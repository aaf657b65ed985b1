//! `noncompliant`: puts an AWS account into states specific AWS Config rules
//! flag, and takes it back out again.
//!
//! ```sh
//! noncompliant list
//! noncompliant run restricted-ssh --hold-secs 300 --remediate --verify
//! noncompliant destroy restricted-ssh --force
//! noncompliant cleanup --force
//! ```
//!
//! Every option can also be given through the environment, or a `.env` file
//! in the working directory.
use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use nc::{
    aws::Aws,
    cleanup::{CleanupConfig, TagCleanup},
    runner::{RunOptions, Runner, Verdict},
    scenario::{self, Posture},
    settings::{Settings, TagPair},
    Action, Plan,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "noncompliant",
    version,
    about = "Provision AWS resources that violate AWS Config rules, then tear them down"
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Region to work in, defaults to the one of the AWS profile.
    #[arg(long, env = "AWS_REGION", global = true)]
    region: Option<String>,

    /// Looked up through STS when not given.
    #[arg(long, env = "AWS_ACCOUNT_ID", global = true)]
    account_id: Option<String>,

    /// VPC for security groups, target groups and auto scaling groups.
    #[arg(long, env = "VPC_ID", global = true)]
    vpc_id: Option<String>,

    /// Image of the auto scaling group's launch template.
    #[arg(long, env = "EC2_AMI_ID", global = true)]
    ec2_ami_id: Option<String>,

    /// Existing bucket receiving server access logs once remediated.
    #[arg(long, env = "LOGGING_BUCKET_NAME", global = true)]
    logging_bucket_name: Option<String>,

    /// Region of the replica bucket once remediated.
    #[arg(long, env = "DESTINATION_REGION", global = true)]
    destination_region: Option<String>,

    /// Zip archive holding the Lambda function code.
    #[arg(long, env = "LAMBDA_ZIP_PATH", global = true)]
    lambda_zip_path: Option<PathBuf>,

    /// Enable Security Hub before applying.
    #[arg(
        long,
        env = "ENABLE_SECURITY_HUB",
        global = true,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    enable_security_hub: bool,

    #[arg(
        long,
        env = "NONCOMPLIANT_STATE_DIR",
        default_value = ".noncompliant",
        global = true
    )]
    state_dir: PathBuf,

    /// Prepended to every resource name.
    #[arg(long, env = "NONCOMPLIANT_PREFIX", default_value = "nc", global = true)]
    prefix: String,

    /// Tag put on every resource, and swept by `cleanup`.
    #[arg(
        long,
        env = "NONCOMPLIANT_CLEANUP_TAG",
        default_value = "noncompliant:cleanup=true",
        global = true
    )]
    cleanup_tag: TagPair,
}

#[derive(Subcommand)]
enum Command {
    /// List every scenario.
    List,
    /// Show what `apply` would do.
    Plan {
        rule: String,
        /// Plan the remediated shape.
        #[arg(long)]
        compliant: bool,
    },
    /// Provision a scenario.
    Apply {
        rule: String,
        /// Provision the remediated shape.
        #[arg(long)]
        compliant: bool,
    },
    /// Flip a provisioned scenario to its compliant shape.
    Remediate { rule: String },
    /// Ask AWS Config how it evaluates a provisioned scenario.
    Verify { rule: String },
    /// Tear a scenario down.
    Destroy {
        rule: String,
        /// Without this only the plan is shown.
        #[arg(long, short)]
        force: bool,
    },
    /// Provision, hold, optionally verify and remediate, then tear down.
    Run {
        rule: String,
        /// Seconds to stay in each shape.
        #[arg(long, default_value_t = 60)]
        hold_secs: u64,
        #[arg(long)]
        remediate: bool,
        #[arg(long)]
        verify: bool,
    },
    /// Delete every resource carrying the cleanup tag.
    Cleanup {
        /// Sweep this tag instead of the cleanup tag.
        #[arg(long)]
        tag: Option<TagPair>,
        /// Pause between two delete calls.
        #[arg(long, default_value_t = 2000)]
        delay_ms: u64,
        /// Without this only the resources found are listed.
        #[arg(long, short)]
        force: bool,
    },
}

impl ConfigArgs {
    async fn settings(self, aws: &Aws) -> anyhow::Result<Settings> {
        let region = aws
            .region()
            .context("no AWS region configured, set AWS_REGION")?
            .to_owned();
        let account_id = match self.account_id {
            Some(id) => id,
            None => aws.account_id().await.context("could not look up the account id")?,
        };
        let mut settings = Settings::new(region, account_id);
        settings.prefix = self.prefix;
        settings.state_dir = self.state_dir;
        settings.cleanup_tag = self.cleanup_tag;
        settings.vpc_id = self.vpc_id;
        settings.ec2_ami_id = self.ec2_ami_id;
        settings.logging_bucket_name = self.logging_bucket_name;
        settings.destination_region = self.destination_region;
        settings.lambda_zip_path = self.lambda_zip_path;
        settings.enable_security_hub = self.enable_security_hub;
        Ok(settings)
    }
}

fn print_plan(title: &str, plan: &Plan<Aws>) {
    println!("{}", title.bold());
    if !plan.has_changes() {
        println!("  {}", "No changes.".dimmed());
    }
    for action in &plan.actions {
        let line = format!(
            "  {} '{}' [{}]{}",
            action.action,
            action.id,
            action.type_name.as_deref().unwrap_or("unknown"),
            if action.is_orphan { " (orphan)" } else { "" }
        );
        let line = match action.action {
            Action::Load => line.dimmed(),
            Action::Create => line.green(),
            Action::Update => line.yellow(),
            Action::Destroy => line.red(),
        };
        println!("{line}");
    }
    for warning in &plan.warnings {
        println!("  {} {warning}", "WARNING:".yellow().bold());
    }
}

fn print_verdicts(rule: &str, verdicts: &[Verdict]) {
    for verdict in verdicts {
        let status = match verdict.of_rule(rule) {
            Some(e) if e.compliance == "NON_COMPLIANT" => e.compliance.red(),
            Some(e) if e.compliance == "COMPLIANT" => e.compliance.green(),
            Some(e) => e.compliance.yellow(),
            None => "NOT EVALUATED YET".dimmed(),
        };
        println!("{}: {status}", verdict.target);
        for evaluation in &verdict.evaluations {
            println!("  {} {}", evaluation.rule_name, evaluation.compliance.dimmed());
        }
    }
}

/// A token cancelled by the first Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted, tearing down what was provisioned");
                cancel.cancel();
            }
        }
    });
    cancel
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::List = cli.command {
        for scenario in scenario::all() {
            println!("{:<44} {}", scenario.rule().bold(), scenario.summary());
        }
        return Ok(());
    }

    let aws = Aws::load(cli.config.region.clone()).await;
    let settings = cli.config.settings(&aws).await?;
    log::debug!("{settings:#?}");

    if let Command::Cleanup {
        tag,
        delay_ms,
        force,
    } = cli.command
    {
        let config = CleanupConfig {
            tag: tag.unwrap_or_else(|| settings.cleanup_tag.clone()),
            delay: Duration::from_millis(delay_ms),
            dry_run: !force,
            ..Default::default()
        };
        let report = TagCleanup::new(aws)
            .run(&config, &interrupt_token())
            .await?;
        print!("{report}");
        if config.dry_run && !report.skipped.is_empty() {
            println!("Call `cleanup --force` to delete these resources.");
        }
        anyhow::ensure!(
            report.is_clean(),
            "{} resource(s) could not be deleted",
            report.failed.len()
        );
        return Ok(());
    }

    let runner = Runner::new(aws, settings);
    match cli.command {
        Command::Plan { rule, compliant } => {
            let scenario = scenario::find(&rule)?;
            let posture = if compliant {
                Posture::Compliant
            } else {
                Posture::NonCompliant
            };
            let plan = runner.plan(scenario.as_ref(), posture).await?;
            print_plan(&format!("{rule} ({posture}):"), &plan);
        }
        Command::Apply { rule, compliant } => {
            let scenario = scenario::find(&rule)?;
            let posture = if compliant {
                Posture::Compliant
            } else {
                Posture::NonCompliant
            };
            for target in runner.apply(scenario.as_ref(), posture).await? {
                println!("{posture}: {target}");
            }
        }
        Command::Remediate { rule } => {
            let scenario = scenario::find(&rule)?;
            for target in runner.remediate(scenario.as_ref()).await? {
                println!("remediated: {target}");
            }
        }
        Command::Verify { rule } => {
            let scenario = scenario::find(&rule)?;
            let targets = runner.deployed_targets(scenario.as_ref()).await?;
            let verdicts = runner.verify(&targets).await?;
            print_verdicts(&rule, &verdicts);
        }
        Command::Destroy { rule, force } => {
            let scenario = scenario::find(&rule)?;
            if force {
                runner.destroy(scenario.as_ref()).await?;
            } else {
                let (_, plan) = runner.destroy_plan(scenario.as_ref())?;
                print_plan(&format!("{rule} (destroy):"), &plan);
                if plan.has_changes() {
                    println!("Call `destroy --force` to delete these resources.");
                }
            }
        }
        Command::Run {
            rule,
            hold_secs,
            remediate,
            verify,
        } => {
            let scenario = scenario::find(&rule)?;
            let options = RunOptions {
                hold: Duration::from_secs(hold_secs),
                verify,
                remediate,
            };
            runner
                .run(scenario.as_ref(), &options, &interrupt_token())
                .await?;
        }
        Command::List | Command::Cleanup { .. } => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env files are fine
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
