#![allow(clippy::result_large_err)]

use anyhow::Context;
use sqlsweep::config::{LogLevel, SweepConfig};
use sqlsweep::engine::SweepEngine;
use sqlsweep::rest::auth::ImdsCredential;
use sqlsweep::rest::client::ArmClient;
use sqlsweep::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

enum CliCommand {
    Run(CliOverrides),
    Help,
}

#[derive(Default)]
struct CliOverrides {
    subscription: Option<String>,
    resource_group: Option<String>,
    servers: Option<String>,
    poll_interval: Option<Duration>,
    log_level: Option<LogLevel>,
    check_maintenance_notification: bool,
    management_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let overrides = match parse_cli_args()? {
        CliCommand::Run(overrides) => overrides,
        CliCommand::Help => {
            print_help();
            return Ok(());
        }
    };

    let mut config = SweepConfig::load().context("failed to load configuration")?;
    apply_overrides(&mut config, overrides);

    telemetry::init_tracing(config.log_level).context("failed to initialise telemetry")?;

    let credential = Arc::new(
        ImdsCredential::new().context("failed to construct managed identity credential")?,
    );
    let caller = Arc::new(
        ArmClient::new(
            &config.management_endpoint,
            credential,
            config.request_timeout(),
        )
        .context("failed to construct management client")?,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let engine = SweepEngine::new(caller, config);
    let summary = engine
        .run(shutdown)
        .await
        .context("failover sweep did not complete")?;

    println!("{summary}");
    if summary.failed > 0 {
        println!(
            "{} target(s) failed; re-run the sweep with the same filters, or escalate with the per-target errors in the log output",
            summary.failed
        );
    }

    Ok(())
}

fn apply_overrides(config: &mut SweepConfig, overrides: CliOverrides) {
    if let Some(subscription) = overrides.subscription {
        config.subscription_id = Some(subscription);
    }
    if let Some(resource_group) = overrides.resource_group {
        config.resource_group = Some(resource_group);
    }
    if let Some(servers) = overrides.servers {
        config.servers = Some(servers);
    }
    if let Some(interval) = overrides.poll_interval {
        config.poll_interval_secs = interval.as_secs().max(1);
    }
    if let Some(level) = overrides.log_level {
        config.log_level = level;
    }
    if overrides.check_maintenance_notification {
        config.check_maintenance_notification = true;
    }
    if let Some(endpoint) = overrides.management_endpoint {
        config.management_endpoint = endpoint;
    }
}

fn parse_cli_args() -> anyhow::Result<CliCommand> {
    let mut args = std::env::args().skip(1);
    let mut overrides = CliOverrides::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-s" | "--subscription" => {
                overrides.subscription = Some(expect_value(&mut args, &arg)?);
            }
            "-g" | "--resource-group" => {
                overrides.resource_group = Some(expect_value(&mut args, &arg)?);
            }
            "--servers" => {
                overrides.servers = Some(expect_value(&mut args, &arg)?);
            }
            "--poll-interval" => {
                let raw = expect_value(&mut args, &arg)?;
                let interval = humantime::parse_duration(&raw)
                    .with_context(|| format!("invalid poll interval `{raw}`"))?;
                overrides.poll_interval = Some(interval);
            }
            "--log-level" => {
                let raw = expect_value(&mut args, &arg)?;
                overrides.log_level = Some(raw.parse()?);
            }
            "--check-maintenance-notification" => {
                overrides.check_maintenance_notification = true;
            }
            "--management-endpoint" => {
                overrides.management_endpoint = Some(expect_value(&mut args, &arg)?);
            }
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(CliCommand::Run(overrides))
}

fn expect_value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next()
        .ok_or_else(|| anyhow::anyhow!("expected value after {flag}"))
}

fn print_help() {
    println!(
        "\
Usage: sqlsweep [OPTIONS]

Initiates failover of every eligible Azure SQL database and elastic pool
under one subscription and tracks each operation to completion.

Options:
  -s, --subscription <ID>        Subscription to sweep; `*` or omitted uses
                                 the one subscription visible to the
                                 managed identity
  -g, --resource-group <NAME>    Only sweep this resource group (default: all)
      --servers <LIST>           Comma-separated logical server names
                                 (default: all)
      --poll-interval <DURATION> Sleep between status poll sweeps, e.g. 15s
      --log-level <LEVEL>        minimal, info, or verbose
      --check-maintenance-notification
                                 Abort unless an active self-service
                                 maintenance notification exists
      --management-endpoint <URL>
                                 Management plane origin override
  -h, --help                     Print this help message
"
    );
}
