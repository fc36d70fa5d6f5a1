use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use operate_console::{
    RunOptions,
    console::{ConfigOverrides, ConsoleConfig, FilterChange},
    run_console,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "operate-console", version, about = "Headless Operate console")]
struct Cli {
    /// Operate web application URL (default: http://localhost:8080)
    #[arg(long, env = "OPERATE_URL")]
    base_url: Option<String>,

    /// Config file (default: <config dir>/operate-console/config.toml)
    #[arg(long, env = "OPERATE_CONSOLE_CONFIG")]
    config: Option<PathBuf>,

    /// Instance to open in the detail view
    #[arg(long)]
    instance: Option<String>,

    /// Deep-link query string, e.g. 'filter={"active":true}&sortBy=id'
    #[arg(long)]
    query: Option<String>,

    /// Filter edit applied after the query, e.g. --set startDate=2023-01-01
    #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_change)]
    changes: Vec<FilterChange>,

    /// Detail refresh interval, e.g. 5s
    #[arg(long, value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Quiet period for text filter fields, e.g. 500ms
    #[arg(long, value_parser = humantime::parse_duration)]
    debounce_delay: Option<Duration>,

    #[arg(long)]
    entries_per_page: Option<u32>,
}

fn parse_change(raw: &str) -> Result<FilterChange, String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got `{raw}`"))?;
    FilterChange::parse(field, value).map_err(|err| err.to_string())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = ConsoleConfig::load(cli.config.as_deref())?.with_overrides(ConfigOverrides {
        base_url: cli.base_url,
        poll_interval: cli.poll_interval,
        debounce_delay: cli.debounce_delay,
        entries_per_page: cli.entries_per_page,
    });

    run_console(
        config,
        RunOptions {
            instance: cli.instance,
            query: cli.query,
            changes: cli.changes,
        },
    )
}
