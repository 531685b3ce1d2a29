// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod logging;
mod runtime;

use anyhow::{Context, Result};
use config::Config;
use invoicedesk_api::Client;
use invoicedesk_app::AppState;
use invoicedesk_tui::Timings;
use runtime::ApiRuntime;
use std::env;
use std::path::PathBuf;
use tracing::info;

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `invoicedesk --print-example-config` to generate a v1 template",
            options.config_path.display()
        )
    })?;

    let base_url = config.api_base_url(options.api_url.as_deref());
    let client = Client::new(&base_url, config.api_timeout()?).with_context(|| {
        format!(
            "invalid API settings in {}; fix [api].base_url, {} or --api-url",
            options.config_path.display(),
            config::API_URL_ENV
        )
    })?;

    if options.check_only {
        let health = client
            .health()
            .with_context(|| format!("health check against {base_url} failed"))?;
        let app = if health.app.is_empty() {
            "invoice server"
        } else {
            health.app.as_str()
        };
        println!("{app} at {base_url}: {}", health.status);
        return Ok(());
    }

    let log_path = logging::init(&config)?;
    info!(base_url = %base_url, log = %log_path.display(), "starting invoicedesk");

    let mut state = AppState::default();
    state.list.filter = config.default_filter();

    let timings = Timings {
        toast: config.toast_timeout()?,
        upload_reload_delay: config.upload_reload_delay()?,
    };
    let mut runtime = ApiRuntime::new(client, runtime::default_download_dir());
    invoicedesk_tui::run_app(&mut state, &mut runtime, timings)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    api_url: Option<String>,
    print_config_path: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        api_url: None,
        print_config_path: false,
        print_example: false,
        check_only: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--api-url" => {
                let value = iter.next().ok_or_else(|| {
                    anyhow::anyhow!("--api-url requires a URL such as http://127.0.0.1:8000")
                })?;
                options.api_url = Some(value.as_ref().to_owned());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow::anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

fn print_help() {
    println!("invoicedesk: review scanned invoices from the terminal");
    println!("  --config <path>          Use a specific config path");
    println!("  --api-url <url>          Talk to this API origin (overrides config and env)");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-example-config   Print a v1 config template");
    println!("  --check                  Validate config and ping the invoice server");
    println!("  --help                   Show this help");
}
