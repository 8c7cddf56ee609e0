//! The `monitor` subcommand driver loop: repeats the pipeline for one
//! symbol on an interval, appending every decision to a log file, until a
//! Ctrl-C signal requests a graceful shutdown (§6).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::pipeline::run_pipeline;
use crate::types::AccountState;

pub async fn execute(
    symbol: &str,
    account: AccountState,
    config: PipelineConfig,
    check_interval_minutes: u64,
    log_path: &Path,
) -> Result<()> {
    info!(symbol, check_interval_minutes, "starting monitor loop");

    let mut iteration: u64 = 0;
    loop {
        iteration += 1;
        let start = Utc::now();

        tokio::select! {
            result = run_pipeline(symbol, &account, &config) => {
                match result {
                    Ok(output) => {
                        info!(iteration, action = ?output.decision.action, "cycle complete");
                        if let Err(e) = append_log(log_path, &output) {
                            error!(error = %e, "failed to append to trade log");
                        }
                    }
                    Err(e) => {
                        error!(iteration, error = %e, "pipeline run failed, continuing to next cycle");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down monitor loop");
                std::process::exit(130);
            }
        }

        let elapsed = Utc::now() - start;
        let sleep_secs = (check_interval_minutes as i64 * 60 - elapsed.num_seconds()).max(1) as u64;

        tokio::select! {
            _ = sleep(StdDuration::from_secs(sleep_secs)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt during sleep, shutting down monitor loop");
                std::process::exit(130);
            }
        }
    }
}

fn append_log(path: &Path, output: &crate::pipeline::PipelineOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path).context("open trade log")?;
    let line = serde_json::to_string(output).context("serialize pipeline output")?;
    writeln!(file, "{line}")?;
    Ok(())
}

/// Generate a systemd unit that runs the `monitor` subcommand continuously.
pub fn generate_systemd_service(symbol: &str, check_interval: u64) -> Result<()> {
    let service_content = format!(
        "[Unit]
Description=Crypto Momentum AI Monitor
After=network.target

[Service]
Type=simple
User=crypto-momentum-ai
WorkingDirectory=/opt/crypto-momentum-ai
ExecStart=/opt/crypto-momentum-ai/target/release/crypto-momentum-ai monitor --symbol {symbol} --check-interval {check_interval}
Restart=always
RestartSec=10
Environment=RUST_LOG=info

[Install]
WantedBy=multi-user.target",
    );

    std::fs::write("./crypto-momentum-ai.service", service_content)?;
    println!("systemd service file generated: ./crypto-momentum-ai.service");
    println!("To install:");
    println!("  sudo cp crypto-momentum-ai.service /etc/systemd/system/");
    println!("  sudo systemctl daemon-reload");
    println!("  sudo systemctl enable --now crypto-momentum-ai");

    Ok(())
}

/// Generate a cron line that runs a single pipeline pass via `single`.
pub fn generate_cron_job(symbol: &str, check_interval: u64) -> Result<()> {
    let cron_expression = match check_interval {
        60 => "0 * * * *",
        30 => "0,30 * * * *",
        15 => "0,15,30,45 * * * *",
        5 => "*/5 * * * *",
        _ => "0 * * * *",
    };

    let cron_job = format!(
        "# Crypto Momentum AI - run every {check_interval} minutes
{cron_expression} /opt/crypto-momentum-ai/target/release/crypto-momentum-ai single --symbol {symbol} >> /var/log/crypto-momentum-ai.log 2>&1
"
    );

    std::fs::write("./crypto-momentum-ai.cron", cron_job)?;
    println!("cron job generated: ./crypto-momentum-ai.cron");
    println!("To install:");
    println!("  sudo cp crypto-momentum-ai.cron /etc/cron.d/crypto-momentum-ai");
    println!("  sudo chmod 644 /etc/cron.d/crypto-momentum-ai");

    Ok(())
}

/// Generate a docker-compose file that runs the `monitor` subcommand.
pub fn generate_docker_compose(symbol: &str, check_interval: u64) -> Result<()> {
    let compose_content = format!(
        "version: '3.8'

services:
  crypto-momentum-ai:
    build: .
    container_name: crypto-momentum-ai-monitor
    restart: unless-stopped
    environment:
      - RUST_LOG=info
    volumes:
      - ./out:/app/out
    command: monitor --symbol {symbol} --check-interval {check_interval}
"
    );

    std::fs::write("./docker-compose.yml", compose_content)?;
    println!("Docker Compose file generated: ./docker-compose.yml");
    println!("To deploy:");
    println!("  docker-compose up -d");

    Ok(())
}
