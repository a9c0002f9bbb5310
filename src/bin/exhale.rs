// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use clap::Parser;
use clap_config::{CliArg, Command};
use exhale::{calibrate::{self, CalibrateConfig},
             daemon::{self, RunConfig},
             provision::{self, ResetConfig}};
use miette::IntoDiagnostic;

fn main() -> miette::Result<()> {
    let cli_arg = CliArg::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli_arg.global_options.log_level)
        .init();

    // Single-threaded cooperative executor: every task in the process is
    // spawned onto this LocalSet.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let local_set = tokio::task::LocalSet::new();

    local_set.block_on(&runtime, async move {
        match cli_arg.command {
            Command::Run(args) => {
                daemon::run(RunConfig {
                    zdevice: args.zdevice,
                    scd30_i2c: args.scd30_i2c,
                    co2_limit: args.co2_limit,
                    co2_diff: args.co2_diff,
                    manual_secs: args.manual,
                    led: args.led,
                    bridge: args.bridge,
                })
                .await
            }
            Command::Calibrate(args) => {
                calibrate::run(CalibrateConfig {
                    scd30_i2c: args.scd30_i2c,
                    scd30_ppm: args.scd30_ppm,
                    led: args.led,
                })
                .await
            }
            Command::Reset(args) => {
                provision::run(ResetConfig {
                    zdevice: args.zdevice,
                    switches: args.switches,
                    bridge: args.bridge,
                })
                .await
            }
        }
    })
}

/// More info:
/// - <https://docs.rs/clap/latest/clap/_derive/#overview>
mod clap_config {
    use std::path::PathBuf;

    use clap::{Args, Parser, Subcommand};

    #[derive(Debug, Parser)]
    #[command(bin_name = "exhale")]
    #[command(about = "Keeps indoor CO₂ down by driving exhaust fans over Z-Wave")]
    #[command(version)]
    #[command(arg_required_else_help(true))]
    pub struct CliArg {
        #[command(subcommand)]
        pub command: Command,

        #[command(flatten)]
        pub global_options: GlobalOption,
    }

    #[derive(Debug, Args)]
    pub struct GlobalOption {
        #[arg(
            global = true,
            long,
            default_value = "info",
            help = "Log level (trace, debug, info, warn, error)"
        )]
        pub log_level: tracing::Level,
    }

    #[derive(Debug, Subcommand)]
    pub enum Command {
        #[clap(about = "Run the controller daemon")]
        Run(RunArgs),

        #[clap(about = "Stream readings and optionally force-recalibrate the sensor")]
        Calibrate(CalibrateArgs),

        #[clap(about = "Factory-reset the wireless controller and induct new switches")]
        Reset(ResetArgs),
    }

    #[derive(Debug, Args)]
    pub struct RunArgs {
        #[arg(
            long,
            help = "Serial device of the Z-Wave controller (auto-discovered if omitted)"
        )]
        pub zdevice: Option<PathBuf>,

        #[arg(
            long = "scd30_i2c",
            help = "I²C bus index of the SCD30 (auto-discovered if omitted)"
        )]
        pub scd30_i2c: Option<u32>,

        #[arg(
            long = "co2_limit",
            default_value_t = 900,
            help = "Smoothed ppm at which the fans turn on"
        )]
        pub co2_limit: u32,

        #[arg(
            long = "co2_diff",
            default_value_t = 50,
            help = "Hysteresis below the limit before the fans turn off"
        )]
        pub co2_diff: u32,

        #[arg(
            long,
            default_value_t = 3600,
            help = "Manual-override duration in seconds after a human toggle"
        )]
        pub manual: u64,

        #[arg(long, default_value = "/tmp/exhale.led", help = "LED brightness file")]
        pub led: PathBuf,

        #[arg(
            long,
            default_value = "exhale-ozw-bridge",
            help = "Wireless-stack bridge command"
        )]
        pub bridge: String,
    }

    #[derive(Debug, Args)]
    pub struct CalibrateArgs {
        #[arg(
            long = "scd30_i2c",
            help = "I²C bus index of the SCD30 (auto-discovered if omitted)"
        )]
        pub scd30_i2c: Option<u32>,

        #[arg(
            long = "scd30_ppm",
            help = "Reference ppm for forced recalibration (dry run if omitted)"
        )]
        pub scd30_ppm: Option<u16>,

        #[arg(long, default_value = "/tmp/exhale.led", help = "LED brightness file")]
        pub led: PathBuf,
    }

    #[derive(Debug, Args)]
    pub struct ResetArgs {
        #[arg(
            long,
            help = "Serial device of the Z-Wave controller (auto-discovered if omitted)"
        )]
        pub zdevice: Option<PathBuf>,

        #[arg(long, default_value_t = 1, help = "How many switches to include")]
        pub switches: u32,

        #[arg(
            long,
            default_value = "exhale-ozw-bridge",
            help = "Wireless-stack bridge command"
        )]
        pub bridge: String,
    }
}
