//! Command-line interface for the DCA backtest engine.

use dca_backtest::analytics::{ResultFormatter, TradeReport};
use dca_backtest::config::{DipBuySettings, PlanFile, SellSettings};
use dca_backtest::data::{load_csv, missing_dates, DataConfig, SeriesSummary};
use dca_backtest::engine::{run_backtest, BacktestConfig, BacktestResult, MissingDataPolicy};
use dca_backtest::error::{BacktestError, Result};
use dca_backtest::plan::{Frequency, InvestmentPlan};
use dca_backtest::sweep::{dip_grid, rank, DipSweepParams, RankBy, SweepRunner};
use dca_backtest::types::PriceSeries;
use dca_backtest::viz::value_vs_invested;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Backtest dollar-cost-averaging plans against historical daily prices.
#[derive(Parser)]
#[command(name = "dca-backtest")]
#[command(version)]
#[command(about = "Backtest dollar-cost-averaging plans with dip buying and sell strategies")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single backtest from command-line parameters
    Run {
        /// Path to a CSV file with date and price columns
        #[arg(short, long)]
        data: PathBuf,

        /// Asset identifier
        #[arg(short, long, default_value = "BTC")]
        asset: String,

        /// USD per scheduled contribution
        #[arg(short, long, default_value = "100")]
        contribution: Decimal,

        #[arg(short, long, value_enum, default_value = "weekly")]
        frequency: FrequencyArg,

        /// First simulated day (defaults to the first price)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last simulated day (defaults to the last price)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Enable dip buying at this drawdown percentage
        #[arg(long)]
        dip_threshold: Option<Decimal>,

        /// Dip buy size as a multiple of the contribution
        #[arg(long, default_value = "2")]
        dip_multiplier: Decimal,

        /// Trailing window for the dip reference high
        #[arg(long, default_value = "30")]
        dip_lookback: u32,

        /// Re-arm dip buying after this many days without recovery
        #[arg(long)]
        dip_cooldown: Option<u32>,

        #[arg(short, long, value_enum, default_value = "none")]
        sell: SellArg,

        #[arg(long)]
        profit_target: Option<Decimal>,

        #[arg(long)]
        sell_fraction: Option<Decimal>,

        #[arg(long)]
        rebalance_interval: Option<u32>,

        #[arg(long)]
        target_allocation: Option<Decimal>,

        #[arg(long)]
        stop_loss: Option<Decimal>,

        /// Keep buying after a stop-loss fires
        #[arg(long)]
        allow_reentry: bool,

        /// Minimum days between profit-taking or rebalancing sells
        #[arg(long, default_value = "0")]
        sell_cooldown: u32,

        /// Fill missing days with the last known price instead of failing
        #[arg(long)]
        carry_forward: bool,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Run a backtest from a plan file
    RunConfig {
        /// Path to TOML plan file
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        report: ReportArgs,
    },

    /// Sweep dip-buying parameters in parallel
    Sweep {
        /// Path to TOML plan file used as the base plan
        #[arg(short, long)]
        config: PathBuf,

        /// Frequencies to try
        #[arg(long, value_enum, value_delimiter = ',', default_value = "weekly")]
        frequencies: Vec<FrequencyArg>,

        /// Dip thresholds in percent
        #[arg(long, value_delimiter = ',', default_value = "5,10,15,20")]
        thresholds: Vec<Decimal>,

        /// Dip multipliers
        #[arg(long, value_delimiter = ',', default_value = "1.5,2,3")]
        multipliers: Vec<Decimal>,

        /// Metric to rank by
        #[arg(short, long, value_enum, default_value = "roi")]
        metric: RankArg,

        /// Show only the best N variants (0 = all)
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Generate an example plan file
    Init {
        #[arg(short, long, default_value = "plan.toml")]
        output: PathBuf,
    },

    /// Validate a price file
    Validate {
        #[arg(short, long)]
        data: PathBuf,

        /// Check coverage from this date
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Check coverage up to this date
        #[arg(long)]
        end: Option<NaiveDate>,
    },
}

/// Extra output for single runs.
#[derive(clap::Args)]
pub struct ReportArgs {
    /// Print the first N trades (0 = none)
    #[arg(long, default_value = "0")]
    pub trades: usize,

    /// Write the trade log as CSV
    #[arg(long)]
    pub export_trades: Option<PathBuf>,

    /// Write the daily timeline as CSV
    #[arg(long)]
    pub export_timeline: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum FrequencyArg {
    Daily,
    Weekly,
    Monthly,
}

impl From<FrequencyArg> for Frequency {
    fn from(arg: FrequencyArg) -> Self {
        match arg {
            FrequencyArg::Daily => Frequency::Daily,
            FrequencyArg::Weekly => Frequency::Weekly,
            FrequencyArg::Monthly => Frequency::Monthly,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SellArg {
    None,
    ProfitTaking,
    Rebalancing,
    StopLoss,
}

impl SellArg {
    fn as_str(&self) -> &'static str {
        match self {
            SellArg::None => "none",
            SellArg::ProfitTaking => "profit_taking",
            SellArg::Rebalancing => "rebalancing",
            SellArg::StopLoss => "stop_loss",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum RankArg {
    Roi,
    Apy,
    Sharpe,
    MaxDrawdown,
}

impl From<RankArg> for RankBy {
    fn from(arg: RankArg) -> Self {
        match arg {
            RankArg::Roi => RankBy::Roi,
            RankArg::Apy => RankBy::Apy,
            RankArg::Sharpe => RankBy::Sharpe,
            RankArg::MaxDrawdown => RankBy::MaxDrawdown,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("warning: a tracing subscriber was already installed");
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error ({}): {}", e.kind(), e);
        std::process::exit(1);
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            data,
            asset,
            contribution,
            frequency,
            start,
            end,
            dip_threshold,
            dip_multiplier,
            dip_lookback,
            dip_cooldown,
            sell,
            profit_target,
            sell_fraction,
            rebalance_interval,
            target_allocation,
            stop_loss,
            allow_reentry,
            sell_cooldown,
            carry_forward,
            report,
        } => {
            let prices = load_csv(data, &DataConfig::default())?;
            let (first, last) = series_bounds(&prices)?;

            let dip_buy = DipBuySettings {
                enabled: dip_threshold.is_some(),
                threshold_pct: dip_threshold.unwrap_or(DipBuySettings::default().threshold_pct),
                multiplier: *dip_multiplier,
                lookback_days: *dip_lookback,
                cooldown_days: *dip_cooldown,
            };
            let sell_settings = SellSettings {
                strategy: sell.as_str().to_string(),
                profit_target_pct: *profit_target,
                sell_fraction_pct: *sell_fraction,
                interval_days: *rebalance_interval,
                target_allocation_pct: *target_allocation,
                stop_loss_pct: *stop_loss,
                allow_reentry: (*sell == SellArg::StopLoss).then_some(*allow_reentry),
            };

            let plan = InvestmentPlan::new(
                asset.clone(),
                *contribution,
                (*frequency).into(),
                start.unwrap_or(first),
                end.unwrap_or(last),
            )
            .with_dip_buy(dip_buy.to_config())
            .with_sell_strategy(sell_settings.to_strategy()?)
            .with_sell_cooldown_days(*sell_cooldown)
            .validated()?;

            let config = BacktestConfig {
                missing_data: if *carry_forward {
                    MissingDataPolicy::CarryForward
                } else {
                    MissingDataPolicy::Fail
                },
                ..Default::default()
            };

            let result = run_backtest(&plan, &prices, &config)?;
            emit_result(&result, cli.output, report)
        }

        Commands::RunConfig { config, report } => run_from_config(config, cli.output, report),

        Commands::Sweep {
            config,
            frequencies,
            thresholds,
            multipliers,
            metric,
            top,
        } => run_sweep(
            config,
            frequencies,
            thresholds,
            multipliers,
            *metric,
            *top,
            cli.output,
        ),

        Commands::Init { output } => init_config(output),

        Commands::Validate { data, start, end } => validate_data(data, *start, *end),
    }
}

fn series_bounds(prices: &PriceSeries) -> Result<(NaiveDate, NaiveDate)> {
    match (prices.first(), prices.last()) {
        (Some(first), Some(last)) => Ok((first.date, last.date)),
        _ => Err(BacktestError::DataError("price file is empty".to_string())),
    }
}

fn load_plan_file(path: &Path) -> Result<(PlanFile, InvestmentPlan, PriceSeries)> {
    let file = PlanFile::load(path)?;
    let plan = file.to_plan()?;

    let data_path = file.data.path.clone().ok_or_else(|| {
        BacktestError::DataError("No data path specified in plan file".to_string())
    })?;
    let prices = load_csv(&data_path, &file.data.to_data_config()?)?;
    Ok((file, plan, prices))
}

fn run_from_config(path: &Path, output: OutputFormat, report: &ReportArgs) -> Result<()> {
    let (file, plan, prices) = load_plan_file(path)?;
    let result = run_backtest(&plan, &prices, &file.to_backtest_config())?;
    emit_result(&result, output, report)
}

fn emit_result(result: &BacktestResult, output: OutputFormat, report: &ReportArgs) -> Result<()> {
    match output {
        OutputFormat::Text => {
            ResultFormatter::print_report(result);
            println!("{}", value_vs_invested(result, 50));
            if report.trades > 0 {
                println!();
                TradeReport::print_trades(&result.trades, report.trades);
            }
        }
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(result)?),
        OutputFormat::Csv => {
            println!("{}", ResultFormatter::csv_header());
            println!("{}", ResultFormatter::to_csv_line(result));
        }
    }

    if let Some(path) = &report.export_trades {
        fs::write(path, ResultFormatter::trades_to_csv(&result.trades)?)?;
        info!("Wrote {} trades to {}", result.trades.len(), path.display());
    }
    if let Some(path) = &report.export_timeline {
        fs::write(path, ResultFormatter::timeline_to_csv(&result.timeline)?)?;
        info!("Wrote {} snapshots to {}", result.timeline.len(), path.display());
    }
    Ok(())
}

#[derive(Serialize)]
struct SweepRow<'a> {
    label: String,
    params: &'a DipSweepParams,
    metrics: &'a dca_backtest::analytics::BacktestMetrics,
}

fn run_sweep(
    path: &Path,
    frequencies: &[FrequencyArg],
    thresholds: &[Decimal],
    multipliers: &[Decimal],
    metric: RankArg,
    top: usize,
    output: OutputFormat,
) -> Result<()> {
    let (file, base, prices) = load_plan_file(path)?;

    let frequencies: Vec<Frequency> = frequencies.iter().map(|&f| f.into()).collect();
    let grid = dip_grid(&frequencies, thresholds, multipliers);

    let runner = SweepRunner::new(prices, file.to_backtest_config());
    let mut results = runner.run(grid, |params| params.apply(&base).validated());
    if results.is_empty() {
        warn!("No sweep variant completed");
        return Ok(());
    }

    rank(&mut results, metric.into());
    let shown = if top > 0 && top < results.len() {
        &results[..top]
    } else {
        &results[..]
    };

    match output {
        OutputFormat::Text => {
            println!("\nSweep results (ranked by {:?}):\n", metric);
            let rows: Vec<(String, &BacktestResult)> =
                shown.iter().map(|(p, r)| (p.to_string(), r)).collect();
            ResultFormatter::print_table(&rows);
        }
        OutputFormat::Json => {
            let rows: Vec<SweepRow> = shown
                .iter()
                .map(|(p, r)| SweepRow {
                    label: p.to_string(),
                    params: p,
                    metrics: &r.metrics,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Csv => {
            println!("variant,{}", ResultFormatter::csv_header());
            for (params, result) in shown {
                println!("{},{}", params, ResultFormatter::to_csv_line(result));
            }
        }
    }

    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    fs::write(output, PlanFile::example())?;
    println!("Created example plan file: {}", output.display());
    println!("\nEdit this file to describe your plan, then run:");
    println!("  dca-backtest run-config -c {}", output.display());
    Ok(())
}

fn validate_data(path: &Path, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    println!("Validating price file: {}", path.display());

    let prices = load_csv(path, &DataConfig::default())?;
    let summary = SeriesSummary::from_series(&prices)
        .ok_or_else(|| BacktestError::DataError("price file is empty".to_string()))?;

    println!("\nData Summary:");
    println!("  Rows:        {}", summary.points);
    println!("  Start:       {}", summary.first_date);
    println!("  End:         {}", summary.last_date);
    println!("  Price Range: {} - {}", summary.min_price, summary.max_price);
    println!(
        "  Gaps:        {} ({} missing days)",
        summary.gaps, summary.missing_days
    );

    let start = start.unwrap_or(summary.first_date);
    let end = end.unwrap_or(summary.last_date);
    let missing = missing_dates(&prices, start, end);
    if missing.is_empty() {
        println!("\nValidation: PASSED ({} to {} fully covered)", start, end);
    } else {
        println!(
            "\nValidation: {} days between {} and {} have no price; first is {}",
            missing.len(),
            start,
            end,
            missing[0]
        );
        println!("Use --carry-forward (or missing_data = \"carry_forward\") to fill them.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from([
            "dca-backtest",
            "run",
            "-d",
            "btc.csv",
            "-c",
            "250",
            "-f",
            "monthly",
            "--start",
            "2022-01-01",
            "--dip-threshold",
            "15",
            "--sell",
            "stop-loss",
            "--stop-loss",
            "30",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                contribution,
                frequency,
                start,
                dip_threshold,
                sell,
                ..
            } => {
                assert_eq!(contribution, Decimal::from(250));
                assert_eq!(frequency, FrequencyArg::Monthly);
                assert_eq!(start, NaiveDate::from_ymd_opt(2022, 1, 1));
                assert_eq!(dip_threshold, Some(Decimal::from(15)));
                assert_eq!(sell, SellArg::StopLoss);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_parse_sweep_lists() {
        let cli = Cli::try_parse_from([
            "dca-backtest",
            "-o",
            "json",
            "sweep",
            "-c",
            "plan.toml",
            "--frequencies",
            "daily,weekly",
            "--thresholds",
            "10,20",
        ])
        .unwrap();

        match cli.command {
            Commands::Sweep {
                frequencies,
                thresholds,
                multipliers,
                ..
            } => {
                assert_eq!(frequencies, vec![FrequencyArg::Daily, FrequencyArg::Weekly]);
                assert_eq!(thresholds.len(), 2);
                assert_eq!(multipliers.len(), 3);
            }
            _ => panic!("expected sweep command"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_date() {
        let cli = Cli::try_parse_from(["dca-backtest", "run", "-d", "x.csv", "--start", "01/02"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_init_and_validate_commands() {
        assert!(Cli::try_parse_from(["dca-backtest", "init"]).is_ok());
        assert!(Cli::try_parse_from(["dca-backtest", "validate", "-d", "x.csv"]).is_ok());
    }
}
