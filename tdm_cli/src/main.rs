use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tdm_core::target::RangeStatus;
use tdm_core::*;

#[derive(Parser)]
#[command(name = "tdm")]
#[command(about = "Therapeutic drug monitoring dosing assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the evaluator endpoint
    #[arg(long, global = true)]
    evaluator_url: Option<String>,

    /// Evaluate as of this time (RFC 3339) instead of now
    #[arg(long, global = true)]
    at: Option<DateTime<Utc>>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct CaseArgs {
    /// Patient case JSON file
    #[arg(long)]
    case: PathBuf,

    /// Replace the case's dose history with this CSV file
    #[arg(long)]
    doses: Option<PathBuf>,

    /// Replace the case's measured levels with this CSV file
    #[arg(long)]
    observations: Option<PathBuf>,
}

#[derive(Args)]
struct RegimenArgs {
    /// Proposed dose amount
    #[arg(long)]
    amount: Option<f64>,

    /// Proposed dosing interval in hours
    #[arg(long)]
    tau: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the renal function used for the case
    Renal {
        #[command(flatten)]
        case: CaseArgs,
    },

    /// Show the forecasting model selected for the case
    Model {
        #[command(flatten)]
        case: CaseArgs,
    },

    /// Print the evaluator request without sending it
    Payload {
        #[command(flatten)]
        case: CaseArgs,
        #[command(flatten)]
        regimen: RegimenArgs,
    },

    /// Forecast concentrations for the current or proposed regimen
    Forecast {
        #[command(flatten)]
        case: CaseArgs,
        #[command(flatten)]
        regimen: RegimenArgs,
    },

    /// Search for doses that reach the target
    Recommend {
        #[command(flatten)]
        case: CaseArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tdm_core::logging::init_with_level("debug");
    } else {
        tdm_core::logging::init();
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(url) = cli.evaluator_url {
        config.evaluator.url = url;
        config.validate()?;
    }
    let now = cli.at.unwrap_or_else(Utc::now);

    match cli.command {
        Commands::Renal { case } => cmd_renal(&load_case(&case)?),
        Commands::Model { case } => cmd_model(&load_case(&case)?, now),
        Commands::Payload { case, regimen } => cmd_payload(&load_case(&case)?, &regimen, now),
        Commands::Forecast { case, regimen } => {
            cmd_forecast(&load_case(&case)?, &regimen, config, now).await
        }
        Commands::Recommend { case } => cmd_recommend(&load_case(&case)?, config, now).await,
    }
}

fn load_case(args: &CaseArgs) -> Result<PatientCase> {
    let mut case = PatientCase::load(&args.case)?;
    if let Some(path) = &args.doses {
        case.doses = load_dose_events(path)?;
    }
    if let Some(path) = &args.observations {
        case.observations = load_observation_events(path)?;
    }
    Ok(case)
}

fn plan_for(case: &PatientCase, regimen: &RegimenArgs) -> RegimenPlan {
    let mut plan = case.plan.clone();
    if regimen.amount.is_some() {
        plan.after.amount = regimen.amount;
    }
    if regimen.tau.is_some() {
        plan.after.tau = regimen.tau;
    }
    plan
}

fn describe_status(status: Option<&RangeStatus>) -> String {
    match status {
        Some(RangeStatus::Within) => "within target".to_string(),
        Some(RangeStatus::Above { percent }) => format!("{:.1}% above target", percent),
        Some(RangeStatus::Below { percent }) => format!("{:.1}% below target", percent),
        None => "no prediction".to_string(),
    }
}

fn format_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

fn cmd_renal(case: &PatientCase) -> Result<()> {
    let chosen = case.chosen_assessment();
    let renal = estimate_renal_function(&case.patient, chosen);
    match renal {
        RenalFunction::Crcl(value) => println!("CRCL: {:.2} mL/min", value),
        RenalFunction::Egfr(value) => println!("eGFR: {:.2} mL/min", value),
    }
    if chosen.is_some_and(|a| a.on_crrt()) {
        println!("Renal replacement: CRRT");
    }
    Ok(())
}

fn cmd_model(case: &PatientCase, now: DateTime<Utc>) -> Result<()> {
    let prepared = prepare_request(case, &case.plan, now)?;
    println!("{}", prepared.model);
    Ok(())
}

fn cmd_payload(case: &PatientCase, regimen: &RegimenArgs, now: DateTime<Utc>) -> Result<()> {
    let plan = plan_for(case, regimen);
    let prepared = prepare_request(case, &plan, now)?;
    println!("{}", serde_json::to_string_pretty(&prepared.request)?);
    Ok(())
}

async fn cmd_forecast(
    case: &PatientCase,
    regimen: &RegimenArgs,
    config: Config,
    now: DateTime<Utc>,
) -> Result<()> {
    let plan = plan_for(case, regimen);
    let engine = DosingEngine::from_config(config)?;
    let forecast = engine.forecast(case, &plan, now).await?;
    let response = &forecast.response;

    println!("Model: {}", forecast.model);
    println!(
        "Current:  AUC {}  Cmax {}  Ctrough {}",
        format_optional(response.auc_before),
        format_optional(response.cmax_before),
        format_optional(response.ctrough_before)
    );
    println!(
        "Proposed: AUC {}  Cmax {}  Ctrough {}",
        format_optional(response.auc_after),
        format_optional(response.cmax_after),
        format_optional(response.ctrough_after)
    );
    if let Some(steady) = response.steady_state {
        println!("Steady state: {}", if steady { "yes" } else { "no" });
    }
    println!(
        "Mean concentration: {}",
        format_optional(forecast.mean_concentration)
    );
    println!(
        "Target: current {}, proposed {}",
        describe_status(forecast.current_status.as_ref()),
        describe_status(forecast.status.as_ref())
    );
    Ok(())
}

async fn cmd_recommend(case: &PatientCase, config: Config, now: DateTime<Utc>) -> Result<()> {
    let engine = DosingEngine::from_config(config)?;
    let recommendation = engine.recommend(case, now).await?;

    println!(
        "Model: {}  baseline {}  step {}",
        recommendation.model, recommendation.baseline, recommendation.step
    );
    for regimen in &recommendation.regimens {
        let candidate = &regimen.candidate;
        println!(
            "  {:>8.1}  score {:.3}  predicted {}  {}",
            candidate.amount,
            candidate.score,
            format_optional(candidate.predicted),
            describe_status(regimen.status.as_ref())
        );
    }
    Ok(())
}

