use std::path::PathBuf;

use chrono::NaiveTime;
use clap::{Args, Parser, Subcommand};
use eventplan_core::{Clock, SystemClock};
use eventplan_timeline::conflicts::ValidationReport;
use eventplan_timeline::dependencies::check_dependencies;
use eventplan_timeline::generation::{
    FallbackGenerator, GenerationRequest, DEFAULT_DURATION_HOURS, DEFAULT_GUEST_COUNT,
};
use eventplan_timeline::progress::{compute_progress, overdue_items, upcoming_items};
use eventplan_timeline::requests::NewTemplate;
use eventplan_timeline::templates::{build_template, materialize};
use eventplan_timeline::time_of_day::{add_minutes, parse_time_of_day};
use uuid::Uuid;

mod plan;

use plan::{print_progress, print_validation, CliError, PlanFile};

#[derive(Parser)]
#[command(name = "eventplan")]
#[command(about = "EventPlan - offline tools for event timelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a plan file for overlaps, dependency violations and missing critical items
    Validate {
        /// Plan file (JSON)
        plan: PathBuf,
    },
    /// Show completion and schedule progress for a plan file
    Stats(StatsArgs),
    /// Materialize a template into a plan file
    Instantiate(InstantiateArgs),
    /// Build a plan from the built-in event schedule
    Generate(GenerateArgs),
    /// Show version information
    Version,
}

#[derive(Args)]
struct StatsArgs {
    plan: PathBuf,
    /// Wall-clock time to evaluate at (defaults to now)
    #[arg(long, value_parser = parse_clock)]
    at: Option<NaiveTime>,
    /// Offset of the local wall clock from UTC
    #[arg(long, env = "EVENTPLAN_UTC_OFFSET_MINUTES", default_value_t = 0, allow_hyphen_values = true)]
    utc_offset_minutes: i32,
    /// Window for upcoming items
    #[arg(long, default_value_t = 60)]
    within: i64,
}

#[derive(Args)]
struct InstantiateArgs {
    /// Template file (JSON)
    #[arg(long)]
    template: PathBuf,
    /// Event start time, e.g. 18:00
    #[arg(long, value_parser = parse_clock)]
    start: NaiveTime,
    /// Write the plan here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long, default_value = "general")]
    event_type: String,
    #[arg(long, default_value_t = DEFAULT_DURATION_HOURS)]
    hours: u32,
    #[arg(long, default_value_t = DEFAULT_GUEST_COUNT)]
    guests: u32,
    /// Event start time, e.g. 18:00
    #[arg(long, value_parser = parse_clock)]
    start: NaiveTime,
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_clock(raw: &str) -> Result<NaiveTime, String> {
    parse_time_of_day(raw).map_err(|err| err.to_string())
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { plan } => {
            let plan = PlanFile::load(&plan)?.build()?;
            let violations = check_dependencies(&plan.items, &plan.dependencies)?;
            let report = ValidationReport::build(&plan.items, violations);
            print_validation(&plan, &report);
            if !report.is_valid {
                return Err(CliError::Conflicts(report.conflicts.len()));
            }
        }
        Commands::Stats(args) => {
            let plan = PlanFile::load(&args.plan)?.build()?;
            let now = match args.at {
                Some(at) => at,
                None => SystemClock::with_offset_minutes(args.utc_offset_minutes).time_of_day(),
            };
            let progress = compute_progress(&plan.timeline, &plan.items, now);
            let overdue = overdue_items(&plan.items, now);
            let upcoming = upcoming_items(&plan.items, now, args.within);
            print_progress(&plan, &progress, &overdue, &upcoming, now);
        }
        Commands::Instantiate(args) => {
            let raw = std::fs::read_to_string(&args.template).map_err(|source| CliError::Read {
                path: args.template.clone(),
                source,
            })?;
            let data: NewTemplate = eventplan_core::serde_utils::from_json_str(&raw)?;
            let template = build_template(Uuid::nil(), data)?;
            let items = materialize(Uuid::nil(), args.start, &template.template_data.items)?;
            let end = add_minutes(args.start, i64::from(template.default_duration_hours) * 60);
            let plan = PlanFile::from_items(template.name, Some(args.start), Some(end), &items);
            emit(&plan, args.output)?;
        }
        Commands::Generate(args) => {
            let request = GenerationRequest {
                event_type: args.event_type,
                duration_hours: args.hours,
                guest_count: args.guests,
                preferences: Vec::new(),
            };
            let blueprints = FallbackGenerator::schedule(&request)?;
            let items = materialize(Uuid::nil(), args.start, &blueprints)?;
            let total = blueprints
                .iter()
                .map(|blueprint| blueprint.start_time_offset_minutes + i64::from(blueprint.duration_minutes))
                .max()
                .unwrap_or(0);
            let plan = PlanFile::from_items(
                format!("{} timeline", request.event_type),
                Some(args.start),
                Some(add_minutes(args.start, total)),
                &items,
            );
            emit(&plan, args.output)?;
        }
        Commands::Version => {
            println!("EventPlan v{}", env!("CARGO_PKG_VERSION"));
            println!("Timeline engine with offline plan tooling");
        }
    }

    Ok(())
}

fn emit(plan: &PlanFile, output: Option<PathBuf>) -> Result<(), CliError> {
    match output {
        Some(path) => {
            plan.save(&path)?;
            println!("✔ Plan written to {}", path.display());
        }
        None => println!("{}", plan.to_json()?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stats_arguments() {
        let cli = Cli::try_parse_from([
            "eventplan",
            "stats",
            "plan.json",
            "--at",
            "19:30",
            "--utc-offset-minutes",
            "-180",
        ])
        .expect("parse");
        match cli.command {
            Commands::Stats(args) => {
                assert_eq!(args.at, NaiveTime::from_hms_opt(19, 30, 0));
                assert_eq!(args.utc_offset_minutes, -180);
                assert_eq!(args.within, 60);
            }
            _ => panic!("expected stats command"),
        }
    }

    #[test]
    fn rejects_malformed_times() {
        assert!(Cli::try_parse_from(["eventplan", "generate", "--start", "25:99"]).is_err());
    }

    #[test]
    fn generate_defaults_to_general_event() {
        let cli = Cli::try_parse_from(["eventplan", "generate", "--start", "18:00"]).expect("parse");
        match cli.command {
            Commands::Generate(args) => {
                assert_eq!(args.event_type, "general");
                assert_eq!(args.hours, DEFAULT_DURATION_HOURS);
            }
            _ => panic!("expected generate command"),
        }
    }
}
