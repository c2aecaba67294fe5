use std::process::ExitCode;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use salary_rag::{load_config, ApiResponse, BuildOptions, DateRange, EmployeeRef, ReportKind, Services, Strategy};

#[derive(Parser)]
#[command(name = "salary-rag")]
#[command(about = "Retrieval-augmented summaries, reports and answers over salary records")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract documents from the record store and index them
    Build {
        /// Cap on the number of employees turned into documents
        #[arg(long)]
        entity_limit: Option<usize>,
        /// Recreate the collection instead of appending to it
        #[arg(long)]
        clear: bool,
    },
    /// Summarize one employee
    Summary {
        #[arg(long, conflicts_with = "employee_name", required_unless_present = "employee_name")]
        employee_id: Option<i64>,
        #[arg(long)]
        employee_name: Option<String>,
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },
    /// Financial or advance report over a period
    Report {
        #[arg(long, default_value = "financial")]
        kind: ReportKind,
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
        #[arg(long)]
        employee_id: Option<i64>,
    },
    /// Answer a free-form question
    Ask {
        question: String,
        /// Extra context prepended to the retrieved context
        #[arg(long)]
        context: Option<String>,
        /// structured, plain or multi_step
        #[arg(long)]
        strategy: Option<Strategy>,
    },
    /// Print the effective configuration without secrets
    Config,
}

fn date_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Option<DateRange>> {
    match (from, to) {
        (Some(start), Some(end)) if start > end => Err(anyhow!("--from {} is after --to {}", start, end)),
        (Some(start), Some(end)) => Ok(Some(DateRange::new(start, end))),
        _ => Ok(None),
    }
}

fn print_response(response: &ApiResponse) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config()?;

    if let Command::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config.config_summary())?);
        for problem in config.validate() {
            log::warn!("{}", problem);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let services = Services::initialize(config).await?;
    log::debug!("Configuration: {:?}", services.config.config_summary());

    match cli.command {
        Command::Build { entity_limit, clear } => {
            let options = BuildOptions {
                entity_limit,
                clear_existing: clear || services.config.knowledge_base.clear_on_build,
            };
            let report = services.knowledge_base_builder().build(options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            services.shutdown().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Summary {
            employee_id,
            employee_name,
            from,
            to,
        } => {
            let who = match (employee_id, employee_name) {
                (Some(id), _) => EmployeeRef::Id(id),
                (None, Some(name)) => EmployeeRef::Name(name),
                (None, None) => return Err(anyhow!("either --employee-id or --employee-name is required")),
            };
            let response = services.agent()?.generate_summary(who, date_range(from, to)?).await;
            print_response(&response)
        }
        Command::Report {
            kind,
            from,
            to,
            employee_id,
        } => {
            let response = services
                .agent()?
                .generate_report(kind, date_range(from, to)?, employee_id)
                .await;
            print_response(&response)
        }
        Command::Ask {
            question,
            context,
            strategy,
        } => {
            let response = services.agent()?.answer_query(&question, context.as_deref(), strategy).await;
            print_response(&response)
        }
        Command::Config => Ok(ExitCode::SUCCESS),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
