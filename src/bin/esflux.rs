//! esflux CLI - Command-line interface for envsensor-flux
//!
//! Commands:
//! - convert: Convert one ENV-pppp-nnn folder into a single export
//! - metadata: Read the self-documenting header of an export
//! - doctor: Diagnose reference tables and configuration

use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use envsensor_flux::header::HeaderTemplate;
use envsensor_flux::{
    read_export_metadata, ConvertError, ConverterConfig, DeviceRegistry, EnvSensorProcessor,
    FilterLevel, VisitRegistry, CONVERTER_VERSION, PRODUCER_NAME,
};

/// esflux - Environmental sensor ingestion and QA
#[derive(Parser)]
#[command(name = "esflux")]
#[command(author = "Synheart AI Inc")]
#[command(version = CONVERTER_VERSION)]
#[command(about = "Convert raw environmental sensor files into QA-checked exports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one participant folder
    Convert {
        /// ENV-pppp-nnn folder, or a single raw .csv file
        input: PathBuf,

        /// Folder the export is written to
        #[arg(short, long)]
        output: PathBuf,

        /// Participant visit table (CSV)
        #[arg(long)]
        visit_table: Option<PathBuf>,

        /// Device build table (CSV); the bundled table is used when omitted
        #[arg(long)]
        device_table: Option<PathBuf>,

        /// Filtering level (corrupt_only, short_files, max, or 0-2); overrides the config file
        #[arg(long)]
        filter_level: Option<FilterLevel>,

        /// Header template replacing the bundled one
        #[arg(long)]
        header_template: Option<PathBuf>,

        /// Converter config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Attach the QA ledger and working counts to the result
        #[arg(long)]
        extended: bool,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// Print the metadata of a finished export
    Metadata {
        /// Export file ({pppp}_ENV.csv)
        input: PathBuf,

        /// Pretty-print the metadata
        #[arg(long)]
        pretty: bool,
    },

    /// Diagnose reference tables and configuration
    Doctor {
        /// Participant visit table to check
        #[arg(long)]
        visit_table: Option<PathBuf>,

        /// Device build table to check
        #[arg(long)]
        device_table: Option<PathBuf>,

        /// Converter config to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "envsensor_flux=info,esflux=info".into()),
        )
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), EsfluxCliError> {
    match cli.command {
        Commands::Convert {
            input,
            output,
            visit_table,
            device_table,
            filter_level,
            header_template,
            config,
            extended,
            pretty,
        } => cmd_convert(
            &input,
            &output,
            visit_table.as_deref(),
            device_table.as_deref(),
            filter_level,
            header_template.as_deref(),
            config.as_deref(),
            extended,
            pretty,
        ),
        Commands::Metadata { input, pretty } => cmd_metadata(&input, pretty),
        Commands::Doctor {
            visit_table,
            device_table,
            config,
            json,
        } => cmd_doctor(
            visit_table.as_deref(),
            device_table.as_deref(),
            config.as_deref(),
            json,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_convert(
    input: &Path,
    output: &Path,
    visit_table: Option<&Path>,
    device_table: Option<&Path>,
    filter_level: Option<FilterLevel>,
    header_template: Option<&Path>,
    config_path: Option<&Path>,
    extended: bool,
    pretty: bool,
) -> Result<(), EsfluxCliError> {
    let mut config = match config_path {
        Some(path) => ConverterConfig::from_json_file(path)?,
        None => ConverterConfig::default(),
    };
    if let Some(level) = filter_level {
        config.filter_level = level;
    }
    config.extended_report |= extended;

    if !input.exists() {
        return Err(EsfluxCliError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("input {} does not exist", input.display()),
        )));
    }

    let visits = VisitRegistry::load_or_default(visit_table);
    let devices = match device_table {
        Some(path) => DeviceRegistry::from_path(path)?,
        None => DeviceRegistry::bundled()?,
    };
    let mut processor = EnvSensorProcessor::new(visits, devices, config)?;
    if let Some(path) = header_template {
        processor = processor.with_template(HeaderTemplate::from_path(path)?);
    }

    let result = processor.convert(input, output);
    println!("{}", result.to_json(pretty)?);

    if result.success {
        Ok(())
    } else {
        Err(EsfluxCliError::ConversionFailed(result.conversion_issues.len()))
    }
}

fn cmd_metadata(input: &Path, pretty: bool) -> Result<(), EsfluxCliError> {
    let metadata = read_export_metadata(input)?;
    let json = if pretty {
        serde_json::to_string_pretty(&metadata)?
    } else {
        serde_json::to_string(&metadata)?
    };
    println!("{}", json);
    Ok(())
}

fn cmd_doctor(
    visit_table: Option<&Path>,
    device_table: Option<&Path>,
    config: Option<&Path>,
    json: bool,
) -> Result<(), EsfluxCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "converter_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("envsensor-flux version {}", CONVERTER_VERSION),
    });

    let devices = match device_table {
        Some(path) => DeviceRegistry::from_path(path).map(|r| (r, path.display().to_string())),
        None => DeviceRegistry::bundled().map(|r| (r, "bundled table".to_string())),
    };
    checks.push(match devices {
        Ok((registry, source)) if !registry.is_empty() => DoctorCheck {
            name: "device_table".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} device assemblies from {}", registry.len(), source),
        },
        Ok((_, source)) => DoctorCheck {
            name: "device_table".to_string(),
            status: CheckStatus::Warning,
            message: format!("No device assemblies in {}", source),
        },
        Err(e) => DoctorCheck {
            name: "device_table".to_string(),
            status: CheckStatus::Error,
            message: format!("Cannot load device table: {}", e),
        },
    });

    checks.push(match visit_table {
        None => DoctorCheck {
            name: "visit_table".to_string(),
            status: CheckStatus::Warning,
            message: "No visit table given; every participant resolves to the sentinel record"
                .to_string(),
        },
        Some(path) => match VisitRegistry::from_path(path) {
            Ok(registry) => DoctorCheck {
                name: "visit_table".to_string(),
                status: CheckStatus::Ok,
                // the sentinel record is not a participant
                message: format!("{} participants from {}", registry.len().saturating_sub(1), path.display()),
            },
            Err(e) => DoctorCheck {
                name: "visit_table".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot load visit table: {}", e),
            },
        },
    });

    checks.push(match HeaderTemplate::bundled() {
        Ok(template) => DoctorCheck {
            name: "header_template".to_string(),
            status: CheckStatus::Ok,
            message: format!("Header template has {} lines", template.len()),
        },
        Err(e) => DoctorCheck {
            name: "header_template".to_string(),
            status: CheckStatus::Error,
            message: format!("Invalid header template: {}", e),
        },
    });

    if let Some(path) = config {
        checks.push(match ConverterConfig::from_json_file(path) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (filter level {}, separator {:?})",
                    config.filter_level, config.separator
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid config: {}", e),
            },
        });
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: CONVERTER_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("esflux Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(EsfluxCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum EsfluxCliError {
    Io(io::Error),
    Convert(ConvertError),
    Json(serde_json::Error),
    ConversionFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for EsfluxCliError {
    fn from(e: io::Error) -> Self {
        EsfluxCliError::Io(e)
    }
}

impl From<ConvertError> for EsfluxCliError {
    fn from(e: ConvertError) -> Self {
        EsfluxCliError::Convert(e)
    }
}

impl From<serde_json::Error> for EsfluxCliError {
    fn from(e: serde_json::Error) -> Self {
        EsfluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<EsfluxCliError> for CliError {
    fn from(e: EsfluxCliError) -> Self {
        match e {
            EsfluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            EsfluxCliError::Convert(e @ ConvertError::Table { .. })
            | EsfluxCliError::Convert(e @ ConvertError::TableRow(_)) => CliError {
                code: "TABLE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'esflux doctor' to check the reference tables".to_string()),
            },
            EsfluxCliError::Convert(e @ ConvertError::InvalidConfig(_))
            | EsfluxCliError::Convert(e @ ConvertError::JsonError(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the config file against the documented keys".to_string()),
            },
            EsfluxCliError::Convert(e) => CliError {
                code: "CONVERT_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            EsfluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            EsfluxCliError::ConversionFailed(count) => CliError {
                code: "CONVERSION_FAILED".to_string(),
                message: format!("Export not written; {} issues recorded", count),
                hint: Some("Review conversion_issues in the result".to_string()),
            },
            EsfluxCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
