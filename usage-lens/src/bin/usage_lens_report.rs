use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use usage_lens::logging::{init_logging, parse_level, LoggingConfig};
use usage_lens::net::logs::{CommandLogSource, FileLogSource, LogSource, LogSourceError};
use usage_lens::net::{FetchError, IngestError};
use usage_lens::net::traits::TraceSource;
use usage_lens::net::users::{RowUserSource, UserSource};
use usage_lens::pipeline::{LogInputs, Pipeline, PipelineError, PipelineRun};
use usage_lens::report::{render_structured, render_text};
use usage_lens::runtime::{default_runtime, LensRuntime};
use usage_lens::settings::{ConfigError, Settings};
use usage_lens::{JaegerSource, UsageLens, UsageLensConfig};

#[derive(Parser, Debug)]
#[command(name = "usage_lens_report", version)]
#[command(about = "Per-user LLM gateway usage from Jaeger traces and service logs")]
struct Cli {
    /// Time range to analyze (e.g. 1h, 24h, 7d) [default: 24h]
    #[arg(long)]
    lookback: Option<String>,

    /// Maximum number of traces to fetch per window; with --shards N up to
    /// N times this many are fetched [default: 1000]
    #[arg(long)]
    limit: Option<u32>,

    /// Output the structured JSON report instead of the formatted one
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Jaeger query service URL [default: http://localhost:16686]
    #[arg(long, env = "USAGE_LENS_JAEGER_URL")]
    jaeger_url: Option<String>,

    /// Service whose traces are analyzed [default: agentgateway]
    #[arg(long)]
    service: Option<String>,

    /// Split the lookback into this many windows fetched concurrently [default: 1]
    #[arg(long)]
    shards: Option<usize>,

    /// Service log file to mine for user identities (`-` reads stdin)
    #[arg(long, conflicts_with = "log_command")]
    log_file: Option<PathBuf>,

    /// Command whose output is mined for user identities
    /// (e.g. "docker compose logs --since 24h open-webui")
    #[arg(long)]
    log_command: Option<String>,

    /// Gateway access log file to summarize per provider and status
    #[arg(long)]
    gateway_log_file: Option<PathBuf>,

    /// Shell command printing `email|name|role|last_active` rows, most recent
    /// first (e.g. "docker compose exec -T open-webui sqlite3
    /// /app/backend/data/webui.db '<query>'")
    #[arg(long)]
    users_command: Option<String>,

    /// TOML settings file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Diagnostic log level (trace, debug, info, warn, error) [default: warn]
    #[arg(long)]
    log_level: Option<String>,

    /// Emit diagnostics as JSON lines
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("invalid log command: {0}")]
    LogCommand(#[from] LogSourceError),
    #[error(transparent)]
    Client(#[from] FetchError),
    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed to write report: {0}")]
    Output(#[from] std::io::Error),
}

impl CliError {
    fn exit_status(&self) -> u8 {
        match self {
            CliError::Config(_)
            | CliError::LogCommand(_)
            | CliError::Pipeline(PipelineError::Query(_))
            | CliError::Pipeline(PipelineError::Pattern(_)) => 2,
            CliError::Pipeline(PipelineError::Ingest(_))
            | CliError::Client(_)
            | CliError::Render(_)
            | CliError::Output(_) => 1,
        }
    }

    fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

impl Cli {
    fn logging_config(&self, settings: &Settings) -> Result<LoggingConfig, ConfigError> {
        let mut config = settings.apply_logging(LoggingConfig::default())?;
        if let Some(level) = &self.log_level {
            config.level =
                parse_level(level).ok_or_else(|| ConfigError::InvalidLevel(level.clone()))?;
        }
        if self.log_json {
            config.json_format = true;
        }
        Ok(config)
    }

    fn run_config(&self, settings: &Settings) -> Result<UsageLensConfig, ConfigError> {
        let mut builder = settings.apply(UsageLens::builder())?;
        if let Some(url) = &self.jaeger_url {
            builder = builder.jaeger_url(url);
        }
        if let Some(service) = &self.service {
            builder = builder.service(service);
        }
        if let Some(lookback) = &self.lookback {
            builder = builder.lookback(lookback);
        }
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        if let Some(shards) = self.shards {
            builder = builder.shards(shards);
        }
        Ok(builder.build())
    }

    fn identity_logs(
        &self,
        config: &UsageLensConfig,
    ) -> Result<Option<Box<dyn LogSource>>, CliError> {
        if let Some(path) = &self.log_file {
            return Ok(Some(Box::new(FileLogSource::new(path))));
        }
        match &self.log_command {
            Some(line) => {
                let source = CommandLogSource::from_command_line(line)?
                    .with_timeout(config.command_timeout);
                Ok(Some(Box::new(source)))
            }
            None => Ok(None),
        }
    }

    fn user_source(&self, config: &UsageLensConfig) -> Option<Box<dyn UserSource>> {
        self.users_command.as_ref().map(|line| {
            let command = CommandLogSource::shell(line).with_timeout(config.command_timeout);
            Box::new(RowUserSource::new(command).with_limit(config.user_limit))
                as Box<dyn UserSource>
        })
    }

    /// Run the pipeline against `source` with the log inputs named on the
    /// command line.
    async fn collect<S>(
        &self,
        config: &UsageLensConfig,
        source: &S,
        now_us: u64,
    ) -> Result<PipelineRun, CliError>
    where
        S: TraceSource + ?Sized,
    {
        let pipeline = Pipeline::new(config)?;
        let identity_logs = self.identity_logs(config)?;
        let gateway_logs = self.gateway_log_file.as_ref().map(FileLogSource::new);
        let users = self.user_source(config);
        let logs = LogInputs {
            identities: identity_logs.as_deref(),
            gateway: gateway_logs.as_ref().map(|s| s as &dyn LogSource),
            users: users.as_deref(),
        };
        Ok(pipeline.run(source, logs, now_us).await?)
    }

    /// Write the report to `out`. In JSON mode the empty-activity notice goes
    /// to `err` so `out` stays parseable.
    fn emit(
        &self,
        run: &PipelineRun,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<(), CliError> {
        let input = run.report_input();
        if self.json {
            writeln!(out, "{}", render_structured(&input)?)?;
            if run.traces.is_empty() {
                writeln!(err, "No user activity found in traces (last {})", run.lookback)?;
            }
        } else {
            write!(out, "{}", render_text(&input))?;
        }
        Ok(())
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    init_logging(cli.logging_config(&settings)?);

    let config = cli.run_config(&settings)?;
    let source = JaegerSource::new(&config.jaeger_url, config.transport.clone())?;
    let now_us = default_runtime().now_unix_micros();
    let run = cli.collect(&config, &source, now_us).await?;

    cli.emit(
        &run,
        &mut std::io::stdout().lock(),
        &mut std::io::stderr().lock(),
    )
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            if matches!(e, CliError::Pipeline(PipelineError::Ingest(IngestError::Fetch(_)))) {
                eprintln!("   Make sure the Jaeger query service is reachable");
            }
            e.exit_code()
        }
    }
}
