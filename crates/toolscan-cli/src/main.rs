mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use tokio::io::AsyncReadExt;
use toolscan_core::render::{
    render_kb_detail, render_kb_entry, render_kb_list, render_report, render_tasks,
    report_heading, sanitize,
};
use toolscan_core::{
    classify, ActionControl, ActionKind, DispatchOutcome, Dispatcher, HttpBackend, KbAction,
    KbCatalog, KbDirective, KbOrder, LicenseFilter, OutputFormat, PollSummary, RenderSink,
    Report, ReportId, ScanError, ScanRunner, ScanTask, StopReason,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Overrides, RunContext};

#[derive(Parser, Debug)]
#[command(
    name = "toolscan",
    author,
    version,
    about = "Compliance scanner client for third-party tools"
)]
struct Cli {
    /// Settings file (base_url, timeout_secs, poll_interval, max_ticks)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Backend origin, overriding the config file and TOOLSCAN_BASE_URL
    #[arg(long = "base-url", value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Emit JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan tools and poll until every report is in
    Scan {
        /// Tool names; read newline/comma separated from stdin when omitted
        tools: Vec<String>,
        /// Delay between status polls (e.g. "2s", "500ms")
        #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
        /// Give up after this many polls; unfinished tasks stay pending
        #[arg(long = "max-ticks", value_name = "N", conflicts_with = "no_limit")]
        max_ticks: Option<u64>,
        /// Poll until every task settles
        #[arg(long = "no-limit")]
        no_limit: bool,
    },
    /// Print the license category (open, commercial, other, none)
    Classify {
        /// Free-text license, e.g. "Apache-2.0"
        license: Option<String>,
    },
    /// Browse and maintain the knowledge base
    #[command(subcommand)]
    Kb(KbCommand),
}

#[derive(Subcommand, Debug)]
enum KbCommand {
    /// List entries
    List {
        /// Case-insensitive substring match on the tool name
        #[arg(long)]
        search: Option<String>,
        #[arg(long, value_enum, default_value_t = LicenseArg::All)]
        license: LicenseArg,
        #[arg(long = "order-by", value_enum, default_value_t = OrderArg::ToolName)]
        order_by: OrderArg,
        /// Entry to mark as selected
        #[arg(long)]
        select: Option<String>,
    },
    /// Show the full record of one tool
    Show { tool: String },
    /// Save a scan report as a new entry
    Accept {
        tool: String,
        #[arg(long = "report-id", value_name = "ID")]
        report_id: i64,
    },
    /// Overwrite an existing entry with a scan report
    Update {
        tool: String,
        #[arg(long = "report-id", value_name = "ID")]
        report_id: i64,
    },
    /// Edit fields of an entry
    Edit {
        tool: String,
        /// FIELD=VALUE; repeatable. Empty values clear text fields
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
        /// JSON array replacing the alternative tools
        #[arg(long, value_name = "JSON")]
        alternatives: Option<String>,
    },
    /// Remove an entry
    Delete { tool: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LicenseArg {
    All,
    Open,
    Commercial,
    Other,
}

impl From<LicenseArg> for LicenseFilter {
    fn from(arg: LicenseArg) -> Self {
        match arg {
            LicenseArg::All => Self::All,
            LicenseArg::Open => Self::Open,
            LicenseArg::Commercial => Self::Commercial,
            LicenseArg::Other => Self::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OrderArg {
    #[value(name = "tool_name")]
    ToolName,
    #[value(name = "updated_at")]
    UpdatedAt,
}

impl From<OrderArg> for KbOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::ToolName => Self::ToolName,
            OrderArg::UpdatedAt => Self::UpdatedAt,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Classify { license } => {
            print_classification(license.as_deref(), format)?;
        }
        Commands::Scan {
            tools,
            interval,
            max_ticks,
            no_limit,
        } => {
            let ctx = RunContext::resolve(
                cli.config.as_deref(),
                Overrides {
                    base_url: cli.base_url,
                    interval,
                    max_ticks,
                    unbounded: no_limit,
                },
                format,
            )?;
            scan(&ctx, tools).await?;
        }
        Commands::Kb(command) => {
            let ctx = RunContext::resolve(
                cli.config.as_deref(),
                Overrides {
                    base_url: cli.base_url,
                    ..Overrides::default()
                },
                format,
            )?;
            kb(&ctx, command).await?;
        }
    }
    Ok(())
}

fn print_classification(license: Option<&str>, format: OutputFormat) -> Result<()> {
    let category = classify(license);
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "license": license,
                "category": category,
            }))?
        ),
        OutputFormat::Human => println!("{category}"),
    }
    Ok(())
}

async fn scan(ctx: &RunContext, tools: Vec<String>) -> Result<()> {
    let input = if tools.is_empty() {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("failed to read tool names from stdin")?;
        buf
    } else {
        tools.join("\n")
    };

    let backend = Arc::new(HttpBackend::new(&ctx.backend)?);
    let sink = Arc::new(TerminalSink::new(ctx.format));
    let mut runner = ScanRunner::new(backend, sink, ctx.poll);
    runner.start(&input).await?;

    let finished = tokio::select! {
        summary = runner.wait() => Some(summary?),
        _ = tokio::signal::ctrl_c() => None,
    };
    let summary = match finished {
        Some(summary) => summary,
        None => {
            warn!("interrupted; stopping poll loop");
            runner.stop().await
        }
    };

    if let Some(summary) = summary {
        print_summary(&summary, ctx.format)?;
    }
    let failures = runner.session().with_tracker(|tracker| tracker.failures());
    print_failures(&failures, ctx.format)?;
    Ok(())
}

fn print_failures(failures: &[ScanError], format: OutputFormat) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    let messages: Vec<String> = failures
        .iter()
        .map(|failure| sanitize(&failure.to_string()))
        .collect();
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "failures": messages }))
        }
        OutputFormat::Human => {
            for message in messages {
                println!("{} {message}", "failed:".red().bold());
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &PollSummary, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string(summary)?);
        return Ok(());
    }
    let reason = match summary.stop_reason {
        StopReason::Completed => "all tasks settled".green(),
        StopReason::TickLimit => "poll limit reached".yellow(),
        StopReason::Cancelled => "cancelled".yellow(),
    };
    println!(
        "{} after {} poll(s): {} completed, {} failed, {} pending ({} report(s) fetched)",
        reason.bold(),
        summary.ticks,
        summary.completed.to_string().green(),
        summary.failed.to_string().red(),
        summary.pending,
        summary.reports_fetched
    );
    Ok(())
}

async fn kb(ctx: &RunContext, command: KbCommand) -> Result<()> {
    let backend = Arc::new(HttpBackend::new(&ctx.backend)?);
    let mut catalog = KbCatalog::new();

    match command {
        KbCommand::List {
            search,
            license,
            order_by,
            select,
        } => {
            catalog.load(backend.as_ref(), order_by.into()).await?;
            if let Some(query) = search {
                catalog.set_query(&query);
            }
            catalog.set_license_filter(license.into());
            if let Some(tool) = select {
                if !catalog.select(&tool) {
                    warn!(%tool, "not among the visible entries");
                }
            }
            let visible: Vec<_> = catalog.visible().collect();
            let selected = catalog.selected().map(|entry| entry.tool_name.as_str());
            print!("{}", render_kb_list(&visible, selected, ctx.format)?);
        }
        KbCommand::Show { tool } => {
            let detail = catalog.detail(backend.as_ref(), &tool).await?;
            print!("{}", render_kb_detail(&detail, ctx.format)?);
        }
        KbCommand::Accept { tool, report_id } => {
            apply_report(backend, ActionKind::Create, tool, report_id, ctx.format).await?;
        }
        KbCommand::Update { tool, report_id } => {
            apply_report(backend, ActionKind::Update, tool, report_id, ctx.format).await?;
        }
        KbCommand::Edit {
            tool,
            set,
            alternatives,
        } => {
            let mut form = catalog.begin_edit(backend.as_ref(), &tool).await?;
            for pair in &set {
                let (field, value) = pair
                    .split_once('=')
                    .with_context(|| format!("expected FIELD=VALUE, got `{pair}`"))?;
                form.set(field.trim(), value)?;
            }
            if let Some(json) = alternatives {
                form.set("alternative_tools", &json)?;
            }
            let entry = catalog.save_edit(backend.as_ref(), &tool, &form).await?;
            info!(tool = %entry.tool_name, "knowledge base entry saved");
            print_entry(&render_kb_entry(&entry)?, "Saved", ctx.format);
        }
        KbCommand::Delete { tool } => {
            catalog.delete(backend.as_ref(), &tool).await?;
            match ctx.format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "deleted": tool })),
                OutputFormat::Human => println!("{} {}", "Deleted".red().bold(), sanitize(&tool)),
            }
        }
    }
    Ok(())
}

async fn apply_report(
    backend: Arc<HttpBackend>,
    kind: ActionKind,
    tool: String,
    report_id: i64,
    format: OutputFormat,
) -> Result<()> {
    let dispatcher = Dispatcher::new(backend);
    let action = KbAction {
        kind,
        tool_name: tool,
        report_id: Some(ReportId(report_id)),
    };
    let mut control = ActionControl::Enabled;
    if let DispatchOutcome::Applied(entry) = dispatcher.dispatch(&mut control, &action).await? {
        print_entry(&render_kb_entry(&entry)?, kind.done_label(), format);
    }
    Ok(())
}

fn print_entry(rendered: &str, label: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", rendered.trim_end()),
        OutputFormat::Human => {
            println!("{}", label.green().bold());
            println!("{}", rendered.trim_end());
        }
    }
}

/// Prints poll-loop output to the terminal as it arrives.
struct TerminalSink {
    format: OutputFormat,
}

impl TerminalSink {
    fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl RenderSink for TerminalSink {
    fn tasks(&self, tasks: &[ScanTask]) {
        // JSON consumers get one line per report plus the final summary.
        if self.format == OutputFormat::Json {
            return;
        }
        match render_tasks(tasks, self.format) {
            Ok(text) => print!("{text}"),
            Err(err) => warn!(error = %err, "failed to render task view"),
        }
    }

    fn report(&self, report: &Report, directive: &KbDirective) {
        let text = match render_report(report, directive, self.format) {
            Ok(text) => text,
            Err(err) => {
                warn!(tool = report.tool_name(), error = %err, "failed to render report");
                return;
            }
        };
        if self.format == OutputFormat::Json {
            println!("{}", text.trim_end());
            return;
        }
        println!("{}", report_heading(report).cyan().bold());
        print!("{text}");
        for action in directive.actions() {
            if !action.kind.is_mutating() {
                continue;
            }
            let subcommand = match action.kind {
                ActionKind::Create => "accept",
                _ => "update",
            };
            if let Some(report_id) = action.report_id {
                println!(
                    "  {} toolscan kb {subcommand} {:?} --report-id {}",
                    format!("{}:", action.kind.prompt()).dimmed(),
                    action.tool_name,
                    report_id.0
                );
            }
        }
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
