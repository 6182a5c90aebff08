#![warn(clippy::all, clippy::dbg_macro)]

use std::{
    io::{Write, stdout},
    process::ExitCode,
    sync::Arc,
};

use anstream::{eprintln, println, stream::IsTerminal};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::InfoLevel;
use config::{RuleSelection, RuleSetConfig, TriggerFilter};
use crawler::{CrawlOptions, Crawler};
use github::{GitHubHost, GitHubToken, OwnerProbe, WebProbe};
use owo_colors::OwoColorize;
use regex::Regex;
use registry::RuleRegistry;
use scanner::Scanner;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};
use untrusted::UntrustedInputMap;

mod collect;
mod config;
mod crawler;
mod dispatch;
mod finding;
mod github;
mod output;
mod project;
mod registry;
mod rules;
mod scanner;
mod taint;
mod untrusted;

/// The exit code for a scan that reported findings.
const FINDINGS_EXIT: u8 = 1;

/// The exit code for a failed run. Command line errors exit with 2.
const FATAL_EXIT: u8 = 3;

const DEFAULT_PATH: &str = ".github/workflows";

/// Finds security issues in GitHub Actions workflows.
#[derive(Parser)]
#[command(about, version)]
struct App {
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity<InfoLevel>,

    /// Control the use of color in output.
    #[arg(long, value_enum, value_name = "MODE", global = true)]
    color: Option<ColorMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan workflow files for security issues.
    Scan(ScanArgs),
    /// Download the workflows of every repository of an organization.
    Download(DownloadArgs),
}

impl Command {
    /// What a failed run of this command didn't do, for the fatal message.
    fn action(&self) -> &'static str {
        match self {
            Command::Scan(_) => "scan",
            Command::Download(_) => "download",
        }
    }
}

#[derive(Args)]
struct ScanArgs {
    /// List every rule with its description, then exit.
    #[arg(long)]
    list_rules: bool,

    /// Only run trigger-sensitive rules on workflows with one of these
    /// triggers.
    ///
    /// Either a comma-separated list of events, `external` for the
    /// triggers an outside party can fire, or `allnopr` for every trigger
    /// but `pull_request`.
    #[arg(long, value_name = "TRIGGERS")]
    filter_triggers: Option<TriggerFilter>,

    /// Only look for expression injection in `run:` scripts.
    #[arg(long)]
    filter_run: bool,

    /// Drop findings whose message matches this regex. May be repeated.
    #[arg(long, value_name = "REGEX")]
    ignore: Vec<Regex>,

    /// Only run these rules (comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "RULES", conflicts_with = "disable_rules")]
    enable_rules: Vec<String>,

    /// Run every rule except these (comma-separated).
    #[arg(long, value_delimiter = ',', value_name = "RULES")]
    disable_rules: Vec<String>,

    /// Also run the rules meant for manual triage.
    #[arg(long)]
    debug_rules: bool,

    /// The configuration file to load. By default, any config will be
    /// discovered relative to $CWD.
    #[arg(short, long, env = "RUNWARDEN_CONFIG", group = "conf")]
    config: Option<Utf8PathBuf>,

    /// Disable all configuration loading.
    #[arg(long, group = "conf")]
    no_config: bool,

    /// Perform only offline operations.
    ///
    /// This disables the repo-jacking rule, which needs to reach github.com.
    #[arg(short, long, env = "RUNWARDEN_OFFLINE")]
    offline: bool,

    /// The output format to emit. By default, cargo-style diagnostics will be emitted.
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,

    /// Shorthand for `--format oneline`.
    #[arg(long, conflicts_with = "format")]
    oneline: bool,

    /// The workflow files or directories to scan. Defaults to the current
    /// directory.
    inputs: Vec<Utf8PathBuf>,
}

#[derive(Args)]
struct DownloadArgs {
    /// The organization (or user) whose repositories to download.
    #[arg(long)]
    org: String,

    /// Only download this repository.
    #[arg(long)]
    repo: Option<String>,

    /// The GitHub API token to use.
    #[arg(long, env = "GH_TOKEN")]
    gh_token: Option<GitHubToken>,

    /// The GitHub Server Hostname. Defaults to github.com
    #[arg(long, env = "GH_HOST", default_value = "github.com")]
    gh_hostname: GitHubHost,

    /// Only download the default branch of each repository.
    #[arg(long, conflicts_with = "max_branches")]
    default_branch: bool,

    /// Download at most this many branches of each repository.
    #[arg(long, value_name = "N")]
    max_branches: Option<usize>,

    /// The file or directory to download from each branch.
    #[arg(long, default_value = DEFAULT_PATH)]
    path: String,

    /// Where to write the downloaded files.
    #[arg(long, default_value = "runwarden-output")]
    output_dir: Utf8PathBuf,
}

#[derive(Debug, Default, Copy, Clone, ValueEnum)]
pub(crate) enum OutputFormat {
    /// cargo-style output.
    #[default]
    Plain,
    /// One `path:line:column: message [rule]` line per finding.
    Oneline,
    /// A JSON array of findings.
    Json,
    /// SARIF-formatted output.
    Sarif,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub(crate) enum ColorMode {
    /// Use color output if the output supports it.
    Auto,
    /// Force color output, even if the output isn't a terminal.
    Always,
    /// Disable color output, even if the output is a compatible terminal.
    Never,
}

impl ColorMode {
    /// Returns a concrete (i.e. non-auto) `anstream::ColorChoice` for the given terminal.
    ///
    /// This is useful for passing to `anstream::AutoStream` when the underlying
    /// stream is something that is a terminal or should be treated as such,
    /// but can't be inferred due to type erasure (e.g. `Box<dyn Write>`).
    fn color_choice_for_terminal(&self, io: impl IsTerminal) -> anstream::ColorChoice {
        match self {
            ColorMode::Auto => {
                if io.is_terminal() {
                    anstream::ColorChoice::Always
                } else {
                    anstream::ColorChoice::Never
                }
            }
            ColorMode::Always => anstream::ColorChoice::Always,
            ColorMode::Never => anstream::ColorChoice::Never,
        }
    }
}

impl From<ColorMode> for anstream::ColorChoice {
    fn from(value: ColorMode) -> Self {
        match value {
            ColorMode::Auto => Self::Auto,
            ColorMode::Always => Self::Always,
            ColorMode::Never => Self::Never,
        }
    }
}

impl ScanArgs {
    fn format(&self) -> OutputFormat {
        if self.oneline {
            OutputFormat::Oneline
        } else {
            self.format
        }
    }

    fn selection(&self) -> RuleSelection {
        if !self.enable_rules.is_empty() {
            RuleSelection::Enable(self.enable_rules.clone())
        } else if !self.disable_rules.is_empty() {
            RuleSelection::Disable(self.disable_rules.clone())
        } else {
            RuleSelection::All
        }
    }
}

async fn scan(args: ScanArgs) -> Result<ExitCode> {
    if args.list_rules {
        for (ident, desc) in RuleRegistry::catalog().iter_rules() {
            println!("{ident}: {desc}", ident = ident.green());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let cwd = Utf8PathBuf::try_from(std::env::current_dir()?)?;
    let file_config = config::locate(args.config.as_ref(), args.no_config, &cwd)?;

    let mut rules = RuleSetConfig {
        selection: args.selection(),
        triggers: args.filter_triggers.clone().unwrap_or_default(),
        script_only: args.filter_run,
        debug_rules: args.debug_rules,
        ignore: args.ignore.clone(),
        ..Default::default()
    }
    .with_config(file_config)
    .context("invalid configuration")?;

    let probe: Option<Arc<dyn OwnerProbe>> = if args.offline || !registry::wants_network(&rules) {
        None
    } else {
        rules.connectivity = github::check_connectivity().await;
        if !rules.connectivity {
            tracing::warn!("can't reach github.com, skipping the repo-jacking rule");
        }
        Some(Arc::new(WebProbe::new()?))
    };

    let inputs = collect::collect_inputs(&args.inputs)?;
    if inputs.is_empty() {
        tracing::warn!("no workflows to scan");
    }

    let scanner = Scanner::new(
        Arc::new(rules),
        Arc::new(UntrustedInputMap::builtin()),
        probe,
    );
    let findings = scanner.scan(&inputs).await?;

    match args.format() {
        OutputFormat::Plain => output::plain::render_findings(&findings),
        OutputFormat::Oneline => output::oneline::output(stdout(), &findings)?,
        OutputFormat::Json => output::json::output(stdout(), &findings)?,
        OutputFormat::Sarif => {
            serde_json::to_writer_pretty(stdout(), &output::sarif::build(&findings))?
        }
    }

    if findings.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(FINDINGS_EXIT))
    }
}

async fn download(args: DownloadArgs) -> Result<ExitCode> {
    let client = github::Client::new(&args.gh_hostname, args.gh_token.as_ref())?;

    let path = match args.path.trim_matches('/') {
        "" => DEFAULT_PATH,
        path => path,
    };

    let org = args.org.clone();
    let crawler = Crawler::new(
        client,
        CrawlOptions {
            org: args.org,
            path: path.into(),
            output_dir: args.output_dir,
            default_branch_only: args.default_branch,
            max_branches: args.max_branches,
        },
    );

    match args.repo {
        Some(repo) => crawler
            .crawl_repo(&repo)
            .await
            .with_context(|| format!("couldn't download {org}/{repo}"))?,
        None => {
            let mirrored = crawler
                .crawl_org()
                .await
                .with_context(|| format!("couldn't list the repositories of {org}"))?;
            tracing::info!("downloaded {mirrored} repositories of {org}");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn run(app: App) -> Result<ExitCode> {
    let color_mode = match app.color {
        Some(color_mode) => color_mode,
        None => {
            if std::env::var("NO_COLOR").is_ok() {
                ColorMode::Never
            } else if std::env::var("FORCE_COLOR").is_ok()
                || std::env::var("CLICOLOR_FORCE").is_ok()
            {
                ColorMode::Always
            } else {
                ColorMode::Auto
            }
        }
    };

    anstream::ColorChoice::write_global(color_mode.into());

    let writer = std::sync::Mutex::new(anstream::AutoStream::new(
        Box::new(std::io::stderr()) as Box<dyn Write + Send>,
        color_mode.color_choice_for_terminal(std::io::stderr()),
    ));

    let filter = EnvFilter::builder()
        .with_default_directive(app.verbose.tracing_level_filter().into())
        .from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                // NOTE: We don't need `with_ansi` here since our writer is
                // an `anstream::AutoStream` that handles color output for us.
                .with_writer(writer),
        )
        .with(filter)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("couldn't start the async runtime")?;

    match app.command {
        Command::Scan(args) => runtime.block_on(scan(args)),
        Command::Download(args) => runtime.block_on(download(args)),
    }
}

fn main() -> ExitCode {
    human_panic::setup_panic!();

    let app = App::parse();
    let action = app.command.action();

    // This is a little silly, but returning an ExitCode like this ensures
    // we always exit cleanly, rather than performing a hard process exit.
    match run(app) {
        Ok(exit) => exit,
        Err(err) => {
            eprintln!(
                "{fatal}: no {action} was performed",
                fatal = "fatal".red().bold()
            );
            eprintln!("{err:?}");
            ExitCode::from(FATAL_EXIT)
        }
    }
}
