//! CLI interface for devportal - the developer portal from the terminal.

use std::env;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use devportal_core::paths::write_default_config;
use devportal_core::portal::models::Record;
use devportal_core::portal::{
    AppIdKind, ClientError, Resolution, Team, TeamOverrides, prompt_for_team, resolve_team,
};
use devportal_core::{
    AppConfig, AppPaths, Credentials, LogLevel, PortalClient, generate_example_config,
    generate_schema,
};
use env_logger::fmt::WriteStyle;
use log::{LevelFilter, debug, info};

const APP_NAME: &str = "devportal";
const REPO_URL: &str = "https://github.com/byteowlz/devportal";

fn main() -> anyhow::Result<()> {
    try_main()
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    let rt = tokio::runtime::Runtime::new()?;

    let result = match cli.command {
        Command::Teams => rt.block_on(handle_teams(&ctx)),
        Command::Apps { command } => rt.block_on(handle_apps(&ctx, command)),
        Command::Devices { command } => rt.block_on(handle_devices(&ctx, command)),
        Command::Certs { command } => rt.block_on(handle_certs(&ctx, command)),
        Command::Profiles { command } => rt.block_on(handle_profiles(&ctx, command)),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => {
            handle_completions(shell);
            Ok(())
        }
    };

    if let Err(err) = &result
        && err
            .downcast_ref::<ClientError>()
            .is_some_and(ClientError::is_auth_failure)
    {
        eprintln!("hint: check DEVPORTAL_USERNAME and DEVPORTAL_PASSWORD, then run the command again");
    }
    result
}

#[derive(Debug, Parser)]
#[command(
    name = "devportal",
    author,
    version,
    about = "Developer portal account management from the terminal",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

/// Common CLI options shared across all subcommands.
#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Override the config file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
    /// Account username.
    #[arg(long, env = "DEVPORTAL_USERNAME", global = true)]
    pub username: Option<String>,
    /// Account password.
    #[arg(long, env = "DEVPORTAL_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,
    /// Team id to use, overriding the config file.
    #[arg(long, value_name = "ID", global = true)]
    pub team_id: Option<String>,
    /// Team name to use, overriding the config file.
    #[arg(long, value_name = "NAME", global = true)]
    pub team_name: Option<String>,
    /// Reduce output to only errors.
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    pub quiet: bool,
    /// Increase logging verbosity (stackable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,
    /// Enable trace logging.
    #[arg(long, global = true)]
    pub trace: bool,
    /// Output machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,
    /// Disable ANSI colors in output.
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    pub no_color: bool,
    /// Control color output.
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    pub color: ColorOption,
    /// Do not change anything on disk.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,
    /// Assume "yes" for interactive prompts.
    #[arg(short = 'y', long = "yes", global = true)]
    pub assume_yes: bool,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorOption {
    /// Detect terminal capabilities automatically.
    Auto,
    /// Always emit ANSI color codes.
    Always,
    /// Never emit ANSI color codes.
    Never,
}

/// App identifier kind accepted on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum AppKindArg {
    /// A single bundle identifier.
    Explicit,
    /// A bundle identifier prefix ending in `*`.
    Wildcard,
}

impl From<AppKindArg> for AppIdKind {
    fn from(kind: AppKindArg) -> Self {
        match kind {
            AppKindArg::Explicit => Self::Explicit,
            AppKindArg::Wildcard => Self::Wildcard,
        }
    }
}

/// Provisioning profile distribution method.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Distribution {
    /// Development profile for registered devices.
    #[value(alias = "development")]
    Limited,
    /// App Store distribution.
    Store,
    /// Ad hoc distribution to registered devices.
    Adhoc,
    /// In-house enterprise distribution.
    Inhouse,
}

impl Distribution {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Limited => "limited",
            Self::Store => "store",
            Self::Adhoc => "adhoc",
            Self::Inhouse => "inhouse",
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the teams of the account.
    Teams,
    /// App identifiers.
    Apps {
        #[command(subcommand)]
        command: AppsCommand,
    },
    /// Registered devices.
    Devices {
        #[command(subcommand)]
        command: DevicesCommand,
    },
    /// Signing certificates.
    Certs {
        #[command(subcommand)]
        command: CertsCommand,
    },
    /// Provisioning profiles.
    Profiles {
        #[command(subcommand)]
        command: ProfilesCommand,
    },
    /// Create config directories and default files.
    Init(InitCommand),
    /// Inspect and manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum AppsCommand {
    /// List app identifiers.
    List,
    /// Register an app identifier.
    Create {
        /// Bundle identifier, e.g. `com.example.app` or `com.example.*`.
        bundle_id: String,
        /// Display name.
        #[arg(long)]
        name: String,
        /// Identifier kind.
        #[arg(long = "kind", value_enum, default_value_t = AppKindArg::Explicit)]
        kind: AppKindArg,
    },
    /// Delete an app identifier.
    Delete {
        /// App identifier id (`appIdId`).
        app_id: String,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum DevicesCommand {
    /// List registered devices.
    List,
    /// Register a device.
    Create {
        /// Device name.
        #[arg(long)]
        name: String,
        /// Device UDID.
        #[arg(long)]
        udid: String,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum CertsCommand {
    /// List certificates of the given types.
    List {
        /// Certificate type id (repeatable).
        #[arg(long = "type-id", required = true)]
        type_ids: Vec<String>,
    },
    /// Submit a certificate signing request.
    Create {
        /// Certificate type id.
        #[arg(long = "type-id")]
        type_id: String,
        /// Path to a PEM-encoded CSR.
        #[arg(long, value_name = "PATH")]
        csr: PathBuf,
        /// App identifier id, for push certificates.
        #[arg(long)]
        app_id: Option<String>,
    },
    /// Revoke a certificate.
    Revoke {
        /// Certificate id.
        certificate_id: String,
        /// Certificate type id.
        #[arg(long = "type-id")]
        type_id: String,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum ProfilesCommand {
    /// List provisioning profiles.
    List,
    /// Create a provisioning profile.
    Create {
        /// Profile name.
        name: String,
        /// Distribution method.
        #[arg(long, value_enum, default_value_t = Distribution::Limited)]
        distribution: Distribution,
        /// App identifier id.
        #[arg(long)]
        app_id: String,
        /// Certificate id (repeatable).
        #[arg(long = "cert", required = true)]
        certificate_ids: Vec<String>,
        /// Device id (repeatable).
        #[arg(long = "device")]
        device_ids: Vec<String>,
    },
    /// Delete a provisioning profile.
    Delete {
        /// Provisioning profile id.
        profile_id: String,
    },
}

#[derive(Debug, Clone, Copy, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists.
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration.
    Show,
    /// Print the resolved config file path.
    Path,
    /// Print the JSON schema.
    Schema,
    /// Print an example configuration file.
    Example,
    /// Regenerate the default configuration file.
    Reset,
}

// ─── Runtime ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.as_deref())?;
        let mut config = AppConfig::load(&paths, common.dry_run)?;
        if common.team_id.is_some() {
            config.team.id.clone_from(&common.team_id);
        }
        if common.team_name.is_some() {
            config.team.name.clone_from(&common.team_name);
        }
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
        builder.filter_level(self.effective_log_level());

        let force_color = matches!(self.common.color, ColorOption::Always)
            || env::var_os("FORCE_COLOR").is_some();
        let mut disable_color = self.common.no_color
            || matches!(self.common.color, ColorOption::Never)
            || env::var_os("NO_COLOR").is_some()
            || (!force_color && !io::stderr().is_terminal());

        if let Some(ref path) = self.config.logging.file {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            disable_color = true;
        }

        if disable_color {
            builder.write_style(WriteStyle::Never);
        } else if force_color {
            builder.write_style(WriteStyle::Always);
        } else {
            builder.write_style(WriteStyle::Auto);
        }

        builder.try_init().or_else(|err| {
            if self.common.verbose > 0 {
                eprintln!("logger already initialized: {err}");
            }
            Ok(())
        })
    }

    const fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => level_filter(self.config.logging.level),
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn credentials(&self) -> Result<Credentials> {
        let username = self
            .common
            .username
            .as_deref()
            .ok_or_else(|| anyhow!("missing username (use --username or DEVPORTAL_USERNAME)"))?;
        let password = self
            .common
            .password
            .as_deref()
            .ok_or_else(|| anyhow!("missing password (use --password or DEVPORTAL_PASSWORD)"))?;
        Ok(Credentials::new(username, password))
    }

    /// Log in and settle on a team, prompting when several are available.
    async fn connect(&self) -> Result<PortalClient> {
        let client = PortalClient::from_config(&self.config)?;
        let credentials = self.credentials()?;
        client.session().login_with(&credentials).await?;

        let teams = client.session().teams().await?;
        let team_id = choose_team(
            &teams,
            &self.config.team,
            self.common.assume_yes,
            io::stdin().lock(),
            io::stderr(),
        )?;
        info!("using team {team_id}");
        client.session().select_team(team_id).await?;
        Ok(client)
    }

    fn print_records(&self, records: &[Record], columns: &[&str]) -> Result<()> {
        if self.common.json {
            println!(
                "{}",
                serde_json::to_string_pretty(records).context("serializing records to JSON")?
            );
            return Ok(());
        }
        for record in records {
            println!("{}", summarize(record, columns));
        }
        Ok(())
    }

    fn print_record(&self, record: &Record, columns: &[&str]) -> Result<()> {
        if self.common.json {
            println!(
                "{}",
                serde_json::to_string_pretty(record).context("serializing record to JSON")?
            );
        } else {
            println!("{}", summarize(record, columns));
        }
        Ok(())
    }
}

/// Resolve the team from overrides, asking on `input` when several remain.
///
/// `assume_yes` takes the first team instead of asking. Piped input is read
/// the same way as a terminal.
fn choose_team<R: BufRead, W: Write>(
    teams: &[Team],
    overrides: &TeamOverrides,
    assume_yes: bool,
    input: R,
    output: W,
) -> Result<String> {
    match resolve_team(teams, overrides)? {
        Resolution::Resolved(id) => Ok(id),
        Resolution::Prompt if assume_yes => teams
            .first()
            .map(|team| team.team_id.clone())
            .ok_or_else(|| anyhow!("account has no teams")),
        Resolution::Prompt => {
            prompt_for_team(teams, input, output).context("reading team selection")
        }
    }
}

const fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

// ─── Handlers ────────────────────────────────────────────────────────

async fn handle_teams(ctx: &RuntimeContext) -> Result<()> {
    let client = PortalClient::from_config(&ctx.config)?;
    client.session().login_with(&ctx.credentials()?).await?;
    let teams = client.session().teams().await?;

    if ctx.common.json {
        println!("{}", serde_json::to_string_pretty(&teams)?);
        return Ok(());
    }

    for team in &teams {
        println!("  {} {} ({})", team.team_id, team.name, team.team_type);
        if !team.current_team_member.roles.is_empty() {
            println!("    roles: {}", team.current_team_member.roles.join(", "));
        }
    }
    Ok(())
}

async fn handle_apps(ctx: &RuntimeContext, cmd: AppsCommand) -> Result<()> {
    const COLUMNS: &[&str] = &["appIdId", "identifier", "name"];
    let client = ctx.connect().await?;

    match cmd {
        AppsCommand::List => ctx.print_records(&client.apps().await?, COLUMNS),
        AppsCommand::Create {
            bundle_id,
            name,
            kind,
        } => {
            let app = client.create_app(kind.into(), &name, &bundle_id).await?;
            ctx.print_record(&app, COLUMNS)
        }
        AppsCommand::Delete { app_id } => {
            let response = client.delete_app(&app_id).await?;
            if ctx.common.json {
                ctx.print_record(&response, &[])
            } else {
                println!("deleted app {app_id}");
                Ok(())
            }
        }
    }
}

async fn handle_devices(ctx: &RuntimeContext, cmd: DevicesCommand) -> Result<()> {
    const COLUMNS: &[&str] = &["deviceId", "deviceNumber", "name"];
    let client = ctx.connect().await?;

    match cmd {
        DevicesCommand::List => ctx.print_records(&client.devices().await?, COLUMNS),
        DevicesCommand::Create { name, udid } => {
            let device = client.create_device(&name, &udid).await?;
            ctx.print_record(&device, COLUMNS)
        }
    }
}

async fn handle_certs(ctx: &RuntimeContext, cmd: CertsCommand) -> Result<()> {
    const COLUMNS: &[&str] = &["certificateId", "name", "expirationDateString"];
    let client = ctx.connect().await?;

    match cmd {
        CertsCommand::List { type_ids } => {
            ctx.print_records(&client.certificates(&type_ids).await?, COLUMNS)
        }
        CertsCommand::Create {
            type_id,
            csr,
            app_id,
        } => {
            let csr = fs::read_to_string(&csr)
                .with_context(|| format!("reading CSR from {}", csr.display()))?;
            let cert = client
                .create_certificate(&type_id, &csr, app_id.as_deref())
                .await?;
            ctx.print_record(&cert, COLUMNS)
        }
        CertsCommand::Revoke {
            certificate_id,
            type_id,
        } => {
            let revoked = client.revoke_certificate(&certificate_id, &type_id).await?;
            ctx.print_records(&revoked, COLUMNS)
        }
    }
}

async fn handle_profiles(ctx: &RuntimeContext, cmd: ProfilesCommand) -> Result<()> {
    const COLUMNS: &[&str] = &["provisioningProfileId", "name", "status"];
    let client = ctx.connect().await?;

    match cmd {
        ProfilesCommand::List => ctx.print_records(&client.provisioning_profiles().await?, COLUMNS),
        ProfilesCommand::Create {
            name,
            distribution,
            app_id,
            certificate_ids,
            device_ids,
        } => {
            let profile = client
                .create_provisioning_profile(
                    &name,
                    distribution.as_str(),
                    &app_id,
                    &certificate_ids,
                    &device_ids,
                )
                .await?;
            ctx.print_record(&profile, COLUMNS)
        }
        ProfilesCommand::Delete { profile_id } => {
            let response = client.delete_provisioning_profile(&profile_id).await?;
            if ctx.common.json {
                ctx.print_record(&response, &[])
            } else {
                println!("deleted provisioning profile {profile_id}");
                Ok(())
            }
        }
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }
    if ctx.common.dry_run {
        log::info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }
    write_default_config(&ctx.paths.config_file)?;
    println!("Written to: {}", ctx.paths.config_file.display());
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&ctx.config)
                        .context("serializing config to JSON")?
                );
            } else {
                println!("{:#?}", ctx.config);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Schema => {
            println!("{}", generate_schema(APP_NAME, REPO_URL)?);
            Ok(())
        }
        ConfigCommand::Example => {
            print!("{}", generate_example_config(APP_NAME)?);
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                log::info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}

// ─── Formatting helpers ──────────────────────────────────────────────

/// One line per record: the requested columns, tab separated, `-` when absent.
fn summarize(record: &Record, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|key| match record.get(*key) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => "-".to_string(),
            Some(other) => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\t")
}
