//! The `warden` command-line front end.
//!
//! Leading configuration flags (`--helper-socket`, `--log-filter`, ...) are
//! handed to `ortho_config`; everything from the first other token onwards
//! is parsed by clap as the subcommand.

use std::ffi::{OsStr, OsString};
use std::io::{self, IsTerminal, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ortho_config::OrthoConfig;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use warden_config::Config;
use warden_protocol::demo;
use warden_protocol::{
    AuthorityKeyError, AutoApprovePrompt, ConsentPrompt, CredentialAuthority, NonInteractivePrompt,
    RegistrationStatus, RegistryError, SealedTokenAuthority, ServiceIdentity,
};

use crate::{CallOptions, ClientDispatcher, ClientError, SocketConnector, installer_for};

const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--helper-id",
    "--helper-socket",
    "--helper-version",
    "--install-root",
    "--descriptor-root",
    "--helper-source",
    "--installer",
    "--uninstall-cleanup",
    "--service-manager",
    "--authority-key-path",
    "--credential-ttl-secs",
    "--reply-timeout-ms",
    "--log-filter",
    "--log-format",
];

/// Command-line interface of the `warden` client.
#[derive(Parser, Debug)]
#[command(name = "warden", disable_help_subcommand = true)]
struct Cli {
    /// Approves every consent prompt without asking.
    #[arg(long)]
    yes: bool,
    /// Fails instead of reinstalling a missing or stale helper.
    #[arg(long)]
    no_reinstall: bool,
    #[command(subcommand)]
    command: CliCommand,
}

/// `warden` subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    /// Prints the running helper's version.
    Version,
    /// Installs or replaces the helper.
    Install,
    /// Removes the helper.
    Uninstall,
    /// Reports whether the helper is registered.
    Status,
    /// Sends a greeting to the helper.
    SayHello {
        /// Text to send.
        message: String,
    },
    /// Runs the administrator-only demo command.
    AdminOnly,
}

/// Failures surfaced by the CLI.
#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to load the authority key: {0}")]
    AuthorityKey(#[from] AuthorityKeyError),
    #[error("invalid command registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("failed to start the async runtime: {0}")]
    Runtime(io::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Loads configuration from the leading configuration flags.
trait ConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError>;
}

struct OrthoConfigLoader;

impl ConfigLoader for OrthoConfigLoader {
    fn load(&self, args: &[OsString]) -> Result<Config, AppError> {
        Config::load_from_iter(args.iter().cloned()).map_err(AppError::LoadConfiguration)
    }
}

/// Argument vector split into configuration flags and the command line.
#[derive(Debug, PartialEq, Eq)]
struct ArgumentSplit {
    config_arguments: Vec<OsString>,
    command_arguments: Vec<OsString>,
}

fn config_flag_needs_value(argument: &OsStr) -> Option<bool> {
    let text = argument.to_string_lossy();
    let (flag, inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (text.as_ref(), false),
    };
    CONFIG_CLI_FLAGS
        .contains(&flag)
        .then_some(!inline_value)
}

fn split_arguments(args: &[OsString]) -> ArgumentSplit {
    let Some((program, rest)) = args.split_first() else {
        return ArgumentSplit {
            config_arguments: Vec::new(),
            command_arguments: Vec::new(),
        };
    };
    let mut config_arguments = vec![program.clone()];
    let mut remaining = rest.iter().peekable();
    while let Some(argument) = remaining.next_if(|argument| config_flag_needs_value(argument).is_some()) {
        config_arguments.push(argument.clone());
        if config_flag_needs_value(argument) == Some(true)
            && let Some(value) = remaining.next()
        {
            config_arguments.push(value.clone());
        }
    }
    let mut command_arguments = vec![program.clone()];
    command_arguments.extend(remaining.cloned());
    ArgumentSplit {
        config_arguments,
        command_arguments,
    }
}

/// Runs the `warden` CLI, writing results to `stdout` and failures to
/// `stderr`.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

fn run_with_loader<I, W, E, L>(args: I, stdout: &mut W, stderr: &mut E, loader: &L) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_arguments(&args);
    let outcome = Cli::try_parse_from(&split.command_arguments)
        .map_err(AppError::CliUsage)
        .and_then(|cli| {
            let config = loader.load(&split.config_arguments)?;
            init_logging(&config);
            execute(&cli, &config)
        });
    match outcome {
        Ok(output) => {
            if writeln!(stdout, "{output}").is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            // --help and --version go to stdout.
            let _ = write!(stdout, "{error}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let _ = writeln!(stderr, "warden: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(config.log_filter()).unwrap_or_else(|_| EnvFilter::new("warn"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .compact()
        .try_init();
    if installed.is_err() {
        debug!("tracing subscriber already installed");
    }
}

fn execute(cli: &Cli, config: &Config) -> Result<String, AppError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;
    runtime.block_on(async {
        let dispatcher = build_dispatcher(cli, config)?;
        let output = dispatch(&dispatcher, &cli.command).await;
        dispatcher.shutdown().await;
        output
    })
}

fn build_dispatcher(cli: &Cli, config: &Config) -> Result<ClientDispatcher, AppError> {
    let prompt: Arc<dyn ConsentPrompt> = if cli.yes {
        Arc::new(AutoApprovePrompt)
    } else {
        Arc::new(NonInteractivePrompt)
    };
    let authority = SealedTokenAuthority::from_key_file(
        config.authority_key_path().as_std_path(),
        config.credential_ttl(),
        prompt,
    )?;
    let identity = ServiceIdentity::new(config.helper_id(), config.helper_version());
    let dispatcher = ClientDispatcher::new(
        identity,
        Arc::new(demo::registry()?),
        Arc::new(authority) as Arc<dyn CredentialAuthority>,
        installer_for(config),
        Arc::new(SocketConnector::new(config.helper_socket().clone())),
    )
    .with_options(CallOptions {
        reinstall_if_invalid: !cli.no_reinstall,
        reply_timeout: config.reply_timeout(),
    });
    Ok(dispatcher)
}

async fn dispatch(dispatcher: &ClientDispatcher, command: &CliCommand) -> Result<String, AppError> {
    let output = match command {
        CliCommand::Version => dispatcher.helper_version().await?,
        CliCommand::Install => {
            dispatcher.install_helper_tool().await?;
            format!("installed {}", dispatcher.identity().helper_id())
        }
        CliCommand::Uninstall => {
            dispatcher.uninstall_helper_tool().await?;
            format!("uninstalled {}", dispatcher.identity().helper_id())
        }
        CliCommand::Status => match dispatcher.registration_status().await? {
            RegistrationStatus::Registered => "registered".to_owned(),
            RegistrationStatus::Unregistered => "unregistered".to_owned(),
            RegistrationStatus::Unknown => "unknown".to_owned(),
        },
        CliCommand::SayHello { message } => {
            dispatcher.call::<String, String>(&demo::say_hello(), message).await?
        }
        CliCommand::AdminOnly => dispatcher.call::<(), String>(&demo::admin_only(), &()).await?,
    };
    Ok(output)
}
