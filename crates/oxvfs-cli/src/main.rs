#![deny(unsafe_code)]

mod auth;
mod commands;
mod config;
mod exit_code;
mod output;

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nix::errno::Errno;
use tracing_subscriber::EnvFilter;

use oxvfs_core::{ContainerEngine, EngineConfig};
use oxvfs_mount::{VfsError, VirtualFileSystem};

use crate::auth::CredentialOptions;
use crate::commands::{cat, chmod, df, init, ls, mkdir, mv, rm, stat, write};
use crate::config::CliConfig;

/// Command-line interface for oxvfs encrypted containers
#[derive(Parser)]
#[command(name = "oxvfs")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Create a container and store a file in it
    oxvfs init ~/notes.db
    echo hello | oxvfs write ~/notes.db /hello.txt

    # Read a file (pipe password from secret manager)
    echo \"$SECRET\" | oxvfs --password-stdin cat ~/notes.db /hello.txt

    # Use a raw 32-byte key instead of a password
    oxvfs --key-hex \"$(cat key.hex)\" ls ~/keyed.db /
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Container password (insecure, prefer --password-stdin or OXVFS_PASSWORD)
    #[arg(long, env = "OXVFS_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Read password from stdin (single line)
    #[arg(long, conflicts_with = "password", global = true)]
    password_stdin: bool,

    /// Unlock with a raw 32-byte key given as 64 hex digits
    #[arg(long, value_name = "HEX", conflicts_with_all = ["password", "password_stdin"], global = true)]
    key_hex: Option<String>,

    /// Configuration file (default: ~/.config/oxvfs/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl From<&Cli> for CredentialOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            password: cli.password.clone(),
            password_stdin: cli.password_stdin,
            key_hex: cli.key_hex.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty container
    Init(ContainerCommand<init::Args>),

    /// List directory contents
    Ls(ContainerCommand<ls::Args>),

    /// Read and output file contents
    Cat(ContainerCommand<cat::Args>),

    /// Write stdin to a file
    Write(ContainerCommand<write::Args>),

    /// Create a directory
    Mkdir(ContainerCommand<mkdir::Args>),

    /// Remove a file or directory
    Rm(ContainerCommand<rm::Args>),

    /// Move or rename a file or directory
    Mv(ContainerCommand<mv::Args>),

    /// Show file attributes
    Stat(ContainerCommand<stat::Args>),

    /// Show space on the partition holding the container
    Df(ContainerCommand<df::Args>),

    /// Change permission bits
    Chmod(ContainerCommand<chmod::Args>),
}

/// Wrapper for commands that operate on a container
#[derive(Parser, Clone)]
pub struct ContainerCommand<T: clap::Args> {
    /// Path to the container file
    #[arg(value_name = "CONTAINER")]
    pub container: PathBuf,

    #[command(flatten)]
    pub args: T,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);

            // Quiet is re-read here since parsing may have failed
            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let config = CliConfig::load(cli.config.as_deref())?;
    let credential_opts = CredentialOptions::from(&cli);

    match cli.command {
        Commands::Init(cmd) => {
            let vfs = open_session(&cmd.container, &config)?;
            let secret = credential_opts.resolve(true)?;
            init::execute(&vfs, &secret, &cmd.args)
        }
        Commands::Ls(cmd) => execute_container_command(&cmd, &credential_opts, &config, ls::execute),
        Commands::Cat(cmd) => execute_container_command(&cmd, &credential_opts, &config, cat::execute),
        Commands::Write(cmd) => execute_container_command(&cmd, &credential_opts, &config, write::execute),
        Commands::Mkdir(cmd) => execute_container_command(&cmd, &credential_opts, &config, mkdir::execute),
        Commands::Rm(cmd) => execute_container_command(&cmd, &credential_opts, &config, rm::execute),
        Commands::Mv(cmd) => execute_container_command(&cmd, &credential_opts, &config, mv::execute),
        Commands::Stat(cmd) => execute_container_command(&cmd, &credential_opts, &config, stat::execute),
        Commands::Df(cmd) => execute_container_command(&cmd, &credential_opts, &config, df::execute),
        Commands::Chmod(cmd) => execute_container_command(&cmd, &credential_opts, &config, chmod::execute),
    }
}

pub type Session = VirtualFileSystem<ContainerEngine>;

/// Build an unmounted session for `container` using the configured KDF cost.
fn open_session(container: &Path, config: &CliConfig) -> Result<Session> {
    let engine = ContainerEngine::with_config(EngineConfig { kdf: config.kdf });
    VirtualFileSystem::with_container_path(engine, container)
        .with_context(|| format!("Invalid container path: {}", container.display()))
}

/// Mount the container, run `f`, then unmount.
///
/// The session is unmounted even when `f` fails; the command's own error
/// takes precedence over an unmount failure.
fn execute_container_command<T, F>(
    cmd: &ContainerCommand<T>,
    credential_opts: &CredentialOptions,
    config: &CliConfig,
    f: F,
) -> Result<()>
where
    T: clap::Args,
    F: FnOnce(&Session, &T) -> Result<()>,
{
    let vfs = open_session(&cmd.container, config)?;
    let secret = credential_opts.resolve(false)?;
    vfs.mount(&secret.credential())
        .with_context(|| format!("Failed to mount {}", cmd.container.display()))?;
    tracing::debug!(container = %cmd.container.display(), "mounted");

    let result = f(&vfs, &cmd.args);
    let unmounted = vfs.unmount().context("Failed to unmount container");
    result?;
    unmounted
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Map an error chain to an exit code by downcasting to the typed errors.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(vfs_err) = cause.downcast_ref::<VfsError>() {
            match vfs_err {
                VfsError::InvalidArgument { message } if message.starts_with("bad credential") => {
                    return exit_code::AUTH_FAILED;
                }
                VfsError::InvalidArgument { message } if message.contains("does not exist") => {
                    return exit_code::NOT_FOUND;
                }
                VfsError::Errno { errno: Errno::ENOENT, .. } => return exit_code::NOT_FOUND,
                _ => {}
            }
        }

        if let Some(auth_err) = cause.downcast_ref::<auth::AuthError>() {
            return match auth_err {
                auth::AuthError::BadKey(_) => exit_code::AUTH_FAILED,
                auth::AuthError::Input(_) => exit_code::GENERAL_ERROR,
            };
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && io_err.kind() == io::ErrorKind::NotFound
        {
            return exit_code::NOT_FOUND;
        }
    }

    exit_code::GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_bad_credential() {
        let err = anyhow::Error::new(VfsError::invalid_argument("bad credential for container /tmp/c.db"))
            .context("Failed to mount /tmp/c.db");
        assert_eq!(categorize_error(&err), exit_code::AUTH_FAILED);
    }

    #[test]
    fn test_categorize_missing_entry() {
        let err = anyhow::Error::new(VfsError::errno("getattr", Errno::ENOENT));
        assert_eq!(categorize_error(&err), exit_code::NOT_FOUND);

        let err = anyhow::Error::new(VfsError::invalid_argument(
            "container /tmp/c.db does not exist or is not readable",
        ));
        assert_eq!(categorize_error(&err), exit_code::NOT_FOUND);
    }

    #[test]
    fn test_categorize_other_errors() {
        let err = anyhow::Error::new(VfsError::errno("rmdir", Errno::ENOTEMPTY));
        assert_eq!(categorize_error(&err), exit_code::GENERAL_ERROR);
        assert_eq!(categorize_error(&anyhow::anyhow!("boom")), exit_code::GENERAL_ERROR);
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["oxvfs", "ls", "c.db", "/docs", "--key-hex", "00", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.key_hex.as_deref(), Some("00"));
        match cli.command {
            Commands::Ls(cmd) => {
                assert_eq!(cmd.container, PathBuf::from("c.db"));
                assert_eq!(cmd.args.path, "/docs");
            }
            _ => panic!("expected ls"),
        }
    }

    #[test]
    fn test_cli_rejects_password_with_key() {
        let result = Cli::try_parse_from(["oxvfs", "--password", "pw", "--key-hex", "00", "ls", "c.db"]);
        assert!(result.is_err());
    }
}
