//! simplelock - transparent X11 keyboard and pointer locker

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zeroize::Zeroizing;

use simplelock::X11Display;
use simplelock_core::{acquire, CredentialStore, CursorSpec, LockConfig, LockSession, PasswdBackend};

/// Lock keyboard and mouse until the password is typed
#[derive(Parser)]
#[command(name = "simplelock")]
#[command(about = "Extremely lightweight transparent X11 keyboard/mouse locker")]
#[command(version)]
struct Cli {
    /// Allow running as root
    #[arg(short, long)]
    force: bool,

    /// Set the unlock password and exit
    #[arg(short, long)]
    passwd: bool,

    /// Keep the mouse cursor visible while locked
    #[arg(long)]
    no_hide_cursor: bool,

    /// Path to an alternative config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// X display to lock (defaults to $DISPLAY)
    #[arg(long)]
    display: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "simplelock=warn,simplelock_core=warn",
        1 => "simplelock=info,simplelock_core=info",
        _ => "simplelock=debug,simplelock_core=debug",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => LockConfig::load_from(path)
            .with_context(|| format!("Failed to load config file {:?}", path))?,
        None => LockConfig::load(),
    };

    let store = CredentialStore::default_location()?;
    let backend = PasswdBackend::new(store);

    if cli.passwd {
        return change_password(&backend);
    }

    if nix::unistd::geteuid().is_root() && !cli.force {
        bail!("refusing to run as root, pass --force if you really mean it");
    }

    // Never grab input with a credential that can't unlock it again
    backend
        .check_credential()
        .with_context(|| format!("Unusable credential {:?}", backend.store().path()))?;

    let display = X11Display::connect(cli.display.as_deref(), config.keyboard.clone())
        .context("Failed to open display")?;
    let cursor = CursorSpec::invisible(&config.cursor);
    let mut handle = acquire(display, !cli.no_hide_cursor, &config.grab, &cursor)?;
    info!("input grabbed, screen locked");

    let unlocked = LockSession::new(handle.backend_mut(), &backend, &config).run()?;
    handle.release();

    info!(failed_attempts = unlocked.failed_attempts, "unlocked");
    Ok(())
}

fn change_password(backend: &PasswdBackend) -> anyhow::Result<()> {
    let first = Zeroizing::new(rpassword::prompt_password("new password: ")?);
    let second = Zeroizing::new(rpassword::prompt_password("confirm new password: ")?);

    let password = confirmed(&first, &second)?;
    backend
        .set_password(password.as_bytes())
        .context("Password not changed")?;

    println!("Password updated in {}", backend.store().path().display());
    Ok(())
}

/// Both prompts must agree before anything is stored
fn confirmed<'a>(first: &'a str, second: &str) -> anyhow::Result<&'a str> {
    if first != second {
        bail!("Passwords didn't match, password not changed");
    }
    Ok(first)
}
