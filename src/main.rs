use std::{fs, iter, os::unix::fs::PermissionsExt as _, path::PathBuf, process::ExitCode};

use clap::{ArgAction, Parser, Subcommand};
use uacme::{
    account,
    cert,
    confirm::{AlwaysYes, Confirm, Terminal},
    error::Error,
    key,
    names,
    order,
    revoke,
    storage::{self, Layout},
    Result, Session,
};

const PRODUCTION_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
const DEFAULT_CONFDIR: &str = "/etc/ssl/uacme";

/// Lightweight ACMEv2 client.
// `-h` selects the hook program as in the original tool, so the automatic
// help flag keeps only its long form.
#[derive(Debug, Parser)]
#[command(name = "uacme", version, disable_help_flag = true)]
struct Cli {
    /// ACME directory URL
    #[arg(short = 'a', long = "acme-url", value_name = "URL")]
    acme_url: Option<String>,

    /// Configuration directory
    #[arg(short = 'c', long = "confdir", value_name = "DIR", default_value = DEFAULT_CONFDIR)]
    confdir: PathBuf,

    /// Minimum remaining validity (days) before a certificate is reissued
    #[arg(
        short = 'd',
        long = "days",
        value_name = "DAYS",
        default_value_t = 30,
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    days: i64,

    /// Reissue even if the current certificate is still fresh
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Challenge hook program
    #[arg(short = 'h', long = "hook", value_name = "PROGRAM")]
    hook: Option<PathBuf>,

    /// Never create directories or keys
    #[arg(short = 'n', long = "never-create")]
    never_create: bool,

    /// Use the Let's Encrypt staging directory
    #[arg(short = 's', long = "staging")]
    staging: bool,

    /// Increase verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Automatically accept the terms of service
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Print help
    #[arg(long = "help", action = ArgAction::Help)]
    help: Option<bool>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new account
    New { email: Option<String> },
    /// Update the account contact email
    Update { email: Option<String> },
    /// Deactivate the account
    Deactivate,
    /// Obtain a certificate
    Issue {
        domain: String,
        #[arg(value_name = "ALTNAME")]
        alt_names: Vec<String>,
    },
    /// Revoke a certificate
    Revoke { certfile: PathBuf },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let directory_url = match (&cli.acme_url, cli.staging) {
        (Some(url), _) => url.clone(),
        (None, true) => STAGING_URL.to_owned(),
        (None, false) => PRODUCTION_URL.to_owned(),
    };

    if let Some(hook) = &cli.hook {
        // must be readable and executable
        let file = fs::File::open(hook).map_err(|err| Error::fs(hook, err))?;
        let meta = file.metadata().map_err(|err| Error::fs(hook, err))?;
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            return Err(Error::input(format!("{} is not executable", hook.display())));
        }
    }

    // input validation happens before any directory or key is touched
    let names: Vec<String> = match &cli.command {
        Command::Issue { domain, alt_names } => {
            let names: Vec<String> = iter::once(domain)
                .chain(alt_names)
                .cloned()
                .collect();
            for name in &names {
                names::validate(name)?;
            }
            names
        }
        _ => Vec::new(),
    };
    let base_domain = names.first().map(|name| names::base_domain(name).to_owned());

    if let Command::Revoke { certfile } = &cli.command {
        fs::File::open(certfile).map_err(|err| Error::fs(certfile, err))?;
    }

    let layout = Layout::new(&cli.confdir, base_domain.as_deref());
    let is_new = matches!(cli.command, Command::New { .. });
    let may_create = is_new && !cli.never_create;

    storage::check_or_mkdir(may_create, &layout.confdir, 0o755)?;
    storage::check_or_mkdir(may_create, &layout.keydir, 0o700)?;
    let account_key = key::load_or_create(&layout.account_key_file(), may_create)?;

    let mut session = Session::new(account_key);

    match &cli.command {
        Command::New { email } => {
            account::bootstrap(&mut session, &directory_url)?;
            let mut tos_confirm: Box<dyn Confirm> = if cli.yes {
                Box::new(AlwaysYes)
            } else {
                Box::new(Terminal)
            };
            account::new(&mut session, email.as_deref(), tos_confirm.as_mut())
        }

        Command::Update { email } => {
            account::bootstrap(&mut session, &directory_url)?;
            account::retrieve(&mut session)?;
            account::update(&mut session, email.as_deref())
        }

        Command::Deactivate => {
            account::bootstrap(&mut session, &directory_url)?;
            account::retrieve(&mut session)?;
            account::deactivate(&mut session)
        }

        Command::Issue { .. } => {
            let (domain_keydir, certdir) = match (&layout.domain_keydir, &layout.certdir) {
                (Some(keydir), Some(certdir)) => (keydir.clone(), certdir.clone()),
                _ => return Err(Error::input("issue requires a domain")),
            };

            storage::check_or_mkdir(!cli.never_create, &domain_keydir, 0o700)?;
            storage::check_or_mkdir(!cli.never_create, &certdir, 0o755)?;

            let domain_key =
                key::load_or_create(&domain_keydir.join("key.pem"), !cli.never_create)?;
            session.set_domain_key(domain_key);

            let cert_file = certdir.join("cert.pem");
            log::info!(
                "checking existence and expiration of {}",
                cert_file.display()
            );
            if cert::is_current(&cert_file, &names, cli.days) {
                if cli.force {
                    log::info!("forcing reissue of {}", cert_file.display());
                } else {
                    log::info!("skipping {}", cert_file.display());
                    return Ok(());
                }
            }

            account::bootstrap(&mut session, &directory_url)?;
            account::retrieve(&mut session)?;

            let mut challenge_confirm = Terminal;
            let pem = order::issue(
                &mut session,
                &names,
                cli.hook.as_deref(),
                &mut challenge_confirm,
            )?;
            storage::save_certificate(&cert_file, &pem)
        }

        Command::Revoke { certfile } => {
            account::bootstrap(&mut session, &directory_url)?;
            account::retrieve(&mut session)?;
            revoke::revoke(&mut session, certfile, 0)
        }
    }
}
