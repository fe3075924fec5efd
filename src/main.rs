use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use ynmweb::agent::config::Config;
use ynmweb::agent::daemon;
use ynmweb::transport::http_polling::mask_secret;
use ynmweb::utils::logging;

#[derive(Parser)]
#[command(name = "ynmweb", version, about = "Remote control bridge for a chat bot")]
struct AppCli {
    /// Run in daemon mode (background)
    #[arg(long)]
    daemon: bool,

    /// Config file path
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Home directory for the debug log (defaults to ~/.ynmweb)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the endpoint URL and shared secret to the config file
    Configure {
        #[arg(long)]
        api_url: String,
        #[arg(long)]
        api_key: String,
    },
}

fn default_home() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ynmweb"))
}

fn run_daemon(home: Option<&PathBuf>) -> Result<()> {
    use daemonize::Daemonize;
    let workdir = std::env::current_dir().context("resolving working directory")?;
    let pid_file = home.map(|h| h.join("ynmweb.pid")).unwrap_or_else(|| "ynmweb.pid".into());
    let daemonize = Daemonize::new()
        .pid_file(pid_file)
        .working_directory(workdir)
        .umask(0o027);

    daemonize.start().map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

fn main() -> Result<()> {
    let args = AppCli::parse();
    let home = args.home.clone().or_else(default_home);

    match args.command {
        Some(Commands::Configure { api_url, api_key }) => {
            let config = Config::configure(&args.config, api_url, api_key)?;
            let settings = config.api_settings()?;
            config.write_file(&args.config)?;
            println!(
                "wrote {} (api_url={}, api_key={})",
                args.config.display(),
                settings.url,
                mask_secret(&settings.key)
            );
            Ok(())
        }
        None => {
            if args.daemon {
                // fork before any runtime threads exist
                run_daemon(home.as_ref())?;
            }
            logging::init(home.as_deref())?;
            info!(version = ynmweb::VERSION, "ynmweb starting");

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?
                .block_on(daemon::run(args.config))
        }
    }
}
