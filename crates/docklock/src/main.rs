mod app;
mod error;
mod logging;
mod presenter;
mod settings;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use docklock_core::ChannelId;
use docklock_platform::AppPaths;

use crate::app::App;
use crate::error::AppError;
use crate::settings::AppSettings;

#[derive(Debug, Parser)]
#[command(name = "docklock", version, about = "Keeps DockLock up to date")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check for a newer release and report the result.
    Check {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Check, then download, verify and install a newer release.
    Install {
        #[arg(long)]
        channel: Option<String>,
        /// Do not relaunch after installing.
        #[arg(long)]
        no_restart: bool,
    },
    /// Run scheduled background checks until interrupted.
    Watch,
    /// Open the releases page in the browser.
    Releases {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Set the default update channel.
    Channel { name: String },
    /// Print the directories used for settings, logs and downloads.
    Paths,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            log::error!("{error}");
            eprintln!("docklock: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, AppError> {
    let paths = AppPaths::new()?;
    let settings = AppSettings::load(&paths);
    logging::init_logging(&paths, settings.debug_logging, settings.max_log_size_bytes);

    match cli.command.unwrap_or(Command::Watch) {
        Command::Check { channel } => {
            App::new(&paths, settings, channel.map(ChannelId::from))?
                .check()
                .await
        }
        Command::Install {
            channel,
            no_restart,
        } => {
            App::new(&paths, settings, channel.map(ChannelId::from))?
                .install(!no_restart)
                .await
        }
        Command::Watch => App::new(&paths, settings, None)?.watch().await,
        Command::Releases { channel } => {
            App::new(&paths, settings, channel.map(ChannelId::from))?.open_releases_page()
        }
        Command::Channel { name } => {
            let channel = ChannelId::from(name);
            if !settings.repositories.contains_key(&channel) {
                return Err(AppError::UnknownChannel { channel });
            }
            let settings = AppSettings {
                channel,
                ..settings
            };
            settings
                .save(&paths)
                .map_err(|error| AppError::setup("settings", error))?;
            println!("Update channel set to {}", settings.channel);
            Ok(ExitCode::SUCCESS)
        }
        Command::Paths => {
            println!("settings: {}", paths.settings_file().display());
            println!("log:      {}", paths.log_file().display());
            println!("updates:  {}", paths.updates_dir().display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn no_subcommand_means_watch() {
        let cli = Cli::try_parse_from(["docklock"]).expect("bare invocation should parse");
        assert!(cli.command.is_none());
    }

    #[test]
    fn install_accepts_channel_and_no_restart() {
        let cli = Cli::try_parse_from(["docklock", "install", "--channel", "beta", "--no-restart"])
            .expect("install flags should parse");
        match cli.command {
            Some(Command::Install {
                channel,
                no_restart,
            }) => {
                assert_eq!(channel.as_deref(), Some("beta"));
                assert!(no_restart);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
