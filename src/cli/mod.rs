//! Command-line interface of the `hublink` binary.
//!
//! ```ignore
//! use hublink::cli::{parse_args, run_cli_command};
//!
//! let command = parse_args(std::env::args());
//! run_cli_command(command).await?;
//! ```

pub mod args;
pub mod commands;
pub mod version;

pub use args::{parse_args, CliCommand, USAGE};
pub use version::{handle_version_command, VERSION};

use color_eyre::eyre::bail;
use color_eyre::Result;

use crate::config::HubConfig;
use crate::hub::HubSession;

/// Run a parsed command to completion.
pub async fn run_cli_command(command: CliCommand) -> Result<()> {
    let command = match command {
        CliCommand::Version => {
            handle_version_command();
            return Ok(());
        }
        CliCommand::Help => {
            println!("{}", USAGE);
            return Ok(());
        }
        CliCommand::Invalid(message) => {
            eprintln!("{}", USAGE);
            bail!(message);
        }
        other => other,
    };

    let hub = HubSession::from_config(HubConfig::from_env()?)?;
    let result = match command {
        CliCommand::Login { username } => commands::handle_login(&hub, username).await,
        CliCommand::Logout => commands::handle_logout(&hub).await,
        CliCommand::Status => commands::handle_status(&hub).await,
        CliCommand::Poll => commands::handle_poll(&hub).await,
        CliCommand::Watch { device_id } => commands::handle_watch(&hub, &device_id).await,
        CliCommand::Version | CliCommand::Help | CliCommand::Invalid(_) => Ok(()),
    };
    hub.shutdown().await;
    result
}
