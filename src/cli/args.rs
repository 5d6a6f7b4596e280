//! Command-line argument parsing for the hublink CLI.

/// Parsed CLI command to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Show version information
    Version,
    /// Show usage
    Help,
    /// Sign in and persist the session
    Login { username: Option<String> },
    /// Clear the persisted session
    Logout,
    /// Show the persisted session
    Status,
    /// Fetch the device listing once
    Poll,
    /// Stream realtime updates of one device until interrupted
    Watch { device_id: String },
    /// Arguments could not be understood
    Invalid(String),
}

pub const USAGE: &str = "\
Usage: hublink <command>

Commands:
  login [username]     Sign in (password is prompted)
  logout               Clear the stored session
  status               Show the stored session
  poll                 Fetch the device listing once
  watch <device-id>    Stream realtime updates for a device

Options:
  -V, --version        Print version
  -h, --help           Print this help

Configuration is read from HUBLINK_* environment variables.";

/// Parse command-line arguments, program name first.
///
/// ```
/// use hublink::cli::args::{parse_args, CliCommand};
///
/// let args = vec!["hublink".to_string(), "watch".to_string(), "dev-1".to_string()];
/// assert_eq!(
///     parse_args(args.into_iter()),
///     CliCommand::Watch { device_id: "dev-1".to_string() }
/// );
/// ```
pub fn parse_args<I>(args: I) -> CliCommand
where
    I: Iterator<Item = String>,
{
    let mut args = args.skip(1);
    let Some(first) = args.next() else {
        return CliCommand::Help;
    };

    match first.as_str() {
        "--version" | "-V" => CliCommand::Version,
        "--help" | "-h" | "help" => CliCommand::Help,
        "login" => CliCommand::Login {
            username: args.next(),
        },
        "logout" => CliCommand::Logout,
        "status" => CliCommand::Status,
        "poll" => CliCommand::Poll,
        "watch" => match args.next() {
            Some(device_id) => CliCommand::Watch { device_id },
            None => CliCommand::Invalid("watch requires a device id".to_string()),
        },
        other => CliCommand::Invalid(format!("unknown command '{}'", other)),
    }
}
