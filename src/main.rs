use color_eyre::Result;
use hublink::cli::{parse_args, run_cli_command};
use hublink::logging::init_logging;

fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging("hublink=warn");

    let command = parse_args(std::env::args());

    // Session, request and realtime layers all run on this runtime
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_cli_command(command))
}
