use clap::Parser;
use env_logger::Env;
use fixture_installer::{install, InstallRequest, Layout, DEFAULT_FIXTURE};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

/// Copies a fixture monorepo into a directory and initializes it as a
/// git repository
#[derive(Parser)]
#[command(name = "install")]
#[command(version)]
struct Cli {
    /// Directory to install the fixture into
    target: PathBuf,

    /// Name of the fixture under `_fixtures/`
    #[arg(default_value = DEFAULT_FIXTURE)]
    fixture: String,

    /// Directory to resolve `../_fixtures` and `../setup_git.sh` from
    /// (defaults to the directory of this executable)
    #[arg(long)]
    script_dir: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    let layout = match cli.script_dir {
        Some(dir) => Layout::new(dir),
        None => match Layout::from_executable() {
            Ok(layout) => layout,
            Err(err) => {
                error!("Unable to locate the installer directory: {err}");
                return ExitCode::FAILURE;
            }
        },
    };

    let request = InstallRequest::new(cli.target).with_fixture(cli.fixture);
    match install(&layout, &request).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
