use derive_more::{Display, From};
use log::info;
use std::io;
use std::path::{Path, PathBuf};

pub mod cmd;
pub mod fs;
pub mod git;

use crate::cmd::CommandError;
use crate::fs::{copy_dir_all, CopyError};

/// Fixture installed when no fixture name is given
pub const DEFAULT_FIXTURE: &str = "basic_monorepo";

const FIXTURES_DIR: &str = "_fixtures";
const SETUP_SCRIPT: &str = "setup_git.sh";

#[derive(Debug, From, Display)]
pub enum InstallError {
    #[display(fmt = "Failed to copy fixture: {}", _0)]
    Copy(CopyError),
    #[display(fmt = "Failed to initialize repository: {}", _0)]
    Init(CommandError),
}

pub type InstallResult<T> = Result<T, InstallError>;

impl InstallError {
    /// Process exit code for this error. A failing setup script has its
    /// own exit code passed through and a script that cannot be started
    /// exits the way a shell would (127 when missing, 126 when not
    /// executable), everything else exits with 1
    pub fn exit_code(&self) -> u8 {
        match self {
            InstallError::Init(CommandError::Spawn(err)) => match err.kind() {
                io::ErrorKind::NotFound => 127,
                io::ErrorKind::PermissionDenied => 126,
                _ => 1,
            },
            InstallError::Init(CommandError::NoZeroExitCode(code)) => match u8::try_from(*code) {
                Ok(0) | Err(_) => 1,
                Ok(code) => code,
            },
            _ => 1,
        }
    }
}

/// Locations of the fixtures and setup script, resolved relative to the
/// directory the tool lives in rather than the caller's working directory
#[derive(Debug, Clone)]
pub struct Layout {
    script_dir: PathBuf,
}

impl Layout {
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
        }
    }

    /// Uses the directory containing the running executable
    pub fn from_executable() -> io::Result<Self> {
        let exe = std::env::current_exe()?;
        let script_dir = exe.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Executable path {exe:?} has no parent directory"),
            )
        })?;
        Ok(Self::new(script_dir))
    }

    pub fn fixture_path(&self, fixture: &str) -> PathBuf {
        self.script_dir.join("..").join(FIXTURES_DIR).join(fixture)
    }

    pub fn setup_script(&self) -> PathBuf {
        self.script_dir.join("..").join(SETUP_SCRIPT)
    }
}

/// A single request to seed `target` with a fixture. The target is
/// trusted as given, problems with it surface from the copy itself
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub target: PathBuf,
    pub fixture: String,
}

impl InstallRequest {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            fixture: DEFAULT_FIXTURE.to_string(),
        }
    }

    pub fn with_fixture(mut self, fixture: impl Into<String>) -> Self {
        self.fixture = fixture.into();
        self
    }
}

/// Copies the requested fixture into the target and then runs the setup
/// script against it. The script is only started once the copy has
/// completed successfully
pub async fn install(layout: &Layout, request: &InstallRequest) -> InstallResult<()> {
    let source = layout.fixture_path(&request.fixture);
    info!(
        "Installing fixture {} into {:?}",
        request.fixture, request.target
    );

    let copied = copy_dir_all(&source, &request.target).await?;
    info!("Copied {copied} fixture files");

    let target = canonicalize(&request.target).await?;
    git::init_repository(&layout.setup_script(), &target).await?;

    if let Some(repo) = git::describe_repository(&target) {
        match &repo.head {
            Some(head) => info!("Repository ready at {:?} (HEAD {head})", repo.path),
            None => info!("Repository ready at {:?} (no commits)", repo.path),
        }
    }
    Ok(())
}

async fn canonicalize(path: &Path) -> Result<PathBuf, CopyError> {
    Ok(tokio::fs::canonicalize(path).await?)
}
