use crate::cmd::{run_command_format, CommandResult};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Command used to run the repository setup script, `{0}` is the
/// script and `{1}` the directory being initialized
const SETUP_COMMAND: &str = "bash {0} {1}";

/// Runs the setup script against `target` which is also used as the
/// working directory. Any non-zero exit of the script is returned as
/// an error with its exit code
pub(crate) async fn init_repository(script: &Path, target: &Path) -> CommandResult<()> {
    info!("Initializing repository at {target:?}");
    let script = script.to_string_lossy();
    let target_arg = target.to_string_lossy();
    run_command_format(target, SETUP_COMMAND, &[&*script, &*target_arg]).await
}

/// Opens the repository at `path` to report what the setup script
/// produced. Returns None when there is no repository there
pub(crate) fn describe_repository(path: &Path) -> Option<Repository> {
    let repo = match git2::Repository::open(path) {
        Ok(repo) => repo,
        Err(err) => {
            warn!("No git repository found at {path:?} after setup: {}", err.message());
            return None;
        }
    };
    let head = repo
        .head()
        .ok()
        .and_then(|head| head.peel_to_commit().ok())
        .map(|commit| commit.id().to_string());
    Some(Repository {
        path: path.to_path_buf(),
        head,
    })
}

#[derive(Debug)]
pub struct Repository {
    pub path: PathBuf,
    /// Commit id HEAD points at, None for a repository without commits
    pub head: Option<String>,
}

#[cfg(test)]
mod test {
    use crate::cmd::{CommandError, CommandResult};
    use crate::git::{describe_repository, init_repository};
    use env_logger::WriteStyle;
    use git2::{IndexAddOption, Repository};
    use log::LevelFilter;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn init_logger() {
        env_logger::builder()
            .write_style(WriteStyle::Always)
            .filter_level(LevelFilter::Info)
            .is_test(true)
            .try_init()
            .ok();
    }

    fn commit_all(repo: &Repository) -> git2::Oid {
        let mut index = repo.index().unwrap();
        index
            .add_all(["."], IndexAddOption::DEFAULT, None)
            .unwrap();
        let tree_oid = index.write_tree().unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let signature = repo.signature().unwrap();
        repo.commit(Some("HEAD"), &signature, &signature, "Initial", &tree, &[])
            .unwrap()
    }

    fn write_script(dir: &Path, contents: &str) -> std::path::PathBuf {
        let script = dir.join("setup_git.sh");
        fs::write(&script, contents).unwrap();
        script
    }

    #[tokio::test]
    async fn runs_script_with_target_argument() -> CommandResult<()> {
        init_logger();
        let tools = TempDir::new()?;
        let target = TempDir::new()?;
        let script = write_script(tools.path(), "echo \"$1\" > \"$1/.initialized-for\"\n");

        init_repository(&script, target.path()).await?;

        let recorded = fs::read_to_string(target.path().join(".initialized-for"))?;
        assert_eq!(recorded.trim(), target.path().to_string_lossy());
        Ok(())
    }

    #[tokio::test]
    async fn failing_script_returns_exit_code() -> CommandResult<()> {
        init_logger();
        let tools = TempDir::new()?;
        let target = TempDir::new()?;
        let script = write_script(tools.path(), "echo \"no git here\" >&2\nexit 17\n");

        let result = init_repository(&script, target.path()).await;

        assert!(matches!(result, Err(CommandError::NoZeroExitCode(17))));
        Ok(())
    }

    #[test]
    fn describes_repository_head() {
        init_logger();
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        fs::write(tmp.path().join("package.json"), "{}").unwrap();
        let oid = commit_all(&repo);

        let described = describe_repository(tmp.path()).expect("repository");

        assert_eq!(described.head, Some(oid.to_string()));
        assert_eq!(described.path, tmp.path());
    }

    #[test]
    fn describes_repository_without_commits() {
        let tmp = TempDir::new().unwrap();
        Repository::init(tmp.path()).unwrap();

        let described = describe_repository(tmp.path()).expect("repository");

        assert_eq!(described.head, None);
    }

    #[test]
    fn plain_directory_is_not_a_repository() {
        let tmp = TempDir::new().unwrap();
        assert!(describe_repository(tmp.path()).is_none());
    }
}
