use derive_more::Display;
use derive_more::From;
use log::debug;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};
use tokio::{join, select};

#[derive(Debug, From, Display)]
pub enum CommandError {
    #[display(fmt = "IO Error occurred while executing command: {}", _0)]
    IO(io::Error),
    #[from(ignore)]
    #[display(fmt = "Unable to start command: {}", _0)]
    Spawn(io::Error),
    #[display(fmt = "Provided command string didn't contain a command. (Was it empty?)")]
    MissingCommand,
    #[display(fmt = "Process exited with non-zero exit code: Code {}", _0)]
    NoZeroExitCode(i32),
    #[from(ignore)]
    #[display(fmt = "Process was terminated before it could exit")]
    Terminated,
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Executes the provided command in the provided working directory
/// in this case the command is a format string which can contain
/// format arguments (i.e. {0} {1}) these variables are provided in
/// the `args_in` slice
pub async fn run_command_format(
    working_dir: impl AsRef<Path>,
    command: &str,
    args_in: &[&str],
) -> CommandResult<()> {
    let (cmd, args) = split_command(command).ok_or(CommandError::MissingCommand)?;
    let args = transform_args(args, args_in);

    let mut command = Command::new(cmd);
    command.args(&args);
    command.current_dir(working_dir);

    let exit_status = pipe_and_wait(command).await?;
    match exit_status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(CommandError::NoZeroExitCode(code)),
        None => Err(CommandError::Terminated),
    }
}

/// How long output still buffered in the pipes is read after the
/// process has exited
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Line reader over a child pipe that may not have been captured,
/// each line is written unchanged to the matching stream of this
/// process. Once the pipe reaches EOF the reader is closed
struct OptionalReader<V> {
    lines: Option<Lines<BufReader<V>>>,
    forward: fn(&str),
}

impl<V> OptionalReader<V>
where
    V: Unpin + AsyncRead,
{
    fn new(value: Option<V>, forward: fn(&str)) -> Self {
        Self {
            lines: value.map(|value| BufReader::new(value).lines()),
            forward,
        }
    }

    fn is_closed(&self) -> bool {
        self.lines.is_none()
    }

    /// Reads and forwards a single line. Cancel safe, a line is only
    /// consumed when it is also forwarded
    async fn forward_next(&mut self) -> io::Result<()> {
        let Some(lines) = &mut self.lines else {
            return Ok(());
        };
        let line = lines.next_line().await?;
        match line {
            Some(line) => (self.forward)(&line),
            None => self.lines = None,
        }
        Ok(())
    }

    /// Forwards whatever is left in the pipe until EOF or until the
    /// deadline passes
    async fn drain(&mut self, deadline: Instant) -> io::Result<()> {
        while !self.is_closed() {
            let Ok(result) = timeout_at(deadline, self.forward_next()).await else {
                break;
            };
            result?;
        }
        Ok(())
    }
}

fn forward_stdout(line: &str) {
    println!("{line}");
}

fn forward_stderr(line: &str) {
    eprintln!("{line}");
}

/// Spawns the command child passing its output through to this
/// process and waiting until the process exits returning the exit
/// status of the program or an Error. Only the child itself is waited
/// on, anything it leaves running in the background holding the pipes
/// open is cut off after [`DRAIN_TIMEOUT`]
async fn pipe_and_wait(mut command: Command) -> CommandResult<ExitStatus> {
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    debug!("Running {command:?}");
    let mut child = command.spawn().map_err(CommandError::Spawn)?;

    let mut stdout = OptionalReader::new(child.stdout.take(), forward_stdout);
    let mut stderr = OptionalReader::new(child.stderr.take(), forward_stderr);

    let status = loop {
        select! {
            result = stdout.forward_next(), if !stdout.is_closed() => result?,
            result = stderr.forward_next(), if !stderr.is_closed() => result?,
            result = child.wait() => break result?,
        }
    };

    let deadline = Instant::now() + DRAIN_TIMEOUT;
    let (out, err) = join!(stdout.drain(deadline), stderr.drain(deadline));
    out?;
    err?;

    Ok(status)
}

/// Splits the command into the command itself and a vector
/// containing the additional arguments
fn split_command(value: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = value.split_whitespace();
    let command = parts.next()?;
    let args = parts.collect::<Vec<&str>>();
    Some((command, args))
}

/// Transforms the provided `args` formatting them replacing their
/// values with those stored in the `args_in` slice
fn transform_args<'a>(args: Vec<&'a str>, args_in: &[&'a str]) -> Vec<&'a str> {
    /// Parses a format value from the provided `value`
    /// returning the index stored inside it or None if
    /// it could not be parsed as a format
    fn parse_format(value: &str) -> Option<usize> {
        let start = value.find('{')?;
        let end = value.find('}')?;
        if end <= start {
            return None;
        }
        let format = &value[start + 1..end];
        format.parse::<usize>().ok()
    }

    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if let Some(index) = parse_format(arg) {
            if let Some(value) = args_in.get(index) {
                out.push(*value);
                continue;
            }
        }
        out.push(arg)
    }
    out
}

#[cfg(test)]
mod test {
    use crate::cmd::{
        run_command_format, split_command, transform_args, CommandError, CommandResult,
    };
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn split_command_separates_arguments() {
        assert_eq!(
            split_command("bash  setup.sh {0}"),
            Some(("bash", vec!["setup.sh", "{0}"]))
        );
        assert_eq!(split_command("   "), None);
    }

    #[test]
    fn transform_args_substitutes_known_indices() {
        let args = vec!["{0}", "--flag", "{1}", "{5}"];
        let out = transform_args(args, &["/opt/setup git.sh", "/tmp/out"]);
        assert_eq!(out, vec!["/opt/setup git.sh", "--flag", "/tmp/out", "{5}"]);
    }

    #[tokio::test]
    async fn passes_arguments_to_script() -> CommandResult<()> {
        let dir = TempDir::new()?;
        let script = dir.path().join("record.sh");
        fs::write(&script, "echo \"$1\" > recorded\necho done\n")?;
        let script = script.to_string_lossy().into_owned();

        run_command_format(dir.path(), "bash {0} {1}", &[script.as_str(), "hello world"]).await?;

        let recorded = fs::read_to_string(dir.path().join("recorded"))?;
        assert_eq!(recorded.trim(), "hello world");
        Ok(())
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() -> CommandResult<()> {
        let dir = TempDir::new()?;
        let script = dir.path().join("fail.sh");
        fs::write(&script, "echo failing >&2\nexit 3\n")?;
        let script = script.to_string_lossy().into_owned();

        let result = run_command_format(dir.path(), "bash {0}", &[script.as_str()]).await;

        assert!(matches!(result, Err(CommandError::NoZeroExitCode(3))));
        Ok(())
    }

    #[tokio::test]
    async fn background_children_do_not_delay_exit() -> CommandResult<()> {
        let dir = TempDir::new()?;
        let script = dir.path().join("background.sh");
        fs::write(&script, "sleep 5 &\necho started\nexit 0\n")?;
        let script = script.to_string_lossy().into_owned();

        let started = Instant::now();
        run_command_format(dir.path(), "bash {0}", &[script.as_str()]).await?;

        assert!(started.elapsed() < Duration::from_secs(3));
        Ok(())
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let command = "fixture-installer-no-such-program {0}";
        let result = run_command_format(dir.path(), command, &["x"]).await;
        assert!(matches!(
            result,
            Err(CommandError::Spawn(err)) if err.kind() == std::io::ErrorKind::NotFound
        ));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let result = run_command_format(".", "", &[]).await;
        assert!(matches!(result, Err(CommandError::MissingCommand)));
    }
}
