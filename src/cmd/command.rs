use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use itertools::Itertools;

/// How long a timed-out process gets to react to SIGINT before the SIGKILL.
/// Helm needs a moment to release its release locks.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(10);
const WAIT_POLL_PERIOD: Duration = Duration::from_millis(100);

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("I/O error while executing command: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command terminated with a non success exit status code {status}: {stderr}")]
    ExitStatusError { status: ExitStatus, stderr: String },

    #[error("Command killed after exceeding its {0:?} deadline")]
    Timeout(Duration),
}

#[derive(Debug, Default, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run an external binary to completion and capture both streams. The run is
/// bounded by `timeout` only: campaign cancellation is observed at the
/// monitor poll points, never inside an in-flight helm invocation, so there
/// is no cooperative cancel check here. Past the deadline the process gets a
/// SIGINT, the grace period, then a SIGKILL.
pub fn run_command<P: AsRef<Path>>(
    binary: P,
    args: &[&str],
    envs: &[(&str, &str)],
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    debug!("{}", command_to_string(binary.as_ref(), args, envs));

    let mut command = Command::new(binary.as_ref().as_os_str());
    command.args(args);
    for (k, v) in envs {
        command.env(k, v);
    }

    let mut child = command.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;

    // Streams are drained on their own threads: a chatty process must not be
    // able to fill the pipe and stall while we watch the deadline.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || drain_to_string(stdout));
    let stderr_reader = std::thread::spawn(move || drain_to_string(stderr));

    let deadline = Instant::now() + timeout;
    let exit_status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                warn!("command exceeded its {:?} deadline, killing it", timeout);
                kill_gracefully(&mut child);
                let _ = stdout_reader.join();
                let _ = stderr_reader.join();
                return Err(CommandError::Timeout(timeout));
            }
            Ok(None) => std::thread::sleep(WAIT_POLL_PERIOD),
            Err(err) => return Err(CommandError::Io(err)),
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !exit_status.success() {
        debug!("command terminated with exit status {:?}", exit_status);
        return Err(CommandError::ExitStatusError {
            status: exit_status,
            stderr,
        });
    }

    Ok(CommandOutput { stdout, stderr })
}

fn drain_to_string<R: Read>(stream: Option<R>) -> String {
    let Some(stream) = stream else {
        return String::new();
    };

    let mut buffer = String::new();
    for line in BufReader::new(stream).lines() {
        match line {
            Ok(line) => {
                buffer.push_str(&line);
                buffer.push('\n');
            }
            Err(_) => break,
        }
    }
    buffer
}

/// SIGINT first so the process can shut down cleanly, SIGKILL once the grace
/// period runs out.
fn kill_gracefully(child: &mut Child) {
    unsafe {
        let pid = child.id() as i32;
        let _ = libc::kill(pid, libc::SIGINT);
    }

    let killed_since = Instant::now();
    while let Ok(None) = child.try_wait() {
        if killed_since.elapsed() > KILL_GRACE_PERIOD {
            info!("command still running after grace period, hard killing it");
            let _ = child.kill();
        }
        std::thread::sleep(WAIT_POLL_PERIOD);
    }

    let _ = child.wait();
}

pub fn does_binary_exist<S>(binary: S) -> bool
where
    S: AsRef<std::ffi::OsStr>,
{
    Command::new(binary)
        .stdout(Stdio::null())
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|mut child| child.wait())
        .is_ok()
}

pub fn command_to_string(binary: &Path, args: &[&str], envs: &[(&str, &str)]) -> String {
    let _envs = envs.iter().map(|(k, v)| format!("{k}={v}")).join(" ");
    format!("{} {:?} {}", _envs, binary.as_os_str(), args.join(" "))
}
