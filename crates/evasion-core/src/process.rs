//! External command invocation with an optional timeout.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::trace;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A program plus its fixed leading arguments.
///
/// Arguments may contain `{input}` and `{output}` placeholders. When neither
/// appears, the input and output paths are appended in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Parse `program arg1 arg2 ...` (whitespace separated).
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }

    /// Final argument list for the given input and optional output path.
    pub fn render_args(&self, input: &Path, output: Option<&Path>) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.map(|p| p.display().to_string());
        let templated = self
            .args
            .iter()
            .any(|a| a.contains("{input}") || a.contains("{output}"));

        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                let a = a.replace("{input}", &input);
                match &output {
                    Some(out) => a.replace("{output}", out),
                    None => a,
                }
            })
            .collect();
        if !templated {
            args.push(input);
            args.extend(output);
        }
        args
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Why an external command did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    Spawn { program: String, reason: String },
    TimedOut { program: String, secs: u64 },
    Failed { program: String, code: Option<i32>, stderr: String },
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Spawn { program, reason } => write!(f, "failed to start {}: {}", program, reason),
            ProcessError::TimedOut { program, secs } => write!(f, "{} timed out after {}s", program, secs),
            ProcessError::Failed { program, code, stderr } => {
                let code = code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
                write!(f, "{} exited with {}: {}", program, code, stderr.trim())
            }
        }
    }
}

impl std::error::Error for ProcessError {}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run a command to completion, killing it when `timeout` elapses.
pub fn run(
    program: &str,
    args: &[String],
    envs: &[(&str, String)],
    timeout: Option<Duration>,
) -> Result<ProcessOutput, ProcessError> {
    trace!(program, ?args, "spawning");
    let mut command = Command::new(program);
    // Own process group, so a timeout also reaches grandchildren holding the pipes.
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut command, 0);
    let mut child = command
        .args(args)
        .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ProcessError::Spawn {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

    // Drain both pipes on their own threads so a chatty child cannot block.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                return Err(ProcessError::Spawn {
                    program: program.to_string(),
                    reason: e.to_string(),
                })
            }
        }
        if let Some(limit) = timeout {
            if start.elapsed() >= limit {
                kill_tree(&mut child);
                let _ = child.wait();
                return Err(ProcessError::TimedOut {
                    program: program.to_string(),
                    secs: limit.as_secs(),
                });
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let join = |h: Option<std::thread::JoinHandle<String>>| h.and_then(|h| h.join().ok()).unwrap_or_default();
    let output = ProcessOutput {
        stdout: join(stdout),
        stderr: join(stderr),
    };

    if status.success() {
        Ok(output)
    } else {
        Err(ProcessError::Failed {
            program: program.to_string(),
            code: status.code(),
            stderr: output.stderr,
        })
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        trace!(pid = child.id(), error = %e, "killpg failed, killing child only");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = pipe.read_to_string(&mut buf);
        buf
    })
}
