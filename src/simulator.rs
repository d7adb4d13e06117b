//! Invocation of the external simulator.

use std::borrow::Cow;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::space::Combination;
use crate::SweepError;

/// Placeholder replaced by the flattened `--key=value` flag string.
pub const PARAMS_PLACEHOLDER: &str = "{params}";
pub const DEFAULT_OUTPUT_PATH_FLAG: &str = "pcapPath";
pub const DEFAULT_SEED_FLAG: &str = "RngRun";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything the simulator needs for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub combination: Combination,
    pub trial: usize,
    pub seed: u64,
    pub output_path: PathBuf,
}

impl Invocation {
    /// Combination flags followed by the output-path and seed flags.
    pub fn flags(&self, output_path_flag: &str, seed_flag: &str) -> Vec<String> {
        let mut flags = self.combination.flags();
        flags.push(format!("--{output_path_flag}={}", self.output_path.display()));
        flags.push(format!("--{seed_flag}={}", self.seed));
        flags
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorOutput {
    /// Captured stdout bytes, exactly as the simulator wrote them.
    pub stdout: Vec<u8>,
    /// `false` on a non-zero exit, a crash, or a timeout.
    pub success: bool,
}

impl SimulatorOutput {
    pub fn succeeded(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            success: true,
        }
    }

    pub fn failed(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            success: false,
        }
    }

    /// Stdout decoded for parsing; invalid UTF-8 is replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }
}

pub trait Simulator {
    /// Runs one trial to completion and returns its captured stdout.
    fn run(&mut self, invocation: &Invocation) -> Result<SimulatorOutput, SweepError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplate {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for CommandTemplate {
    fn default() -> Self {
        Self {
            program: "./waf".to_string(),
            args: vec![
                "--run".to_string(),
                format!("ftm-example.cc {PARAMS_PLACEHOLDER}"),
            ],
            working_dir: None,
        }
    }
}

impl CommandTemplate {
    /// Expands the argument list for `flags`.
    ///
    /// Arguments containing the placeholder receive the space-joined flags;
    /// without a placeholder every flag becomes its own argument.
    pub fn render_args(&self, flags: &[String]) -> Vec<String> {
        if self.args.iter().any(|arg| arg.contains(PARAMS_PLACEHOLDER)) {
            let joined = flags.join(" ");
            return self
                .args
                .iter()
                .map(|arg| arg.replace(PARAMS_PLACEHOLDER, &joined))
                .collect();
        }

        self.args.iter().chain(flags.iter()).cloned().collect()
    }

    /// The simulator runs in its own process group on Unix, so a timeout can
    /// take down wrappers like `waf` together with the program they launch.
    pub fn command(&self, flags: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.render_args(flags));
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }
}

/// Runs the simulator as a child process, blocking until it exits.
#[derive(Debug, Clone)]
pub struct ProcessSimulator {
    pub template: CommandTemplate,
    pub output_path_flag: String,
    pub seed_flag: String,
    pub timeout: Option<Duration>,
}

impl ProcessSimulator {
    pub fn new(template: CommandTemplate) -> Self {
        Self {
            template,
            output_path_flag: DEFAULT_OUTPUT_PATH_FLAG.to_string(),
            seed_flag: DEFAULT_SEED_FLAG.to_string(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_flags(mut self, output_path_flag: &str, seed_flag: &str) -> Self {
        self.output_path_flag = output_path_flag.to_string();
        self.seed_flag = seed_flag.to_string();
        self
    }
}

impl Simulator for ProcessSimulator {
    fn run(&mut self, invocation: &Invocation) -> Result<SimulatorOutput, SweepError> {
        let flags = invocation.flags(&self.output_path_flag, &self.seed_flag);
        let mut command = self.template.command(&flags);
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null());
        debug!(program = %self.template.program, ?flags, "launching simulator");

        let mut child = command.spawn().map_err(|source| SweepError::Spawn {
            program: self.template.program.clone(),
            source,
        })?;

        // Drained concurrently with the wait so the pipe never fills.
        let mut stdout = child.stdout.take();
        let reader = thread::spawn(move || -> io::Result<Vec<u8>> {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout.as_mut() {
                pipe.read_to_end(&mut buf)?;
            }
            Ok(buf)
        });

        let status = match self.timeout {
            None => Some(child.wait()?),
            Some(limit) => wait_with_deadline(&mut child, limit)?,
        };
        let bytes = reader
            .join()
            .map_err(|_| io::Error::other("simulator stdout reader panicked"))??;

        match status {
            Some(status) if status.success() => Ok(SimulatorOutput::succeeded(bytes)),
            Some(status) => {
                warn!(trial = invocation.trial, %status, "simulator exited unsuccessfully");
                Ok(SimulatorOutput::failed(bytes))
            }
            None => {
                warn!(
                    trial = invocation.trial,
                    timeout_secs = self.timeout.map(|t| t.as_secs_f64()),
                    "simulator timed out and was killed"
                );
                Ok(SimulatorOutput::failed(bytes))
            }
        }
    }
}

/// Polls `child` until it exits or `limit` elapses; kills it on timeout.
fn wait_with_deadline(child: &mut Child, limit: Duration) -> Result<Option<ExitStatus>, SweepError> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            kill_process_tree(child)?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kills the child's whole process group, falling back to the child alone.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> io::Result<()> {
    let group = format!("-{}", child.id());
    let killed_group = Command::new("kill")
        .args(["-s", "KILL", "--", group.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);

    if !killed_group {
        debug!(pid = child.id(), "process group kill failed, killing child only");
        child.kill()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> io::Result<()> {
    child.kill()
}
