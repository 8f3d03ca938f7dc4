//! Abstract trajectory generation through an external word generator.
//!
//! [`Wordgen`] runs the `wordgen` tool on an encoded model, waits for it and
//! parses its JSON output. The tool's stream is not always valid JSON: it
//! leaves empty `[]` artifacts, closes each trajectory with a line carrying
//! a `"final"` marker instead of a bracket, and may stop without closing the
//! outer array. [`repair_output`] turns such a stream into a parseable
//! document.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, GenerationFailure, Result};
use crate::trajectory::{self, AbstractTrajectory};

/// How many trajectories of how many steps to generate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GenerationRequest {
    pub count: usize,
    pub length: usize,
}

impl GenerationRequest {
    pub fn new(count: usize, length: usize) -> Self {
        GenerationRequest { count, length }
    }
}

impl fmt::Display for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} trajectories of length {}", self.count, self.length)
    }
}

/// Source of abstract trajectories for an encoded model.
pub trait WordGenerator {
    /// Produces exactly `request.count` abstract trajectories for the model
    /// stored at `model`, writing them as JSON to `output`.
    ///
    /// Either every trajectory is returned or the call fails.
    fn generate(&self, model: &Path, request: GenerationRequest, output: &Path) -> Result<Vec<AbstractTrajectory>>;
}

/// Settings for the external `wordgen` process.
#[derive(Debug, Clone)]
pub struct WordgenConfig {
    /// Executable, looked up on `PATH` when not a path.
    pub program: PathBuf,
    /// Pass `--exact-rational`.
    pub exact_rational: bool,
    /// Kill the process and fail after this long.
    pub timeout: Option<Duration>,
    /// Extra arguments placed before the output options.
    pub extra_args: Vec<OsString>,
}

impl Default for WordgenConfig {
    fn default() -> Self {
        WordgenConfig {
            program: PathBuf::from("wordgen"),
            exact_rational: true,
            timeout: None,
            extra_args: Vec::new(),
        }
    }
}

impl WordgenConfig {
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_exact_rational(mut self, exact: bool) -> Self {
        self.exact_rational = exact;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_extra_args<S: Into<OsString>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Process adapter for the `wordgen` tool.
#[derive(Debug, Clone, Default)]
pub struct Wordgen {
    config: WordgenConfig,
}

impl Wordgen {
    pub fn new(config: WordgenConfig) -> Self {
        Wordgen { config }
    }

    pub fn config(&self) -> &WordgenConfig {
        &self.config
    }

    fn command(&self, model: &Path, request: GenerationRequest, raw: &Path) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.arg(model)
            .arg("--traj")
            .arg(request.count.to_string())
            .arg("--receding")
            .arg(request.length.to_string());
        if self.config.exact_rational {
            cmd.arg("--exact-rational");
        }
        cmd.args(&self.config.extra_args)
            .arg("--output-format")
            .arg("json")
            .arg(raw)
            .env("OCAMLRUNPARAM", "b")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }

    fn wait(&self, mut child: Child) -> Result<(ExitStatus, String)> {
        let stderr = child.stderr.take();
        let reader = thread::spawn(move || {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                // Partial stderr is still worth reporting.
                let _ = stderr.read_to_string(&mut buf);
            }
            buf
        });

        let status = match self.config.timeout {
            None => child.wait()?,
            Some(limit) => {
                let start = Instant::now();
                loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if start.elapsed() >= limit {
                        warn!("word generator exceeded {:?}, killing it", limit);
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = reader.join();
                        return Err(GenerationFailure::TimedOut {
                            seconds: limit.as_secs_f64(),
                        }
                        .into());
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        };
        let stderr = reader.join().unwrap_or_default();
        Ok((status, stderr))
    }
}

impl WordGenerator for Wordgen {
    fn generate(&self, model: &Path, request: GenerationRequest, output: &Path) -> Result<Vec<AbstractTrajectory>> {
        let raw_path = broken_path(output);
        let mut cmd = self.command(model, request, &raw_path);
        info!("generating {} with {:?}", request, cmd);

        let child = cmd.spawn().map_err(|e| GenerationFailure::NotFound {
            program: self.config.program.display().to_string(),
            source: e,
        })?;
        let (status, stderr) = self.wait(child)?;
        if !status.success() {
            return Err(GenerationFailure::NonZeroExit { status, stderr }.into());
        }

        let raw = fs::read_to_string(&raw_path).map_err(|e| GenerationFailure::Unparsable {
            reason: format!("cannot read {}: {}", raw_path.display(), e),
        })?;
        let mut trajectories = parse_output(&raw)?;
        if trajectories.len() < request.count {
            return Err(GenerationFailure::Unparsable {
                reason: format!("expected {} trajectories, found {}", request.count, trajectories.len()),
            }
            .into());
        }
        trajectories.truncate(request.count);

        trajectory::save_json(&trajectories, output)?;
        info!("{} abstract trajectories written to {}", trajectories.len(), output.display());
        Ok(trajectories)
    }
}

/// Replays abstract trajectories previously saved as JSON.
///
/// Each trajectory is cut to the requested length.
#[derive(Debug, Clone)]
pub struct Replay {
    source: PathBuf,
}

impl Replay {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Replay { source: source.into() }
    }
}

impl WordGenerator for Replay {
    fn generate(&self, _model: &Path, request: GenerationRequest, output: &Path) -> Result<Vec<AbstractTrajectory>> {
        let mut trajectories = trajectory::load_abstract(&self.source)?;
        if trajectories.len() < request.count {
            return Err(Error::GenerationFailed(GenerationFailure::Unparsable {
                reason: format!(
                    "{} holds {} trajectories, {} requested",
                    self.source.display(),
                    trajectories.len(),
                    request.count
                ),
            }));
        }
        trajectories.truncate(request.count);
        for t in &mut trajectories {
            t.truncate(request.length);
        }
        if self.source != output {
            trajectory::save_json(&trajectories, output)?;
        }
        Ok(trajectories)
    }
}

/// `<output>.broken`, where the raw tool output goes.
pub fn broken_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".broken");
    PathBuf::from(name)
}

/// Parses word generator output, repairing it first if needed.
pub fn parse_output(raw: &str) -> Result<Vec<AbstractTrajectory>, GenerationFailure> {
    if let Ok(trajectories) = serde_json::from_str::<Vec<AbstractTrajectory>>(raw) {
        return Ok(trajectories);
    }
    let repaired = repair_output(raw);
    debug!("repaired word generator output:\n{}", repaired);
    match serde_json::from_str(&repaired) {
        Ok(trajectories) => {
            warn!("word generator output was malformed and has been repaired");
            Ok(trajectories)
        }
        Err(e) => Err(GenerationFailure::Unparsable { reason: e.to_string() }),
    }
}

/// Rewrites a word generator stream into well-formed JSON.
///
/// Blank lines and `[]` artifacts are dropped, a line with a `"final"` key
/// closes the current trajectory, and then [`balance`] removes dangling
/// commas, stray closers and truncated trailing fragments and closes
/// whatever is still open.
pub fn repair_output(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == "[]" || trimmed == "[]," {
            continue;
        }
        if is_final_marker(trimmed) {
            text.push_str("],\n");
            continue;
        }
        text.push_str(line);
        text.push('\n');
    }
    balance(&text)
}

/// Whether `line` carries the `"final"` key that ends a trajectory.
///
/// A `"final"` string value, such as an action named `final`, is not a marker.
fn is_final_marker(line: &str) -> bool {
    line.match_indices("\"final\"")
        .any(|(i, m)| line[i + m.len()..].trim_start().starts_with(':'))
}

/// Brackets-and-commas fixup of a JSON document outside string literals.
///
/// - a closer that does not match the innermost open bracket is dropped,
/// - a comma directly before a closer is dropped,
/// - anything after the root value closes is dropped,
/// - a value cut off inside a string or an object is cut back to the last
///   complete element,
/// - open brackets are closed at the end.
pub fn balance(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    // Output length and open brackets after the last complete element.
    let mut checkpoint: (usize, Vec<char>) = (0, Vec::new());

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '[' | '{' => {
                stack.push(c);
                out.push(c);
                if c == '[' {
                    checkpoint = (out.len(), stack.clone());
                }
            }
            ']' | '}' => {
                let open = if c == ']' { '[' } else { '{' };
                if stack.last() != Some(&open) {
                    continue;
                }
                strip_trailing_comma(&mut out);
                stack.pop();
                out.push(c);
                checkpoint = (out.len(), stack.clone());
                if stack.is_empty() {
                    break;
                }
            }
            _ => {
                if stack.is_empty() && !c.is_whitespace() {
                    // Text before the root value.
                    continue;
                }
                out.push(c);
            }
        }
    }

    if in_string || stack.last() == Some(&'{') {
        let (len, open) = checkpoint;
        out.truncate(len);
        stack = open;
    }
    strip_trailing_comma(&mut out);
    while let Some(open) = stack.pop() {
        out.push('\n');
        out.push(if open == '[' { ']' } else { '}' });
    }
    out.push('\n');
    out
}

fn strip_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    if out.ends_with(',') {
        out.pop();
    }
}
