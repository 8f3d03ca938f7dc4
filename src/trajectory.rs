//! Abstract and concrete trajectories, and their JSON form.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::types::Assignment;

/// One step of an abstract trajectory, as emitted by the word generator.
///
/// A step without an `action` marks the end of the trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Time elapsed since the previous step. Accepts plain numbers and
    /// exact rationals written as `"p/q"`.
    #[serde(default, deserialize_with = "deserialize_delay")]
    pub delay: f64,
    /// Clock valuation reported by the word generator; kept for audit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<serde_json::Value>,
}

impl AbstractStep {
    pub fn new(action: impl Into<String>, delay: f64) -> Self {
        AbstractStep {
            action: Some(action.into()),
            delay,
            vars: None,
        }
    }

    /// A terminal marker step.
    pub fn end() -> Self {
        AbstractStep {
            action: None,
            delay: 0.0,
            vars: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.action.is_none()
    }
}

pub type AbstractTrajectory = Vec<AbstractStep>;

/// One step of a concrete trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcreteStep {
    pub delay: f64,
    pub vars: Assignment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Text of the guard the values were sampled from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    /// Set on postpone and release steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_label: Option<String>,
}

impl ConcreteStep {
    /// The initial step: no delay, no action.
    pub fn initial(vars: Assignment, constraint: Option<String>) -> Self {
        ConcreteStep {
            delay: 0.0,
            vars,
            action: None,
            constraint,
            post_label: None,
        }
    }
}

pub type ConcreteTrajectory = Vec<ConcreteStep>;

/// Checks that every delay up to the terminal marker is finite and non-negative.
pub fn validate(trajectories: &[AbstractTrajectory]) -> Result<()> {
    for (i, trajectory) in trajectories.iter().enumerate() {
        for (j, step) in trajectory.iter().enumerate() {
            if step.is_terminal() {
                break;
            }
            if !step.delay.is_finite() || step.delay < 0.0 {
                return Err(Error::MalformedTrajectory {
                    trajectory: i,
                    step: j,
                    reason: format!("invalid delay {}", step.delay),
                });
            }
            if step.action.as_deref() == Some("") {
                return Err(Error::MalformedTrajectory {
                    trajectory: i,
                    step: j,
                    reason: "empty action label".to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Writes `value` to `path` as pretty-printed JSON.
pub fn save_json<T: Serialize + ?Sized, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Reads JSON from `path`.
pub fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    Ok(serde_json::from_reader(reader)?)
}

/// Loads and validates abstract trajectories, e.g. for replay.
pub fn load_abstract<P: AsRef<Path>>(path: P) -> Result<Vec<AbstractTrajectory>> {
    let trajectories: Vec<AbstractTrajectory> = load_json(path)?;
    validate(&trajectories)?;
    Ok(trajectories)
}

/// Parses a rational `p/q` or a decimal number.
pub fn parse_rational(s: &str) -> Option<f64> {
    let s = s.trim();
    match s.split_once('/') {
        Some((p, q)) => {
            let p: f64 = p.trim().parse().ok()?;
            let q: f64 = q.trim().parse().ok()?;
            if q == 0.0 {
                None
            } else {
                Some(p / q)
            }
        }
        None => s.parse().ok(),
    }
}

fn deserialize_delay<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Delay {
        Number(f64),
        Text(String),
    }

    match Delay::deserialize(deserializer)? {
        Delay::Number(x) => Ok(x),
        Delay::Text(s) => parse_rational(&s).ok_or_else(|| D::Error::custom(format!("invalid delay `{}`", s))),
    }
}
