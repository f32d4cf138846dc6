//! Deferred hooks attached to submissions.
//!
//! A [`Task`] is a pure value describing an action; it performs no I/O by
//! itself. Execution is interpreted by the scheduler loop, which supplies the
//! remote executor and the scheduler state (see `process.rs`). This keeps
//! tasks serializable: a reloaded snapshot yields equivalent tasks without
//! any captured references.
//!
//! The wire form is `KIND{arg1:arg2:...}` with nested tasks embedded
//! recursively and absent optional values written as `null`.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Always succeeds, no effect.
    Null,
    /// Sequential AND: run the first task; if it fails, short-circuit.
    Merge(Box<Task>, Box<Task>),
    /// Run a shell command on the remote side.
    System(String),
    /// Make sure a remote directory exists.
    MakeDir(String),
    /// Upload a local file to the same relative remote path.
    UploadFile(String),
    /// Cancel every job of the querying identity.
    CancelAll,
    /// Cancel the jobs tagged with this scheduler's job name.
    CancelThis,
    /// Re-enqueue an inline command submission.
    SubmitSystem {
        before: Box<Task>,
        after: Box<Task>,
        command: String,
        partition: Option<String>,
        nodes: u32,
        output: String,
    },
    /// Re-enqueue a script submission.
    SubmitBash {
        before: Box<Task>,
        after: Box<Task>,
        script: String,
        partition: Option<String>,
        nodes: i32,
        output: String,
    },
    /// Re-enqueue a parallel launch of an inline command.
    SubmitSrun {
        before: Box<Task>,
        after: Box<Task>,
        command: String,
        partition: Option<String>,
        tasks: u32,
        tasks_per_node: u32,
        output: String,
    },
    /// Re-enqueue a parallel launch of a script.
    SubmitSrunBash {
        before: Box<Task>,
        after: Box<Task>,
        script: String,
        partition: Option<String>,
        tasks: u32,
        tasks_per_node: u32,
        output: String,
    },
}

impl Default for Task {
    fn default() -> Self {
        Task::Null
    }
}

impl Task {
    pub fn is_null(&self) -> bool {
        matches!(self, Task::Null)
    }

    /// Combine two tasks into "run `a`, then `b` unless `a` failed".
    /// Null operands collapse away.
    pub fn merge(a: Task, b: Task) -> Task {
        match (a, b) {
            (Task::Null, b) => b,
            (a, Task::Null) => a,
            (a, b) => Task::Merge(Box::new(a), Box::new(b)),
        }
    }

    pub fn parse(input: &str) -> anyhow::Result<Task> {
        let (kind, values) = split_serialized(input)?;
        let task = match kind {
            "NULL" => Task::Null,
            "MERGE" => Task::Merge(
                Box::new(parse_nested(&values, 0, kind)?),
                Box::new(parse_nested(&values, 1, kind)?),
            ),
            "SYSTEM" => Task::System(req(&values, 0, kind)?.to_string()),
            "MAKE_DIR" => Task::MakeDir(req(&values, 0, kind)?.to_string()),
            "PUT_FILE" => Task::UploadFile(req(&values, 0, kind)?.to_string()),
            "CANCEL_ALL" => Task::CancelAll,
            "CANCEL_THIS" => Task::CancelThis,
            "SUBMIT_SYSTEM" => Task::SubmitSystem {
                before: Box::new(parse_nested(&values, 0, kind)?),
                after: Box::new(parse_nested(&values, 1, kind)?),
                command: req(&values, 2, kind)?.to_string(),
                partition: opt(&values, 3),
                nodes: parse_num(&values, 4, kind)?,
                output: req(&values, 5, kind)?.to_string(),
            },
            "SUBMIT_BASH" => Task::SubmitBash {
                before: Box::new(parse_nested(&values, 0, kind)?),
                after: Box::new(parse_nested(&values, 1, kind)?),
                script: req(&values, 2, kind)?.to_string(),
                partition: opt(&values, 3),
                nodes: parse_num(&values, 4, kind)?,
                output: req(&values, 5, kind)?.to_string(),
            },
            "SUBMIT_SRUN" => Task::SubmitSrun {
                before: Box::new(parse_nested(&values, 0, kind)?),
                after: Box::new(parse_nested(&values, 1, kind)?),
                command: req(&values, 2, kind)?.to_string(),
                partition: opt(&values, 3),
                tasks: parse_num(&values, 4, kind)?,
                tasks_per_node: parse_num(&values, 5, kind)?,
                output: req(&values, 6, kind)?.to_string(),
            },
            "SUBMIT_SRUN_BASH" => Task::SubmitSrunBash {
                before: Box::new(parse_nested(&values, 0, kind)?),
                after: Box::new(parse_nested(&values, 1, kind)?),
                script: req(&values, 2, kind)?.to_string(),
                partition: opt(&values, 3),
                tasks: parse_num(&values, 4, kind)?,
                tasks_per_node: parse_num(&values, 5, kind)?,
                output: req(&values, 6, kind)?.to_string(),
            },
            _ => anyhow::bail!("Unknown task kind {kind:?}"),
        };
        Ok(task)
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn p(partition: &Option<String>) -> &str {
            partition.as_deref().unwrap_or("null")
        }
        match self {
            Task::Null => write!(f, "NULL"),
            Task::Merge(a, b) => write!(f, "MERGE{{{a}:{b}}}"),
            Task::System(cmd) => write!(f, "SYSTEM{{{cmd}}}"),
            Task::MakeDir(dir) => write!(f, "MAKE_DIR{{{dir}}}"),
            Task::UploadFile(path) => write!(f, "PUT_FILE{{{path}}}"),
            Task::CancelAll => write!(f, "CANCEL_ALL"),
            Task::CancelThis => write!(f, "CANCEL_THIS"),
            Task::SubmitSystem {
                before,
                after,
                command,
                partition,
                nodes,
                output,
            } => write!(
                f,
                "SUBMIT_SYSTEM{{{before}:{after}:{command}:{}:{nodes}:{output}}}",
                p(partition)
            ),
            Task::SubmitBash {
                before,
                after,
                script,
                partition,
                nodes,
                output,
            } => write!(
                f,
                "SUBMIT_BASH{{{before}:{after}:{script}:{}:{nodes}:{output}}}",
                p(partition)
            ),
            Task::SubmitSrun {
                before,
                after,
                command,
                partition,
                tasks,
                tasks_per_node,
                output,
            } => write!(
                f,
                "SUBMIT_SRUN{{{before}:{after}:{command}:{}:{tasks}:{tasks_per_node}:{output}}}",
                p(partition)
            ),
            Task::SubmitSrunBash {
                before,
                after,
                script,
                partition,
                tasks,
                tasks_per_node,
                output,
            } => write!(
                f,
                "SUBMIT_SRUN_BASH{{{before}:{after}:{script}:{}:{tasks}:{tasks_per_node}:{output}}}",
                p(partition)
            ),
        }
    }
}

impl FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Task::parse(s)
    }
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = String::deserialize(deserializer)?;
        Task::parse(&repr).map_err(D::Error::custom)
    }
}

/// Split `KIND{v1:v2:...}` into the kind and its arguments.
/// Arguments are split on `:` only at brace depth one, so that nested tasks
/// pass through intact; a literal `null` becomes `None`.
fn split_serialized(s: &str) -> anyhow::Result<(&str, Vec<Option<&str>>)> {
    let Some(open) = s.find('{') else {
        return Ok((s, Vec::new()));
    };
    let kind = &s[..open];
    let bytes = s.as_bytes();
    let mut values = Vec::new();
    let mut start = open + 1;
    let mut depth = 1usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    values.push(normalize(&s[start..i]));
                    break;
                }
            }
            b':' if depth == 1 => {
                values.push(normalize(&s[start..i]));
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if depth != 0 {
        anyhow::bail!("Unbalanced braces in serialized task {s:?}");
    }
    Ok((kind, values))
}

fn normalize(value: &str) -> Option<&str> {
    if value == "null" { None } else { Some(value) }
}

fn req<'a>(values: &[Option<&'a str>], idx: usize, kind: &str) -> anyhow::Result<&'a str> {
    values
        .get(idx)
        .copied()
        .flatten()
        .ok_or_else(|| anyhow::anyhow!("Task {kind} is missing argument {idx}"))
}

fn opt(values: &[Option<&str>], idx: usize) -> Option<String> {
    values
        .get(idx)
        .copied()
        .flatten()
        .map(|v| v.to_string())
}

fn parse_nested(values: &[Option<&str>], idx: usize, kind: &str) -> anyhow::Result<Task> {
    match values.get(idx).copied().flatten() {
        Some(repr) => Task::parse(repr),
        None if values.len() > idx => Ok(Task::Null),
        None => Err(anyhow::anyhow!("Task {kind} is missing argument {idx}")),
    }
}

fn parse_num<T: FromStr>(values: &[Option<&str>], idx: usize, kind: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = req(values, idx, kind)?;
    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid number {raw:?} in task {kind}: {e}"))
}
