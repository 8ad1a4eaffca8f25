//! Process-backed collaborators: the OS command protocol client and the
//! AWK script runner.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use hwsight_engine::psl;
use hwsight_engine::table::{NEW_LINE, TABLE_SEP};
use hwsight_engine::{
    CancelSignal, HostContext, ProtocolClient, ProtocolError, ScriptRunner, Source, SourceKind,
    SourceTable,
};

/// Runs `osCommand` sources through the system shell.
///
/// Other protocol sources are rejected as unsupported. A source may carry
/// its own `timeout` in seconds, and the line filters `beginAtLineNumber`,
/// `endAtLineNumber`, `keep`, `exclude`, `separators` and `selectColumns`.
#[derive(Debug, Clone)]
pub struct OsCommandClient {
    timeout: Duration,
}

impl OsCommandClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProtocolClient for OsCommandClient {
    async fn execute(
        &self,
        source: &Source,
        host: &HostContext,
        cancel: &CancelSignal,
    ) -> Result<SourceTable, ProtocolError> {
        let SourceKind::OsCommand(query) = &source.kind else {
            return Err(ProtocolError::Unsupported(source.kind.type_name().to_string()));
        };
        let command_line = query
            .get_str("commandLine")
            .filter(|line| !line.trim().is_empty())
            .ok_or_else(|| ProtocolError::failed("osCommand source has no commandLine"))?;
        let timeout = query
            .get_u64("timeout")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        tracing::debug!(
            host = %host.hostname,
            source = %source.key(),
            command = %command_line,
            "Running OS command"
        );

        let child = shell(command_line)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| ProtocolError::failed(format!("failed to start command: {e}")))?;
        let output = wait(child, timeout, cancel, ExitPolicy::OutputWins).await?;

        let filter = LineFilter {
            begin: query.get_u64("beginAtLineNumber"),
            end: query.get_u64("endAtLineNumber"),
            keep: query.get_str("keep"),
            exclude: query.get_str("exclude"),
            separators: query.get_str("separators"),
            select_columns: query.get_str("selectColumns"),
        };
        let text = filter.apply(&output)?;
        Ok(SourceTable::from_csv(text.clone()).with_raw_data(text))
    }
}

/// Runs AWK scripts with the system `awk`.
#[derive(Debug, Clone)]
pub struct ProcessAwkRunner {
    program: String,
    timeout: Duration,
}

impl ProcessAwkRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "awk".to_string(),
            timeout,
        }
    }

    /// Use another AWK implementation, such as `gawk`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl ScriptRunner for ProcessAwkRunner {
    async fn run_awk(&self, script: &str, input: &str) -> Result<String, ProtocolError> {
        let mut child = Command::new(&self.program)
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProtocolError::failed(format!("failed to start {}: {e}", self.program)))?;

        // Written from its own task so a script that prints before reading
        // everything cannot deadlock on a full pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let input = input.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "AWK closed its input early");
                }
            });
        }

        wait(child, self.timeout, &CancelSignal::never(), ExitPolicy::Strict).await
    }
}

fn shell(command_line: &str) -> Command {
    #[cfg(windows)]
    let mut command = {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(command_line);
        command
    };
    #[cfg(not(windows))]
    let mut command = {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        command
    };
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

/// How a non-zero exit status is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitPolicy {
    /// Fail only when nothing was printed on stdout. Many hardware tools
    /// exit non-zero while still reporting.
    OutputWins,
    /// Any non-zero exit fails, whatever was printed.
    Strict,
}

/// Collect the child's standard output.
///
/// The child is killed when the timeout elapses or the job is cancelled.
async fn wait(
    child: Child,
    timeout: Duration,
    cancel: &CancelSignal,
    policy: ExitPolicy,
) -> Result<String, ProtocolError> {
    let mut cancel = cancel.clone();
    let output = tokio::select! {
        output = tokio::time::timeout(timeout, child.wait_with_output()) => match output {
            Ok(output) => output.map_err(|e| ProtocolError::failed(e.to_string()))?,
            Err(_) => return Err(ProtocolError::Timeout(timeout)),
        },
        _ = cancel.cancelled() => return Err(ProtocolError::Cancelled),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let failed = match policy {
        ExitPolicy::OutputWins => !output.status.success() && stdout.trim().is_empty(),
        ExitPolicy::Strict => !output.status.success(),
    };
    if failed {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProtocolError::failed(format!(
            "command exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(stdout.replace("\r\n", NEW_LINE))
}

/// Line selection applied to command output.
#[derive(Debug, Default)]
struct LineFilter<'a> {
    /// 1-based, inclusive.
    begin: Option<u64>,
    /// 1-based, inclusive.
    end: Option<u64>,
    keep: Option<&'a str>,
    exclude: Option<&'a str>,
    separators: Option<&'a str>,
    select_columns: Option<&'a str>,
}

impl LineFilter<'_> {
    fn compile(name: &str, pattern: Option<&str>) -> Result<Option<Regex>, ProtocolError> {
        pattern
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(&psl::psl_to_regex(p))
                    .map_err(|e| ProtocolError::failed(format!("invalid {name} pattern '{p}': {e}")))
            })
            .transpose()
    }

    fn apply(&self, output: &str) -> Result<String, ProtocolError> {
        let keep = Self::compile("keep", self.keep)?;
        let exclude = Self::compile("exclude", self.exclude)?;
        let begin = self.begin.unwrap_or(1).max(1);
        let end = self.end.unwrap_or(u64::MAX);
        let separators = self.separators.filter(|s| !s.is_empty());

        let lines: Vec<String> = output
            .lines()
            .zip(1u64..)
            .filter(|(_, number)| (begin..=end).contains(number))
            .map(|(line, _)| line)
            .filter(|line| keep.as_ref().is_none_or(|r| r.is_match(line)))
            .filter(|line| !exclude.as_ref().is_some_and(|r| r.is_match(line)))
            .filter_map(|line| match (separators, self.select_columns) {
                (None, None) => Some(line.to_string()),
                (separators, columns) => {
                    let selected = psl::select_columns(
                        line,
                        columns.unwrap_or("1-"),
                        separators.unwrap_or(TABLE_SEP),
                        Some(TABLE_SEP),
                    );
                    (!selected.is_empty()).then(|| format!("{selected}{TABLE_SEP}"))
                }
            })
            .collect();
        Ok(lines.join(NEW_LINE))
    }
}
