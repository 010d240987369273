//! Uniform execution of external processes.
//!
//! Two modes: [run] captures full output under a deadline, [spawn_streaming]
//! forwards output line by line as it is produced. Both enforce the
//! deadline by sending SIGTERM, waiting a short grace period, then
//! SIGKILL.

use std::{borrow::Cow, process::Stdio, time::Duration};

use anyhow::Context;
use deploypilot_client::entities::ShellOutput;
use nix::{
  sys::signal::{Signal, kill},
  unistd::Pid,
};
use tokio::{
  io::{AsyncBufReadExt, AsyncReadExt, BufReader},
  process::{Child, Command},
  sync::mpsc,
};

/// Hard cap on captured output per stream.
pub const MAX_CAPTURED_BYTES: usize = 10 * 1024 * 1024;
pub const TRUNCATION_MARKER: &str =
  "... [output truncated at 10 MiB]";

/// Grace between SIGTERM and SIGKILL on deadline.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Wraps an untrusted value in single quotes for interpolation
/// into an `sh -c` command line. Internal `'` becomes `'\''`.
pub fn quote(value: &str) -> String {
  let escaped = shell_escape::unix::escape(Cow::Borrowed(value));
  if escaped.starts_with('\'') {
    escaped.into_owned()
  } else {
    // Values without special characters come back bare.
    // Interpolated values are always quoted.
    format!("'{escaped}'")
  }
}

/// Runs `sh -c <command>`, capturing stdout and stderr in full.
/// Never returns Err: launch failures, nonzero exits and deadline
/// kills all fold into the returned [ShellOutput].
pub async fn run(
  command: &str,
  timeout: Duration,
) -> ShellOutput {
  let child = Command::new("sh")
    .arg("-c")
    .arg(command)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .spawn();
  let mut child = match child {
    Ok(child) => child,
    Err(e) => {
      return ShellOutput::error(format!(
        "failed to launch process: {e}"
      ));
    }
  };

  let stdout_task = child
    .stdout
    .take()
    .map(|out| tokio::spawn(read_capped(out)));
  let stderr_task = child
    .stderr
    .take()
    .map(|err| tokio::spawn(read_capped(err)));

  let (status, timed_out) =
    match tokio::time::timeout(timeout, child.wait()).await {
      Ok(Ok(status)) => (Some(status), false),
      Ok(Err(e)) => {
        return ShellOutput::error(format!(
          "failed waiting on process: {e}"
        ));
      }
      Err(_) => (terminate(&mut child).await, true),
    };

  let stdout = collect_stream(stdout_task).await;
  let stderr = collect_stream(stderr_task).await;

  let error = if timed_out {
    Some(format!(
      "process killed after exceeding the {}s deadline",
      timeout.as_secs()
    ))
  } else {
    match status {
      Some(status) if status.success() => None,
      Some(status) => Some(exit_cause(status)),
      None => Some(String::from("process exited without status")),
    }
  };

  ShellOutput {
    success: error.is_none(),
    stdout,
    stderr,
    error,
  }
}

/// How a streamed process finished.
#[derive(Debug, Clone, Copy)]
pub struct StreamedExit {
  pub success: bool,
  pub code: Option<i32>,
  pub timed_out: bool,
}

/// Spawns `program` with `args` (argv style, no shell) and invokes
/// `on_line` for every line of merged stdout/stderr output. A
/// residual unterminated tail is flushed as a final line. The
/// deadline uses the same term-then-kill semantics as [run].
pub async fn spawn_streaming(
  program: &str,
  args: &[&str],
  timeout: Duration,
  mut on_line: impl FnMut(String),
) -> anyhow::Result<StreamedExit> {
  let mut child = Command::new(program)
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true)
    .spawn()
    .with_context(|| format!("failed to launch {program}"))?;

  let (tx, mut rx) = mpsc::channel::<String>(256);
  if let Some(stdout) = child.stdout.take() {
    tokio::spawn(forward_lines(stdout, tx.clone()));
  }
  if let Some(stderr) = child.stderr.take() {
    tokio::spawn(forward_lines(stderr, tx.clone()));
  }
  drop(tx);

  let deadline = tokio::time::sleep(timeout);
  tokio::pin!(deadline);
  let mut timed_out = false;

  loop {
    tokio::select! {
      line = rx.recv() => match line {
        Some(line) => on_line(line),
        // Both pipes closed: the process is done (or killed).
        None => break,
      },
      _ = &mut deadline, if !timed_out => {
        timed_out = true;
        terminate(&mut child).await;
      }
    }
  }

  let status = child.wait().await.ok();
  Ok(StreamedExit {
    success: !timed_out
      && status.map(|s| s.success()).unwrap_or(false),
    code: status.and_then(|s| s.code()),
    timed_out,
  })
}

/// SIGTERM, grace, SIGKILL. Returns the exit status if the process
/// could still be reaped.
async fn terminate(child: &mut Child) -> Option<std::process::ExitStatus> {
  if let Some(pid) = child.id() {
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    if let Ok(Ok(status)) =
      tokio::time::timeout(KILL_GRACE, child.wait()).await
    {
      return Some(status);
    }
  }
  let _ = child.kill().await;
  child.wait().await.ok()
}

fn exit_cause(status: std::process::ExitStatus) -> String {
  match status.code() {
    Some(code) => format!("process exited with code {code}"),
    None => String::from("process terminated by signal"),
  }
}

/// Reads a stream to EOF, keeping at most [MAX_CAPTURED_BYTES].
/// Overflow drains the stream but drops the tail.
async fn read_capped(
  mut reader: impl tokio::io::AsyncRead + Unpin,
) -> (Vec<u8>, bool) {
  let mut captured = Vec::new();
  let mut truncated = false;
  let mut buf = [0u8; 8192];
  loop {
    match reader.read(&mut buf).await {
      Ok(0) | Err(_) => break,
      Ok(n) => {
        if captured.len() < MAX_CAPTURED_BYTES {
          let take = n.min(MAX_CAPTURED_BYTES - captured.len());
          captured.extend_from_slice(&buf[..take]);
          if take < n {
            truncated = true;
          }
        } else {
          truncated = true;
        }
      }
    }
  }
  (captured, truncated)
}

async fn collect_stream(
  task: Option<tokio::task::JoinHandle<(Vec<u8>, bool)>>,
) -> String {
  let Some(task) = task else {
    return String::new();
  };
  let (bytes, truncated) = task.await.unwrap_or_default();
  let mut out =
    String::from_utf8_lossy(&bytes).trim_end().to_string();
  if truncated {
    if !out.is_empty() {
      out.push('\n');
    }
    out.push_str(TRUNCATION_MARKER);
  }
  out
}

async fn forward_lines(
  reader: impl tokio::io::AsyncRead + Unpin,
  tx: mpsc::Sender<String>,
) {
  let mut lines = BufReader::new(reader).lines();
  while let Ok(Some(line)) = lines.next_line().await {
    if tx.send(line).await.is_err() {
      return;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quote_wraps_plain_values() {
    assert_eq!(quote("hello"), "'hello'");
    assert_eq!(quote("my-app.v2"), "'my-app.v2'");
  }

  #[test]
  fn quote_escapes_single_quotes() {
    assert_eq!(quote("it's"), r#"'it'\''s'"#);
    assert_eq!(quote("a'b'c"), r#"'a'\''b'\''c'"#);
  }

  #[test]
  fn quote_neutralizes_injection() {
    let quoted = quote("x; rm -rf /");
    assert!(quoted.starts_with('\''));
    assert!(quoted.ends_with('\''));
  }

  #[tokio::test]
  async fn run_captures_stdout_and_trims() {
    let output =
      run("printf 'hello\\n\\n'", Duration::from_secs(5)).await;
    assert!(output.success);
    assert_eq!(output.stdout, "hello");
    assert!(output.error.is_none());
  }

  #[tokio::test]
  async fn run_reports_exit_cause() {
    let output =
      run("echo oops >&2; exit 3", Duration::from_secs(5)).await;
    assert!(!output.success);
    assert_eq!(output.stderr, "oops");
    assert_eq!(
      output.error.as_deref(),
      Some("process exited with code 3")
    );
  }

  #[tokio::test]
  async fn run_kills_on_deadline() {
    let start = std::time::Instant::now();
    let output =
      run("sleep 30", Duration::from_millis(200)).await;
    assert!(!output.success);
    assert!(output.error.unwrap().contains("deadline"));
    assert!(start.elapsed() < Duration::from_secs(10));
  }

  #[tokio::test]
  async fn streaming_flushes_residual_tail() {
    let mut lines = Vec::new();
    let exit = spawn_streaming(
      "sh",
      &["-c", "printf 'one\\ntwo\\ntail-without-newline'"],
      Duration::from_secs(5),
      |line| lines.push(line),
    )
    .await
    .unwrap();
    assert!(exit.success);
    assert_eq!(lines, ["one", "two", "tail-without-newline"]);
  }

  #[tokio::test]
  async fn streaming_merges_stderr() {
    let mut lines = Vec::new();
    let exit = spawn_streaming(
      "sh",
      &["-c", "echo out; echo err >&2"],
      Duration::from_secs(5),
      |line| lines.push(line),
    )
    .await
    .unwrap();
    assert!(exit.success);
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&String::from("out")));
    assert!(lines.contains(&String::from("err")));
  }

  #[tokio::test]
  async fn streaming_deadline_kills() {
    let exit = spawn_streaming(
      "sleep",
      &["30"],
      Duration::from_millis(200),
      |_| {},
    )
    .await
    .unwrap();
    assert!(!exit.success);
    assert!(exit.timed_out);
  }
}
