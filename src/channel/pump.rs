//! Driving a running remote command: password injection and output capture
//!
//! Written against [`CommandStreams`] rather than a concrete SSH channel, so
//! the same loop runs over libssh2 and over an in-memory channel.

use super::escalate::{PrivilegedCommand, Redactor};
use super::lines::LineBuffer;
use pulsar_core_interface::{
    CommandRequest, ExecControl, OutputLine, OutputStream, Result, TargetError,
};
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Prefix of the stderr line that reports the remote process group
pub(crate) const GROUP_MARKER: &str = "__pulsar_pgid__=";

/// Prefix `command` with a line reporting the remote shell's process group
///
/// sshd starts the command under a login shell that leads its own session, so
/// `$$` is also the process group every process of the command inherits.
pub(crate) fn announce_group(command: &str) -> String {
    format!("printf '{}%s\\n' \"$$\" >&2; {}", GROUP_MARKER, command)
}

/// Command that terminates a process group reported by [`announce_group`]
///
/// `sudo` relays `TERM` to the command it runs; it cannot relay `KILL`.
pub(crate) fn kill_group_command(group: u32) -> String {
    format!("kill -TERM -- -{}", group)
}

fn parse_group(line: &str) -> Option<u32> {
    line.strip_prefix(GROUP_MARKER)?
        .trim()
        .parse()
        .ok()
        .filter(|group| *group > 1)
}

/// The two output streams of a running command
///
/// Reads must not block: `Ok(0)` or `WouldBlock` both mean "nothing yet".
pub(crate) trait CommandStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// True once the remote side has closed its output
    fn at_eof(&self) -> bool;
}

/// Write the escalation password to the command's stdin
///
/// Called once per command, before any output is read.
pub(crate) fn send_escalation<W: Write>(
    stdin: &mut W,
    privileged: &PrivilegedCommand,
) -> io::Result<()> {
    stdin.write_all(privileged.stdin_payload())?;
    stdin.flush()
}

/// What [`pump_output`] collected
pub(crate) struct Pumped {
    /// Captured stdout and stderr, or why reading stopped early
    pub result: Result<(Vec<String>, Vec<String>)>,

    /// Remote process group, if the command reported one
    pub group: Option<u32>,
}

/// Lines captured from one stream
struct Capture {
    stream: OutputStream,
    buffer: LineBuffer,
    lines: Vec<String>,
    /// Look for the process group report on this stream
    watch_group: bool,
    group: Option<u32>,
}

impl Capture {
    fn new(stream: OutputStream) -> Self {
        Self {
            stream,
            buffer: LineBuffer::default(),
            lines: Vec::new(),
            watch_group: stream == OutputStream::Stderr,
            group: None,
        }
    }

    fn feed(&mut self, bytes: &[u8], redactor: &Redactor, control: &ExecControl) {
        for line in self.buffer.push(bytes) {
            self.record(line, redactor, control);
        }
    }

    fn record(&mut self, line: String, redactor: &Redactor, control: &ExecControl) {
        if self.watch_group && self.group.is_none() {
            if let Some(group) = parse_group(&line) {
                self.group = Some(group);
                return;
            }
        }

        let text = redactor.redact(&line).into_owned();
        control.emit(OutputLine {
            stream: self.stream,
            text: text.clone(),
        });
        self.lines.push(text);
    }

    fn finish(&mut self, redactor: &Redactor, control: &ExecControl) -> Vec<String> {
        if let Some(line) = self.buffer.finish() {
            self.record(line, redactor, control);
        }
        std::mem::take(&mut self.lines)
    }
}

/// Outcome of one non-blocking read
enum Chunk {
    Data(usize),
    Idle,
}

fn chunk(read: io::Result<usize>) -> io::Result<Chunk> {
    match read {
        Ok(0) => Ok(Chunk::Idle),
        Ok(n) => Ok(Chunk::Data(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Chunk::Idle),
        Err(e) => Err(e),
    }
}

fn lost_connection(
    e: io::Error,
    stdout: &mut Capture,
    stderr: &mut Capture,
    redactor: &Redactor,
    control: &ExecControl,
) -> TargetError {
    TargetError::execution(
        format!("lost connection while reading output: {}", e),
        stdout.finish(redactor, control),
        stderr.finish(redactor, control),
    )
}

/// Drain stdout and stderr until EOF, the request's timeout or cancellation
///
/// Every captured line passes through `redactor` before it is stored or
/// streamed to `control`.
pub(crate) fn pump_output<C: CommandStreams>(
    channel: &mut C,
    request: &CommandRequest,
    control: &ExecControl,
    redactor: &Redactor,
    poll_interval: Duration,
) -> Pumped {
    let started = Instant::now();
    let mut stdout = Capture::new(OutputStream::Stdout);
    let mut stderr = Capture::new(OutputStream::Stderr);
    let mut buf = [0u8; 8192];

    let result = loop {
        let mut progressed = false;

        match chunk(channel.read_stdout(&mut buf)) {
            Ok(Chunk::Data(n)) => {
                stdout.feed(&buf[..n], redactor, control);
                progressed = true;
            }
            Ok(Chunk::Idle) => {}
            Err(e) => break Err(lost_connection(e, &mut stdout, &mut stderr, redactor, control)),
        }

        match chunk(channel.read_stderr(&mut buf)) {
            Ok(Chunk::Data(n)) => {
                stderr.feed(&buf[..n], redactor, control);
                progressed = true;
            }
            Ok(Chunk::Idle) => {}
            Err(e) => break Err(lost_connection(e, &mut stdout, &mut stderr, redactor, control)),
        }

        if !progressed && channel.at_eof() {
            break Ok((
                stdout.finish(redactor, control),
                stderr.finish(redactor, control),
            ));
        }

        if control.is_cancelled() {
            break Err(TargetError::Cancelled);
        }

        if let Some(limit) = request.timeout {
            if started.elapsed() >= limit {
                break Err(TargetError::Timeout {
                    after: limit,
                    stdout: stdout.finish(redactor, control),
                    stderr: stderr.finish(redactor, control),
                });
            }
        }

        if !progressed {
            std::thread::sleep(poll_interval);
        }
    };

    Pumped {
        result,
        group: stderr.group,
    }
}
