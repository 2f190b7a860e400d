use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::shell::{CommandOutput, PrivilegedShell, Session, ShellError};

static SHARED_SHELL: OnceLock<SuShell> = OnceLock::new();

/// Privileged shell backed by one long-lived `su` process.
///
/// Every command is written to the shell's stdin followed by an end marker echoed on
/// both stdout and stderr, so a single process serves any number of commands without
/// re-prompting for the root grant.
pub struct SuShell {
    program: String,
    timeout: Option<Duration>,
    require_root: bool,
    next_id: AtomicU64,
    live: Mutex<Option<Arc<SuSession>>>,
}

struct SuSession {
    id: u64,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Receiver<String>,
    stderr: Receiver<String>,
    sequence: AtomicU64,
    alive: AtomicBool,
}

impl SuShell {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
            require_root: true,
            next_id: AtomicU64::new(0),
            live: Mutex::new(None),
        }
    }

    /// Process-wide instance. The first caller's settings win.
    pub fn shared(program: &str, timeout: Option<Duration>) -> &'static SuShell {
        SHARED_SHELL.get_or_init(|| SuShell::new(program, timeout))
    }

    #[cfg(test)]
    pub(crate) fn without_root_check(program: &str, timeout: Option<Duration>) -> Self {
        Self {
            require_root: false,
            ..Self::new(program, timeout)
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn live_session(&self, session: &Session) -> Result<Arc<SuSession>, ShellError> {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        match live.as_ref() {
            Some(current) if current.id == session.id() && current.is_alive() => {
                Ok(Arc::clone(current))
            }
            _ => Err(ShellError::SessionClosed { id: session.id() }),
        }
    }

    fn discard(&self, id: u64) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.as_ref().is_some_and(|current| current.id == id) {
            if let Some(session) = live.take() {
                session.terminate();
            }
        }
    }

    fn verify_root(&self, session: &SuSession) -> Result<(), ShellError> {
        let output = session.exchange("id -u", self.timeout).map_err(|err| match err {
            ShellError::SessionClosed { .. } => ShellError::PrivilegeUnavailable {
                reason: format!(
                    "'{}' exited before granting a shell (denied or not rooted)",
                    self.program
                ),
            },
            ShellError::Timeout { .. } => ShellError::PrivilegeUnavailable {
                reason: "timed out waiting for the root grant".to_string(),
            },
            other => other,
        })?;

        let uid = output.stdout.trim();
        if self.require_root && uid != "0" {
            return Err(ShellError::PrivilegeUnavailable {
                reason: format!("shell is not running as root (uid={uid})"),
            });
        }
        Ok(())
    }
}

impl PrivilegedShell for SuShell {
    fn acquire(&self) -> Result<Session, ShellError> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = live.as_ref() {
            if current.is_alive() {
                return Ok(Session::new(current.id));
            }
            debug!(session = current.id, "discarding dead privileged session");
            if let Some(dead) = live.take() {
                dead.terminate();
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = SuSession::spawn(&self.program, id)?;
        if let Err(err) = self.verify_root(&session) {
            session.terminate();
            return Err(err);
        }

        info!(session = id, program = %self.program, "privileged session acquired");
        *live = Some(Arc::new(session));
        Ok(Session::new(id))
    }

    fn run(&self, session: &Session, command: &str) -> Result<CommandOutput, ShellError> {
        let live = self.live_session(session)?;
        debug!(session = session.id(), command, "running privileged command");
        let result = live.exchange(command, self.timeout);
        if let Err(err) = &result {
            if matches!(
                err,
                ShellError::Timeout { .. } | ShellError::SessionClosed { .. }
            ) {
                warn!(session = session.id(), error = %err, "dropping privileged session");
                self.discard(session.id());
            }
        }
        result
    }
}

impl SuSession {
    fn spawn(program: &str, id: u64) -> Result<Self, ShellError> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                    ShellError::PrivilegeUnavailable {
                        reason: format!("cannot start '{program}': {err}"),
                    }
                }
                _ => ShellError::Io(err),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("su stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("su stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("su stderr was not captured"))?;

        Ok(Self {
            id,
            stdout: spawn_line_reader(stdout, format!("su-{id}-stdout"))?,
            stderr: spawn_line_reader(stderr, format!("su-{id}-stderr"))?,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            sequence: AtomicU64::new(0),
            alive: AtomicBool::new(true),
        })
    }

    fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(None) => true,
            _ => {
                self.alive.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn exchange(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ShellError> {
        // Holding stdin for the whole exchange keeps commands from interleaving.
        let mut stdin = self.stdin.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let marker = format!("__APKROOT_END_{}_{}__", self.id, seq);
        let script = format!(
            "( {command}\n) </dev/null\necho \"{marker}:$?\"\necho \"{marker}\" >&2\n"
        );

        if let Err(err) = stdin
            .write_all(script.as_bytes())
            .and_then(|_| stdin.flush())
        {
            debug!(session = self.id, error = %err, "privileged shell stdin closed");
            self.alive.store(false, Ordering::SeqCst);
            return Err(ShellError::SessionClosed { id: self.id });
        }

        let deadline = timeout.map(|after| (Instant::now() + after, after));
        let mut stdout_lines = Vec::new();
        let exit_code = loop {
            let line = self.recv_line(&self.stdout, deadline, command)?;
            if let Some((before, rest)) = line.split_once(&marker) {
                if !before.is_empty() {
                    stdout_lines.push(before.to_string());
                }
                break rest.trim_start_matches(':').trim().parse::<i32>().unwrap_or(-1);
            }
            stdout_lines.push(line);
        };

        let mut stderr_lines = Vec::new();
        loop {
            let line = self.recv_line(&self.stderr, deadline, command)?;
            if let Some((before, _)) = line.split_once(&marker) {
                if !before.is_empty() {
                    stderr_lines.push(before.to_string());
                }
                break;
            }
            stderr_lines.push(line);
        }

        Ok(CommandOutput {
            exit_code,
            stdout: stdout_lines.join("\n"),
            stderr: stderr_lines.join("\n"),
        })
    }

    fn recv_line(
        &self,
        lines: &Receiver<String>,
        deadline: Option<(Instant, Duration)>,
        command: &str,
    ) -> Result<String, ShellError> {
        let received = match deadline {
            Some((at, after)) => lines.recv_deadline(at).map_err(|err| match err {
                RecvTimeoutError::Timeout => ShellError::Timeout {
                    command: command.to_string(),
                    after,
                },
                RecvTimeoutError::Disconnected => ShellError::SessionClosed { id: self.id },
            }),
            None => lines
                .recv()
                .map_err(|_| ShellError::SessionClosed { id: self.id }),
        };
        if received.is_err() {
            self.alive.store(false, Ordering::SeqCst);
        }
        received
    }

    fn terminate(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(None) = child.try_wait() {
            // A setuid su may refuse the signal; never block on wait here.
            let _ = child.kill();
            let _ = child.try_wait();
        }
    }
}

impl Drop for SuSession {
    fn drop(&mut self) {
        if let Ok(mut stdin) = self.stdin.lock() {
            let _ = stdin.write_all(b"exit\n");
            let _ = stdin.flush();
        }
        self.terminate();
    }
}

fn spawn_line_reader<R>(reader: R, name: String) -> io::Result<Receiver<String>>
where
    R: Read + Send + 'static,
{
    let (sender, receiver) = crossbeam_channel::unbounded();
    thread::Builder::new().name(name).spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })?;
    Ok(receiver)
}
