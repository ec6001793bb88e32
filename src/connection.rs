//! Target host connections
//!
//! Every command is rendered to a single POSIX shell script (working
//! directory, privilege switch, body) and run either locally through
//! `sh -c` or remotely through `ssh`. A dry-run connection only logs.

use declarative::{CommandOutput, Connection, ConnectionError, RemoteCommand};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::SshConfig;

/// Exit status ssh reserves for its own failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Quote `s` for a POSIX shell
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:@%+=,".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Render a command into the script the host's shell runs
pub fn render(command: &RemoteCommand) -> String {
    let mut body = command.command.clone();
    if let Some(dir) = &command.cwd {
        body = format!("cd {} && {}", quote(dir), body);
    }

    match (&command.as_user, command.sudo) {
        (Some(user), _) => format!("sudo -H -u {} sh -c {}", quote(user), quote(&body)),
        (None, true) => format!("sudo sh -c {}", quote(&body)),
        (None, false) => body,
    }
}

/// Run commands on this machine
#[derive(Debug, Clone)]
pub struct LocalConnection {
    host: String,
}

impl LocalConnection {
    pub fn new() -> Self {
        Self {
            host: "localhost".to_string(),
        }
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for LocalConnection {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError> {
        let script = render(command);
        log::debug!("[local] {script}");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&script);
        let output = run_with_timeout(cmd, command.timeout)?;
        log_output(command, &output);
        Ok(output)
    }
}

/// Run commands on a remote host over ssh
#[derive(Debug, Clone)]
pub struct SshConnection {
    host: String,
    config: SshConfig,
}

impl SshConnection {
    pub fn new(host: impl Into<String>, config: SshConfig) -> Self {
        Self {
            host: host.into(),
            config,
        }
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes"]);
        if let Some(port) = self.config.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(crate::paths::expand(identity));
        }
        for option in &self.config.options {
            cmd.arg("-o").arg(option);
        }
        cmd.arg(&self.host).arg("--").arg(script);
        cmd
    }
}

impl Connection for SshConnection {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError> {
        let script = render(command);
        log::debug!("[{}] {}", self.host, script);

        let output = run_with_timeout(self.command(&script), command.timeout)?;
        if output.exit_code == SSH_TRANSPORT_FAILURE {
            return Err(ConnectionError::Lost(format!(
                "ssh to {} failed: {}",
                self.host,
                output.stderr.trim()
            )));
        }
        log_output(command, &output);
        Ok(output)
    }
}

/// Log commands instead of running them; every command succeeds
#[derive(Debug, Clone)]
pub struct DryRunConnection {
    host: String,
}

impl DryRunConnection {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Connection for DryRunConnection {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, ConnectionError> {
        let script = render(command);
        log::info!("[dry-run {}] {}", self.host, script);
        Ok(CommandOutput::ok(format!("(dry run) {script}")))
    }
}

/// Local connection for `localhost`-style hosts, ssh otherwise
pub fn connect(host: &str, ssh: &SshConfig) -> Arc<dyn Connection> {
    match host {
        "localhost" | "127.0.0.1" | "local" => Arc::new(LocalConnection::new()),
        _ => Arc::new(SshConnection::new(host, ssh.clone())),
    }
}

fn run_with_timeout(
    mut cmd: Command,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ConnectionError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| ConnectionError::Spawn(e.to_string()))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match timeout {
        Some(limit) => wait_until(&mut child, Instant::now() + limit).ok_or_else(|| {
            let _ = child.kill();
            let _ = child.wait();
            ConnectionError::TimedOut(limit)
        })?,
        None => child
            .wait()
            .map_err(|e| ConnectionError::Lost(e.to_string()))?,
    };

    Ok(CommandOutput {
        // Killed by a signal: report like a shell would
        exit_code: status.code().unwrap_or(-1),
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn wait_until(child: &mut Child, deadline: Instant) -> Option<std::process::ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() >= deadline => return None,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                log::warn!("Failed to poll child process: {e}");
                return None;
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn log_output(command: &RemoteCommand, output: &CommandOutput) {
    if command.suppress_output {
        return;
    }
    let combined = output.combined();
    if !combined.is_empty() {
        log::trace!("exit {}:\n{}", output.exit_code, combined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("/srv/app"), "/srv/app");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_render_plain() {
        let cmd = RemoteCommand::new("ls -la").in_dir("/srv/app");
        assert_eq!(render(&cmd), "cd /srv/app && ls -la");
    }

    #[test]
    fn test_render_as_user() {
        let cmd = RemoteCommand::new("git pull").in_dir("/srv/app/site").as_user("site");
        assert_eq!(
            render(&cmd),
            "sudo -H -u site sh -c 'cd /srv/app/site && git pull'"
        );
    }

    #[test]
    fn test_render_sudo() {
        let cmd = RemoteCommand::new("mkdir -p /srv/app").sudo();
        assert_eq!(render(&cmd), "sudo sh -c 'mkdir -p /srv/app'");
    }

    #[test]
    fn test_dry_run_always_succeeds() {
        let conn = DryRunConnection::new("h1");
        let out = conn.run(&RemoteCommand::new("rm -rf /srv/app")).unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("rm -rf /srv/app"));
    }

    #[test]
    fn test_connect_picks_transport() {
        let ssh = SshConfig::default();
        assert_eq!(connect("localhost", &ssh).host(), "localhost");
        assert_eq!(connect("deploy@h1", &ssh).host(), "deploy@h1");
    }

    #[cfg(unix)]
    #[test]
    fn test_local_captures_output_and_exit_code() {
        let conn = LocalConnection::new();
        let out = conn
            .run(&RemoteCommand::new("echo out; echo err >&2; exit 3"))
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_local_timeout_kills_command() {
        let conn = LocalConnection::new();
        let started = Instant::now();
        let err = conn
            .run(&RemoteCommand::new("sleep 5").with_timeout(Duration::from_millis(100)))
            .unwrap_err();
        assert_eq!(err, ConnectionError::TimedOut(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
