use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, ChannelMsg, CryptoVec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::*;

use super::{ChannelContext, ChannelHandler, NewChannel, SshChannel};
use crate::compat::AnyhowContextExt;

const SHELLS: &[&str] = &["/bin/bash", "/bin/sh"];
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const DEFAULT_LANG: &str = "en_US.UTF-8";
const EXTENDED_DATA_STDERR: u32 = 1;

pub fn locate_shell() -> PathBuf {
    SHELLS
        .iter()
        .map(Path::new)
        .find(|shell| shell.exists())
        .unwrap_or(Path::new("/bin/sh"))
        .to_path_buf()
}

/// Runs `exec` and `shell` requests of `session` channels as child processes
/// of the daemon. There is no PTY support.
pub struct SessionChannelHandler {
    shell: PathBuf,
    inherit_daemon_env: bool,
}

impl SessionChannelHandler {
    pub fn new(inherit_daemon_env: bool) -> Self {
        Self {
            shell: locate_shell(),
            inherit_daemon_env,
        }
    }

    fn base_environment(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = if self.inherit_daemon_env {
            std::env::vars().collect()
        } else {
            vec![]
        };
        let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_owned());
        for (name, value) in [("PATH", DEFAULT_PATH), ("LANG", DEFAULT_LANG), ("HOME", home.as_str())] {
            if !env.iter().any(|(k, _)| k == name) {
                env.push((name.to_owned(), value.to_owned()));
            }
        }
        env
    }

    fn command(&self, command: Option<&str>, env: &[(String, String)]) -> Command {
        let mut cmd = Command::new(&self.shell);
        if let Some(command) = command {
            cmd.arg("-c").arg(command);
        }
        cmd.env_clear()
            .envs(env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

struct SessionState {
    id: ChannelId,
    handle: Handle,
    env: Vec<(String, String)>,
    stdin: Option<ChildStdin>,
    process: Option<JoinHandle<()>>,
}

impl SessionState {
    async fn reply(&self, want_reply: bool, success: bool) {
        if !want_reply {
            return;
        }
        let result = if success {
            self.handle.channel_success(self.id).await
        } else {
            self.handle.channel_failure(self.id).await
        };
        if result.is_err() {
            debug!(channel=%self.id, "Could not reply to channel request");
        }
    }

    fn start(&mut self, handler: &SessionChannelHandler, command: Option<&str>) -> bool {
        if self.process.is_some() {
            warn!(channel=%self.id, "Session already runs a process");
            return false;
        }

        let mut child = match handler.command(command, &self.env).spawn() {
            Ok(child) => child,
            Err(error) => {
                warn!(%error, shell=?handler.shell, "Failed to start process");
                return false;
            }
        };
        info!(channel=%self.id, pid=?child.id(), shell=command.is_none(), "Started process");

        self.stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (handle, id) = (self.handle.clone(), self.id);

        self.process = Some(tokio::spawn(
            async move {
                let (status, _, _) = tokio::join!(
                    child.wait(),
                    pump(stdout, &handle, id, None),
                    pump(stderr, &handle, id, Some(EXTENDED_DATA_STDERR)),
                );
                let code = match status {
                    Ok(status) => exit_code(status),
                    Err(error) => {
                        warn!(%error, "Failed to wait for process");
                        255
                    }
                };
                debug!(channel=%id, code, "Process exited");
                if let Err(error) = finish(&handle, id, code).await {
                    debug!(%error, "Could not finish session channel");
                }
            }
            .in_current_span(),
        ));
        true
    }

    async fn handle_message(&mut self, handler: &SessionChannelHandler, msg: ChannelMsg) -> bool {
        match msg {
            ChannelMsg::SetEnv {
                want_reply,
                variable_name,
                variable_value,
            } => {
                self.env.retain(|(k, _)| k != &variable_name);
                self.env.push((variable_name, variable_value));
                self.reply(want_reply, true).await;
            }
            ChannelMsg::Exec {
                want_reply,
                command,
            } => {
                let command = String::from_utf8_lossy(&command).into_owned();
                let started = self.start(handler, Some(&command));
                self.reply(want_reply, started).await;
            }
            ChannelMsg::RequestShell { want_reply } => {
                let started = self.start(handler, None);
                self.reply(want_reply, started).await;
            }
            ChannelMsg::RequestPty { want_reply, .. } => {
                debug!(channel=%self.id, "PTY requested, not supported");
                self.reply(want_reply, false).await;
            }
            ChannelMsg::RequestSubsystem { want_reply, .. } => {
                debug!(channel=%self.id, "Subsystem requested, not supported");
                self.reply(want_reply, false).await;
            }
            ChannelMsg::Data { data } => {
                if let Some(stdin) = &mut self.stdin {
                    if let Err(error) = stdin.write_all(&data).await {
                        debug!(%error, "Process stdin is closed");
                        self.stdin = None;
                    }
                }
            }
            ChannelMsg::Eof => {
                self.stdin = None;
            }
            ChannelMsg::Close => return false,
            _ => {}
        }
        true
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            process.abort();
        }
    }
}

async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    handle: &Handle,
    id: ChannelId,
    ext: Option<u32>,
) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(error) => {
                debug!(%error, "Process output ended");
                break;
            }
        };
        let data = CryptoVec::from_slice(&buf[..n]);
        let sent = match ext {
            Some(ext) => handle.extended_data(id, ext, data).await,
            None => handle.data(id, data).await,
        };
        if sent.is_err() {
            break;
        }
    }
}

async fn finish(handle: &Handle, id: ChannelId, code: u32) -> anyhow::Result<()> {
    handle
        .exit_status_request(id, code)
        .await
        .context("exit-status")?;
    handle.eof(id).await.context("eof")?;
    handle.close(id).await.context("close")?;
    Ok(())
}

fn exit_code(status: ExitStatus) -> u32 {
    if let Some(code) = status.code() {
        return code as u32;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as u32;
        }
    }
    255
}

async fn process_exit(process: &mut Option<JoinHandle<()>>) {
    match process {
        Some(task) => {
            let _ = task.await;
        }
        None => std::future::pending().await,
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> ChannelHandler<C> for SessionChannelHandler {
    async fn handle_new_channel(&self, ctx: ChannelContext<C>, channel: NewChannel) {
        let accepted = match channel.accept() {
            Ok(accepted) => accepted,
            Err(error) => {
                debug!(%error, "Could not accept session channel");
                return;
            }
        };
        let SshChannel {
            mut channel,
            handle,
        } = match accepted.into_ssh() {
            Ok(channel) => channel,
            Err(accepted) => {
                warn!("Session channels need an SSH transport");
                let (_, closer) = accepted.into_stream();
                closer.close().await;
                return;
            }
        };

        let mut session = SessionState {
            id: channel.id(),
            handle,
            env: self.base_environment(),
            stdin: None,
            process: None,
        };

        loop {
            tokio::select! {
                msg = channel.wait() => {
                    let Some(msg) = msg else { break };
                    if !session.handle_message(self, msg).await {
                        break;
                    }
                }
                _ = process_exit(&mut session.process) => {
                    session.process = None;
                    break;
                }
                _ = ctx.cancel.cancelled() => break,
            }
        }
        debug!(channel=%session.id, "Session channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_shell_prefers_bash() {
        let shell = locate_shell();
        if Path::new("/bin/bash").exists() {
            assert_eq!(shell, PathBuf::from("/bin/bash"));
        } else {
            assert_eq!(shell, PathBuf::from("/bin/sh"));
        }
    }

    #[test]
    fn test_environment_has_defaults_without_inheritance() {
        let handler = SessionChannelHandler::new(false);
        let env = handler.base_environment();
        let names: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["PATH", "LANG", "HOME"]);
    }

    #[test]
    fn test_environment_inherits_daemon_variables() {
        let handler = SessionChannelHandler::new(true);
        let env = handler.base_environment();
        assert!(env.iter().any(|(k, _)| k == "PATH"));
        assert_eq!(
            env.iter().filter(|(k, _)| k == "PATH").count(),
            1,
            "PATH must not be duplicated"
        );
    }

    #[tokio::test]
    async fn test_command_runs_through_shell() {
        let handler = SessionChannelHandler::new(false);
        let env = vec![("GREETING".to_owned(), "hi".to_owned())];
        let output = handler
            .command(Some("echo $GREETING; exit 3"), &env)
            .output()
            .await
            .unwrap();
        assert_eq!(output.stdout, b"hi\n");
        assert_eq!(exit_code(output.status), 3);
    }
}
