use anyhow::Result;
use async_trait::async_trait;
use russh::client::Msg as BackendMsg;
use russh::server::Handle;
use russh::{Channel, ChannelId, ChannelMsg};
use tokio_util::sync::CancellationToken;
use tracing::*;

use super::ProxyState;
use crate::channels::{
    AcceptedChannel, ChannelContext, ChannelHandler, NewChannel, SshChannel, DIRECT_TCPIP, SESSION,
};
use crate::compat::AnyhowContextExt;
use crate::forwarding::bridge;
use crate::{DirectTcpipParams, RejectReason};

/// Mirrors each client channel as a backend channel of the same type.
pub struct ProxyChannelHandler;

async fn open_backend_channel(
    ctx: &ChannelContext<ProxyState>,
    channel: &NewChannel,
) -> Result<Channel<BackendMsg>, (RejectReason, String)> {
    let backend = ctx.state.backend().await.map_err(|error| {
        warn!(%error, "Backend is not reachable");
        (RejectReason::ConnectFailed, error.to_string())
    })?;

    let opened = match channel.channel_type() {
        SESSION => backend.channel_open_session().await,
        DIRECT_TCPIP => {
            let params = DirectTcpipParams::parse(channel.extra_data()).map_err(|error| {
                (
                    RejectReason::ConnectFailed,
                    format!("Failed to parse open channel message: {error}"),
                )
            })?;
            backend
                .channel_open_direct_tcpip(
                    params.host_to_connect,
                    params.port_to_connect,
                    params.originator_address,
                    params.originator_port,
                )
                .await
        }
        other => {
            return Err((
                RejectReason::UnknownChannelType,
                format!("unknown channel type: {other}"),
            ))
        }
    };

    opened.map_err(|error| match error {
        russh::Error::ChannelOpenFailure(failure) => (
            RejectReason::from(failure),
            "backend rejected the channel".to_owned(),
        ),
        error => (RejectReason::ConnectFailed, error.to_string()),
    })
}

#[async_trait]
impl ChannelHandler<ProxyState> for ProxyChannelHandler {
    async fn handle_new_channel(&self, ctx: ChannelContext<ProxyState>, channel: NewChannel) {
        let backend = match open_backend_channel(&ctx, &channel).await {
            Ok(backend) => backend,
            Err((reason, message)) => {
                channel.reject(reason, message);
                return;
            }
        };
        let raw = channel.channel_type() == DIRECT_TCPIP;

        let accepted = match channel.accept() {
            Ok(accepted) => accepted,
            Err(error) => {
                debug!(%error, "Could not accept channel");
                let _ = backend.close().await;
                return;
            }
        };

        if raw {
            return relay_stream(accepted, backend, &ctx.cancel).await;
        }
        match accepted.into_ssh() {
            Ok(client) => {
                if let Err(error) = relay_session(client, backend, &ctx.cancel).await {
                    debug!(%error, "Session relay ended");
                }
            }
            Err(accepted) => relay_stream(accepted, backend, &ctx.cancel).await,
        }
    }
}

async fn relay_stream(
    accepted: AcceptedChannel,
    backend: Channel<BackendMsg>,
    cancel: &CancellationToken,
) {
    let (stream, closer) = accepted.into_stream();
    bridge(
        "channel",
        stream,
        "backend",
        backend.into_stream(),
        cancel.clone(),
    )
    .await;
    closer.close().await;
}

/// Relays data, requests and replies between a client session channel and
/// its backend twin until either side closes it.
async fn relay_session(
    client: SshChannel,
    mut backend: Channel<BackendMsg>,
    cancel: &CancellationToken,
) -> Result<()> {
    let SshChannel {
        channel: mut client,
        handle,
    } = client;
    let id = client.id();

    let result = loop {
        tokio::select! {
            msg = client.wait() => {
                let Some(msg) = msg else { break Ok(()) };
                match to_backend(msg, &backend).await {
                    Ok(true) => {}
                    Ok(false) => break Ok(()),
                    Err(error) => break Err(error),
                }
            }
            msg = backend.wait() => {
                let Some(msg) = msg else { break Ok(()) };
                match to_client(msg, &handle, id).await {
                    Ok(true) => {}
                    Ok(false) => break Ok(()),
                    Err(error) => break Err(error),
                }
            }
            _ = cancel.cancelled() => break Ok(()),
        }
    };

    let _ = backend.close().await;
    let _ = handle.close(id).await;
    result
}

async fn to_backend(msg: ChannelMsg, backend: &Channel<BackendMsg>) -> Result<bool> {
    match msg {
        ChannelMsg::Data { data } => backend.data(&data[..]).await?,
        ChannelMsg::ExtendedData { data, ext } => backend.extended_data(ext, &data[..]).await?,
        ChannelMsg::Eof => backend.eof().await?,
        ChannelMsg::Close => return Ok(false),
        ChannelMsg::Exec {
            want_reply,
            command,
        } => backend.exec(want_reply, command).await?,
        ChannelMsg::RequestShell { want_reply } => backend.request_shell(want_reply).await?,
        ChannelMsg::RequestPty {
            want_reply,
            term,
            col_width,
            row_height,
            pix_width,
            pix_height,
            terminal_modes,
        } => {
            backend
                .request_pty(
                    want_reply,
                    &term,
                    col_width,
                    row_height,
                    pix_width,
                    pix_height,
                    &terminal_modes,
                )
                .await?
        }
        ChannelMsg::SetEnv {
            want_reply,
            variable_name,
            variable_value,
        } => {
            backend
                .set_env(want_reply, variable_name, variable_value)
                .await?
        }
        ChannelMsg::WindowChange {
            col_width,
            row_height,
            pix_width,
            pix_height,
        } => {
            backend
                .window_change(col_width, row_height, pix_width, pix_height)
                .await?
        }
        ChannelMsg::Signal { signal } => backend.signal(signal).await?,
        ChannelMsg::RequestSubsystem { want_reply, name } => {
            backend.request_subsystem(want_reply, &name).await?
        }
        msg => trace!(?msg, "Not relayed to backend"),
    }
    Ok(true)
}

async fn to_client(msg: ChannelMsg, handle: &Handle, id: ChannelId) -> Result<bool> {
    match msg {
        ChannelMsg::Data { data } => handle.data(id, data).await.map_err(drop).context("data")?,
        ChannelMsg::ExtendedData { data, ext } => handle
            .extended_data(id, ext, data)
            .await
            .map_err(drop)
            .context("extended data")?,
        ChannelMsg::Eof => handle.eof(id).await.context("eof")?,
        ChannelMsg::Close => return Ok(false),
        ChannelMsg::Success => handle.channel_success(id).await.context("success")?,
        ChannelMsg::Failure => handle.channel_failure(id).await.context("failure")?,
        ChannelMsg::ExitStatus { exit_status } => handle
            .exit_status_request(id, exit_status)
            .await
            .context("exit-status")?,
        ChannelMsg::ExitSignal {
            signal_name,
            core_dumped,
            error_message,
            lang_tag,
        } => handle
            .exit_signal_request(id, signal_name, core_dumped, error_message, lang_tag)
            .await
            .context("exit-signal")?,
        msg => trace!(?msg, "Not relayed to client"),
    }
    Ok(true)
}
