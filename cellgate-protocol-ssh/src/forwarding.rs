use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::*;

const BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug)]
pub enum DirectionEnd {
    Eof,
    Error(io::Error),
    Cancelled,
}

#[derive(Debug)]
pub struct DirectionReport {
    pub bytes: u64,
    pub end: DirectionEnd,
}

/// Copies `src` into `dst` until `src` ends, then half-closes `dst`.
///
/// Errors end the direction permanently. The write side of `dst` is shut
/// down on every exit path so the opposite direction can still drain.
pub async fn forward<R, W>(
    src_label: &str,
    dst_label: &str,
    mut src: R,
    mut dst: W,
    cancel: &CancellationToken,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut bytes = 0u64;

    let end = loop {
        let n = tokio::select! {
            result = src.read(&mut buf) => match result {
                Ok(0) => break DirectionEnd::Eof,
                Ok(n) => n,
                Err(error) => break DirectionEnd::Error(error),
            },
            _ = cancel.cancelled() => break DirectionEnd::Cancelled,
        };
        let write = tokio::select! {
            result = dst.write_all(&buf[..n]) => result,
            _ = cancel.cancelled() => break DirectionEnd::Cancelled,
        };
        if let Err(error) = write {
            break DirectionEnd::Error(error);
        }
        bytes += n as u64;
    };

    match &end {
        DirectionEnd::Error(error) => {
            debug!(from=%src_label, to=%dst_label, %error, bytes, "Forwarding ended with an error")
        }
        _ => debug!(from=%src_label, to=%dst_label, ?end, bytes, "Forwarding ended"),
    }

    if let Err(error) = dst.shutdown().await {
        debug!(to=%dst_label, %error, "Half-close failed");
    }

    DirectionReport { bytes, end }
}

/// Runs both directions of a forwarding pair on their own tasks and returns
/// once both have completed. Both streams are released by then.
pub async fn bridge<A, B>(
    label_a: &str,
    a: A,
    label_b: &str,
    b: B,
    cancel: CancellationToken,
) -> (DirectionReport, DirectionReport)
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let a_to_b = tokio::spawn({
        let (src, dst, cancel) = (label_a.to_owned(), label_b.to_owned(), cancel.clone());
        async move { forward(&src, &dst, a_read, b_write, &cancel).await }.in_current_span()
    });
    let b_to_a = tokio::spawn({
        let (src, dst) = (label_b.to_owned(), label_a.to_owned());
        async move { forward(&src, &dst, b_read, a_write, &cancel).await }.in_current_span()
    });

    let (a_to_b, b_to_a) = tokio::join!(a_to_b, b_to_a);
    (joined(a_to_b), joined(b_to_a))
}

fn joined(result: Result<DirectionReport, tokio::task::JoinError>) -> DirectionReport {
    result.unwrap_or_else(|error| {
        error!(%error, "Forwarding task failed");
        DirectionReport {
            bytes: 0,
            end: DirectionEnd::Error(io::Error::other(error.to_string())),
        }
    })
}
