//! Batching writer task.
//!
//! The writer waits for one command, then drains whatever else is already
//! queued as long as the batch stays within the configured write size. The
//! whole batch is registered for response correlation before its bytes are
//! written, then sent with a single write and flush. A command that would
//! overflow the batch is carried over to start the next one, so enqueue
//! order is preserved on the wire.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::{codec::Encoder, sync::CancellationToken};
use tracing::{trace, warn};

use super::{DispatchReceiver, PendingSend};
use crate::{packet::CommandEncoder, transport::TransportError};

/// Drain `rx` into `sink` until the queue closes or `shutdown` fires.
///
/// `register` receives every batch after encoding and before the write.
///
/// # Errors
/// Returns [`TransportError::Write`] if writing or flushing fails; the
/// caller treats this as an unexpected disconnect.
pub async fn run<W, R>(
    mut rx: DispatchReceiver,
    mut sink: W,
    max_batch_bytes: usize,
    shutdown: CancellationToken,
    mut register: R,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    R: FnMut(Vec<PendingSend>),
{
    let mut encoder = CommandEncoder::new();
    let mut buf = BytesMut::with_capacity(max_batch_bytes);
    let mut carry: Option<PendingSend> = None;

    loop {
        let first = if let Some(item) = carry.take() {
            item
        } else {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            }
        };

        let mut size = first.command().packet_len();
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            let len = next.command().packet_len();
            if size + len > max_batch_bytes {
                carry = Some(next);
                break;
            }
            size += len;
            batch.push(next);
        }

        buf.clear();
        let mut sent = Vec::with_capacity(batch.len());
        for item in batch {
            match encoder.encode(item.command(), &mut buf) {
                Ok(()) => sent.push(item),
                Err(e) => warn!(error = %e, command = %item.command(), "dropping unencodable command"),
            }
        }
        if sent.is_empty() {
            continue;
        }

        trace!(commands = sent.len(), bytes = buf.len(), "writing batch");
        register(sent);
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            res = write_batch(&mut sink, &buf) => res?,
        }
    }
    Ok(())
}

async fn write_batch<W>(sink: &mut W, buf: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(buf).await.map_err(TransportError::Write)?;
    sink.flush().await.map_err(TransportError::Write)
}
