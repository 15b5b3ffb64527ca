//! Reader task: frames inbound bytes and routes each packet.
//!
//! Responses pop the correlation queue and update the device shadow;
//! information packets either acknowledge a streamed macro chunk or go to
//! listeners. Protocol errors are logged and skipped. Transport failures end
//! the task and tear the connection down.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, trace, warn};

use super::{ConnectionState, RobotEvent, Shared, lock};
use crate::{
    command::Command,
    packet::{
        Information,
        PacketDecoder,
        PacketType,
        RawPacket,
        Response,
        ResponseBody,
        ResponseCode,
    },
    transport::TransportError,
};

/// Read packets from `source` until `shutdown` fires or the stream fails.
pub(super) async fn run<R>(
    shared: Arc<Shared>,
    source: R,
    generation: u64,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(source, PacketDecoder::new());
    let cause = loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(packet)) => shared.route(generation, &packet),
            Some(Err(e)) => break TransportError::Read(e),
            None => break TransportError::Closed,
        }
    };
    shared.connection_lost(generation, &cause);
}

impl Shared {
    pub(super) fn route(self: &Arc<Self>, generation: u64, packet: &RawPacket) {
        trace!(header = ?packet.header(), len = packet.payload().len(), "packet received");
        match packet.header().packet_type() {
            Ok(PacketType::Response) => self.handle_response(generation, packet),
            Ok(PacketType::Information) => self.handle_information(packet),
            Err(e) => warn!(error = %e, "skipping unrecognised packet"),
        }
    }

    fn handle_response(self: &Arc<Self>, generation: u64, packet: &RawPacket) {
        let entry = lock(&self.ledger).correlator.resolve(packet.header());
        let Some(entry) = entry else {
            let code = ResponseCode::from_u8(packet.header().code);
            warn!(?code, "response with no outstanding command");
            self.listeners.event(&RobotEvent::UnmatchedResponse(code));
            return;
        };

        let response = Response::decode(entry.command().kind(), packet);
        debug!(%response, system = entry.is_system(), "response matched");
        if let ResponseBody::Corrupt(e) = response.body() {
            warn!(error = %e, command = %entry.command(), "corrupt response payload");
        }

        if response.code().is_ok() {
            self.confirm(generation, entry.command(), entry.is_system(), &response);
        } else {
            warn!(code = ?response.code(), command = %entry.command(), "command rejected by robot");
        }

        if !entry.is_system() {
            self.listeners.response(&response, entry.command());
        }
    }

    /// Side effects of a command the robot accepted.
    fn confirm(self: &Arc<Self>, generation: u64, command: &Command, system: bool, response: &Response) {
        if matches!(command, Command::Roll { .. } | Command::FrontLed(_)) {
            self.shutdown_echo(generation);
        }
        if command.updates_shadow() {
            lock(&self.shadow).apply(command);
        }

        match command {
            Command::GetBluetoothInfo if system => {
                if let ResponseBody::BluetoothInfo { name, .. } = response.body() {
                    debug!(%name, "robot name updated");
                    *lock(&self.name) = Some(name.clone());
                }
            }
            Command::Sleep { .. } | Command::JumpToBootloader => {
                // The robot drops the link right after acknowledging these.
                if self.state() == ConnectionState::Connected {
                    self.begin_disconnect();
                }
            }
            _ => {}
        }
    }

    /// Count confirmations of the forced shutdown pair.
    ///
    /// The first confirmation seen after a graceful disconnect began may
    /// belong to a command sent earlier, so teardown waits for the second.
    fn shutdown_echo(self: &Arc<Self>, generation: u64) {
        {
            let mut session = lock(&self.session);
            if session.state != ConnectionState::Disconnected || !session.is_current(generation) {
                return;
            }
            if !session.first_echo_seen {
                trace!(generation, "first shutdown echo");
                session.first_echo_seen = true;
                return;
            }
        }
        self.finish_disconnect(generation);
    }

    fn handle_information(&self, packet: &RawPacket) {
        let information = match Information::decode(packet) {
            Ok(information) => information,
            Err(e) => {
                warn!(error = %e, code = packet.header().code, "skipping corrupt information packet");
                return;
            }
        };
        debug!(kind = ?information.kind(), "information received");

        if information.is_macro_marker() && self.acknowledge_macro_chunk() {
            return;
        }
        self.listeners.information(&information);
    }

    /// Feed a marker echo to the macro session. Returns `false` when no
    /// streamed macro is running.
    fn acknowledge_macro_chunk(&self) -> bool {
        let dispatcher = self.dispatcher();
        let finished = {
            let mut ledger = lock(&self.ledger);
            if !ledger.macros.is_running() {
                return false;
            }
            let progress = ledger.macros.acknowledge();
            trace!(
                uploads = progress.uploads.len(),
                outstanding = ledger.macros.outstanding(),
                "macro chunk acknowledged"
            );
            // Uploads must be queued before the ledger is unlocked.
            dispatcher
                .as_ref()
                .is_some_and(|dispatcher| Self::dispatch_progress(dispatcher, progress))
        };
        if finished {
            self.listeners.event(&RobotEvent::MacroDone);
        }
        true
    }
}
