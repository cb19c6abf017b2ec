//! Directional frame forwarding
//!
//! One [`Forwarder`] per direction of a proxied connection. Both read whole
//! frames through [`MbapCodec`], hand each one to a [`FrameProcessor`] and
//! write the result to the other socket, strictly in decode order.
//!
//! ```text
//! client ──▶ Forwarder<RequestRecorder> ──▶ upstream
//!                    │ put(tid)
//!                    ▼
//!            TransactionTracker
//!                    ▲ pop(tid)
//!                    │
//! client ◀── Forwarder<ResponseSpoofer> ◀── upstream
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use mitm_protocols::{Frame, MbapCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use errors::MitmResult;

use crate::connection::ConnectionStats;
use crate::policy::SpoofPolicy;
use crate::tracker::{PendingRequest, TransactionTracker};

/// Traffic direction through the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => write!(f, "client->upstream"),
            Direction::UpstreamToClient => write!(f, "upstream->client"),
        }
    }
}

/// Per-frame behaviour of a forwarder
///
/// Implementations never fail: anything they cannot handle is returned
/// unchanged so the stream keeps flowing.
pub trait FrameProcessor: Send + Sync {
    fn direction(&self) -> Direction;

    fn process(&self, frame: Frame) -> Frame;
}

/// Client → upstream: remembers FC03 requests by transaction id
pub struct RequestRecorder {
    tracker: Arc<TransactionTracker>,
    stats: Arc<ConnectionStats>,
}

impl RequestRecorder {
    pub fn new(tracker: Arc<TransactionTracker>, stats: Arc<ConnectionStats>) -> Self {
        Self { tracker, stats }
    }
}

impl FrameProcessor for RequestRecorder {
    fn direction(&self) -> Direction {
        Direction::ClientToUpstream
    }

    fn process(&self, frame: Frame) -> Frame {
        if let Some(request) = PendingRequest::capture(&frame) {
            trace!(
                tid = frame.transaction_id,
                start = request.start_address,
                quantity = request.quantity,
                "Recorded read request"
            );
            self.tracker.put(frame.transaction_id, request);
            self.stats.record_request();
        }
        frame
    }
}

/// Upstream → client: rewrites responses to recorded requests
pub struct ResponseSpoofer {
    tracker: Arc<TransactionTracker>,
    policy: Arc<SpoofPolicy>,
    stats: Arc<ConnectionStats>,
}

impl ResponseSpoofer {
    pub fn new(
        tracker: Arc<TransactionTracker>,
        policy: Arc<SpoofPolicy>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            tracker,
            policy,
            stats,
        }
    }
}

impl FrameProcessor for ResponseSpoofer {
    fn direction(&self) -> Direction {
        Direction::UpstreamToClient
    }

    fn process(&self, frame: Frame) -> Frame {
        let Some(request) = self.tracker.pop(frame.transaction_id) else {
            trace!(tid = frame.transaction_id, "No pending request, passing through");
            self.stats.record_passthrough();
            return frame;
        };

        let (frame, spoofed) = self.policy.rewrite_response(&request, frame);
        if spoofed > 0 {
            self.stats.record_spoofed(spoofed);
        } else {
            self.stats.record_passthrough();
        }
        frame
    }
}

/// Why a forwarder stopped without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardEnd {
    /// The source socket reached EOF
    PeerClosed,
    /// The connection or server token was cancelled
    Cancelled,
}

/// Pumps frames from one socket to the other
pub struct Forwarder<R, W, P> {
    reader: FramedRead<R, MbapCodec>,
    writer: FramedWrite<W, MbapCodec>,
    processor: P,
    read_timeout: Duration,
    token: CancellationToken,
    stats: Arc<ConnectionStats>,
}

impl<R, W, P> Forwarder<R, W, P>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    P: FrameProcessor,
{
    pub fn new(
        source: R,
        sink: W,
        processor: P,
        read_timeout: Duration,
        token: CancellationToken,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            reader: FramedRead::new(source, MbapCodec::new()),
            writer: FramedWrite::new(sink, MbapCodec::new()),
            processor,
            read_timeout,
            token,
            stats,
        }
    }

    /// Forward until EOF, cancellation or a socket error
    pub async fn run(mut self) -> MitmResult<ForwardEnd> {
        let direction = self.processor.direction();
        let result = self.pump(direction).await;

        let discarded = self.reader.decoder().discarded_bytes();
        if discarded > 0 {
            self.stats.record_discarded(discarded);
        }
        debug!(%direction, ?result, "Forwarder stopped");
        result
    }

    async fn pump(&mut self, direction: Direction) -> MitmResult<ForwardEnd> {
        loop {
            let next = tokio::select! {
                () = self.token.cancelled() => return Ok(ForwardEnd::Cancelled),
                next = tokio::time::timeout(self.read_timeout, self.reader.next()) => next,
            };

            let frame = match next {
                // Read timeout only bounds how long we go without checking the token
                Err(_elapsed) => continue,
                Ok(None) => return Ok(ForwardEnd::PeerClosed),
                Ok(Some(frame)) => frame?,
            };

            trace!(
                %direction,
                tid = frame.transaction_id,
                unit = frame.unit_id,
                fc = ?frame.function_code(),
                len = frame.pdu.len(),
                "Frame received"
            );
            let frame = self.processor.process(frame);
            self.stats.record_frame(direction);

            tokio::select! {
                () = self.token.cancelled() => return Ok(ForwardEnd::Cancelled),
                sent = self.writer.send(frame) => sent?,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use bytes::BytesMut;
    use mitm_protocols::modbus::pdu::{build_exception, build_read_response, parse_register_values};
    use mitm_protocols::modbus::ReadRegistersRequest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn wire(frame: &Frame) -> Vec<u8> {
        let mut out = BytesMut::new();
        mitm_protocols::encode(frame, &mut out).unwrap();
        out.to_vec()
    }

    fn shared() -> (Arc<TransactionTracker>, Arc<ConnectionStats>) {
        (
            Arc::new(TransactionTracker::new()),
            Arc::new(ConnectionStats::default()),
        )
    }

    #[test]
    fn test_recorder_tracks_reads_only() {
        let (tracker, stats) = shared();
        let recorder = RequestRecorder::new(tracker.clone(), stats.clone());

        let read = Frame::new(1, 1, ReadRegistersRequest::holding(0, 10).to_pdu());
        let write = Frame::new(2, 1, vec![0x06, 0x00, 0x01, 0x00, 0x05]);
        assert_eq!(recorder.process(read.clone()), read);
        assert_eq!(recorder.process(write.clone()), write);

        assert_eq!(tracker.len(), 1);
        assert!(tracker.pop(1).is_some());
        assert_eq!(stats.snapshot().requests_recorded, 1);
    }

    #[test]
    fn test_spoofer_rewrites_matched_response() {
        let (tracker, stats) = shared();
        let recorder = RequestRecorder::new(tracker.clone(), stats.clone());
        let spoofer = ResponseSpoofer::new(tracker, Arc::new(SpoofPolicy::default()), stats.clone());

        recorder.process(Frame::new(5, 1, ReadRegistersRequest::holding(0, 2).to_pdu()));
        let out = spoofer.process(Frame::new(5, 1, build_read_response(0x03, &[1, 2]).unwrap()));

        assert_eq!(parse_register_values(&out.pdu).unwrap(), vec![1001, 1002]);
        assert_eq!(stats.snapshot().registers_spoofed, 2);
    }

    #[test]
    fn test_spoofer_passes_unmatched_and_exceptions() {
        let (tracker, stats) = shared();
        let recorder = RequestRecorder::new(tracker.clone(), stats.clone());
        let spoofer = ResponseSpoofer::new(tracker, Arc::new(SpoofPolicy::default()), stats.clone());

        let orphan = Frame::new(77, 1, build_read_response(0x03, &[1, 2]).unwrap());
        assert_eq!(spoofer.process(orphan.clone()), orphan);

        recorder.process(Frame::new(8, 1, ReadRegistersRequest::holding(0, 2).to_pdu()));
        let exception = Frame::new(8, 1, build_exception(0x03, 0x02));
        assert_eq!(spoofer.process(exception.clone()), exception);

        let snap = stats.snapshot();
        assert_eq!(snap.responses_passthrough, 2);
        assert_eq!(snap.registers_spoofed, 0);
    }

    #[tokio::test]
    async fn test_forwarder_copies_frames_in_order_until_eof() {
        let (tracker, stats) = shared();
        let (mut feed, source) = tokio::io::duplex(1024);
        let (sink, mut drain) = tokio::io::duplex(1024);

        let forwarder = Forwarder::new(
            source,
            sink,
            RequestRecorder::new(tracker.clone(), stats.clone()),
            Duration::from_millis(50),
            CancellationToken::new(),
            stats.clone(),
        );
        let task = tokio::spawn(forwarder.run());

        let a = Frame::new(1, 1, ReadRegistersRequest::holding(0, 1).to_pdu());
        let b = Frame::new(2, 1, ReadRegistersRequest::holding(1, 1).to_pdu());
        let mut bytes = wire(&a);
        bytes.extend_from_slice(&wire(&b));
        // split mid-frame to exercise buffering
        feed.write_all(&bytes[..5]).await.unwrap();
        feed.write_all(&bytes[5..]).await.unwrap();
        drop(feed);

        let end = task.await.unwrap().unwrap();
        assert_eq!(end, ForwardEnd::PeerClosed);

        let mut received = vec![0u8; bytes.len()];
        drain.read_exact(&mut received).await.unwrap();
        assert_eq!(received, bytes);
        assert_eq!(stats.snapshot().frames_to_upstream, 2);
        assert_eq!(tracker.len(), 2);
    }

    #[tokio::test]
    async fn test_forwarder_stops_on_cancel_while_idle() {
        let (tracker, stats) = shared();
        let (_feed, source) = tokio::io::duplex(64);
        let (sink, _drain) = tokio::io::duplex(64);
        let token = CancellationToken::new();

        let forwarder = Forwarder::new(
            source,
            sink,
            RequestRecorder::new(tracker, stats.clone()),
            Duration::from_millis(20),
            token.clone(),
            stats,
        );
        let task = tokio::spawn(forwarder.run());

        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(end, ForwardEnd::Cancelled);
    }
}
