//! In-process connector: every opened channel is handed to a peer that plays
//! the service's part.

use super::{
    ChannelConnector, ChannelEvent, ChannelFailure, ChannelState, LinkEnd, OpenRequest,
    TransportChannel,
};
use crate::codec::{self, TransportBlob};
use tokio::sync::mpsc;

/// Connector whose channels are driven by [`LoopbackPeer`]s.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
}

impl LoopbackConnector {
    /// Create a connector and the stream of peers, one per `open`.
    #[must_use]
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

impl ChannelConnector for LoopbackConnector {
    fn open(&self, request: OpenRequest) -> TransportChannel {
        let (channel, link) = TransportChannel::new(request.outbound_queue);
        link.opening();
        if let Err(mpsc::error::SendError(mut peer)) = self.peers.send(LoopbackPeer { request, link })
        {
            peer.link.fail(ChannelFailure::Connect {
                status: None,
                detail: "no loopback peer listening".into(),
            });
        }
        channel
    }
}

/// The service side of a loopback channel.
#[derive(Debug)]
pub struct LoopbackPeer {
    request: OpenRequest,
    link: LinkEnd,
}

impl LoopbackPeer {
    /// The request the channel was opened with.
    #[must_use]
    pub fn request(&self) -> &OpenRequest {
        &self.request
    }

    /// Current channel state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.link.state()
    }

    /// Accept the session. Returns `false` if it was already open or closed.
    pub fn accept(&mut self) -> bool {
        self.link.open()
    }

    /// Send a base64 PCM16 speech chunk.
    pub fn send_audio(&mut self, chunk: impl Into<String>) {
        self.link.deliver(ChannelEvent::AudioChunk(chunk.into()));
    }

    /// Encode and send mono samples as a speech chunk.
    pub fn send_samples(&mut self, samples: &[f32]) {
        self.send_audio(codec::encode_bytes(&codec::float_to_pcm16(samples)));
    }

    /// Signal barge-in.
    pub fn interrupt(&mut self) {
        self.link.deliver(ChannelEvent::Interrupted);
    }

    /// Signal the end of a reply.
    pub fn turn_complete(&mut self) {
        self.link.deliver(ChannelEvent::TurnComplete);
    }

    /// Fail the channel.
    pub fn fail(&mut self, failure: ChannelFailure) {
        self.link.fail(failure);
    }

    /// Close the channel normally.
    pub fn close(&mut self) {
        self.link.finish();
    }

    /// Wait for the next blob the session sent.
    pub async fn recv(&mut self) -> Option<TransportBlob> {
        self.link.next_outbound().await
    }

    /// Take a sent blob without waiting.
    pub fn try_recv(&mut self) -> Option<TransportBlob> {
        self.link.try_next_outbound()
    }

    /// Whether the session closed its end.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.link.is_cancelled()
    }
}
