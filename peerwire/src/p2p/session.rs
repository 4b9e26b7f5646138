use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::mpsc, net::TcpStream, time};
use tokio_util::codec::{Framed, FramedParts};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use crate::{
    bitfield::Bitfield,
    block::{Block, BlockRequest},
    controller::{ControllerCommand, TorrentContext},
};
use super::{*, message::*, handshake::*, state::*};

type MessageSink = SplitSink<Framed<TcpStream, MessageCodec>, Message>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// Disconnect if nothing is read for this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

// Send a keep alive if nothing is written for this long.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

// Unflushed upload bytes allowed before waiting for the socket to drain.
const WRITE_WATERMARK: usize = 0x4000;

// Connection accepted by the server, its handshake already read.
pub struct Inbound {

    pub socket: Framed<TcpStream, HandshakeCodec>,

    pub handshake: Handshake,

}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbound")
            .field("handshake", &self.handshake)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct PeerSession {

    // The peer's IP address.
    address: SocketAddr,

    // Context is a read only state shared by all peers of a torrent.
    ctx: Arc<TorrentContext>,

    // Commands to the peer.
    peer_rx: PeerRx,

    state: SessionState,

    // Pieces the peer has, allocated on the first bitfield or have.
    bitfield: Option<Bitfield>,

    // Only the first message after the handshake may be a bitfield.
    bitfield_allowed: bool,

    download: DownloadPipeline,

    upload: UploadPipeline,

    // Bytes written and read since the last traffic report.
    sent: u64,
    received: u64,

    last_sent: Instant,
    last_received: Instant,

    // Last stall state reported.
    stalled: bool,

    // Bytes fed to the sink since the last flush.
    unflushed: usize,

}

impl PeerSession {

    pub fn new(address: SocketAddr, ctx: Arc<TorrentContext>) -> (PeerSession, PeerTx) {

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let now = Instant::now();

        (
            PeerSession {
                address,
                ctx,
                peer_rx,
                state: SessionState::default(),
                bitfield: None,
                bitfield_allowed: true,
                download: DownloadPipeline::new(now),
                upload: UploadPipeline::default(),
                sent: 0,
                received: 0,
                last_sent: now,
                last_received: now,
                stalled: false,
                unflushed: 0,
            },
            peer_tx,
        )
    }

    // Runs the session to completion and reports the disconnect, with the error if there was one.
    #[tracing::instrument(name = "peer", skip(self, inbound), fields(address = %self.address))]
    pub async fn start_session(&mut self, inbound: Option<Inbound>) {
        let result = self.connect_and_run(inbound).await;
        self.state.conn_state = ConnState::Closed;
        match &result {
            Ok(()) => tracing::info!("session closed"),
            Err(e) => tracing::warn!("session closed: {}", e),
        }
        self.ctx.controller_tx.send(ControllerCommand::Peer {
            address: self.address,
            event: PeerEvent::Disconnected { error: result.err() },
        }).ok();
    }

    async fn connect_and_run(&mut self, inbound: Option<Inbound>) -> Result<()> {

        let socket = match inbound {
            Some(Inbound { mut socket, handshake }) => {
                // The server already matched the info hash.
                self.state.conn_state = ConnState::Handshaking;
                self.send_handshake(&mut socket).await?;
                self.report(PeerEvent::Handshaken { id: handshake.peer_id })?;
                socket
            },
            None => {
                let stream = time::timeout(CONNECT_TIMEOUT, TcpStream::connect(self.address))
                    .await
                    .map_err(|_| PeerError::Timeout)??;
                tracing::trace!("outbound connection successful");
                let mut socket = Framed::new(stream, HandshakeCodec);
                self.state.conn_state = ConnState::Handshaking;
                self.send_handshake(&mut socket).await?;
                let handshake = self.receive_handshake(&mut socket).await?;
                self.report(PeerEvent::Handshaken { id: handshake.peer_id })?;
                socket
            },
        };

        let bitfield = match self.await_admission().await {
            Some(bitfield) => bitfield,
            None => {
                tracing::info!("peer not admitted");
                return Ok(());
            },
        };

        // Keep anything the peer sent straight after its handshake.
        let parts = socket.into_parts();
        let mut message_parts = FramedParts::new::<Message>(
            parts.io,
            MessageCodec::new(self.ctx.descriptor.num_pieces()),
        );
        message_parts.read_buf = parts.read_buf;
        message_parts.write_buf = parts.write_buf;

        self.state.conn_state = ConnState::Ready;
        self.run(Framed::from_parts(message_parts), bitfield).await
    }

    async fn send_handshake(&mut self, socket: &mut Framed<TcpStream, HandshakeCodec>) -> Result<()> {
        tracing::trace!("send handshake");
        socket.send(Handshake::new(self.ctx.info_hash, self.ctx.client_id)).await
    }

    async fn receive_handshake(&mut self, socket: &mut Framed<TcpStream, HandshakeCodec>) -> Result<Handshake> {
        tracing::trace!("waiting for handshake");
        let handshake = match time::timeout(HANDSHAKE_TIMEOUT, socket.next()).await {
            Ok(Some(handshake)) => handshake?,
            Ok(None) => return Err(PeerError::NoHandshake),
            Err(_) => return Err(PeerError::Timeout),
        };

        if handshake.protocol != PROTOCOL {
            return Err(PeerError::IncorrectProtocol);
        }
        if handshake.info_hash != self.ctx.info_hash {
            return Err(PeerError::IncorrectInfoHash);
        }

        tracing::info!("handshake successful, peer connected");
        Ok(handshake)
    }

    // Waits for the controller's verdict, None if the peer was turned away.
    async fn await_admission(&mut self) -> Option<Bitfield> {
        while let Some(cmd) = self.peer_rx.recv().await {
            match cmd {
                PeerCommand::Admitted { bitfield } => return Some(bitfield),
                PeerCommand::Shutdown => return None,
                cmd => tracing::warn!("command before admission: {:?}", cmd),
            }
        }
        None
    }

    async fn run(&mut self, socket: Framed<TcpStream, MessageCodec>, bitfield: Bitfield) -> Result<()> {

        let (mut sink, mut stream) = socket.split();
        let mut ticker = time::interval(Duration::from_secs(1));

        if bitfield.cardinality() > 0 {
            self.send_message(&mut sink, Message::Bitfield(bitfield)).await?;
        }

        loop { tokio::select! {

            // Message from peer.
            msg = stream.next() => match msg {
                Some(msg) => self.handle_msg(&mut sink, msg?).await?,
                None => {
                    tracing::info!("peer closed connection");
                    break;
                },
            },

            // Command from the controller.
            cmd = self.peer_rx.recv() => match cmd {
                Some(PeerCommand::Shutdown) | None => {
                    tracing::info!("session shutdown");
                    break;
                },
                Some(cmd) => self.handle_cmd(&mut sink, cmd).await?,
            },

            t = ticker.tick() => self.tick(&mut sink, t.into_std()).await?,

        }}

        self.report_traffic()
    }

    fn report(&self, event: PeerEvent) -> Result<()> {
        self.ctx.controller_tx.send(ControllerCommand::Peer {
            address: self.address,
            event,
        })?;
        Ok(())
    }

    fn count_sent(&mut self, msg: &Message) {
        self.sent += msg.wire_len() as u64;
        self.last_sent = Instant::now();
    }

    // Logs a message and sends to peer.
    async fn send_message(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::trace!("send: {}", msg);
        self.count_sent(&msg);
        sink.send(msg).await
    }

    async fn send_requests(&mut self, sink: &mut MessageSink, requests: Vec<BlockRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        for request in requests {
            let msg = Message::Request(request);
            self.count_sent(&msg);
            sink.feed(msg).await?;
        }
        sink.flush().await
    }

    async fn handle_msg(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::trace!("read: {}", msg);
        self.received += msg.wire_len() as u64;
        self.last_received = Instant::now();

        let bitfield_allowed = self.bitfield_allowed;
        if !matches!(msg, Message::KeepAlive) {
            self.bitfield_allowed = false;
        }

        match msg {

            Message::KeepAlive => {},

            Message::Bitfield(bitfield) => self.handle_bitfield(bitfield, bitfield_allowed)?,

            Message::Have { idx } => self.handle_have(idx as usize)?,

            Message::Choke => {
                if !self.state.peer_choking {
                    self.state.peer_choking = true;
                    self.download.pause();
                    self.report(PeerEvent::Choked)?;
                }
            },

            Message::Unchoke => {
                if self.state.peer_choking {
                    self.state.peer_choking = false;
                    self.report(PeerEvent::Unchoked)?;
                }
            },

            Message::Interested => {
                if !self.state.peer_interested {
                    self.state.peer_interested = true;
                    self.report(PeerEvent::Interested)?;
                }
            },

            Message::NotInterested => {
                if self.state.peer_interested {
                    self.state.peer_interested = false;
                    self.report(PeerEvent::NotInterested)?;
                }
            },

            Message::Request(request) => self.handle_request(sink, request).await?,

            Message::Piece(block) => {
                let requests = self.download.on_block(block, Instant::now())?;
                self.send_requests(sink, requests).await?;
                self.forward_download_events()?;
                if self.stalled {
                    self.stalled = false;
                    self.report(PeerEvent::Stalled(false))?;
                }
            },

            Message::Cancel(request) => {
                self.upload.cancel(&request);
            },
        }

        Ok(())
    }

    fn handle_bitfield(&mut self, bitfield: Bitfield, allowed: bool) -> Result<()> {
        if !allowed || self.bitfield.is_some() {
            tracing::error!("unexpected bitfield");
            return Err(PeerError::UnexpectedBitfield);
        }
        tracing::info!("peer has {}/{} pieces", bitfield.cardinality(), bitfield.len());
        self.bitfield = Some(bitfield.clone());
        self.report(PeerEvent::Bitfield(bitfield))
    }

    fn handle_have(&mut self, idx: usize) -> Result<()> {
        let num_pieces = self.ctx.descriptor.num_pieces();
        if idx >= num_pieces {
            tracing::error!("have msg with invalid idx: {}", idx);
            return Err(PeerError::InvalidMessage);
        }
        let bitfield = self.bitfield.get_or_insert_with(|| Bitfield::new(num_pieces));
        // Peer already has piece.
        if bitfield.get(idx) {
            return Ok(());
        }
        bitfield.set(idx, true);
        self.report(PeerEvent::Have(idx))
    }

    async fn handle_request(&mut self, sink: &mut MessageSink, request: BlockRequest) -> Result<()> {
        let descriptor = &self.ctx.descriptor;
        if request.piece_idx >= descriptor.num_pieces()
        || !request.is_within(descriptor.piece_len(request.piece_idx))
        {
            tracing::error!("invalid request: {:?}", request);
            return Err(PeerError::InvalidMessage);
        }
        if !self.upload.on_request(request) {
            tracing::trace!(
                "dropped request: {:?}, choking: {}, queued: {}",
                request, self.upload.is_paused(), self.upload.num_requests(),
            );
            return Ok(());
        }
        self.serve_uploads(sink).await
    }

    fn forward_download_events(&mut self) -> Result<()> {
        while let Some(event) = self.download.poll_event() {
            let event = match event {
                DownloadEvent::Completed(piece) => {
                    tracing::info!("completed piece {}", piece.idx);
                    PeerEvent::PieceCompleted(piece)
                },
                DownloadEvent::Failed(idx) => PeerEvent::PieceFailed(idx),
                DownloadEvent::Drain => PeerEvent::Drained,
            };
            self.report(event)?;
        }
        Ok(())
    }

    // Writes every block that can be served, waiting on the socket above the watermark.
    async fn serve_uploads(&mut self, sink: &mut MessageSink) -> Result<()> {
        while let Some(action) = self.upload.poll() {
            match action {
                UploadAction::Send(block) => self.feed_block(sink, block).await?,
                UploadAction::NeedPiece(idx) => self.report(PeerEvent::NeedPiece(idx))?,
            }
        }
        if self.unflushed > 0 {
            sink.flush().await?;
            self.unflushed = 0;
        }
        Ok(())
    }

    // Buffers a block, flushing once the watermark is reached.
    async fn feed_block(&mut self, sink: &mut MessageSink, block: Block) -> Result<()> {
        let msg = Message::Piece(block);
        self.count_sent(&msg);
        self.unflushed += msg.wire_len();
        sink.feed(msg).await?;
        if self.unflushed >= WRITE_WATERMARK {
            sink.flush().await?;
            self.unflushed = 0;
        }
        Ok(())
    }

    async fn handle_cmd(&mut self, sink: &mut MessageSink, cmd: PeerCommand) -> Result<()> {
        match cmd {

            PeerCommand::SetInterest(interested) => {
                if self.state.am_interested != interested {
                    self.state.am_interested = interested;
                    let msg = if interested { Message::Interested } else { Message::NotInterested };
                    self.send_message(sink, msg).await?;
                }
            },

            PeerCommand::Choke => {
                if self.upload.pause() {
                    self.state.am_choking = true;
                    self.send_message(sink, Message::Choke).await?;
                }
            },

            PeerCommand::Unchoke => {
                if self.upload.resume() {
                    self.state.am_choking = false;
                    self.send_message(sink, Message::Unchoke).await?;
                }
            },

            PeerCommand::Download { piece, requests } => {
                let idx = piece.idx;
                let mut sent = self.download.push(piece, requests, Instant::now());
                if !self.state.peer_choking {
                    sent.extend(self.download.resume());
                }
                tracing::trace!(
                    "downloading piece {}, {} in flight, {} queued",
                    idx, self.download.num_in_flight(), self.download.num_queued(),
                );
                self.send_requests(sink, sent).await?;
            },

            PeerCommand::Resume => {
                if !self.state.peer_choking {
                    let sent = self.download.resume();
                    self.send_requests(sink, sent).await?;
                }
            },

            PeerCommand::Surrender(idx) => {
                self.download.pause();
                let work = match self.download.take_piece(idx) {
                    Some((piece, requests, cancels)) => {
                        tracing::info!("surrendering piece {}", idx);
                        for request in cancels {
                            self.send_message(sink, Message::Cancel(request)).await?;
                        }
                        Some((piece, requests))
                    },
                    None => None,
                };
                self.report(PeerEvent::Surrendered { idx, work })?;
            },

            PeerCommand::Have(idx) => self.send_message(sink, Message::Have { idx: idx as u32 }).await?,

            PeerCommand::UploadPiece(piece) => {
                self.upload.push(piece);
                self.serve_uploads(sink).await?;
            },

            PeerCommand::Unavailable(idx) => {
                tracing::warn!("peer requested piece {} we don't have", idx);
                self.upload.remove(idx);
                self.serve_uploads(sink).await?;
            },

            PeerCommand::Admitted { .. } => tracing::warn!("peer already admitted"),

            // Handled by the run loop.
            PeerCommand::Shutdown => {},
        }

        Ok(())
    }

    fn report_traffic(&mut self) -> Result<()> {
        if self.sent > 0 || self.received > 0 {
            self.report(PeerEvent::Traffic { sent: self.sent, received: self.received })?;
            self.sent = 0;
            self.received = 0;
        }
        Ok(())
    }

    async fn tick(&mut self, sink: &mut MessageSink, now: Instant) -> Result<()> {

        if now.saturating_duration_since(self.last_received) > IDLE_TIMEOUT {
            tracing::warn!("disconnecting peer due to inactivity");
            return Err(PeerError::Timeout);
        }

        if now.saturating_duration_since(self.last_sent) >= KEEP_ALIVE_INTERVAL {
            self.send_message(sink, Message::KeepAlive).await?;
        }

        let stalled = self.download.has_stalled(now);
        if stalled != self.stalled {
            tracing::info!("download stalled: {}", stalled);
            self.stalled = stalled;
            self.report(PeerEvent::Stalled(stalled))?;
        }

        self.report_traffic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use crate::{
        block::piece_requests,
        controller::ControllerCommand,
        descriptor::ContentDescriptor,
        store::Piece,
        BLOCK_SIZE,
    };

    type ControllerRx = mpsc::UnboundedReceiver<ControllerCommand>;

    fn context(info_hash: [u8; 20]) -> (Arc<TorrentContext>, ControllerRx) {
        context_with(info_hash, 16)
    }

    // Four pieces of the given length.
    fn context_with(info_hash: [u8; 20], piece_len: usize) -> (Arc<TorrentContext>, ControllerRx) {
        let (controller_tx, controller_rx) = mpsc::unbounded_channel();
        let descriptor = ContentDescriptor::new(
            info_hash,
            "test",
            piece_len,
            vec![[0; 20]; 4],
            vec![("test".into(), 4 * piece_len)],
        );
        let ctx = TorrentContext {
            info_hash,
            client_id: [1; 20],
            descriptor: Arc::new(descriptor),
            controller_tx,
        };
        (Arc::new(ctx), controller_rx)
    }

    #[tokio::test]
    async fn test_outbound_handshake_mismatch() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let remote = tokio::spawn(async move {
            let (stream, _) = listener.accept().await?;
            let mut socket = Framed::new(stream, HandshakeCodec);
            socket.next().await;
            socket.send(Handshake::new([0xff; 20], [2; 20])).await?;
            anyhow::Ok(())
        });

        let (ctx, mut controller_rx) = context([0xaa; 20]);
        let (mut session, _peer_tx) = PeerSession::new(address, ctx);
        session.start_session(None).await;
        remote.await??;

        match controller_rx.recv().await {
            Some(ControllerCommand::Peer { event: PeerEvent::Disconnected { error }, .. }) => {
                assert!(matches!(error, Some(PeerError::IncorrectInfoHash)));
            },
            other => panic!("expected disconnect, got {:?}", other.map(|_| ())),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_admitted_session_exchanges_messages() -> anyhow::Result<()> {
        let info_hash = [0xaa; 20];
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;

        let (ctx, mut controller_rx) = context(info_hash);
        let (mut session, peer_tx) = PeerSession::new(address, ctx);
        let handle = tokio::spawn(async move { session.start_session(None).await });

        let (stream, _) = listener.accept().await?;
        let mut socket = Framed::new(stream, HandshakeCodec);
        let handshake = socket.next().await.unwrap()?;
        assert_eq!(handshake.info_hash, info_hash);
        socket.send(Handshake::new(info_hash, [2; 20])).await?;

        match controller_rx.recv().await {
            Some(ControllerCommand::Peer { event: PeerEvent::Handshaken { id }, .. }) => assert_eq!(id, [2; 20]),
            other => panic!("expected handshake, got {:?}", other.map(|_| ())),
        }

        let mut ours = Bitfield::new(4);
        ours.set(1, true);
        peer_tx.send(PeerCommand::Admitted { bitfield: ours.clone() })?;

        let mut socket = socket.map_codec(|_| MessageCodec::new(4));
        assert_eq!(socket.next().await.unwrap()?, Message::Bitfield(ours));

        socket.send(Message::Have { idx: 3 }).await?;
        match controller_rx.recv().await {
            Some(ControllerCommand::Peer { event: PeerEvent::Have(3), .. }) => {},
            other => panic!("expected have, got {:?}", other.map(|_| ())),
        }

        // A bitfield after a have closes the connection.
        socket.send(Message::Bitfield(Bitfield::new(4))).await?;
        loop {
            match controller_rx.recv().await {
                Some(ControllerCommand::Peer { event: PeerEvent::Disconnected { error }, .. }) => {
                    assert!(matches!(error, Some(PeerError::UnexpectedBitfield)));
                    break;
                },
                Some(_) => continue,
                None => panic!("controller channel closed"),
            }
        }
        handle.await?;
        Ok(())
    }

    // A session already past the handshake, with the other end of its socket.
    async fn ready_session(
        piece_len: usize,
    ) -> anyhow::Result<(PeerSession, MessageSink, Framed<TcpStream, MessageCodec>, ControllerRx)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let (ours, accepted) = tokio::join!(TcpStream::connect(address), listener.accept());
        let (theirs, _) = accepted?;

        let (ctx, controller_rx) = context_with([0xaa; 20], piece_len);
        let (mut session, _) = PeerSession::new(address, ctx);
        session.state.conn_state = ConnState::Ready;
        let (sink, _) = Framed::new(ours?, MessageCodec::new(4)).split();
        Ok((session, sink, Framed::new(theirs, MessageCodec::new(4)), controller_rx))
    }

    #[tokio::test]
    async fn test_keep_alive_then_idle_timeout() -> anyhow::Result<()> {
        let (mut session, mut sink, mut remote, mut controller_rx) = ready_session(16).await?;
        let start = Instant::now();
        session.last_sent = start;
        session.last_received = start;

        session.tick(&mut sink, start + Duration::from_secs(30)).await?;
        assert_eq!(session.sent, 0);

        session.tick(&mut sink, start + KEEP_ALIVE_INTERVAL).await?;
        assert_eq!(remote.next().await.unwrap()?, Message::KeepAlive);
        match controller_rx.recv().await {
            Some(ControllerCommand::Peer { event: PeerEvent::Traffic { sent, received }, .. }) => {
                assert_eq!((sent, received), (4, 0));
            },
            other => panic!("expected traffic, got {:?}", other.map(|_| ())),
        }

        // Anything read from the peer keeps it alive.
        let last_read = start + Duration::from_secs(100);
        session.last_received = last_read;
        session.tick(&mut sink, start + IDLE_TIMEOUT + Duration::from_secs(1)).await?;
        assert_eq!(remote.next().await.unwrap()?, Message::KeepAlive);

        let result = session.tick(&mut sink, last_read + IDLE_TIMEOUT + Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PeerError::Timeout)));
        Ok(())
    }

    #[tokio::test]
    async fn test_uploads_flush_at_watermark() -> anyhow::Result<()> {
        let piece_len = 3 * BLOCK_SIZE;
        let (mut session, mut sink, mut remote, mut controller_rx) = ready_session(piece_len).await?;

        // Small blocks wait in the buffer until the watermark is crossed.
        let small = Block { piece_idx: 1, offset: 0, data: vec![1; 1000] };
        session.feed_block(&mut sink, small.clone()).await?;
        assert_eq!(session.unflushed, 1013);
        let large = Block { piece_idx: 1, offset: 1000, data: vec![2; BLOCK_SIZE] };
        session.feed_block(&mut sink, large.clone()).await?;
        assert_eq!(session.unflushed, 0);
        assert_eq!(remote.next().await.unwrap()?, Message::Piece(small));
        assert_eq!(remote.next().await.unwrap()?, Message::Piece(large));

        let mut piece = Piece::new(0, piece_len, [0; 20]);
        for (i, byte) in piece.data.iter_mut().enumerate() {
            *byte = (i % 256) as u8;
        }
        let piece = Arc::new(piece);

        assert!(session.upload.resume());
        let requests: Vec<BlockRequest> = piece_requests(0, piece_len).collect();
        for request in &requests {
            assert!(session.upload.on_request(*request));
        }
        session.serve_uploads(&mut sink).await?;
        match controller_rx.recv().await {
            Some(ControllerCommand::Peer { event: PeerEvent::NeedPiece(0), .. }) => {},
            other => panic!("expected piece request, got {:?}", other.map(|_| ())),
        }

        session.upload.push(Arc::clone(&piece));
        session.serve_uploads(&mut sink).await?;
        assert_eq!(session.unflushed, 0);
        for request in requests {
            match remote.next().await.unwrap()? {
                Message::Piece(block) => {
                    assert_eq!(BlockRequest::from_block(&block), request);
                    assert_eq!(block.data, piece.data[request.offset..request.offset + request.len]);
                },
                other => panic!("expected piece, got {:?}", other),
            }
        }
        Ok(())
    }
}
