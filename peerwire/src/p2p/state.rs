#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnState {
    Connecting,
    Handshaking,
    // Handshake exchanged and the controller admitted the peer.
    Ready,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {

    pub conn_state: ConnState,

    // Whether we are refusing the peer's requests.
    pub am_choking: bool,

    // Whether we are interested in the peer's pieces.
    pub am_interested: bool,

    // Whether the peer is refusing our requests.
    pub peer_choking: bool,

    // Whether the peer is interested in our pieces.
    pub peer_interested: bool,

}

impl Default for SessionState {
    fn default() -> SessionState {
        SessionState {
            conn_state: ConnState::Connecting,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}
