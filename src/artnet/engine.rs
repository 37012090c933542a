use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use thiserror::Error;

use super::codec::{
    ARTNET_PORT, ArtPacket, ArtPoll, ArtPollReply, DmxPacket, PortAddress, broadcast_address_for,
    node_report,
};
use super::nodes::{ArtNetNode, NodeRegistry};
use crate::dmx_output::{OutputError, OutputInterface};
use crate::dmx_types::DMX_CHANNELS;

/// Refresh interval for the output when nothing else triggers a send.
pub const SEND_INTERVAL: Duration = Duration::from_secs(2);
pub const POLL_INTERVAL: Duration = Duration::from_secs(4);
pub const LISTEN_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ArtNetError {
    #[error("Could not bind Art-Net socket: {0}")]
    Bind(#[source] io::Error),
    #[error("Art-Net is unavailable")]
    Unavailable,
    #[error("Art-Net send to {target} failed: {source}")]
    Send {
        target: SocketAddrV4,
        #[source]
        source: io::Error,
    },
    #[error("Invalid DMX address: {0}. Must be between 1 and 512")]
    InvalidAddress(usize),
}

#[derive(Clone, Debug)]
pub struct ArtNetConfig {
    /// Address advertised in poll replies. Unspecified means detect.
    pub local_ip: Ipv4Addr,
    pub bind_ip: Ipv4Addr,
    pub bind_port: u16,
    /// Destination port of output, polls and replies.
    pub peer_port: u16,
    pub address: PortAddress,
    /// Send output only to this node instead of every discovered node.
    pub unicast_target: Option<Ipv4Addr>,
    pub short_name: String,
    pub long_name: String,
}

impl Default for ArtNetConfig {
    fn default() -> Self {
        Self {
            local_ip: Ipv4Addr::UNSPECIFIED,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            bind_port: ARTNET_PORT,
            peer_port: ARTNET_PORT,
            address: PortAddress::default(),
            unicast_target: None,
            short_name: "lx-cue".to_string(),
            long_name: "lx-cue Art-Net controller".to_string(),
        }
    }
}

/// Finds the address of the interface that routes outward.
/// Connecting a UDP socket sends nothing, it only selects the route.
pub fn detect_local_ip() -> Ipv4Addr {
    let route = || -> io::Result<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
        match socket.local_addr()? {
            SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
            _ => Err(io::Error::other("no IPv4 route")),
        }
    };
    route().unwrap_or_else(|e| {
        warn!("Could not detect local IP ({e}), using 127.0.0.1");
        Ipv4Addr::LOCALHOST
    })
}

struct OutputFrame {
    packet: DmxPacket,
    sequence: u8,
    last_send: Option<Instant>,
}

struct ReplyState {
    reply: ArtPollReply,
    counter: u16,
}

struct Shared {
    config: ArtNetConfig,
    socket: Option<UdpSocket>,
    output: Mutex<OutputFrame>,
    nodes: Mutex<NodeRegistry>,
    reply: Mutex<ReplyState>,
    last_poll: Mutex<Option<Instant>>,
}

/// A running loop thread and the channel that stops it.
struct LoopHandle {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl LoopHandle {
    fn spawn(name: &str, shared: Arc<Shared>, body: fn(Arc<Shared>, Receiver<()>)) -> Option<Self> {
        let (stop, stop_rx) = bounded(1);
        match thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(shared, stop_rx))
        {
            Ok(handle) => Some(Self { stop, handle }),
            Err(e) => {
                warn!("Could not start {name} thread: {e}");
                None
            }
        }
    }

    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn stop(self) {
        // the loop may already be gone, in which case the send fails harmlessly
        let _ = self.stop.try_send(());
        if self.handle.join().is_err() {
            warn!("Art-Net loop panicked");
        }
    }
}

/// Art-Net output for one port address.
///
/// One UDP socket is shared by the send loop, which also polls for nodes every
/// [`POLL_INTERVAL`], and the listen loop, which answers polls and records poll
/// replies. Output goes to the unicast target when one is configured, otherwise
/// to every node that has announced our universe.
pub struct ArtNetEngine {
    shared: Arc<Shared>,
    sender: Mutex<Option<LoopHandle>>,
    listener: Mutex<Option<LoopHandle>>,
    setup_error: Option<String>,
}

impl ArtNetEngine {
    /// Binds the socket. A failed bind still returns an engine, which then
    /// reports `is_available() == false` and refuses to send.
    pub fn configure(mut config: ArtNetConfig) -> Self {
        if config.local_ip.is_unspecified() {
            config.local_ip = detect_local_ip();
        }
        let reply = ArtPollReply::for_controller(
            config.local_ip,
            config.address,
            &config.short_name,
            &config.long_name,
        );

        let (socket, setup_error) = match open_socket(&config) {
            Ok(socket) => (Some(socket), None),
            Err(e) => {
                warn!("{e}");
                (None, Some(e.to_string()))
            }
        };
        if let Some(addr) = socket.as_ref().and_then(|s| s.local_addr().ok()) {
            info!(
                "Art-Net on {addr} as {} (net {} subnet {} universe {})",
                config.local_ip, config.address.net, config.address.subnet, config.address.universe
            );
        }

        let output = OutputFrame {
            packet: DmxPacket::new(config.address),
            sequence: 0,
            last_send: None,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                socket,
                output: Mutex::new(output),
                nodes: Mutex::new(NodeRegistry::new()),
                reply: Mutex::new(ReplyState { reply, counter: 0 }),
                last_poll: Mutex::new(None),
            }),
            sender: Mutex::new(None),
            listener: Mutex::new(None),
            setup_error,
        }
    }

    pub fn is_available(&self) -> bool {
        self.shared.socket.is_some()
    }

    pub fn setup_error(&self) -> Option<&str> {
        self.setup_error.as_deref()
    }

    pub fn config(&self) -> &ArtNetConfig {
        &self.shared.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.socket.as_ref()?.local_addr().ok()
    }

    /// Sets one slot of the pending frame, `address` is 1-based.
    pub fn set_value(&self, address: usize, value: u8) -> Result<(), ArtNetError> {
        if address == 0 || address > DMX_CHANNELS {
            return Err(ArtNetError::InvalidAddress(address));
        }
        self.shared.output.lock().packet.set_slot(address - 1, value);
        Ok(())
    }

    pub fn set_values(&self, values: &[u8]) {
        self.shared.output.lock().packet.set_slots(values);
    }

    /// A copy of the pending frame.
    pub fn frame(&self) -> Vec<u8> {
        self.shared.output.lock().packet.data().to_vec()
    }

    /// Sequence number of the last packet sent, 0 before the first.
    pub fn sequence(&self) -> u8 {
        self.shared.output.lock().sequence
    }

    pub fn send_now(&self) -> Result<(), ArtNetError> {
        self.shared.send_frame()
    }

    /// Purges expired nodes and broadcasts an ArtPoll.
    pub fn poll_now(&self) -> Result<(), ArtNetError> {
        self.shared.poll()
    }

    pub fn nodes(&self) -> Vec<ArtNetNode> {
        self.shared.nodes.lock().nodes().to_vec()
    }

    pub fn start_sending(&self) {
        if !self.is_available() {
            warn!("Art-Net unavailable, not sending");
            return;
        }
        let mut sender = self.sender.lock();
        if sender.as_ref().is_some_and(LoopHandle::is_running) {
            return;
        }
        // a loop that ended after a send failure is joined before restarting
        if let Some(finished) = sender.take() {
            finished.stop();
        }
        *sender = LoopHandle::spawn("artnet-send", self.shared.clone(), send_loop);
    }

    /// Blocks until the send loop has exited.
    pub fn stop_sending(&self) {
        let handle = self.sender.lock().take();
        if let Some(handle) = handle {
            handle.stop();
            debug!("Art-Net send loop stopped");
        }
    }

    pub fn is_sending(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(LoopHandle::is_running)
    }

    pub fn start_listening(&self) {
        if !self.is_available() {
            warn!("Art-Net unavailable, not listening");
            return;
        }
        let mut listener = self.listener.lock();
        if listener.as_ref().is_some_and(LoopHandle::is_running) {
            return;
        }
        if let Some(finished) = listener.take() {
            finished.stop();
        }
        *listener = LoopHandle::spawn("artnet-listen", self.shared.clone(), listen_loop);
    }

    pub fn stop_listening(&self) {
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            handle.stop();
            debug!("Art-Net listen loop stopped");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(LoopHandle::is_running)
    }

    pub fn close(&self) {
        self.stop_sending();
        self.stop_listening();
    }
}

impl Drop for ArtNetEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl OutputInterface for ArtNetEngine {
    fn set_value(&self, address: usize, value: u8) -> Result<(), OutputError> {
        Ok(ArtNetEngine::set_value(self, address, value)?)
    }

    fn set_values(&self, values: &[u8]) {
        ArtNetEngine::set_values(self, values);
    }

    fn send_now(&self) -> Result<(), OutputError> {
        Ok(ArtNetEngine::send_now(self)?)
    }

    fn start_sending(&self) {
        ArtNetEngine::start_sending(self);
    }

    fn stop_sending(&self) {
        ArtNetEngine::stop_sending(self);
    }

    fn is_sending(&self) -> bool {
        ArtNetEngine::is_sending(self)
    }

    fn close(&self) {
        ArtNetEngine::close(self);
    }
}

fn open_socket(config: &ArtNetConfig) -> Result<UdpSocket, ArtNetError> {
    let socket =
        UdpSocket::bind((config.bind_ip, config.bind_port)).map_err(ArtNetError::Bind)?;
    socket.set_broadcast(true).map_err(ArtNetError::Bind)?;
    socket
        .set_read_timeout(Some(LISTEN_TIMEOUT))
        .map_err(ArtNetError::Bind)?;
    Ok(socket)
}

impl Shared {
    fn socket(&self) -> Result<&UdpSocket, ArtNetError> {
        self.socket.as_ref().ok_or(ArtNetError::Unavailable)
    }

    fn send_frame(&self) -> Result<(), ArtNetError> {
        let socket = self.socket()?;
        let mut frame = self.output.lock();
        frame.sequence = frame.sequence.wrapping_add(1);
        let sequence = frame.sequence;
        frame.packet.set_sequence(sequence);
        frame.last_send = Some(Instant::now());

        let targets = match self.config.unicast_target {
            Some(ip) => vec![ip],
            None => self.nodes.lock().targets(),
        };
        for ip in targets {
            let target = SocketAddrV4::new(ip, self.config.peer_port);
            socket
                .send_to(frame.packet.as_bytes(), target)
                .map_err(|source| ArtNetError::Send { target, source })?;
        }
        trace!("ArtDmx sequence {sequence} sent");
        Ok(())
    }

    fn poll(&self) -> Result<(), ArtNetError> {
        let socket = self.socket()?;
        let now = Instant::now();
        *self.last_poll.lock() = Some(now);
        for address in self.nodes.lock().purge_expired(now) {
            info!("Art-Net node {address} timed out");
        }
        let target = SocketAddrV4::new(
            broadcast_address_for(self.config.local_ip),
            self.config.peer_port,
        );
        socket
            .send_to(&ArtPoll::default().encode(), target)
            .map_err(|source| ArtNetError::Send { target, source })?;
        trace!("ArtPoll sent to {target}");
        Ok(())
    }

    fn send_poll_reply(&self, poller: Ipv4Addr) -> Result<(), ArtNetError> {
        let socket = self.socket()?;
        let bytes = {
            let mut state = self.reply.lock();
            state.counter = state.counter.wrapping_add(1) % 10_000;
            state.reply.node_report = node_report(state.counter);
            state.reply.encode()
        };
        // loopback has no class broadcast
        let ip = if poller.is_loopback() {
            poller
        } else {
            broadcast_address_for(poller)
        };
        let target = SocketAddrV4::new(ip, self.config.peer_port);
        socket
            .send_to(&bytes, target)
            .map_err(|source| ArtNetError::Send { target, source })?;
        Ok(())
    }

    fn handle_packet(&self, bytes: &[u8], source: SocketAddrV4) {
        let packet = match ArtPacket::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropped packet from {source}: {e}");
                return;
            }
        };
        match packet {
            ArtPacket::Dmx(dmx) => {
                let ip = *source.ip();
                if ip != self.config.local_ip && !ip.is_loopback() {
                    debug!(
                        "ArtDmx from {source}: universe {:?} sequence {}",
                        dmx.address, dmx.sequence
                    );
                }
            }
            ArtPacket::Poll(_) => {
                if let Err(e) = self.send_poll_reply(*source.ip()) {
                    debug!("ArtPollReply failed: {e}");
                }
            }
            ArtPacket::PollReply(reply) => {
                if reply_matches(&self.config, &reply) {
                    let added = self.nodes.lock().refresh(
                        reply.ip,
                        &reply.short_name,
                        &reply.long_name,
                        Instant::now(),
                    );
                    if added {
                        info!("Art-Net node {} ({}) found", reply.ip, reply.short_name);
                    }
                }
            }
        }
    }
}

/// True when a poll reply comes from another node listening to our universe.
fn reply_matches(config: &ArtNetConfig, reply: &ArtPollReply) -> bool {
    reply.ip != config.local_ip
        && reply.net == config.address.net
        && reply.subnet == config.address.subnet
        && reply.outputs_universe(config.address.universe)
}

fn stop_requested(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

fn send_loop(shared: Arc<Shared>, stop: Receiver<()>) {
    debug!("Art-Net send loop started");
    loop {
        if stop_requested(&stop) {
            break;
        }
        let now = Instant::now();
        let since_send = shared
            .output
            .lock()
            .last_send
            .map(|t| now.saturating_duration_since(t));
        let wait = match since_send {
            Some(elapsed) if elapsed < SEND_INTERVAL => SEND_INTERVAL - elapsed,
            _ => {
                if let Err(e) = shared.send_frame() {
                    warn!("Art-Net send loop stopped: {e}");
                    break;
                }
                continue;
            }
        };
        let poll_due = shared
            .last_poll
            .lock()
            .is_none_or(|t| now.saturating_duration_since(t) >= POLL_INTERVAL);
        if poll_due {
            if let Err(e) = shared.poll() {
                debug!("ArtPoll failed: {e}");
            }
            continue;
        }
        match stop.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn listen_loop(shared: Arc<Shared>, stop: Receiver<()>) {
    let Some(socket) = shared.socket.as_ref() else {
        return;
    };
    debug!("Art-Net listen loop started");
    let mut buffer = [0u8; 1024];
    loop {
        if stop_requested(&stop) {
            break;
        }
        match socket.recv_from(&mut buffer) {
            Ok((size, SocketAddr::V4(source))) => shared.handle_packet(&buffer[..size], source),
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                debug!("Art-Net receive error: {e}");
                if stop.recv_timeout(LISTEN_TIMEOUT).is_ok() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artnet::codec::{ArtDmx, DMX_PACKET_LEN, POLL_REPLY_LEN};

    fn loopback_receiver() -> UdpSocket {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn engine_for(receiver: &UdpSocket) -> ArtNetEngine {
        let port = receiver.local_addr().unwrap().port();
        ArtNetEngine::configure(ArtNetConfig {
            local_ip: Ipv4Addr::new(127, 0, 0, 2),
            bind_ip: Ipv4Addr::LOCALHOST,
            bind_port: 0,
            peer_port: port,
            address: PortAddress::new(0, 0, 1),
            unicast_target: Some(Ipv4Addr::LOCALHOST),
            ..Default::default()
        })
    }

    fn receive_dmx(receiver: &UdpSocket) -> ArtDmx {
        let mut buf = [0u8; 1024];
        let (size, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(size, DMX_PACKET_LEN);
        match ArtPacket::decode(&buf[..size]).unwrap() {
            ArtPacket::Dmx(dmx) => dmx,
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn test_sequence_wraps_after_255() {
        let receiver = loopback_receiver();
        let engine = engine_for(&receiver);
        assert!(engine.is_available());

        let mut seen = Vec::new();
        for _ in 0..257 {
            engine.send_now().unwrap();
            seen.push(receive_dmx(&receiver).sequence);
        }
        let expected: Vec<u8> = (1..=255).chain([0, 1]).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_frame_reaches_unicast_target() {
        let receiver = loopback_receiver();
        let engine = engine_for(&receiver);
        engine.set_value(1, 255).unwrap();
        engine.set_value(512, 7).unwrap();
        assert!(matches!(
            engine.set_value(513, 1),
            Err(ArtNetError::InvalidAddress(513))
        ));
        assert!(matches!(
            engine.set_value(0, 1),
            Err(ArtNetError::InvalidAddress(0))
        ));
        engine.send_now().unwrap();

        let dmx = receive_dmx(&receiver);
        assert_eq!(dmx.address, PortAddress::new(0, 0, 1));
        assert_eq!(dmx.data[0], 255);
        assert_eq!(dmx.data[511], 7);
        assert!(dmx.data[1..511].iter().all(|v| *v == 0));
    }

    #[test]
    fn test_no_targets_sends_nothing() {
        let receiver = loopback_receiver();
        let port = receiver.local_addr().unwrap().port();
        let engine = ArtNetEngine::configure(ArtNetConfig {
            local_ip: Ipv4Addr::LOCALHOST,
            bind_ip: Ipv4Addr::LOCALHOST,
            bind_port: 0,
            peer_port: port,
            ..Default::default()
        });
        engine.send_now().unwrap();
        assert_eq!(engine.sequence(), 1);
        receiver
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 1024];
        assert!(receiver.recv_from(&mut buf).is_err());
    }

    #[test]
    fn test_send_loop_start_stop() {
        let receiver = loopback_receiver();
        let engine = engine_for(&receiver);
        engine.start_sending();
        engine.start_sending();
        assert!(engine.is_sending());

        // the first frame goes out as soon as the loop starts
        assert_eq!(receive_dmx(&receiver).sequence, 1);

        engine.stop_sending();
        assert!(!engine.is_sending());
        engine.stop_sending();
    }

    #[test]
    fn test_unavailable_engine_is_inert() {
        let taken = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let engine = ArtNetEngine::configure(ArtNetConfig {
            local_ip: Ipv4Addr::LOCALHOST,
            bind_ip: Ipv4Addr::LOCALHOST,
            bind_port: port,
            ..Default::default()
        });
        assert!(!engine.is_available());
        assert!(engine.setup_error().is_some());
        assert!(matches!(engine.send_now(), Err(ArtNetError::Unavailable)));
        engine.start_sending();
        assert!(!engine.is_sending());
    }

    fn remote_reply(ip: Ipv4Addr, address: PortAddress) -> ArtPollReply {
        ArtPollReply::for_controller(ip, address, "node", "remote node")
    }

    #[test]
    fn test_reply_filtering() {
        let config = ArtNetConfig {
            local_ip: Ipv4Addr::new(10, 0, 0, 1),
            address: PortAddress::new(1, 2, 3),
            ..Default::default()
        };
        let remote = Ipv4Addr::new(10, 0, 0, 9);

        assert!(reply_matches(&config, &remote_reply(remote, config.address)));
        assert!(!reply_matches(
            &config,
            &remote_reply(config.local_ip, config.address)
        ));
        assert!(!reply_matches(
            &config,
            &remote_reply(remote, PortAddress::new(0, 2, 3))
        ));
        assert!(!reply_matches(
            &config,
            &remote_reply(remote, PortAddress::new(1, 0, 3))
        ));
        assert!(!reply_matches(
            &config,
            &remote_reply(remote, PortAddress::new(1, 2, 4))
        ));

        let mut input_only = remote_reply(remote, config.address);
        input_only.port_types[0] = 0x40;
        assert!(!reply_matches(&config, &input_only));
    }

    #[test]
    fn test_listener_registers_nodes() {
        let receiver = loopback_receiver();
        let engine = engine_for(&receiver);
        engine.start_listening();
        assert!(engine.is_listening());

        let node_ip = Ipv4Addr::new(10, 0, 0, 20);
        let Some(SocketAddr::V4(engine_addr)) = engine.local_addr() else {
            panic!("engine has no IPv4 address");
        };
        let reply = remote_reply(node_ip, PortAddress::new(0, 0, 1)).encode();
        receiver.send_to(&reply, engine_addr).unwrap();
        receiver.send_to(b"garbage", engine_addr).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while engine.nodes().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let nodes = engine.nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].address, node_ip);
        assert_eq!(nodes[0].long_name, "remote node");

        engine.stop_listening();
        assert!(!engine.is_listening());
    }

    #[test]
    fn test_poll_is_answered() {
        let receiver = loopback_receiver();
        let engine = engine_for(&receiver);
        engine.start_listening();
        let Some(SocketAddr::V4(engine_addr)) = engine.local_addr() else {
            panic!("engine has no IPv4 address");
        };
        receiver
            .send_to(&ArtPoll::default().encode(), engine_addr)
            .unwrap();

        let mut buf = [0u8; 1024];
        let size = loop {
            let (size, _) = receiver.recv_from(&mut buf).unwrap();
            if size == POLL_REPLY_LEN {
                break size;
            }
        };
        assert_eq!(&buf[0..8], b"Art-Net\0");
        assert_eq!(&buf[8..10], &[0x00, 0x21]);
        let reply = match ArtPacket::decode(&buf[..size]).unwrap() {
            ArtPacket::PollReply(reply) => reply,
            other => panic!("unexpected packet {other:?}"),
        };
        assert_eq!(reply.ip, Ipv4Addr::new(127, 0, 0, 2));
        assert_eq!(reply.net, 0);
        assert_eq!(reply.subnet, 0);
        assert_eq!(reply.sw_out[0], 1);
        assert!(reply.outputs_universe(1));
        engine.stop_listening();
    }

    #[test]
    fn test_poll_purges_expired_nodes() {
        let receiver = loopback_receiver();
        let engine = engine_for(&receiver);
        let now = Instant::now();
        let Some(stale) = now.checked_sub(Duration::from_secs(13)) else {
            return;
        };
        engine
            .shared
            .nodes
            .lock()
            .refresh(Ipv4Addr::new(10, 0, 0, 30), "old", "old node", stale);
        engine
            .shared
            .nodes
            .lock()
            .refresh(Ipv4Addr::new(10, 0, 0, 31), "new", "new node", now);
        assert_eq!(engine.nodes().len(), 2);

        // the broadcast itself may be refused on a loopback-only host
        let _ = engine.poll_now();
        let nodes = engine.nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].address, Ipv4Addr::new(10, 0, 0, 31));
    }
}
