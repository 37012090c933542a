use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use log::{debug, info, warn};
use rosc::{OscMessage, OscPacket, OscType};
use scan_fmt::scan_fmt;
use thiserror::Error;

use crate::cue_list::{ControlSink, CueList};
use crate::dmx_types::{CueError, DMX_CHANNELS};

#[derive(Error, Debug)]
pub enum OscError {
    #[error("Invalid IP:Port formatting")]
    InvalidIpFormatting,
    #[error("Binding Error: {0}")]
    BindingError(String),
    #[error("Invalid control string: {0}. Expected ip:port~/address")]
    InvalidControlString(String),
    #[error("OSC encoding failed: {0}")]
    Encode(String),
    #[error("OSC send failed: {0}")]
    Send(#[from] io::Error),
}

/// Parses `a.b.c.d:port`.
pub fn parse_socket_address(address: &str) -> Result<SocketAddrV4, OscError> {
    match scan_fmt!(address, "{}.{}.{}.{}:{}", u8, u8, u8, u8, u16) {
        Ok((a, b, c, d, port)) => Ok(SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), port)),
        Err(_) => Err(OscError::InvalidIpFormatting),
    }
}

/// Splits a cue control string `ip:port~/address` into target and address.
pub fn parse_control_string(control: &str) -> Result<(SocketAddrV4, String), OscError> {
    let invalid = || OscError::InvalidControlString(control.to_string());
    let (target, address) = control.split_once('~').ok_or_else(invalid)?;
    if !address.starts_with('/') {
        return Err(invalid());
    }
    let target = parse_socket_address(target).map_err(|_| invalid())?;
    Ok((target, address.to_string()))
}

/// A control message understood by the cue list.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    /// `/<page>/dmx/<slot>` with a level of 0.0 - 1.0
    DimmerLevel { address: usize, level: f64 },
    /// `/cue/<number>/start`
    StartCue(f64),
    /// `/cmd.lxconsole/GO` with an argument above zero
    Go,
    Stop,
    Back,
}

fn numeric_arg(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::Float(x) => Some(f64::from(*x)),
        OscType::Double(x) => Some(*x),
        OscType::Int(x) => Some(f64::from(*x)),
        OscType::Long(x) => Some(*x as f64),
        _ => None,
    }
}

impl ControlMessage {
    pub fn parse(message: &OscMessage) -> Option<Self> {
        let addr = message.addr.as_str();
        let first = message.args.first().and_then(numeric_arg);
        let segments = addr.split('/').count();

        if segments == 4 {
            if let Ok((page, slot)) = scan_fmt!(addr, "/{d}/dmx/{d}", usize, usize) {
                return Some(ControlMessage::DimmerLevel {
                    address: page * DMX_CHANNELS + slot + 1,
                    level: first? * 100.0,
                });
            }
            if addr.ends_with("/start") {
                if let Ok(number) = scan_fmt!(addr, "/cue/{f}/start", f64) {
                    return Some(ControlMessage::StartCue(number));
                }
            }
        }
        if segments == 3 {
            if let Ok(command) = scan_fmt!(addr, "/cmd.lxconsole/{}", String) {
                if first? <= 0.0 {
                    return None;
                }
                return match command.as_str() {
                    "GO" => Some(ControlMessage::Go),
                    "STOP" => Some(ControlMessage::Stop),
                    "BACK" => Some(ControlMessage::Back),
                    _ => None,
                };
            }
        }
        None
    }

    pub fn apply(&self, cues: &CueList) -> Result<(), CueError> {
        match self {
            ControlMessage::DimmerLevel { address, level } => {
                cues.set_dimmer_level(*address, *level)
            }
            ControlMessage::StartCue(number) => {
                cues.start_fade_to_cue_number(*number).map(|_| ())
            }
            ControlMessage::Go => cues.start_fade_to(None).map(|_| ()),
            ControlMessage::Stop => {
                cues.stop();
                Ok(())
            }
            ControlMessage::Back => cues.go_back().map(|_| ()),
        }
    }
}

/// Messages of a packet, with bundles flattened.
fn messages(packet: &OscPacket) -> Vec<&OscMessage> {
    match packet {
        OscPacket::Message(message) => vec![message],
        OscPacket::Bundle(bundle) => bundle.content.iter().flat_map(messages).collect(),
    }
}

pub fn handle_packet(packet: &OscPacket, cues: &CueList) {
    for message in messages(packet) {
        match ControlMessage::parse(message) {
            Some(control) => {
                if let Err(e) = control.apply(cues) {
                    debug!("OSC {} ignored: {e}", message.addr);
                }
            }
            None => debug!("Unhandled OSC message {message:?}"),
        }
    }
}

/// Receives OSC control messages on a UDP port and applies them to a cue list.
pub struct OscListener {
    thread_stopper: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl Drop for OscListener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl OscListener {
    /// `address` is `ip:port`; port 0 picks a free one.
    pub fn bind(address: impl Into<String>, cues: CueList) -> Result<Self, OscError> {
        let address = address.into();
        let address = parse_socket_address(&address)?;
        let socket = UdpSocket::bind(address).map_err(|e| OscError::BindingError(e.to_string()))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .map_err(|e| OscError::BindingError(e.to_string()))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| OscError::BindingError(e.to_string()))?;

        let (thread_stopper, stop) = bounded(1);
        let thread_handle = thread::Builder::new()
            .name("osc-listen".to_string())
            .spawn(move || listen(socket, stop, cues))
            .map_err(|e| OscError::BindingError(e.to_string()))?;
        info!("OSC listening on {local_addr}");
        Ok(Self {
            thread_stopper,
            thread_handle: Some(thread_handle),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if self.thread_stopper.send(()).is_err() {
                debug!("OSC thread already stopped");
            }
            if handle.join().is_err() {
                warn!("OSC thread panicked");
            }
            info!("OSC listener stopped");
        }
    }
}

fn listen(socket: UdpSocket, stop: Receiver<()>, cues: CueList) {
    let mut buffer = [0u8; rosc::decoder::MTU];
    loop {
        if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }
        match socket.recv_from(&mut buffer) {
            Ok((size, _)) => match rosc::decoder::decode_udp(&buffer[..size]) {
                Ok((_, packet)) => handle_packet(&packet, &cues),
                Err(e) => debug!("Invalid OSC packet: {e}"),
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                debug!("OSC receive error: {e}");
                if stop.recv_timeout(Duration::from_millis(50)).is_ok() {
                    break;
                }
            }
        }
    }
}

/// Sends cue control strings as argument-less OSC messages.
pub struct OscControlSink {
    socket: UdpSocket,
}

impl OscControlSink {
    pub fn new() -> Result<Self, OscError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .map_err(|e| OscError::BindingError(e.to_string()))?;
        Ok(Self { socket })
    }

    pub fn send(&self, control: &str) -> Result<(), OscError> {
        let (target, addr) = parse_control_string(control)?;
        let packet = OscPacket::Message(OscMessage { addr, args: vec![] });
        let bytes = rosc::encoder::encode(&packet).map_err(|e| OscError::Encode(e.to_string()))?;
        self.socket.send_to(&bytes, target)?;
        debug!("OSC {control} sent");
        Ok(())
    }
}

impl ControlSink for OscControlSink {
    fn send_control_string(&self, control: &str) {
        if let Err(e) = self.send(control) {
            warn!("Could not send control string {control}: {e}");
        }
    }
}
