//! Art-Net packet layouts (ArtDmx, ArtPoll, ArtPollReply).
//!
//! Opcodes are little-endian, protocol version and DMX length big-endian.
//! Every packet starts with the `Art-Net\0` signature, which is checked before
//! the opcode is looked at.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::dmx_types::DMX_CHANNELS;

pub const ARTNET_PORT: u16 = 0x1936;
pub const HEADER: &[u8; 8] = b"Art-Net\0";
pub const PROTOCOL_VERSION: u16 = 14;

pub const OP_POLL: u16 = 0x2000;
pub const OP_POLL_REPLY: u16 = 0x2100;
pub const OP_DMX: u16 = 0x5000;

pub const DMX_HEADER_LEN: usize = 18;
pub const DMX_PACKET_LEN: usize = DMX_HEADER_LEN + DMX_CHANNELS;
pub const POLL_PACKET_LEN: usize = 14;
pub const POLL_REPLY_LEN: usize = 239;
/// Shortest reply still carrying the port tables (through SwOut).
const MIN_POLL_REPLY_LEN: usize = 194;

/// ArtPoll flags: send ArtPollReply whenever node conditions change.
pub const POLL_FLAG_REPLY_ON_CHANGE: u8 = 0x02;
/// PortTypes bit 7: the port can output DMX received from the network.
pub const PORT_CAN_OUTPUT: u8 = 0x80;
/// GoodOutput bit 7: the port is transmitting data.
pub const GOOD_OUTPUT_TRANSMITTING: u8 = 0x80;
pub const STYLE_CONTROLLER: u8 = 0x01;
/// ESTA prototype range.
pub const ESTA_CODE: u16 = 0x7FF0;
pub const OEM_CODE: u16 = 0x00FF;

const SHORT_NAME_LEN: usize = 18;
const LONG_NAME_LEN: usize = 64;
const NODE_REPORT_LEN: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Not an Art-Net packet")]
    BadSignature,
    #[error("Truncated packet: {len} bytes for opcode {opcode:#06x}")]
    Truncated { opcode: u16, len: usize },
    #[error("Unknown opcode {0:#06x}")]
    UnknownOpcode(u16),
}

/// Net (7 bits), sub-net (4 bits) and universe (4 bits) of one port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PortAddress {
    pub net: u8,
    pub subnet: u8,
    pub universe: u8,
}

impl PortAddress {
    /// Out of range values are masked into their field.
    pub fn new(net: u8, subnet: u8, universe: u8) -> Self {
        Self {
            net: net & 0x7F,
            subnet: subnet & 0x0F,
            universe: universe & 0x0F,
        }
    }

    /// The SubUni byte of an ArtDmx packet.
    pub fn sub_uni(&self) -> u8 {
        self.universe | (self.subnet << 4)
    }

    pub fn from_bytes(sub_uni: u8, net: u8) -> Self {
        Self::new(net, sub_uni >> 4, sub_uni & 0x0F)
    }
}

/// An ArtDmx packet kept fully laid out, so sending is a plain buffer write.
#[derive(Clone, Debug)]
pub struct DmxPacket {
    bytes: [u8; DMX_PACKET_LEN],
}

impl DmxPacket {
    pub fn new(address: PortAddress) -> Self {
        let mut bytes = [0u8; DMX_PACKET_LEN];
        bytes[0..8].copy_from_slice(HEADER);
        bytes[8..10].copy_from_slice(&OP_DMX.to_le_bytes());
        bytes[10..12].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        bytes[12] = 0; // sequence
        bytes[13] = 0; // physical
        bytes[14] = address.sub_uni();
        bytes[15] = address.net;
        bytes[16..18].copy_from_slice(&(DMX_CHANNELS as u16).to_be_bytes());
        Self { bytes }
    }

    pub fn sequence(&self) -> u8 {
        self.bytes[12]
    }

    pub fn set_sequence(&mut self, sequence: u8) {
        self.bytes[12] = sequence;
    }

    /// Sets one slot by 0-based index. Returns false when out of range.
    pub fn set_slot(&mut self, index: usize, value: u8) -> bool {
        match self.data_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Copies up to 512 values starting at slot 0.
    pub fn set_slots(&mut self, values: &[u8]) {
        self.data_mut()
            .iter_mut()
            .zip(values)
            .for_each(|(slot, value)| *slot = *value);
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[DMX_HEADER_LEN..]
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[DMX_HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtDmx {
    pub sequence: u8,
    pub physical: u8,
    pub address: PortAddress,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArtPoll {
    pub flags: u8,
    pub priority: u8,
}

impl ArtPoll {
    pub fn encode(&self) -> [u8; POLL_PACKET_LEN] {
        let mut bytes = [0u8; POLL_PACKET_LEN];
        bytes[0..8].copy_from_slice(HEADER);
        bytes[8..10].copy_from_slice(&OP_POLL.to_le_bytes());
        bytes[10..12].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        bytes[12] = self.flags;
        bytes[13] = self.priority;
        bytes
    }
}

impl Default for ArtPoll {
    fn default() -> Self {
        Self {
            flags: POLL_FLAG_REPLY_ON_CHANGE,
            priority: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtPollReply {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub net: u8,
    pub subnet: u8,
    pub short_name: String,
    pub long_name: String,
    pub node_report: String,
    pub num_ports: u16,
    pub port_types: [u8; 4],
    pub good_output: [u8; 4],
    pub sw_out: [u8; 4],
    pub style: u8,
}

impl ArtPollReply {
    /// Reply advertising one output port for `address`.
    pub fn for_controller(
        ip: Ipv4Addr,
        address: PortAddress,
        short_name: &str,
        long_name: &str,
    ) -> Self {
        Self {
            ip,
            port: ARTNET_PORT,
            net: address.net,
            subnet: address.subnet,
            short_name: short_name.to_string(),
            long_name: long_name.to_string(),
            node_report: node_report(0),
            num_ports: 1,
            port_types: [PORT_CAN_OUTPUT, 0, 0, 0],
            good_output: [GOOD_OUTPUT_TRANSMITTING, 0, 0, 0],
            sw_out: [address.universe, 0, 0, 0],
            style: STYLE_CONTROLLER,
        }
    }

    /// True when some advertised port outputs `universe` from the network.
    pub fn outputs_universe(&self, universe: u8) -> bool {
        let ports = usize::from(self.num_ports).min(4);
        (0..ports).any(|i| {
            self.port_types[i] & PORT_CAN_OUTPUT != 0 && self.sw_out[i] & 0x0F == universe
        })
    }

    pub fn encode(&self) -> [u8; POLL_REPLY_LEN] {
        let mut bytes = [0u8; POLL_REPLY_LEN];
        bytes[0..8].copy_from_slice(HEADER);
        bytes[8..10].copy_from_slice(&OP_POLL_REPLY.to_le_bytes());
        bytes[10..14].copy_from_slice(&self.ip.octets());
        bytes[14..16].copy_from_slice(&self.port.to_le_bytes());
        // 16..18 firmware version stays 0
        bytes[18] = self.net & 0x7F;
        bytes[19] = self.subnet & 0x0F;
        bytes[20..22].copy_from_slice(&OEM_CODE.to_be_bytes());
        bytes[22] = 0; // UBEA
        bytes[23] = 0; // Status1
        bytes[24..26].copy_from_slice(&ESTA_CODE.to_le_bytes());
        write_name(&mut bytes[26..26 + SHORT_NAME_LEN], &self.short_name);
        write_name(&mut bytes[44..44 + LONG_NAME_LEN], &self.long_name);
        write_name(&mut bytes[108..108 + NODE_REPORT_LEN], &self.node_report);
        bytes[172..174].copy_from_slice(&self.num_ports.to_be_bytes());
        bytes[174..178].copy_from_slice(&self.port_types);
        // 178..182 GoodInput, 186..190 SwIn stay 0
        bytes[182..186].copy_from_slice(&self.good_output);
        bytes[190..194].copy_from_slice(&self.sw_out);
        bytes[200] = self.style;
        bytes[207..211].copy_from_slice(&self.ip.octets());
        bytes[211] = 1; // BindIndex
        bytes[212] = 0x08; // Status2: supports 15 bit port addresses
        bytes
    }
}

/// ArtPollReply NodeReport text with a rolling counter.
pub fn node_report(counter: u16) -> String {
    format!("#0001 [{:04}] OK", counter % 10_000)
}

/// Null-padded ASCII; always leaves room for the terminating zero.
fn write_name(field: &mut [u8], name: &str) {
    let len = name.len().min(field.len().saturating_sub(1));
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
}

fn read_name(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).to_string()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArtPacket {
    Dmx(ArtDmx),
    Poll(ArtPoll),
    PollReply(ArtPollReply),
}

impl ArtPacket {
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER.len() || &buf[..HEADER.len()] != HEADER {
            return Err(CodecError::BadSignature);
        }
        if buf.len() < 10 {
            return Err(CodecError::Truncated {
                opcode: 0,
                len: buf.len(),
            });
        }
        let opcode = u16::from_le_bytes([buf[8], buf[9]]);
        let truncated = CodecError::Truncated {
            opcode,
            len: buf.len(),
        };
        match opcode {
            OP_DMX => {
                if buf.len() < DMX_HEADER_LEN {
                    return Err(truncated);
                }
                let length = usize::from(u16::from_be_bytes([buf[16], buf[17]])).min(DMX_CHANNELS);
                let data = buf
                    .get(DMX_HEADER_LEN..DMX_HEADER_LEN + length)
                    .ok_or(truncated)?;
                Ok(ArtPacket::Dmx(ArtDmx {
                    sequence: buf[12],
                    physical: buf[13],
                    address: PortAddress::from_bytes(buf[14], buf[15]),
                    data: data.to_vec(),
                }))
            }
            OP_POLL => {
                if buf.len() < POLL_PACKET_LEN {
                    return Err(truncated);
                }
                Ok(ArtPacket::Poll(ArtPoll {
                    flags: buf[12],
                    priority: buf[13],
                }))
            }
            OP_POLL_REPLY => {
                if buf.len() < MIN_POLL_REPLY_LEN {
                    return Err(truncated);
                }
                let quad = |at: usize| [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]];
                Ok(ArtPacket::PollReply(ArtPollReply {
                    ip: Ipv4Addr::new(buf[10], buf[11], buf[12], buf[13]),
                    port: u16::from_le_bytes([buf[14], buf[15]]),
                    net: buf[18] & 0x7F,
                    subnet: buf[19] & 0x0F,
                    short_name: read_name(&buf[26..26 + SHORT_NAME_LEN]),
                    long_name: read_name(&buf[44..44 + LONG_NAME_LEN]),
                    node_report: read_name(&buf[108..108 + NODE_REPORT_LEN]),
                    num_ports: u16::from_be_bytes([buf[172], buf[173]]),
                    port_types: quad(174),
                    good_output: quad(182),
                    sw_out: quad(190),
                    style: buf.get(200).copied().unwrap_or_default(),
                }))
            }
            other => Err(CodecError::UnknownOpcode(other)),
        }
    }
}

/// Broadcast address of `ip`'s classful network; all-ones outside A/B/C.
pub fn broadcast_address_for(ip: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    match a {
        1..=126 => Ipv4Addr::new(a, 255, 255, 255),
        128..=191 => Ipv4Addr::new(a, b, 255, 255),
        192..=223 => Ipv4Addr::new(a, b, c, 255),
        _ => Ipv4Addr::BROADCAST,
    }
}
