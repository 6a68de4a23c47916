//! Labeled IPv4/UDP datagrams.
//!
//! A [`LabeledDatagram`] is encoded as a complete IPv4 packet, ready for a raw
//! socket with header inclusion:
//!
//! ```text
//! +----------------------+-------------------------+------------+---------+
//! | IPv4 header (20 B)   | CIPSO option (optional) | UDP header | payload |
//! +----------------------+-------------------------+------------+---------+
//! ```
//!
//! The label travels in a CIPSO security option (type 134) with a single
//! restricted bitmap tag (type 1): one octet of sensitivity level followed by
//! a category bitmap where bit 0 is the most significant bit of the first
//! octet. Options are padded to a 4-byte boundary with end-of-list octets.
//!
//! Both checksums are derived here and verified on decode; callers never
//! compute them. A UDP checksum of zero means "not computed" and is accepted.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::{
    error::PacketError,
    label::{Category, Label, Level},
};

pub const IPV4_VERSION: u8 = 4;
pub const PROTOCOL_UDP: u8 = 17;
pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const DEFAULT_TTL: u8 = 64;
pub const DEFAULT_DOI: u32 = 1;

pub const CIPSO_OPTION_TYPE: u8 = 134;
pub const CIPSO_TAG_RESTRICTED_BITMAP: u8 = 1;
pub const MAX_CIPSO_LEVEL: Level = 255;
pub const MAX_CIPSO_CATEGORY: Category = 239;

const IPOPT_END: u8 = 0;
const IPOPT_NOP: u8 = 1;
const CIPSO_HEADER_LEN: usize = 6;
const CIPSO_TAG_HEADER_LEN: usize = 4;
const CHECKSUM_OFFSET: usize = 10;
const UDP_CHECKSUM_OFFSET: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledDatagram {
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    pub identification: u16,
    pub ttl: u8,
    /// Domain of interpretation of the security option
    pub doi: u32,
    /// `None` for datagrams without a security option
    pub label: Option<Label>,
    pub payload: Vec<u8>,
}

impl LabeledDatagram {
    pub fn new(source: SocketAddrV4, destination: SocketAddrV4, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            destination,
            identification: 0,
            ttl: DEFAULT_TTL,
            doi: DEFAULT_DOI,
            label: None,
            payload: payload.into(),
        }
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_identification(mut self, identification: u16) -> Self {
        self.identification = identification;
        self
    }

    /// Serializes the datagram, including both checksums.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut options = match &self.label {
            Some(label) => encode_security_option(label, self.doi)?,
            None => Vec::new(),
        };
        options.resize(options.len().next_multiple_of(4), IPOPT_END);

        let header_len = IPV4_MIN_HEADER_LEN + options.len();
        let total_len = header_len + UDP_HEADER_LEN + self.payload.len();
        let total = u16::try_from(total_len)
            .map_err(|_| PacketError::PayloadTooLarge(self.payload.len()))?;
        let udp_len = total - header_len as u16;

        let mut packet = Vec::with_capacity(total_len);
        packet.push((IPV4_VERSION << 4) | (header_len / 4) as u8);
        packet.push(0); // type of service
        packet.extend_from_slice(&total.to_be_bytes());
        packet.extend_from_slice(&self.identification.to_be_bytes());
        packet.extend_from_slice(&[0, 0]); // flags, fragment offset
        packet.push(self.ttl);
        packet.push(PROTOCOL_UDP);
        packet.extend_from_slice(&[0, 0]);
        packet.extend_from_slice(&self.source.ip().octets());
        packet.extend_from_slice(&self.destination.ip().octets());
        packet.extend_from_slice(&options);
        let checksum = internet_checksum(&packet[..header_len]);
        packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());

        packet.extend_from_slice(&self.source.port().to_be_bytes());
        packet.extend_from_slice(&self.destination.port().to_be_bytes());
        packet.extend_from_slice(&udp_len.to_be_bytes());
        packet.extend_from_slice(&[0, 0]);
        packet.extend_from_slice(&self.payload);
        let pseudo = pseudo_header(*self.source.ip(), *self.destination.ip(), udp_len);
        // A computed zero is transmitted as all ones, zero means "no checksum"
        let udp_checksum = match checksum_parts(&[&pseudo[..], &packet[header_len..]]) {
            0 => 0xffff,
            sum => sum,
        };
        let offset = header_len + UDP_CHECKSUM_OFFSET;
        packet[offset..offset + 2].copy_from_slice(&udp_checksum.to_be_bytes());

        Ok(packet)
    }

    /// Parses and verifies an IPv4 packet carrying a UDP datagram.
    ///
    /// Bytes past the IPv4 total length are ignored.
    pub fn decode(packet: &[u8]) -> Result<Self, PacketError> {
        ensure_len(packet, IPV4_MIN_HEADER_LEN)?;
        let version = packet[0] >> 4;
        if version != IPV4_VERSION {
            return Err(PacketError::NotIpv4(version));
        }
        let header_len = usize::from(packet[0] & 0x0f) * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return Err(PacketError::MalformedOption(format!("header length {header_len}")));
        }
        ensure_len(packet, header_len)?;

        let header = &packet[..header_len];
        if internet_checksum(header) != 0 {
            let mut zeroed = header.to_vec();
            zeroed[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].fill(0);
            return Err(PacketError::HeaderChecksum { computed: internet_checksum(&zeroed) });
        }
        if header[9] != PROTOCOL_UDP {
            return Err(PacketError::NotUdp(header[9]));
        }

        let total_len = usize::from(read_u16(header, 2));
        ensure_len(packet, total_len.max(header_len + UDP_HEADER_LEN))?;
        let source_ip = Ipv4Addr::new(header[12], header[13], header[14], header[15]);
        let destination_ip = Ipv4Addr::new(header[16], header[17], header[18], header[19]);
        let (doi, label) = match decode_options(&header[IPV4_MIN_HEADER_LEN..])? {
            Some((doi, label)) => (doi, Some(label)),
            None => (DEFAULT_DOI, None),
        };

        let udp = &packet[header_len..total_len.max(header_len)];
        ensure_len(udp, UDP_HEADER_LEN)?;
        let udp_len = usize::from(read_u16(udp, 4));
        if udp_len < UDP_HEADER_LEN {
            return Err(PacketError::Truncated { needed: UDP_HEADER_LEN, available: udp_len });
        }
        ensure_len(udp, udp_len)?;
        let udp = &udp[..udp_len];

        if read_u16(udp, UDP_CHECKSUM_OFFSET) != 0 {
            let pseudo = pseudo_header(source_ip, destination_ip, udp_len as u16);
            if checksum_parts(&[&pseudo[..], udp]) != 0 {
                let mut zeroed = udp.to_vec();
                zeroed[UDP_CHECKSUM_OFFSET..UDP_CHECKSUM_OFFSET + 2].fill(0);
                return Err(PacketError::UdpChecksum {
                    computed: checksum_parts(&[&pseudo[..], &zeroed[..]]),
                });
            }
        }

        Ok(Self {
            source: SocketAddrV4::new(source_ip, read_u16(udp, 0)),
            destination: SocketAddrV4::new(destination_ip, read_u16(udp, 2)),
            identification: read_u16(header, 4),
            ttl: header[8],
            doi,
            label,
            payload: udp[UDP_HEADER_LEN..].to_vec(),
        })
    }
}

/// RFC 1071 checksum of `data`.
///
/// Verifying data that embeds its own checksum yields zero.
pub fn internet_checksum(data: &[u8]) -> u16 {
    checksum_parts(&[data])
}

/// Checksum over the concatenation of `chunks`; all but the last must have an even length.
fn checksum_parts(chunks: &[&[u8]]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in chunks {
        let mut words = chunk.chunks_exact(2);
        for word in &mut words {
            sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        }
        if let [last] = words.remainder() {
            sum += u32::from(*last) << 8;
        }
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn pseudo_header(source: Ipv4Addr, destination: Ipv4Addr, udp_len: u16) -> [u8; 12] {
    let mut pseudo = [0u8; 12];
    pseudo[..4].copy_from_slice(&source.octets());
    pseudo[4..8].copy_from_slice(&destination.octets());
    pseudo[9] = PROTOCOL_UDP;
    pseudo[10..].copy_from_slice(&udp_len.to_be_bytes());
    pseudo
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn ensure_len(bytes: &[u8], needed: usize) -> Result<(), PacketError> {
    if bytes.len() < needed {
        return Err(PacketError::Truncated { needed, available: bytes.len() });
    }
    Ok(())
}

fn encode_security_option(label: &Label, doi: u32) -> Result<Vec<u8>, PacketError> {
    let level = u8::try_from(label.level()).map_err(|_| {
        PacketError::LabelNotRepresentable(format!(
            "level {} above {MAX_CIPSO_LEVEL}",
            label.level()
        ))
    })?;

    let mut bitmap: Vec<u8> = Vec::new();
    for &category in label.categories() {
        if category > MAX_CIPSO_CATEGORY {
            return Err(PacketError::LabelNotRepresentable(format!(
                "category {category} above {MAX_CIPSO_CATEGORY}"
            )));
        }
        let octet = usize::from(category / 8);
        if bitmap.len() <= octet {
            bitmap.resize(octet + 1, 0);
        }
        bitmap[octet] |= 0x80u8 >> (category % 8);
    }

    let tag_len = CIPSO_TAG_HEADER_LEN + bitmap.len();
    let option_len = CIPSO_HEADER_LEN + tag_len;
    let mut option = Vec::with_capacity(option_len);
    option.push(CIPSO_OPTION_TYPE);
    option.push(option_len as u8);
    option.extend_from_slice(&doi.to_be_bytes());
    option.push(CIPSO_TAG_RESTRICTED_BITMAP);
    option.push(tag_len as u8);
    option.push(0); // alignment octet
    option.push(level);
    option.extend_from_slice(&bitmap);
    Ok(option)
}

/// Walks the IPv4 options and extracts the security option, if any.
fn decode_options(mut options: &[u8]) -> Result<Option<(u32, Label)>, PacketError> {
    let mut found = None;
    while let Some(&kind) = options.first() {
        match kind {
            IPOPT_END => break,
            IPOPT_NOP => {
                options = &options[1..];
                continue;
            }
            _ => {}
        }
        let len = usize::from(*options.get(1).ok_or_else(|| {
            PacketError::MalformedOption(format!("option {kind} without length"))
        })?);
        if len < 2 || len > options.len() {
            return Err(PacketError::MalformedOption(format!("option {kind} with length {len}")));
        }
        let (option, rest) = options.split_at(len);
        if kind == CIPSO_OPTION_TYPE {
            if found.is_some() {
                return Err(PacketError::MalformedOption("duplicate security option".to_string()));
            }
            found = Some(decode_security_option(option)?);
        }
        options = rest;
    }
    Ok(found)
}

fn decode_security_option(option: &[u8]) -> Result<(u32, Label), PacketError> {
    if option.len() < CIPSO_HEADER_LEN + CIPSO_TAG_HEADER_LEN {
        return Err(PacketError::MalformedOption("security option without tag".to_string()));
    }
    let doi = u32::from_be_bytes([option[2], option[3], option[4], option[5]]);
    let tag = &option[CIPSO_HEADER_LEN..];
    if tag[0] != CIPSO_TAG_RESTRICTED_BITMAP {
        return Err(PacketError::MalformedOption(format!("unsupported tag type {}", tag[0])));
    }
    if usize::from(tag[1]) != tag.len() {
        return Err(PacketError::MalformedOption(format!(
            "tag length {} in a {} byte tag area",
            tag[1],
            tag.len()
        )));
    }

    let mut categories = Vec::new();
    for (base, octet) in (0..).step_by(8).zip(&tag[CIPSO_TAG_HEADER_LEN..]) {
        for bit in 0..8u16 {
            if octet & (0x80u8 >> bit) != 0 {
                categories.push(base + bit);
            }
        }
    }
    Ok((doi, Label::object(Level::from(tag[3]), categories)))
}
