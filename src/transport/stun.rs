//! Minimal STUN binding codec (RFC 5389)
//!
//! Just enough to learn this host's server-reflexive address from a public
//! reflection server using the same UDP socket the media transport uses.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const MAGIC_COOKIE: u32 = 0x2112_A442;
const MAPPED_ADDRESS: u16 = 0x0001;
const XOR_MAPPED_ADDRESS: u16 = 0x0020;
const HEADER_LEN: usize = 20;

pub type TransactionId = [u8; 12];

/// A binding request with no attributes.
pub fn binding_request(transaction: &TransactionId) -> [u8; HEADER_LEN] {
    let mut req = [0u8; HEADER_LEN];
    req[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    req[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    req[8..20].copy_from_slice(transaction);
    req
}

/// Transaction id of a binding success response, if `msg` is one.
///
/// Lets the socket reader tell our own STUN replies apart from ICE traffic
/// that belongs to the peer connection.
pub fn binding_success_transaction(msg: &[u8]) -> Option<TransactionId> {
    if msg.len() < HEADER_LEN {
        return None;
    }
    if u16::from_be_bytes([msg[0], msg[1]]) != BINDING_SUCCESS {
        return None;
    }
    if u32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]) != MAGIC_COOKIE {
        return None;
    }
    let mut transaction = [0u8; 12];
    transaction.copy_from_slice(&msg[8..20]);
    Some(transaction)
}

/// Extracts the mapped address from a binding success response.
pub fn mapped_address(msg: &[u8]) -> Option<SocketAddr> {
    let transaction = binding_success_transaction(msg)?;

    let msg_len = u16::from_be_bytes([msg[2], msg[3]]) as usize;
    let limit = (HEADER_LEN + msg_len).min(msg.len());
    let mut offset = HEADER_LEN;
    let mut plain = None;

    while offset + 4 <= limit {
        let attr_type = u16::from_be_bytes([msg[offset], msg[offset + 1]]);
        let attr_len = u16::from_be_bytes([msg[offset + 2], msg[offset + 3]]) as usize;
        offset += 4;
        if offset + attr_len > limit {
            break;
        }
        let value = &msg[offset..offset + attr_len];
        match attr_type {
            XOR_MAPPED_ADDRESS => {
                if let Some(addr) = address_value(value, &transaction, true) {
                    return Some(addr);
                }
            }
            MAPPED_ADDRESS => plain = plain.or_else(|| address_value(value, &transaction, false)),
            _ => {}
        }
        // Attributes are padded to 32 bits.
        offset += (attr_len + 3) & !3;
    }

    plain
}

fn address_value(value: &[u8], transaction: &TransactionId, xor: bool) -> Option<SocketAddr> {
    if value.len() < 8 {
        return None;
    }
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if xor {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    let ip = match value[1] {
        0x01 => {
            let mut octets = [value[4], value[5], value[6], value[7]];
            if xor {
                for (o, c) in octets.iter_mut().zip(cookie.iter()) {
                    *o ^= c;
                }
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        0x02 if value.len() >= 20 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&value[4..20]);
            if xor {
                let mask = cookie.iter().chain(transaction.iter());
                for (o, m) in octets.iter_mut().zip(mask) {
                    *o ^= m;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };

    Some(SocketAddr::new(ip, port))
}
