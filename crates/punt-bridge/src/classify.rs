//! Successor selection for packets received from the external stack.

use crate::error::BridgeError;
use crate::mode::Encap;
use crate::node::NextNode;

/// Pick the successor for a packet whose payload starts with `payload`.
///
/// Ethernet-framed devices always go to Ethernet input. Raw devices are dispatched on the IP
/// version nibble.
pub fn try_classify(encap: Encap, payload: &[u8]) -> Result<NextNode, BridgeError> {
    match encap {
        Encap::Ethernet => Ok(NextNode::EthernetInput),
        Encap::Raw => {
            let first_byte = payload.first().copied().unwrap_or(0);
            match first_byte & 0xf0 {
                0x40 => Ok(NextNode::Ip4Input),
                0x60 => Ok(NextNode::Ip6Input),
                _ => Err(BridgeError::UnknownPacketType { first_byte }),
            }
        }
    }
}

/// Like [`try_classify`], routing unclassifiable packets to [`NextNode::Drop`].
pub fn classify(encap: Encap, payload: &[u8]) -> NextNode {
    try_classify(encap, payload).unwrap_or(NextNode::Drop)
}
