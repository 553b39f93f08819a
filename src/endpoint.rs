use rusb::{Direction, InterfaceDescriptor, TransferType};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    pub fn is_bulk(&self, direction: Direction) -> bool {
        self.direction == direction && self.transfer_type == TransferType::Bulk
    }
}

impl std::fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Endpoint Address: 0x{:02X}, Direction: {:?}, Transfer Type: {:?}, Max Packet Size: {}",
            self.address, self.direction, self.transfer_type, self.max_packet_size
        )
    }
}

pub fn endpoints_of(descriptor: &InterfaceDescriptor<'_>) -> Vec<EndpointInfo> {
    descriptor
        .endpoint_descriptors()
        .map(|endpoint| EndpointInfo {
            address: endpoint.address(),
            direction: endpoint.direction(),
            transfer_type: endpoint.transfer_type(),
            max_packet_size: endpoint.max_packet_size(),
        })
        .collect()
}

/// The endpoint pair a session talks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkPair {
    pub out: EndpointInfo,
    pub input: EndpointInfo,
}

/// Picks the first bulk OUT and the first bulk IN endpoint, in descriptor order.
pub fn select_bulk_pair(interface: u8, endpoints: &[EndpointInfo]) -> Result<BulkPair, Error> {
    let out = endpoints
        .iter()
        .find(|ep| ep.is_bulk(Direction::Out))
        .ok_or(Error::MissingEndpoint { interface, direction: "OUT" })?;
    let input = endpoints
        .iter()
        .find(|ep| ep.is_bulk(Direction::In))
        .ok_or(Error::MissingEndpoint { interface, direction: "IN" })?;

    Ok(BulkPair { out: *out, input: *input })
}
