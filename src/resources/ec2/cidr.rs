//! Sequential IPv4 subnet allocation.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};

/// Hands out consecutive subnets of a network, each aligned to its own size.
///
/// A /20 requested after a /24 skips ahead to the next /20 boundary, so
/// mixed sizes never overlap.
#[derive(Debug, Clone)]
pub struct CidrAllocator {
    network: Ipv4Net,
    next: u64,
}

impl CidrAllocator {
    /// Start allocating at the beginning of `network`.
    pub fn new(network: Ipv4Net) -> Self {
        let network = network.trunc();
        Self {
            next: u64::from(u32::from(network.network())),
            network,
        }
    }

    /// The enclosing network.
    pub fn network(&self) -> Ipv4Net {
        self.network
    }

    /// Allocate the next free block of the given prefix length.
    pub fn allocate(&mut self, prefix: u8) -> Result<Ipv4Net> {
        let exhausted = || Error::CidrExhausted {
            cidr: self.network.to_string(),
            prefix,
        };

        if prefix > 32 || prefix < self.network.prefix_len() {
            return Err(exhausted());
        }

        let size = 1u64 << (32 - u32::from(prefix));
        let start = self.next.div_ceil(size) * size;
        let end = start + size - 1;
        if end > u64::from(u32::from(self.network.broadcast())) {
            return Err(exhausted());
        }

        let addr = u32::try_from(start).map_err(|_| exhausted())?;
        let block = Ipv4Net::new(Ipv4Addr::from(addr), prefix).map_err(|_| exhausted())?;
        self.next = end + 1;
        Ok(block)
    }

    /// Allocate `count` consecutive blocks of the same size.
    pub fn allocate_many(&mut self, prefix: u8, count: usize) -> Result<Vec<Ipv4Net>> {
        (0..count).map(|_| self.allocate(prefix)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn test_reserved_az_layout() {
        let mut alloc = CidrAllocator::new(net("10.0.0.0/16"));
        let public = alloc.allocate_many(20, 4).unwrap();
        let private = alloc.allocate_many(20, 4).unwrap();
        let isolated = alloc.allocate_many(24, 4).unwrap();

        assert_eq!(public[0], net("10.0.0.0/20"));
        assert_eq!(public[1], net("10.0.16.0/20"));
        assert_eq!(private[0], net("10.0.64.0/20"));
        assert_eq!(private[1], net("10.0.80.0/20"));
        assert_eq!(isolated[0], net("10.0.128.0/24"));
        assert_eq!(isolated[1], net("10.0.129.0/24"));
    }

    #[test]
    fn test_alignment_after_smaller_block() {
        let mut alloc = CidrAllocator::new(net("10.0.0.0/16"));
        assert_eq!(alloc.allocate(24).unwrap(), net("10.0.0.0/24"));
        assert_eq!(alloc.allocate(20).unwrap(), net("10.0.16.0/20"));
    }

    #[test]
    fn test_exhaustion() {
        let mut alloc = CidrAllocator::new(net("10.0.0.0/22"));
        alloc.allocate_many(24, 4).unwrap();
        assert!(matches!(
            alloc.allocate(24),
            Err(Error::CidrExhausted { prefix: 24, .. })
        ));
        assert!(CidrAllocator::new(net("10.0.0.0/22")).allocate(20).is_err());
    }

    #[test]
    fn test_end_of_address_space() {
        let mut alloc = CidrAllocator::new(net("255.255.255.0/24"));
        assert_eq!(alloc.allocate(25).unwrap(), net("255.255.255.0/25"));
        assert_eq!(alloc.allocate(25).unwrap(), net("255.255.255.128/25"));
        assert!(alloc.allocate(25).is_err());
    }
}
