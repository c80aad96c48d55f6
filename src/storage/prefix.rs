//! Canonical IP Prefix Keys
//!
//! Every key stored in a trie is a `PrefixKey`: an address family, the
//! address bits and a prefix length. Bits are held high-order aligned in a
//! `u128` for both families, so an IPv4 address occupies the top 32 bits and
//! the trie can walk either family with the same bit arithmetic.
//!
//! Host bits beyond the prefix length are always masked to zero on
//! construction. `10.0.0.5/8` and `10.0.0.0/8` therefore parse to the same key.
//!
//! ## Accepted Text
//!
//! - `10.0.0.0/8`, `2001:db8::/32` - address plus prefix length
//! - `192.168.1.15`, `::1` - a bare address, treated as a host prefix
//!   (`/32` or `/128`)

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when prefix text cannot be turned into a key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrefixError {
    /// The key bytes are not valid UTF-8
    #[error("not valid UTF-8")]
    NotUtf8,

    /// The address part could not be parsed
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// The text after `/` is not a decimal prefix length
    #[error("invalid prefix length '{0}'")]
    InvalidLength(String),

    /// The prefix length is wider than the address family
    #[error("prefix length {len} exceeds {max} bits")]
    LengthOutOfRange { len: u8, max: u8 },
}

/// Address family of a prefix. IPv4 and IPv6 keys live in disjoint key spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// Number of significant address bits for this family.
    pub const fn max_len(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

/// A canonical `(family, bits, length)` prefix.
///
/// Equality, hashing and ordering are derived from the fields directly. This
/// is sound because the constructor masks every bit past `len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefixKey {
    family: Family,
    bits: u128,
    len: u8,
}

impl PrefixKey {
    /// Builds a key from an address and a prefix length, masking host bits.
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, PrefixError> {
        let net = match addr {
            IpAddr::V4(v4) => Ipv4Net::new(v4, len).map(IpNet::V4),
            IpAddr::V6(v6) => Ipv6Net::new(v6, len).map(IpNet::V6),
        }
        .map_err(|_| PrefixError::LengthOutOfRange {
            len,
            max: family_of(&addr).max_len(),
        })?;

        Ok(Self::from(net))
    }

    /// A host prefix covering exactly one address.
    pub fn host(addr: IpAddr) -> Self {
        let family = family_of(&addr);
        Self {
            family,
            bits: addr_bits(&addr),
            len: family.max_len(),
        }
    }

    /// Reassembles a key from trie node parts. Masks host bits.
    pub(crate) fn from_parts(family: Family, bits: u128, len: u8) -> Self {
        Self {
            family,
            bits: canonical(bits, len),
            len,
        }
    }

    /// Parses CIDR text, or a bare address as a host prefix.
    pub fn parse(text: &str) -> Result<Self, PrefixError> {
        let (addr_text, len_text) = match text.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (text, None),
        };

        let addr = IpAddr::from_str(addr_text)
            .map_err(|_| PrefixError::InvalidAddress(addr_text.to_string()))?;

        match len_text {
            None => Ok(Self::host(addr)),
            Some(len_text) => {
                if len_text.is_empty() || !len_text.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(PrefixError::InvalidLength(len_text.to_string()));
                }
                let max = family_of(&addr).max_len();
                let len: u8 = len_text.parse().map_err(|_| PrefixError::LengthOutOfRange {
                    len: u8::MAX,
                    max,
                })?;
                Self::new(addr, len)
            }
        }
    }

    /// Parses a key straight from a request argument.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, PrefixError> {
        let text = std::str::from_utf8(raw).map_err(|_| PrefixError::NotUtf8)?;
        Self::parse(text)
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Address bits, high-order aligned, host bits zeroed.
    pub fn bits(&self) -> u128 {
        self.bits
    }

    /// Prefix length in bits.
    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    /// Returns true if `other` is equal to or more specific than `self`.
    pub fn contains(&self, other: &PrefixKey) -> bool {
        self.family == other.family
            && self.len <= other.len
            && canonical(other.bits, self.len) == self.bits
    }

    /// The network address of the prefix.
    pub fn addr(&self) -> IpAddr {
        match self.family {
            Family::V4 => IpAddr::V4(Ipv4Addr::from((self.bits >> 96) as u32)),
            Family::V6 => IpAddr::V6(Ipv6Addr::from(self.bits)),
        }
    }
}

impl From<IpNet> for PrefixKey {
    fn from(net: IpNet) -> Self {
        let net = net.trunc();
        let addr = net.addr();
        let family = family_of(&addr);
        Self {
            family,
            bits: addr_bits(&addr),
            len: net.prefix_len(),
        }
    }
}

impl FromStr for PrefixKey {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PrefixKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.len)
    }
}

fn family_of(addr: &IpAddr) -> Family {
    match addr {
        IpAddr::V4(_) => Family::V4,
        IpAddr::V6(_) => Family::V6,
    }
}

fn addr_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => (u32::from(*v4) as u128) << 96,
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

// ============================================================================
// Bit helpers shared with the trie
// ============================================================================

/// Mask selecting the leading `len` bits.
#[inline]
pub(crate) fn mask(len: u8) -> u128 {
    if len == 0 {
        0
    } else if len >= 128 {
        !0u128
    } else {
        !(!0u128 >> len)
    }
}

/// Zeroes every bit past `len`.
#[inline]
pub(crate) fn canonical(bits: u128, len: u8) -> u128 {
    bits & mask(len)
}

/// Value of bit `index`, counting from the most significant bit.
#[inline]
pub(crate) fn bit_at(bits: u128, index: u8) -> usize {
    debug_assert!(index < 128);
    ((bits >> (127 - index)) & 1) as usize
}

/// Number of leading bits `a` and `b` share, capped at `max_len`.
#[inline]
pub(crate) fn common_prefix_len(a: u128, b: u128, max_len: u8) -> u8 {
    let diff = canonical(a ^ b, max_len);
    if diff == 0 {
        max_len
    } else {
        (diff.leading_zeros() as u8).min(max_len)
    }
}
