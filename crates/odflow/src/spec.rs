//! Prefix-pair specs and the bit-level primitives the lattice walk is built
//! on: truncation to a prefix length, masked comparison, and the overlap
//! test between two origin-destination pairs.

use std::cmp::min;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Spec byte storage is sized for the largest family (IPv6).
pub const MAX_SPEC_LEN: usize = 16;

/// Mask selecting the high-order `len & 7` bits of a fractional byte.
const PREFIX_MASK: [u8; 8] = [0x00, 0x80, 0xc0, 0xe0, 0xf0, 0xf8, 0xfc, 0xfe];

/// The three key spaces flows are aggregated in. `Proto` keys are laid out
/// as `[protocol, port_hi, port_lo]` with prefix lengths 0 (wildcard),
/// 8 (protocol only), 24 (protocol and port), or 8..24 for a port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrFamily {
    Inet,
    Inet6,
    Proto,
}

impl AddrFamily {
    /// Number of significant spec bytes for this family.
    pub fn spec_bytes(&self) -> usize {
        match self {
            AddrFamily::Inet => 4,
            AddrFamily::Inet6 => 16,
            AddrFamily::Proto => 3,
        }
    }

    /// The finest prefix length a spec of this family can carry.
    pub fn max_prefix(&self) -> u8 {
        match self {
            AddrFamily::Inet => 32,
            AddrFamily::Inet6 => 128,
            AddrFamily::Proto => 24,
        }
    }
}

impl fmt::Display for AddrFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrFamily::Inet => f.write_str("inet"),
            AddrFamily::Inet6 => f.write_str("inet6"),
            AddrFamily::Proto => f.write_str("proto"),
        }
    }
}

/// A source/destination prefix pair. Equality covers all four fields, so a
/// /24 and a /32 over the same bytes are distinct specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FlowSpec {
    pub src: [u8; MAX_SPEC_LEN],
    pub dst: [u8; MAX_SPEC_LEN],
    pub srclen: u8,
    pub dstlen: u8,
}

impl FlowSpec {
    /// Builds the spec covering `self` at the coarser prefix lengths
    /// `label`, zeroing every bit below each length.
    pub fn truncate(&self, label: (u8, u8)) -> FlowSpec {
        FlowSpec {
            src: prefix_set(&self.src, label.0),
            dst: prefix_set(&self.dst, label.1),
            srclen: label.0,
            dstlen: label.1,
        }
    }

    /// Two prefix pairs overlap when, in both dimensions, they agree on the
    /// shorter of the two prefix lengths.
    pub fn overlaps(&self, other: &FlowSpec) -> bool {
        prefix_eq(&self.src, &other.src, min(self.srclen, other.srclen))
            && prefix_eq(&self.dst, &other.dst, min(self.dstlen, other.dstlen))
    }

    /// Sum of the two prefix lengths; the sort key of the lattice walk.
    pub fn len_sum(&self) -> u16 {
        self.srclen as u16 + self.dstlen as u16
    }

    /// Renders the spec in Aguri notation for the given family.
    pub fn display(&self, af: AddrFamily) -> SpecDisplay<'_> {
        SpecDisplay { spec: self, af }
    }
}

/// Copies the first `len` bits of `from`, masking the fractional byte and
/// zero-filling the remainder. Idempotent for a fixed `len`.
pub fn prefix_set(from: &[u8; MAX_SPEC_LEN], len: u8) -> [u8; MAX_SPEC_LEN] {
    let mut out = [0u8; MAX_SPEC_LEN];
    let bytes = (len / 8) as usize;
    let bits = (len & 7) as usize;
    out[..bytes].copy_from_slice(&from[..bytes]);
    if bits != 0 {
        out[bytes] = from[bytes] & PREFIX_MASK[bits];
    }
    out
}

/// True when `a` and `b` agree on their first `len` bits.
pub fn prefix_eq(a: &[u8; MAX_SPEC_LEN], b: &[u8; MAX_SPEC_LEN], len: u8) -> bool {
    let bytes = (len / 8) as usize;
    let bits = (len & 7) as usize;
    if a[..bytes] != b[..bytes] {
        return false;
    }
    bits == 0 || (a[bytes] ^ b[bytes]) & PREFIX_MASK[bits] == 0
}

#[derive(Debug, thiserror::Error)]
pub enum SpecParseError {
    #[error("unrecognized address {0:?}")]
    BadAddress(String),
    #[error("bad prefix length in {0:?}")]
    BadPrefixLen(String),
    #[error("bad protocol number {0:?}")]
    BadProto(String),
    #[error("bad port {0:?}")]
    BadPort(String),
}

/// Parses one side of an address pair: `a.b.c.d[/len]`, `h:h::h[/len]`,
/// `*` (IPv4 wildcard) or `*::` (IPv6 wildcard). Returns the family, the
/// big-endian spec bytes, and the prefix length.
pub fn parse_addr(token: &str) -> Result<(AddrFamily, [u8; MAX_SPEC_LEN], u8), SpecParseError> {
    let mut bytes = [0u8; MAX_SPEC_LEN];
    match token {
        "*" => return Ok((AddrFamily::Inet, bytes, 0)),
        "*::" => return Ok((AddrFamily::Inet6, bytes, 0)),
        _ => {}
    }

    let (addr, len) = match token.split_once('/') {
        Some((addr, len)) => {
            let len = len
                .parse::<u8>()
                .map_err(|_| SpecParseError::BadPrefixLen(token.to_string()))?;
            (addr, Some(len))
        }
        None => (token, None),
    };

    let ip: IpAddr = addr
        .parse()
        .map_err(|_| SpecParseError::BadAddress(token.to_string()))?;
    let (af, len) = match ip {
        IpAddr::V4(v4) => {
            bytes[..4].copy_from_slice(&v4.octets());
            (AddrFamily::Inet, len.unwrap_or(32))
        }
        IpAddr::V6(v6) => {
            bytes.copy_from_slice(&v6.octets());
            (AddrFamily::Inet6, len.unwrap_or(128))
        }
    };
    if len > af.max_prefix() {
        return Err(SpecParseError::BadPrefixLen(token.to_string()));
    }
    Ok((af, bytes, len))
}

/// Parses a protocol spec from its three tokens: protocol, source port and
/// destination port, each possibly `*`, a port possibly a `lo-hi` range.
pub fn parse_proto_spec(
    proto: &str,
    sport: &str,
    dport: &str,
) -> Result<FlowSpec, SpecParseError> {
    let proto_byte = match proto {
        "*" => 0,
        p => p
            .parse::<u8>()
            .map_err(|_| SpecParseError::BadProto(p.to_string()))?,
    };
    let (src, srclen) = parse_port_side(proto_byte, sport)?;
    let (dst, dstlen) = parse_port_side(proto_byte, dport)?;
    Ok(FlowSpec {
        src,
        dst,
        srclen,
        dstlen,
    })
}

/// Encodes `[proto, port_hi, port_lo]` and its prefix length. A range
/// `lo-hi` covering `n` ports maps to length `8 + 17 - ffs(n)`, clamped to
/// the port bits [8, 24].
fn parse_port_side(proto: u8, token: &str) -> Result<([u8; MAX_SPEC_LEN], u8), SpecParseError> {
    let mut bytes = [0u8; MAX_SPEC_LEN];
    bytes[0] = proto;

    if let Some((lo, hi)) = token.split_once('-') {
        let lo: u16 = lo
            .parse()
            .map_err(|_| SpecParseError::BadPort(token.to_string()))?;
        let hi: u16 = hi
            .parse()
            .map_err(|_| SpecParseError::BadPort(token.to_string()))?;
        if hi < lo {
            return Err(SpecParseError::BadPort(token.to_string()));
        }
        bytes[1] = (lo >> 8) as u8;
        bytes[2] = (lo & 0xff) as u8;
        let span = (hi - lo) as u32 + 1;
        let len = 24u32.saturating_sub(span.trailing_zeros()).clamp(8, 24);
        return Ok((bytes, len as u8));
    }

    let port = match token {
        "*" => 0,
        p => p
            .parse::<u16>()
            .map_err(|_| SpecParseError::BadPort(p.to_string()))?,
    };
    if port == 0 {
        let len = if proto == 0 { 0 } else { 8 };
        Ok((bytes, len))
    } else {
        bytes[1] = (port >> 8) as u8;
        bytes[2] = (port & 0xff) as u8;
        Ok((bytes, 24))
    }
}

/// Aguri-notation rendering of a spec: `src dst` for address families,
/// `proto:sport:dport` for the protocol family.
pub struct SpecDisplay<'a> {
    spec: &'a FlowSpec,
    af: AddrFamily,
}

impl fmt::Display for SpecDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.spec;
        match self.af {
            AddrFamily::Inet => {
                fmt_v4(&s.src, s.srclen, f)?;
                f.write_str(" ")?;
                fmt_v4(&s.dst, s.dstlen, f)
            }
            AddrFamily::Inet6 => {
                fmt_v6(&s.src, s.srclen, f)?;
                f.write_str(" ")?;
                fmt_v6(&s.dst, s.dstlen, f)
            }
            AddrFamily::Proto => {
                if s.src[0] == 0 {
                    f.write_str("*:")?;
                } else {
                    write!(f, "{}:", s.src[0])?;
                }
                fmt_port(&s.src, s.srclen, f)?;
                f.write_str(":")?;
                fmt_port(&s.dst, s.dstlen, f)
            }
        }
    }
}

fn fmt_v4(bytes: &[u8; MAX_SPEC_LEN], len: u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if len == 0 {
        return f.write_str("*");
    }
    let addr = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    if len < 32 {
        write!(f, "{}/{}", addr, len)
    } else {
        write!(f, "{}", addr)
    }
}

fn fmt_v6(bytes: &[u8; MAX_SPEC_LEN], len: u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if len == 0 {
        return f.write_str("*::");
    }
    let addr = Ipv6Addr::from(*bytes);
    if len < 128 {
        write!(f, "{}/{}", addr, len)
    } else {
        write!(f, "{}", addr)
    }
}

fn fmt_port(bytes: &[u8; MAX_SPEC_LEN], len: u8, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let port = (bytes[1] as u32) << 8 | bytes[2] as u32;
    if port == 0 {
        return f.write_str("*");
    }
    write!(f, "{}", port)?;
    if len < 24 {
        // a shortened length denotes a power-of-two port range
        let end = port + (1u32 << (24 - len)) - 1;
        write!(f, "-{}", end)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4_spec(src: &str, dst: &str) -> FlowSpec {
        let (_, src, srclen) = parse_addr(src).unwrap();
        let (_, dst, dstlen) = parse_addr(dst).unwrap();
        FlowSpec {
            src,
            dst,
            srclen,
            dstlen,
        }
    }

    #[test]
    fn prefix_set_is_idempotent() {
        let (_, bytes, _) = parse_addr("203.178.141.194").unwrap();
        for len in [0u8, 1, 7, 8, 9, 23, 24, 31, 32] {
            let once = prefix_set(&bytes, len);
            assert_eq!(once, prefix_set(&once, len), "len {}", len);
        }
    }

    #[test]
    fn prefix_set_masks_fractional_byte() {
        let (_, bytes, _) = parse_addr("10.1.255.255").unwrap();
        let out = prefix_set(&bytes, 18);
        assert_eq!(&out[..4], &[10, 1, 0xc0, 0]);
    }

    #[test]
    fn prefix_eq_honours_partial_bytes() {
        let (_, a, _) = parse_addr("10.0.0.1").unwrap();
        let (_, b, _) = parse_addr("10.0.0.129").unwrap();
        assert!(prefix_eq(&a, &b, 24));
        assert!(!prefix_eq(&a, &b, 25));
        assert!(prefix_eq(&a, &b, 0));
    }

    #[test]
    fn truncate_keeps_lengths_distinct() {
        let spec = v4_spec("10.0.0.1", "20.0.0.1");
        let t24 = spec.truncate((24, 24));
        let t32 = spec.truncate((32, 32));
        assert_ne!(t24, t32);
        assert_eq!(t24.srclen, 24);
        assert_eq!(&t24.src[..4], &[10, 0, 0, 0]);
        assert_eq!(t32, spec);
    }

    #[test]
    fn wildcard_overlaps_everything() {
        let root = FlowSpec::default();
        let host = v4_spec("10.0.0.1", "20.0.0.1");
        assert!(root.overlaps(&host));
        assert!(host.overlaps(&root));
    }

    #[test]
    fn disjoint_prefixes_do_not_overlap() {
        let a = v4_spec("10.0.0.0/24", "20.0.0.0/24");
        let b = v4_spec("30.0.0.1", "20.0.0.1");
        assert!(!a.overlaps(&b));
        // one matching dimension is not enough
        let c = v4_spec("10.0.0.7", "40.0.0.1");
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn parse_addr_families() {
        assert_eq!(parse_addr("*").unwrap().0, AddrFamily::Inet);
        assert_eq!(parse_addr("*::").unwrap().0, AddrFamily::Inet6);
        let (af, bytes, len) = parse_addr("10.178.141.0/24").unwrap();
        assert_eq!((af, len), (AddrFamily::Inet, 24));
        assert_eq!(&bytes[..4], &[10, 178, 141, 0]);
        let (af, _, len) = parse_addr("2001:df0:2ed::13").unwrap();
        assert_eq!((af, len), (AddrFamily::Inet6, 128));
        assert!(parse_addr("not-an-address").is_err());
        assert!(parse_addr("10.0.0.0/40").is_err());
    }

    #[test]
    fn proto_spec_round_trips_through_display() {
        let spec = parse_proto_spec("6", "80", "*").unwrap();
        assert_eq!((spec.srclen, spec.dstlen), (24, 8));
        assert_eq!(spec.display(AddrFamily::Proto).to_string(), "6:80:*");

        let wild = parse_proto_spec("*", "*", "*").unwrap();
        assert_eq!((wild.srclen, wild.dstlen), (0, 0));
        assert_eq!(wild.display(AddrFamily::Proto).to_string(), "*:*:*");
    }

    #[test]
    fn port_ranges_encode_as_shortened_lengths() {
        // 128 ports: ffs(128) = 8, so 8 + 17 - 8 = 17 bits
        let spec = parse_proto_spec("6", "443", "49152-49279").unwrap();
        assert_eq!(spec.dstlen, 17);
        assert_eq!(
            spec.display(AddrFamily::Proto).to_string(),
            "6:443:49152-49279"
        );
        // a single-port "range" stays at the full 24 bits
        let one = parse_proto_spec("17", "53-53", "*").unwrap();
        assert_eq!(one.srclen, 24);
    }
}
