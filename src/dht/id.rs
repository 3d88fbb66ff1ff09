use super::error::DhtError;
use rand::Rng as _;
use std::cmp::Ordering;
use std::fmt;

/// Length of a node id / info hash in bytes.
pub const ID_LEN: usize = 20;

const BOUND_LEN: usize = ID_LEN + 1;

/// A 160-bit DHT identifier, stored big-endian.
///
/// The derived ordering is byte-sequence order, which is the numeric order of
/// the big-endian value. Distance is the XOR of two ids; comparing two
/// distances with `Ord` tells which one is closer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; ID_LEN]);

impl NodeId {
    pub const MIN: NodeId = NodeId([0; ID_LEN]);
    pub const MAX: NodeId = NodeId([0xff; ID_LEN]);

    pub fn random() -> Self {
        let mut id = [0u8; ID_LEN];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        let id: [u8; ID_LEN] = bytes
            .try_into()
            .map_err(|_| DhtError::InvalidNodeId(bytes.len()))?;
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn xor(&self, other: &NodeId) -> NodeId {
        let mut dist = [0u8; ID_LEN];
        for (d, (a, b)) in dist.iter_mut().zip(self.0.iter().zip(other.0.iter())) {
            *d = a ^ b;
        }
        NodeId(dist)
    }

    /// Orders `a` and `b` by their distance to `self`, closest first.
    pub fn distance_cmp(&self, a: &NodeId, b: &NodeId) -> Ordering {
        self.xor(a).cmp(&self.xor(b))
    }

    /// `self - other`, failing when `other > self`.
    pub fn checked_sub(&self, other: &NodeId) -> Result<NodeId, DhtError> {
        let mut out = [0u8; ID_LEN];
        let borrow = sub_with_borrow(&self.0, &other.0, &mut out);
        if borrow {
            return Err(DhtError::Underflow);
        }
        Ok(NodeId(out))
    }

    /// `(a + b) / 2`, computed without losing the carry out of the top byte.
    pub fn median(a: &NodeId, b: &NodeId) -> NodeId {
        IdBound::midpoint(&IdBound::from(*a), &IdBound::from(*b)).low_id()
    }
}

impl From<[u8; ID_LEN]> for NodeId {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A position in the identifier space, `0 ..= 2^160`.
///
/// Bucket ranges are half-open, so the upper bound of the last bucket is
/// `2^160`, one past the largest [`NodeId`]. `IdBound` carries one extra
/// byte so that value is representable, and provides the handful of
/// multi-byte operations bucket splitting needs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdBound([u8; BOUND_LEN]);

impl IdBound {
    pub const ZERO: IdBound = IdBound([0; BOUND_LEN]);

    /// `2^160`, the exclusive end of the identifier space.
    pub const END: IdBound = {
        let mut bytes = [0u8; BOUND_LEN];
        bytes[0] = 1;
        IdBound(bytes)
    };

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; BOUND_LEN];
        bytes[BOUND_LEN - 8..].copy_from_slice(&value.to_be_bytes());
        IdBound(bytes)
    }

    pub fn checked_add(&self, other: &IdBound) -> Option<IdBound> {
        let mut out = [0u8; BOUND_LEN];
        let carry = add_with_carry(&self.0, &other.0, &mut out);
        (!carry).then_some(IdBound(out))
    }

    pub fn checked_sub(&self, other: &IdBound) -> Option<IdBound> {
        let mut out = [0u8; BOUND_LEN];
        let borrow = sub_with_borrow(&self.0, &other.0, &mut out);
        (!borrow).then_some(IdBound(out))
    }

    /// `(a + b) / 2`. The carry out of the addition is shifted back in.
    pub fn midpoint(a: &IdBound, b: &IdBound) -> IdBound {
        let mut sum = [0u8; BOUND_LEN];
        let carry = add_with_carry(&a.0, &b.0, &mut sum);
        IdBound(shr1(&sum, carry))
    }

    /// Number of significant bits.
    pub fn bits(&self) -> u32 {
        match self.0.iter().position(|&b| b != 0) {
            Some(i) => (BOUND_LEN - i) as u32 * 8 - self.0[i].leading_zeros(),
            None => 0,
        }
    }

    /// Uniformly random value in `[0, self)`; `ZERO` when `self` is zero.
    pub fn random_below(&self) -> IdBound {
        let bits = self.bits();
        if bits == 0 {
            return IdBound::ZERO;
        }

        let used = (bits as usize).div_ceil(8);
        let top_mask = match bits % 8 {
            0 => 0xff,
            rem => (1u8 << rem) - 1,
        };

        let mut rng = rand::rng();
        loop {
            let mut bytes = [0u8; BOUND_LEN];
            rng.fill(&mut bytes[BOUND_LEN - used..]);
            bytes[BOUND_LEN - used] &= top_mask;

            let candidate = IdBound(bytes);
            if candidate < *self {
                return candidate;
            }
        }
    }

    /// The id at this position, or `None` for `2^160` and beyond.
    pub fn to_node_id(&self) -> Option<NodeId> {
        (self.0[0] == 0).then(|| self.low_id())
    }

    fn low_id(&self) -> NodeId {
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&self.0[1..]);
        NodeId(id)
    }
}

impl From<NodeId> for IdBound {
    fn from(id: NodeId) -> Self {
        let mut bytes = [0u8; BOUND_LEN];
        bytes[1..].copy_from_slice(&id.0);
        IdBound(bytes)
    }
}

impl fmt::Debug for IdBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_node_id() {
            Some(id) => write!(f, "IdBound({})", id),
            None if *self == IdBound::END => f.write_str("IdBound(2^160)"),
            None => {
                f.write_str("IdBound(")?;
                for byte in &self.0 {
                    write!(f, "{:02x}", byte)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Big-endian `a + b` into `out`; returns the carry out of the top byte.
fn add_with_carry<const N: usize>(a: &[u8; N], b: &[u8; N], out: &mut [u8; N]) -> bool {
    let mut carry = 0u16;
    for i in (0..N).rev() {
        let sum = a[i] as u16 + b[i] as u16 + carry;
        out[i] = sum as u8;
        carry = sum >> 8;
    }
    carry != 0
}

/// Big-endian `a - b` into `out`; returns true if the result went negative.
fn sub_with_borrow<const N: usize>(a: &[u8; N], b: &[u8; N], out: &mut [u8; N]) -> bool {
    let mut borrow = 0i16;
    for i in (0..N).rev() {
        let mut diff = a[i] as i16 - b[i] as i16 - borrow;
        borrow = 0;
        if diff < 0 {
            diff += 256;
            borrow = 1;
        }
        out[i] = diff as u8;
    }
    borrow != 0
}

/// Shifts right by one bit, feeding `carry_in` into the top bit.
fn shr1<const N: usize>(value: &[u8; N], carry_in: bool) -> [u8; N] {
    let mut out = [0u8; N];
    let mut carry = carry_in as u8;
    for i in 0..N {
        out[i] = (value[i] >> 1) | (carry << 7);
        carry = value[i] & 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_last(byte: u8) -> NodeId {
        let mut id = [0u8; ID_LEN];
        id[ID_LEN - 1] = byte;
        NodeId(id)
    }

    #[test]
    fn test_xor_is_symmetric_and_self_is_zero() {
        for _ in 0..32 {
            let a = NodeId::random();
            let b = NodeId::random();
            assert_eq!(a.xor(&b), b.xor(&a));
            assert_eq!(a.xor(&a), NodeId::MIN);
        }
    }

    #[test]
    fn test_ordering_is_big_endian() {
        let mut high = [0u8; ID_LEN];
        high[0] = 1;
        assert!(NodeId(high) > id_with_last(0xff));
        assert!(NodeId::MAX > NodeId(high));
    }

    #[test]
    fn test_distance_cmp() {
        let target = id_with_last(0b1000);
        let near = id_with_last(0b1001);
        let far = id_with_last(0b0000);
        assert_eq!(target.distance_cmp(&near, &far), Ordering::Less);
        assert_eq!(target.distance_cmp(&far, &near), Ordering::Greater);
        assert_eq!(target.distance_cmp(&near, &near), Ordering::Equal);
    }

    #[test]
    fn test_checked_sub_borrows_across_bytes() {
        let mut a = [0u8; ID_LEN];
        a[ID_LEN - 2] = 1;
        let diff = NodeId(a).checked_sub(&id_with_last(1)).unwrap();
        assert_eq!(diff, id_with_last(0xff));
    }

    #[test]
    fn test_checked_sub_underflow() {
        let result = id_with_last(1).checked_sub(&id_with_last(2));
        assert!(matches!(result, Err(DhtError::Underflow)));
    }

    #[test]
    fn test_median_keeps_carry() {
        let median = NodeId::median(&NodeId::MAX, &NodeId::MAX);
        assert_eq!(median, NodeId::MAX);

        let median = NodeId::median(&id_with_last(2), &id_with_last(7));
        assert_eq!(median, id_with_last(4));
    }

    #[test]
    fn test_midpoint_of_full_space() {
        let mid = IdBound::midpoint(&IdBound::ZERO, &IdBound::END);
        let mut expected = [0u8; ID_LEN];
        expected[0] = 0x80;
        assert_eq!(mid.to_node_id(), Some(NodeId(expected)));
        assert_eq!(IdBound::END.to_node_id(), None);
    }

    #[test]
    fn test_bound_arithmetic() {
        let max = IdBound::from(NodeId::MAX);
        assert_eq!(max.checked_add(&IdBound::from_u64(1)), Some(IdBound::END));
        assert_eq!(IdBound::END.checked_sub(&max), Some(IdBound::from_u64(1)));
        assert_eq!(IdBound::ZERO.checked_sub(&IdBound::from_u64(1)), None);
        assert_eq!(IdBound::END.bits(), 161);
        assert_eq!(IdBound::from_u64(8).bits(), 4);
        assert_eq!(IdBound::ZERO.bits(), 0);
    }

    #[test]
    fn test_random_below_stays_in_range() {
        let span = IdBound::from_u64(9);
        for _ in 0..200 {
            assert!(span.random_below() < span);
        }
        assert!(IdBound::END.random_below().to_node_id().is_some());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(NodeId::from_bytes(&[7u8; ID_LEN]).is_ok());
        assert!(matches!(
            NodeId::from_bytes(&[7u8; 19]),
            Err(DhtError::InvalidNodeId(19))
        ));
    }
}
