use proptest::prelude::*;

use apollon_types::{BlockHash, OutPoint, Timestamp, TxHash, U256};

proptest! {
    /// TxHash bincode serialization roundtrip.
    #[test]
    fn tx_hash_bincode_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let hash = TxHash::new(bytes);
        let encoded = bincode::serialize(&hash).unwrap();
        let decoded: TxHash = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded, hash);
    }

    /// Hex display parses back to the same hash.
    #[test]
    fn block_hash_display_parses_back(bytes in prop::array::uniform32(0u8..)) {
        let hash = BlockHash::new(bytes);
        let parsed: BlockHash = hash.to_string().parse().unwrap();
        prop_assert_eq!(parsed, hash);
    }

    /// Outpoint ordering agrees with (txid, index) tuple ordering.
    #[test]
    fn outpoint_ordering_is_lexicographic(
        a in prop::array::uniform32(0u8..),
        b in prop::array::uniform32(0u8..),
        i in 0u32..10,
        j in 0u32..10,
    ) {
        let x = OutPoint::new(TxHash::new(a), i);
        let y = OutPoint::new(TxHash::new(b), j);
        prop_assert_eq!(x.cmp(&y), (a, i).cmp(&(b, j)));
    }

    /// Absolute difference never exceeds the larger operand and is symmetric.
    #[test]
    fn u256_abs_diff_bounded(
        a in prop::array::uniform32(0u8..),
        b in prop::array::uniform32(0u8..),
    ) {
        let x = U256::from_be_bytes(a);
        let y = U256::from_be_bytes(b);
        let d = x.abs_diff(&y);
        prop_assert_eq!(d, y.abs_diff(&x));
        prop_assert!(d <= x.max(y));
    }

    /// Adding a small value agrees with u64 arithmetic in the low limb.
    #[test]
    fn u256_add_matches_u64(low in 0u64..u32::MAX as u64, add in 0u32..u32::MAX) {
        let mut be = [0u8; 32];
        be[24..].copy_from_slice(&low.to_be_bytes());
        let sum = U256::from_be_bytes(be).wrapping_add_u32(add).to_be_bytes();
        let mut expected = [0u8; 32];
        expected[24..].copy_from_slice(&(low + add as u64).to_be_bytes());
        prop_assert_eq!(sum, expected);
    }

    /// Timestamp elapsed_since saturates to 0 when now < self.
    #[test]
    fn timestamp_elapsed_since_saturates(
        base in 1u64..1_000_000,
        deficit in 1u64..1_000_000,
    ) {
        let later = Timestamp::new(base + deficit);
        let earlier = Timestamp::new(base);
        prop_assert_eq!(later.elapsed_since(earlier), 0);
    }

    /// Signed diff is antisymmetric.
    #[test]
    fn timestamp_diff_antisymmetric(a in 0u64..1_000_000_000, b in 0u64..1_000_000_000) {
        let ta = Timestamp::new(a);
        let tb = Timestamp::new(b);
        prop_assert_eq!(ta.diff(tb), -tb.diff(ta));
    }
}
