//! Property tests for the fundamental types.

use proptest::prelude::*;
use quill_types::{Account, Amount, BlockHash, HashOrAccount, NetworkId, Root};

proptest! {
    #[test]
    fn block_hash_roundtrips_through_bytes(bytes in prop::array::uniform32(any::<u8>())) {
        let hash = BlockHash::new(bytes);
        prop_assert_eq!(hash.as_bytes(), &bytes);
        prop_assert_eq!(BlockHash::new(*hash.as_bytes()), hash);
    }

    #[test]
    fn hash_or_account_view_consistency(bytes in prop::array::uniform32(any::<u8>())) {
        let value = HashOrAccount::new(bytes);
        let as_block_hash = value.as_block_hash();
        let as_account = value.as_account();
        prop_assert_eq!(as_block_hash.as_bytes(), &bytes);
        prop_assert_eq!(as_account.as_bytes(), &bytes);
    }

    #[test]
    fn root_from_hash_and_account_agree(bytes in prop::array::uniform32(any::<u8>())) {
        let from_hash = Root::from(BlockHash::new(bytes));
        let from_account = Root::from(Account::from_bytes(bytes));
        prop_assert_eq!(from_hash, from_account);
    }

    #[test]
    fn amount_checked_sub_never_underflows(a in any::<u128>(), b in any::<u128>()) {
        let result = Amount::raw(a).checked_sub(Amount::raw(b));
        prop_assert_eq!(result.is_some(), a >= b);
    }

    #[test]
    fn amount_be_bytes_roundtrip(value in any::<u128>()) {
        let amount = Amount::raw(value);
        prop_assert_eq!(Amount::from_be_bytes(amount.to_be_bytes()), amount);
    }
}

#[test]
fn network_wire_ids_are_distinct_and_roundtrip() {
    let networks = [
        NetworkId::Dev,
        NetworkId::Beta,
        NetworkId::Live,
        NetworkId::Test,
    ];
    for network in networks {
        assert_eq!(NetworkId::from_wire_id(network.wire_id()), Some(network));
    }
    assert_eq!(NetworkId::from_wire_id(0xFFFF), None);
}

#[test]
fn zero_values_report_zero() {
    assert!(BlockHash::ZERO.is_zero());
    assert!(Account::ZERO.is_zero());
    assert!(Amount::ZERO.is_zero());
    assert!(!BlockHash::new([1; 32]).is_zero());
}
