//! Deterministic identifier derivation for ledger rows.
//!
//! Every ledger transaction id is a UUIDv5 of the row's natural key under
//! a namespace fixed per transaction type. Re-deriving the id from the
//! same upstream event therefore always produces the same UUID, which is
//! what makes at-least-once delivery safe: a replayed event maps onto a
//! row that already exists and the insert is skipped.
//!
//! The namespaces are project constants. Changing one would re-key every
//! historical row of that type, so they must never be edited.

use uuid::{uuid, Uuid};

/// Namespace for contribution rows (channel to owner) and vote-backed rows.
pub const CONTRIBUTION: Uuid = uuid!("be90c1a8-20a3-432f-b224-17f5a1eb8c54");

/// Namespace for contribution settlement rows (owner to payout address).
pub const CONTRIBUTION_SETTLEMENT: Uuid = uuid!("4208cdfc-26f3-44a2-9f9d-1f6657001706");

/// Namespace for manual handshake rows.
pub const MANUAL: Uuid = uuid!("734a27cd-0834-49a5-8d4c-77da38cdfb22");

/// Namespace for manual settlement rows.
pub const MANUAL_SETTLEMENT: Uuid = uuid!("a7cb6b9e-b0b4-4c40-85bf-27a0172d4353");

/// Namespace for referral rows.
pub const REFERRAL: Uuid = uuid!("3d3e7966-87c3-44ed-84c3-252458f99536");

/// Namespace for referral settlement rows.
pub const REFERRAL_SETTLEMENT: Uuid = uuid!("7fda9071-4f0d-4fe6-b3ac-b1c3dd0861a5");

/// Namespace for settlement fee rows.
pub const SETTLEMENT_FEES: Uuid = uuid!("1d295e60-e511-41f5-8ae0-46b6b5d33333");

/// Namespace for rows moving funds out of a channel account.
pub const SETTLEMENT_FROM_CHANNEL: Uuid = uuid!("eb296f6d-ab2a-489f-b02a-3a0b36b90dbc");

/// Namespace for user deposit rows.
pub const USER_DEPOSIT: Uuid = uuid!("f7a8b983-2383-48f2-9e4f-717f6fe3225d");

/// Namespace for vote ballot ids.
pub const VOTES: Uuid = uuid!("f0ca8ff9-8399-493a-b2c2-6d4a49e5223a");

/// Derives a deterministic row id from a namespace and natural key.
#[must_use]
pub fn derive_transaction_id(namespace: Uuid, natural_key: &str) -> Uuid {
    Uuid::new_v5(&namespace, natural_key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_transaction_id(CONTRIBUTION, "settlement-1-brave.com");
        let b = derive_transaction_id(CONTRIBUTION, "settlement-1-brave.com");
        assert_eq!(a, b);
    }

    #[test]
    fn namespaces_partition_the_id_space() {
        let key = "settlement-1-brave.com";
        let contribution = derive_transaction_id(CONTRIBUTION, key);
        let settlement = derive_transaction_id(CONTRIBUTION_SETTLEMENT, key);
        assert_ne!(contribution, settlement);
    }

    #[test]
    fn distinct_keys_produce_distinct_ids() {
        let a = derive_transaction_id(REFERRAL, "tx-1");
        let b = derive_transaction_id(REFERRAL, "tx-2");
        assert_ne!(a, b);
    }
}
