//! End-to-end pipeline scenarios against the in-memory store.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tally_core::channel::Channel;

use tally_ingest::error::Error;
use tally_ingest::models::{
    convert_to_transactions, surveyor_id, Convertable, Funding, Referral, Settlement,
    SettlementKind, Suggestion, TransactionType, Vote, VoteContribution, PROBI_PER_UNIT,
};
use tally_ingest::store::{FreezeParams, LedgerStore, MemoryStore};
use tally_ingest::surveyors::stage_votes;

const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

fn contribution_settlement() -> Settlement {
    Settlement {
        kind: SettlementKind::Contribution,
        owner: "publishers#uuid:1c2c3c4c".to_string(),
        channel: Channel::from("brave.com"),
        probi: dec!(475),
        fees: dec!(25),
        amount: dec!(4),
        currency: "USD".to_string(),
        address: "aaaabbbb-cccc-dddd-eeee-ffff00001111".to_string(),
        settlement_id: "s-1".to_string(),
        document_id: "doc-1".to_string(),
        hash: "hash-1".to_string(),
        executed_at: Utc.with_ymd_and_hms(2024, 8, 15, 12, 0, 0).unwrap(),
        wallet_provider: "uphold".to_string(),
    }
}

fn contribution_vote(id: &str) -> Vote {
    Vote::Contribution(VoteContribution {
        id: id.to_string(),
        channel: Channel::from("brave.com"),
        created_at: Utc.with_ymd_and_hms(2024, 8, 14, 10, 0, 0).unwrap(),
        base_vote_value: dec!(0.25),
        vote_tally: 1,
        funding_source: "uphold".to_string(),
        cohort: "control".to_string(),
    })
}

#[tokio::test]
async fn contribution_settlement_expands_to_three_conserving_rows() {
    let store = MemoryStore::new();
    let events = vec![Convertable::Settlement(contribution_settlement())];
    let rows = convert_to_transactions(&events, MAX_AMOUNT).unwrap();
    assert_eq!(rows.len(), 3);

    let mut batch = store.begin().await.unwrap();
    assert_eq!(batch.insert_transactions(&rows).await.unwrap(), 3);
    batch.commit().await.unwrap();

    let stored = store.all_transactions().unwrap();
    // Channel to owner carries the gross value, probi plus fees.
    assert_eq!(stored[0].transaction_type, TransactionType::Contribution);
    assert_eq!(stored[0].amount, dec!(500));
    // Owner to the fees account.
    assert_eq!(stored[1].transaction_type, TransactionType::Fees);
    assert_eq!(stored[1].amount, dec!(25));
    // Closing settlement row carries the net and the fiat leg.
    assert_eq!(
        stored[2].transaction_type,
        TransactionType::ContributionSettlement
    );
    assert_eq!(stored[2].amount, dec!(475));
    assert_eq!(stored[2].settlement_currency.as_deref(), Some("USD"));
    assert_eq!(stored[2].settlement_amount, Some(dec!(4)));

    // Conservation: gross equals probi plus fees.
    assert_eq!(stored[0].amount, stored[1].amount + stored[2].amount);
}

#[tokio::test]
async fn redelivered_batches_insert_nothing_new() {
    let store = MemoryStore::new();
    let events = vec![Convertable::Settlement(contribution_settlement())];
    let rows = convert_to_transactions(&events, MAX_AMOUNT).unwrap();

    let mut batch = store.begin().await.unwrap();
    batch.insert_transactions(&rows).await.unwrap();
    batch.commit().await.unwrap();

    // Same events arrive again after a crash before offset commit.
    let replay = convert_to_transactions(&events, MAX_AMOUNT).unwrap();
    let mut batch = store.begin().await.unwrap();
    assert_eq!(batch.insert_transactions(&replay).await.unwrap(), 0);
    batch.commit().await.unwrap();

    assert_eq!(store.transaction_count().unwrap(), 3);
}

#[test]
fn row_ids_are_deterministic_across_processes() {
    let first = convert_to_transactions(
        &[Convertable::Settlement(contribution_settlement())],
        MAX_AMOUNT,
    )
    .unwrap();
    let second = convert_to_transactions(
        &[Convertable::Settlement(contribution_settlement())],
        MAX_AMOUNT,
    )
    .unwrap();
    let first_ids: Vec<_> = first.iter().map(|r| r.id).collect();
    let second_ids: Vec<_> = second.iter().map(|r| r.id).collect();
    assert_eq!(first_ids, second_ids);
}

#[test]
fn oversized_settlement_is_ignored_not_rejected() {
    let mut settlement = contribution_settlement();
    settlement.probi = dec!(2_000_000_000) * PROBI_PER_UNIT;
    // Also malformed; ignoring must win over validation.
    settlement.owner = String::new();

    let rows =
        convert_to_transactions(&[Convertable::Settlement(settlement)], MAX_AMOUNT).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn youtube_user_channels_are_excluded_from_payout() {
    let mut settlement = contribution_settlement();
    settlement.channel = Channel::from("youtube#user:SomeCreator");

    let rows =
        convert_to_transactions(&[Convertable::Settlement(settlement)], MAX_AMOUNT).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn unresolved_referral_reports_its_reason() {
    let referral = Referral {
        transaction_id: "tx-1".to_string(),
        download_id: "dl-1".to_string(),
        channel: Channel::from("brave.com"),
        owner: "publishers#uuid:1c2c3c4c".to_string(),
        finalized_at: Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap(),
        country_group_id: None,
        platform: "desktop".to_string(),
        probi: Decimal::ZERO,
    };

    let err = convert_to_transactions(&[Convertable::Referral(referral)], MAX_AMOUNT)
        .unwrap_err();
    let Error::Validation { reasons } = err else {
        panic!("expected validation error");
    };
    assert!(reasons.iter().any(|r| r.contains("probi must be positive")));
}

#[tokio::test]
async fn five_votes_settle_into_one_gross_row() {
    let store = MemoryStore::new();
    let votes: Vec<Vote> = (1..=5)
        .map(|n| contribution_vote(&format!("vote-{n}")))
        .collect();

    let mut batch = store.begin().await.unwrap();
    let upserted = stage_votes(batch.as_mut(), &votes, dec!(0.25)).await.unwrap();
    assert_eq!(upserted, 1);
    batch.commit().await.unwrap();

    let day = votes[0].voting_day();
    let id = surveyor_id(day, "uphold");
    let surveyors = store.surveyors_by_id(&[id.clone()]).await.unwrap();
    assert_eq!(surveyors.len(), 1);
    assert!(!surveyors[0].is_virtual);

    let outcome = store
        .freeze_surveyors(FreezeParams {
            now: Utc.with_ymd_and_hms(2024, 8, 16, 6, 0, 0).unwrap(),
            lag_days: 1,
            fee_fraction: dec!(0.05),
            max_amount: MAX_AMOUNT,
        })
        .await
        .unwrap();
    assert_eq!(outcome.frozen_surveyors, vec![id.clone()]);
    assert_eq!(outcome.rows_inserted, 1);

    let rows = store.all_transactions().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].transaction_type, TransactionType::Contribution);
    // Gross value of five votes at 0.25 units each.
    assert_eq!(rows[0].amount, dec!(5) * dec!(0.25) * PROBI_PER_UNIT);
    assert_eq!(rows[0].channel.as_ref().map(ToString::to_string),
        Some("brave.com".to_string()));
    assert_eq!(rows[0].description, format!("votes from {id}"));
}

#[tokio::test]
async fn votes_arriving_after_the_freeze_change_nothing() {
    let store = MemoryStore::new();
    let votes = vec![contribution_vote("vote-1")];

    let mut batch = store.begin().await.unwrap();
    stage_votes(batch.as_mut(), &votes, dec!(0.25)).await.unwrap();
    batch.commit().await.unwrap();

    let params = FreezeParams {
        now: Utc.with_ymd_and_hms(2024, 8, 16, 6, 0, 0).unwrap(),
        lag_days: 1,
        fee_fraction: dec!(0.05),
        max_amount: MAX_AMOUNT,
    };
    store.freeze_surveyors(params).await.unwrap();
    let settled = store.transaction_count().unwrap();

    // A straggler batch for the same voting day.
    let mut batch = store.begin().await.unwrap();
    let upserted = stage_votes(batch.as_mut(), &votes, dec!(0.25)).await.unwrap();
    assert_eq!(upserted, 0);
    batch.commit().await.unwrap();

    // Another pass has nothing new to settle.
    let outcome = store.freeze_surveyors(params).await.unwrap();
    assert_eq!(outcome.rows_inserted, 0);
    assert_eq!(store.transaction_count().unwrap(), settled);
}

#[tokio::test]
async fn suggestion_funding_splits_across_promotions() {
    let store = MemoryStore::new();
    let suggestion = Vote::Suggestion(Suggestion {
        id: "suggestion-1".to_string(),
        channel: Channel::from("brave.com"),
        created_at: Utc.with_ymd_and_hms(2024, 8, 14, 10, 0, 0).unwrap(),
        total_amount: dec!(1),
        order_id: String::new(),
        funding: vec![
            Funding {
                kind: "ugp".to_string(),
                amount: dec!(0.75),
                cohort: "control".to_string(),
                promotion: "promo-a".to_string(),
            },
            Funding {
                kind: "ads".to_string(),
                amount: dec!(0.25),
                cohort: "control".to_string(),
                promotion: "promo-b".to_string(),
            },
        ],
    });

    let mut batch = store.begin().await.unwrap();
    let upserted = stage_votes(batch.as_mut(), &[suggestion.clone()], dec!(0.25))
        .await
        .unwrap();
    // One ballot per funded promotion.
    assert_eq!(upserted, 2);
    batch.commit().await.unwrap();

    let day = suggestion.voting_day();
    let ids = vec![surveyor_id(day, "promo-a"), surveyor_id(day, "promo-b")];
    let surveyors = store.surveyors_by_id(&ids).await.unwrap();
    assert_eq!(surveyors.len(), 2);
    assert!(surveyors.iter().all(|s| s.is_virtual));

    // Virtual surveyors freeze as soon as the day rolls over.
    let outcome = store
        .freeze_surveyors(FreezeParams {
            now: Utc.with_ymd_and_hms(2024, 8, 15, 0, 30, 0).unwrap(),
            lag_days: 1,
            fee_fraction: dec!(0.05),
            max_amount: MAX_AMOUNT,
        })
        .await
        .unwrap();
    assert_eq!(outcome.frozen_surveyors.len(), 2);
    // 0.75 funds 3 votes on promo-a; 0.25 funds 1 vote on promo-b.
    let rows = store.all_transactions().unwrap();
    assert_eq!(rows.len(), 2);
    let total: Decimal = rows.iter().map(|r| r.amount).sum();
    assert_eq!(total, dec!(1) * PROBI_PER_UNIT);
}

#[test]
fn batch_validation_reports_every_bad_event_at_once() {
    let mut missing_owner = contribution_settlement();
    missing_owner.owner = String::new();
    let mut fractional = contribution_settlement();
    fractional.settlement_id = "s-2".to_string();
    fractional.probi = dec!(475.5);

    let err = convert_to_transactions(
        &[
            Convertable::Settlement(missing_owner),
            Convertable::Settlement(fractional),
        ],
        MAX_AMOUNT,
    )
    .unwrap_err();
    let Error::Validation { reasons } = err else {
        panic!("expected validation error");
    };
    assert!(reasons.len() >= 2);
    assert!(reasons.iter().any(|r| r.starts_with("s-1_brave.com: ")));
    assert!(reasons.iter().any(|r| r.starts_with("s-2_brave.com: ")));
}
