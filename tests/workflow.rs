use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::future::join_all;
use ulid::Ulid;

use facilitybook::config::{Config, RecurrencePolicy};
use facilitybook::engine::{Engine, EngineError};
use facilitybook::model::*;
use facilitybook::store::{BookingStore, WalStore};

// ── Test infrastructure ──────────────────────────────────────

fn test_config() -> Config {
    let dir: PathBuf = std::env::temp_dir().join(format!("facilitybook_int_test_{}", Ulid::new()));
    Config {
        data_dir: dir,
        facilities: vec!["hall".into(), "gym".into()],
        ..Config::default()
    }
}

fn open(config: &Config) -> Engine {
    let store = WalStore::from_config(config).unwrap();
    Engine::new(Arc::new(store), config.clone())
}

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

fn span(from: &str, to: &str) -> Span {
    Span::new(at(from), at(to))
}

fn request(facility: &str, span: Span, recurrence: Recurrence) -> NewBooking {
    NewBooking {
        name: "Resident".into(),
        unit: "07-03".into(),
        facility: facility.into(),
        span,
        purpose: "badminton".into(),
        recurrence,
    }
}

async fn principal(engine: &Engine, username: &str, is_admin: bool) -> Principal {
    let user = engine.create_user(username, "pbkdf2$opaque", is_admin).await.unwrap();
    Principal::from(&user)
}

// ── Workflow ─────────────────────────────────────────────────

#[tokio::test]
async fn submit_approve_list_end_to_end() {
    let engine = open(&test_config());
    let admin = principal(&engine, "admin", true).await;
    let alice = principal(&engine, "alice", false).await;
    let bob = principal(&engine, "bob", false).await;

    let mon = span("2024-03-04 08:00", "2024-03-04 10:00");
    let pending = engine.submit(&alice, request("hall", mon, Recurrence::Once)).await.unwrap();
    assert_eq!(engine.list_for_user(&alice).await.unwrap().requested, vec![pending.clone()]);

    let approval = engine.approve(&admin, pending.id).await.unwrap();
    let listing = engine.list_for_user(&alice).await.unwrap();
    assert!(listing.requested.is_empty());
    assert_eq!(listing.approved.len(), 1);
    assert_eq!(listing.approved[0].id, approval.inserted_ids()[0]);

    let other = engine.list_for_user(&bob).await.unwrap();
    assert!(other.approved.is_empty() && other.requested.is_empty() && other.recurring.is_empty());

    let overlapping = engine
        .submit(&bob, request("hall", span("2024-03-04 09:00", "2024-03-04 11:00"), Recurrence::Once))
        .await;
    assert!(matches!(overlapping, Err(EngineError::Conflict { .. })));

    engine
        .submit(&bob, request("hall", span("2024-03-04 10:00", "2024-03-04 12:00"), Recurrence::Once))
        .await
        .unwrap();

    let upcoming = engine
        .list_upcoming(at("2024-03-04 00:00"), at("2024-03-05 00:00"))
        .await
        .unwrap();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0].username, "alice");
}

#[tokio::test]
async fn admin_listing_covers_all_users_in_start_order() {
    let engine = open(&test_config());
    let admin = principal(&engine, "admin", true).await;
    let alice = principal(&engine, "alice", false).await;
    let bob = principal(&engine, "bob", false).await;

    engine
        .submit(&bob, request("gym", span("2024-03-05 07:00", "2024-03-05 08:00"), Recurrence::Once))
        .await
        .unwrap();
    engine
        .submit(&alice, request("hall", span("2024-03-04 19:00", "2024-03-04 20:00"), Recurrence::Once))
        .await
        .unwrap();
    engine
        .submit(&alice, request("hall", span("2024-03-04 06:00", "2024-03-04 07:00"), Recurrence::Once))
        .await
        .unwrap();

    let all = engine.list_for_user(&admin).await.unwrap();
    let order: Vec<_> = all
        .requested
        .iter()
        .map(|r| (r.username.as_str(), r.span.start))
        .collect();
    assert_eq!(
        order,
        vec![
            ("alice", at("2024-03-04 06:00")),
            ("alice", at("2024-03-04 19:00")),
            ("bob", at("2024-03-05 07:00")),
        ]
    );

    let mine = engine.list_for_user(&alice).await.unwrap();
    assert!(mine.requested.iter().all(|r| r.username == "alice"));
    assert_eq!(mine.requested.len(), 2);
}

#[tokio::test]
async fn state_survives_reopen() {
    let config = test_config();
    let (booking_id, recurring_ids) = {
        let engine = open(&config);
        let admin = principal(&engine, "admin", true).await;
        let alice = principal(&engine, "alice", false).await;

        let single = engine
            .submit(&alice, request("hall", span("2024-03-04 08:00", "2024-03-04 10:00"), Recurrence::Once))
            .await
            .unwrap();
        let booking_id = engine.approve(&admin, single.id).await.unwrap().inserted_ids()[0];

        let series = engine
            .submit(
                &alice,
                request("gym", span("2024-03-06 18:00", "2024-03-06 19:30"), Recurrence::Weekly { weeks: 3 }),
            )
            .await
            .unwrap();
        let recurring_ids = engine.approve(&admin, series.id).await.unwrap().inserted_ids();

        // Rolled back by the conflict; must not reappear after replay.
        let _ = engine
            .submit(&alice, request("hall", span("2024-03-04 09:00", "2024-03-04 09:30"), Recurrence::Once))
            .await
            .unwrap_err();
        (booking_id, recurring_ids)
    };

    let engine = open(&config);
    let admin = engine.find_user("admin").await.unwrap();
    assert!(admin.is_admin);

    let listing = engine.list_for_user(&Principal::from(&admin)).await.unwrap();
    assert!(listing.requested.is_empty());
    assert_eq!(listing.approved.iter().map(|b| b.id).collect::<Vec<_>>(), vec![booking_id]);
    assert_eq!(listing.recurring.iter().map(|b| b.id).collect::<Vec<_>>(), recurring_ids);

    // Conflict index is rebuilt too.
    let bob = principal(&engine, "bob", false).await;
    let err = engine
        .submit(&bob, request("gym", span("2024-03-13 18:30", "2024-03-13 19:00"), Recurrence::Once))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let config = Config {
        compact_threshold: 3,
        ..test_config()
    };
    {
        let engine = open(&config);
        let admin = principal(&engine, "admin", true).await;
        for day in 4..=9 {
            let s = span(&format!("2024-03-{day:02} 08:00"), &format!("2024-03-{day:02} 09:00"));
            let pending = engine.submit(&admin, request("hall", s, Recurrence::Once)).await.unwrap();
            engine.approve(&admin, pending.id).await.unwrap();
        }
    }

    let engine = open(&config);
    let admin = Principal::from(&engine.find_user("admin").await.unwrap());
    assert_eq!(engine.list_for_user(&admin).await.unwrap().approved.len(), 6);
}

#[tokio::test]
async fn recurring_policy_is_configurable() {
    for (policy, expect_rows) in [
        (RecurrencePolicy::SkipConflicts, 3usize),
        (RecurrencePolicy::AllOrNothing, 0usize),
    ] {
        let config = Config {
            recurrence_policy: policy,
            ..test_config()
        };
        let engine = open(&config);
        let admin = principal(&engine, "admin", true).await;
        let alice = principal(&engine, "alice", false).await;

        let blocker = engine
            .submit(&admin, request("hall", span("2024-03-11 18:00", "2024-03-11 19:00"), Recurrence::Once))
            .await
            .unwrap();
        engine.approve(&admin, blocker.id).await.unwrap();

        let series = engine
            .submit(
                &alice,
                request("hall", span("2024-03-04 18:30", "2024-03-04 20:00"), Recurrence::Weekly { weeks: 4 }),
            )
            .await
            .unwrap();
        let result = engine.approve(&admin, series.id).await;
        let listing = engine.list_for_user(&alice).await.unwrap();
        assert_eq!(listing.recurring.len(), expect_rows, "{policy:?}");

        match policy {
            RecurrencePolicy::SkipConflicts => {
                let approval = result.unwrap();
                assert_eq!(approval.skipped().count(), 1);
                assert!(listing.requested.is_empty());
            }
            RecurrencePolicy::AllOrNothing => {
                assert!(matches!(result, Err(EngineError::Conflict { .. })));
                assert_eq!(listing.requested.len(), 1);
            }
        }
    }
}

// ── Concurrency ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_and_approvals_keep_calendar_disjoint() {
    let engine = Arc::new(open(&test_config()));
    let admin = principal(&engine, "admin", true).await;

    // Ten users each want one of three overlapping slots.
    let slots = [
        span("2024-03-04 08:00", "2024-03-04 10:00"),
        span("2024-03-04 09:00", "2024-03-04 11:00"),
        span("2024-03-04 10:00", "2024-03-04 12:00"),
    ];
    let mut users = Vec::new();
    for i in 0..10 {
        users.push(principal(&engine, &format!("user{i}"), false).await);
    }

    let submits = users.iter().enumerate().map(|(i, who)| {
        let engine = engine.clone();
        let slot = slots[i % slots.len()];
        async move { engine.submit(who, request("hall", slot, Recurrence::Once)).await }
    });
    let pending: Vec<_> = join_all(submits)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let approvals = pending.iter().map(|p| {
        let engine = engine.clone();
        let admin = admin.clone();
        let id = p.id;
        tokio::spawn(async move { engine.approve(&admin, id).await })
    });
    let results = join_all(approvals).await;
    for r in &results {
        match r.as_ref().unwrap() {
            Ok(_) | Err(EngineError::Conflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let confirmed = engine.store().list(None).await.unwrap().approved;
    assert!(!confirmed.is_empty());
    for (i, a) in confirmed.iter().enumerate() {
        for b in &confirmed[i + 1..] {
            assert!(!a.occupancy().overlaps(&b.occupancy()), "{} overlaps {}", a.span, b.span);
        }
    }
}

#[tokio::test]
async fn unknown_facility_rejected_without_write() {
    let engine = open(&test_config());
    let alice = principal(&engine, "alice", false).await;
    let err = engine
        .submit(&alice, request("pool", span("2024-03-04 08:00", "2024-03-04 09:00"), Recurrence::Once))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(err.is_client_error());
    assert!(engine.list_for_user(&alice).await.unwrap().requested.is_empty());
}
