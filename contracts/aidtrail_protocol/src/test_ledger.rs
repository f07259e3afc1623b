use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use serde_json::json;

use crate::invariants::{assert_all_invariants, assert_chain_intact};
use crate::verify::TrailFilter;
use crate::{
    Actor, AidLedger, Clock, DonationStatus, LedgerAction, LedgerConfig, LedgerError,
    ManualClock, Priority, Role, GENESIS_HASH,
};

fn clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 18, 11, 15, 0).unwrap(),
    ))
}

fn setup() -> AidLedger {
    AidLedger::new().with_clock(clock())
}

fn donor() -> Actor {
    Actor::donor("Medical Supplies Ltd")
}

fn ngo() -> Actor {
    Actor::ngo("WHO Partners")
}

fn clinic() -> Actor {
    Actor::clinic("Emergency Care Clinic")
}

fn auditor() -> Actor {
    Actor::auditor("National Audit Office")
}

/// Two donations, one requirement, one delivered allocation.
fn populate(ledger: &AidLedger) {
    let d1 = ledger
        .create_donation(&donor(), "Medical Supplies Ltd", "Medical Gloves", 500)
        .unwrap();
    ledger.decide_donation(&ngo(), &d1.id, true, None).unwrap();
    let d2 = ledger
        .create_donation(&donor(), "Medical Supplies Ltd", "Gloves", 100)
        .unwrap();
    ledger.decide_donation(&ngo(), &d2.id, true, None).unwrap();

    let r = ledger
        .create_requirement(&clinic(), "Emergency Care Clinic", "gloves", 600, Priority::CRITICAL)
        .unwrap();
    let a = ledger
        .allocate(&ngo(), &r.id, &[&d1.id, &d2.id], None)
        .unwrap();
    ledger.mark_in_transit(&ngo(), &a.id).unwrap();
    ledger
        .confirm_receipt(&clinic(), &a.id, "Received in good condition", 4)
        .unwrap();
}

// ── Chain integrity ─────────────────────────────────────────────────

#[test]
fn test_fresh_chain_links_from_genesis() {
    let ledger = setup();
    populate(&ledger);

    let entries = ledger.ledger_since(None);
    assert_eq!(entries[0].prev_hash, GENESIS_HASH);
    for pair in entries.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].hash);
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        assert!(pair[1].timestamp >= pair[0].timestamp);
    }
    for entry in &entries {
        assert_eq!(entry.hash.len(), 64);
        assert!(entry.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    let report = ledger.verify_chain();
    assert!(report.ok);
    assert_eq!(report.entries_checked, entries.len() as u64);
    assert_eq!(ledger.integrity_fault(), None);
    assert_all_invariants(&ledger);
}

#[test]
fn test_payload_tamper_is_reported_at_its_sequence() {
    let ledger = setup();
    populate(&ledger);

    ledger.tamper_with_ledger(|entries| {
        entries[3].payload["quantity_remaining"] = json!(9_999);
    });
    let report = ledger.verify_chain();
    assert!(!report.ok);
    assert_eq!(report.first_bad_sequence, Some(3));
}

#[test]
fn test_rewritten_author_is_reported_at_its_sequence() {
    let ledger = setup();
    populate(&ledger);

    ledger.tamper_with_ledger(|entries| {
        entries[0].entity_name = "Shell Company".into();
        entries[0].reference_id = "DON-99".into();
    });
    let report = ledger.verify_chain();
    assert!(!report.ok);
    assert_eq!(report.first_bad_sequence, Some(0));
    assert_eq!(ledger.integrity_fault(), Some(0));
}

#[test]
fn test_rewritten_role_and_action_are_reported() {
    let ledger = setup();
    populate(&ledger);

    ledger.tamper_with_ledger(|entries| {
        entries[4].role = Role::Auditor;
        entries[7].action = LedgerAction::DonationRejected;
    });
    assert_eq!(ledger.verify_chain().first_bad_sequence, Some(4));
}

#[test]
fn test_hash_tamper_is_reported_at_its_sequence() {
    let ledger = setup();
    populate(&ledger);

    ledger.tamper_with_ledger(|entries| {
        let forged = "f".repeat(64);
        entries[5].hash = forged;
    });
    assert_eq!(ledger.verify_chain().first_bad_sequence, Some(5));
}

#[test]
fn test_fault_latches_until_auditor_clears_a_clean_chain() {
    let ledger = setup();
    populate(&ledger);
    let total = ledger.ledger_stats().total_entries;

    let mut original = None;
    ledger.tamper_with_ledger(|entries| {
        original = Some(entries[2].payload.clone());
        entries[2].payload["donor"] = json!("Forged Donor");
    });
    assert_eq!(ledger.verify_chain().first_bad_sequence, Some(2));
    assert_eq!(ledger.integrity_fault(), Some(2));

    // Writes and ledger reads are refused while latched.
    let blocked = ledger.create_donation(&donor(), "Medical Supplies Ltd", "Masks", 10);
    assert_eq!(
        blocked.unwrap_err(),
        LedgerError::ChainIntegrityFault { sequence: 2 }
    );
    assert!(matches!(
        ledger.get_audit_trail(&TrailFilter::default()),
        Err(LedgerError::ChainIntegrityFault { sequence: 2 })
    ));
    assert!(ledger.ledger_entry(0).is_err());

    // The alarm itself stays visible.
    let stats = ledger.ledger_stats();
    assert_eq!(stats.integrity_fault, Some(2));
    assert_eq!(stats.total_entries, total);

    assert!(matches!(
        ledger.clear_integrity_fault(&ngo()),
        Err(LedgerError::NotAuthorized(_))
    ));
    assert!(matches!(
        ledger.clear_integrity_fault(&auditor()),
        Err(LedgerError::ChainIntegrityFault { sequence: 2 })
    ));

    let original = original.unwrap();
    ledger.tamper_with_ledger(|entries| entries[2].payload = original);
    let report = ledger.clear_integrity_fault(&auditor()).unwrap();
    assert!(report.ok);
    assert_eq!(ledger.integrity_fault(), None);

    ledger
        .create_donation(&donor(), "Medical Supplies Ltd", "Masks", 10)
        .unwrap();
    assert_chain_intact(&ledger.ledger_since(None));
}

// ── Trail queries ───────────────────────────────────────────────────

#[test]
fn test_audit_trail_is_idempotent() {
    let ledger = setup();
    populate(&ledger);
    let filter = TrailFilter::default();
    let first = ledger.get_audit_trail(&filter).unwrap();
    let second = ledger.get_audit_trail(&filter).unwrap();
    assert_eq!(first, second);
    assert!(first.windows(2).all(|w| w[0].sequence > w[1].sequence));
}

#[test]
fn test_participant_filter_includes_payload_parties() {
    let ledger = setup();
    populate(&ledger);

    let donor_trail = ledger
        .get_audit_trail(&TrailFilter::default().participant("medical supplies ltd"))
        .unwrap();
    let donor_actions: Vec<LedgerAction> = donor_trail.iter().map(|e| e.action).collect();
    // The donor never authored the allocation entries but is named in them.
    assert!(donor_actions.contains(&LedgerAction::AllocationCreated));
    assert!(donor_actions.contains(&LedgerAction::AllocationReceived));

    let clinic_trail = ledger
        .get_audit_trail(
            &TrailFilter::default()
                .participant("Emergency Care Clinic")
                .participant_role(Role::Clinic),
        )
        .unwrap();
    assert!(clinic_trail
        .iter()
        .all(|e| e.reference_id.starts_with("REQ-") || e.reference_id.starts_with("ALC-")));
    assert!(!clinic_trail.is_empty());
}

#[test]
fn test_text_and_action_filters() {
    let ledger = setup();
    populate(&ledger);

    let don2 = ledger
        .get_audit_trail(&TrailFilter::default().text("DON-2").oldest_first())
        .unwrap();
    let actions: Vec<LedgerAction> = don2.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        [
            LedgerAction::DonationCreated,
            LedgerAction::DonationAccepted,
            LedgerAction::DonationAllocated,
            LedgerAction::DonationInTransit,
            LedgerAction::DonationReceived,
        ]
    );

    let created = ledger
        .get_audit_trail(
            &TrailFilter::default()
                .action(LedgerAction::DonationCreated)
                .limit(1),
        )
        .unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].reference_id, "DON-2");
}

// ── Restore ─────────────────────────────────────────────────────────

#[test]
fn test_restore_rebuilds_identical_state() {
    let ledger = setup();
    populate(&ledger);
    let entries = ledger.ledger_since(None);

    let restored = AidLedger::restore(entries, clock(), LedgerConfig::default()).unwrap();

    assert_eq!(restored.donations(), ledger.donations());
    assert_eq!(restored.requirements(), ledger.requirements());
    assert_eq!(restored.allocations(), ledger.allocations());
    assert_eq!(restored.ledger_stats(), ledger.ledger_stats());
    assert_eq!(restored.integrity_fault(), None);

    let next = restored
        .create_donation(&donor(), "Medical Supplies Ltd", "Masks", 10)
        .unwrap();
    assert_eq!(next.id, "DON-3");
    assert_all_invariants(&restored);
}

#[test]
fn test_restore_keeps_quantities_of_unchanged_status_draws() {
    let ledger = setup();
    let d = ledger
        .create_donation(&donor(), "Medical Supplies Ltd", "Masks", 500)
        .unwrap();
    ledger.decide_donation(&ngo(), &d.id, true, None).unwrap();
    let r = ledger
        .create_requirement(&clinic(), "Emergency Care Clinic", "Masks", 300, Priority::ROUTINE)
        .unwrap();
    ledger.allocate(&ngo(), &r.id, &[&d.id], Some(100)).unwrap();
    ledger.allocate(&ngo(), &r.id, &[&d.id], Some(100)).unwrap();

    let restored =
        AidLedger::restore(ledger.ledger_since(None), clock(), LedgerConfig::default()).unwrap();
    let rebuilt = restored.donation(&d.id).unwrap();
    assert_eq!(rebuilt.quantity_remaining, 300);
    assert_eq!(rebuilt.status, DonationStatus::PartiallyAllocated);
    assert_eq!(restored.requirement(&r.id).unwrap().quantity_fulfilled, 200);
}

#[test]
fn test_restore_of_tampered_chain_latches_fault() {
    let ledger = setup();
    populate(&ledger);
    let mut entries = ledger.ledger_since(None);
    entries[1].payload["snapshot"]["quantity_total"] = json!(9_999);

    let restored = AidLedger::restore(entries, clock(), LedgerConfig::default()).unwrap();
    assert_eq!(restored.integrity_fault(), Some(1));
    assert!(matches!(
        restored.create_donation(&donor(), "Medical Supplies Ltd", "Masks", 1),
        Err(LedgerError::ChainIntegrityFault { sequence: 1 })
    ));
}

#[test]
fn test_restore_refuses_unreplayable_chain() {
    let ledger = setup();
    populate(&ledger);
    let mut entries = ledger.ledger_since(None);
    entries.remove(4);

    assert!(matches!(
        AidLedger::restore(entries, clock(), LedgerConfig::default()),
        Err(LedgerError::ChainIntegrityFault { sequence: 4 })
    ));
}

#[test]
fn test_ledger_since_skips_persisted_prefix() {
    let ledger = setup();
    populate(&ledger);
    let total = ledger.ledger_stats().total_entries;
    let tail = ledger.ledger_since(Some(total - 3));
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].sequence, total - 2);
    assert!(ledger.ledger_since(Some(total - 1)).is_empty());
}

// ── Concurrency ─────────────────────────────────────────────────────

#[test]
fn test_competing_allocations_never_overdraw() {
    let ledger = setup();
    let d = ledger
        .create_donation(&donor(), "Medical Supplies Ltd", "Insulin", 100)
        .unwrap();
    ledger.decide_donation(&ngo(), &d.id, true, None).unwrap();
    let r1 = ledger
        .create_requirement(&clinic(), "Emergency Care Clinic", "Insulin", 70, Priority::CRITICAL)
        .unwrap();
    let r2 = ledger
        .create_requirement(&clinic(), "Emergency Care Clinic", "Insulin", 70, Priority::CRITICAL)
        .unwrap();

    let start = Barrier::new(2);
    let (shared, start, donation) = (&ledger, &start, d.id.as_str());
    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = [r1.id.as_str(), r2.id.as_str()]
            .into_iter()
            .map(|req| {
                s.spawn(move || {
                    start.wait();
                    shared.allocate(&ngo(), req, &[donation], None)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(succeeded, 1);
    assert!(outcomes.iter().any(|o| matches!(
        o,
        Err(LedgerError::InsufficientQuantity {
            requested: 70,
            available: 30,
            ..
        })
    )));

    let d = ledger.donation(&d.id).unwrap();
    assert_eq!(d.quantity_remaining, 30);
    assert_all_invariants(&ledger);
}

#[test]
fn test_lock_timeout_is_a_concurrency_conflict() {
    let ledger = setup().with_config(LedgerConfig {
        lock_timeout: Duration::from_millis(20),
        max_conflict_retries: 2,
        retry_backoff: Duration::from_millis(5),
        ..LedgerConfig::default()
    });
    let held = Barrier::new(2);

    let outcome = thread::scope(|s| {
        s.spawn(|| {
            ledger.tamper_with_ledger(|_| {
                held.wait();
                thread::sleep(Duration::from_millis(300));
            })
        });
        held.wait();
        ledger.create_donation(&donor(), "Medical Supplies Ltd", "Masks", 10)
    });

    let err = outcome.unwrap_err();
    assert_eq!(err, LedgerError::ConcurrencyConflict { waited_ms: 20 });
    assert!(err.is_retryable());
    assert_eq!(ledger.ledger_stats().total_entries, 0);
}

fn insulin_ready_to_allocate(ledger: &AidLedger) -> (String, String) {
    let d = ledger
        .create_donation(&donor(), "Medical Supplies Ltd", "Insulin", 100)
        .unwrap();
    ledger.decide_donation(&ngo(), &d.id, true, None).unwrap();
    let r = ledger
        .create_requirement(&clinic(), "Emergency Care Clinic", "Insulin", 60, Priority::CRITICAL)
        .unwrap();
    (d.id, r.id)
}

#[test]
fn test_allocate_retries_through_a_brief_lock_hold() {
    let ledger = setup().with_config(LedgerConfig {
        lock_timeout: Duration::from_millis(20),
        max_conflict_retries: 5,
        retry_backoff: Duration::from_millis(20),
        ..LedgerConfig::default()
    });
    let (donation, requirement) = insulin_ready_to_allocate(&ledger);
    let held = Barrier::new(2);

    let (outcome, elapsed) = thread::scope(|s| {
        s.spawn(|| {
            ledger.tamper_with_ledger(|_| {
                held.wait();
                thread::sleep(Duration::from_millis(60));
            })
        });
        held.wait();
        let started = Instant::now();
        let outcome = ledger.allocate(&ngo(), &requirement, &[&donation], None);
        (outcome, started.elapsed())
    });

    assert_eq!(outcome.unwrap().quantity, 60);
    // First window timed out, then one backoff before the winning attempt.
    assert!(elapsed >= Duration::from_millis(40));
    assert_eq!(ledger.donation(&donation).unwrap().quantity_remaining, 40);
    assert_all_invariants(&ledger);
}

#[test]
fn test_allocate_gives_up_after_bounded_retries() {
    let ledger = setup().with_config(LedgerConfig {
        lock_timeout: Duration::from_millis(10),
        max_conflict_retries: 2,
        retry_backoff: Duration::from_millis(5),
        ..LedgerConfig::default()
    });
    let (donation, requirement) = insulin_ready_to_allocate(&ledger);
    let before = ledger.ledger_stats();
    let held = Barrier::new(2);

    let (outcome, elapsed) = thread::scope(|s| {
        s.spawn(|| {
            ledger.tamper_with_ledger(|_| {
                held.wait();
                thread::sleep(Duration::from_millis(600));
            })
        });
        held.wait();
        let started = Instant::now();
        let outcome = ledger.allocate(&ngo(), &requirement, &[&donation], None);
        (outcome, started.elapsed())
    });

    assert_eq!(
        outcome.unwrap_err(),
        LedgerError::ConcurrencyConflict { waited_ms: 10 }
    );
    // Three 10ms windows plus 5ms and 10ms of backoff.
    assert!(elapsed >= Duration::from_millis(45));
    assert!(elapsed < Duration::from_millis(600));
    assert_eq!(ledger.ledger_stats(), before);
    assert!(ledger.allocations().is_empty());
    assert_eq!(ledger.donation(&donation).unwrap().quantity_remaining, 100);
}
