mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use common::*;
use resonance::kernel::correlator::{CausalRecord, RuleBook};
use resonance::kernel::lifecycle::EventStatus;
use resonance::kernel::normalizer::RejectionKind;
use resonance::kernel::record::{EventId, ParticipantId, TemplateId};
use resonance::kernel::trigger::{CauseId, DeliveryStatus, TriggerKind};
use resonance::outputs::audit::{AuditRecord, MemoryAuditLog};
use resonance::outputs::sink::RecordingTriggerSink;
use resonance::services::catalog::CatalogStore;
use resonance::simulate::{self, SimulationConfig, Simulator};
use resonance::{Error, PipelineConfig, SessionController, Sinks};

async fn wait_for_causes(audit: &MemoryAuditLog, at_least: usize) -> Vec<CausalRecord> {
    for _ in 0..300 {
        let causes = audit.causes().await;
        if causes.len() >= at_least {
            return causes;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    audit.causes().await
}

fn pattern_sequences(causes: &[CausalRecord]) -> Vec<u64> {
    let mut seqs: Vec<u64> = causes
        .iter()
        .filter_map(|c| match c {
            CausalRecord::Pattern(p) => Some(p.sequence),
            CausalRecord::Crossing(_) => None,
        })
        .collect();
    seqs.sort();
    seqs
}

#[tokio::test]
async fn test_raise_arms_yields_one_pattern_and_one_sound() {
    let h = harness(test_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;

    // 1. Three seconds of one dancer, arms up once at 1.5 s
    feed_stream(&h.controller, event, "dancer-1", 0, 3_000, &[1_500]).await;

    // 2. Exactly one trigger, acknowledged
    let triggers = wait_for_triggers(&h.controller, event, 1).await;
    assert_eq!(triggers.len(), 1);
    let trigger = &triggers[0];
    assert_eq!(trigger.kind(), TriggerKind::Sound);
    assert_eq!(trigger.cause(), CauseId::Pattern(1));
    assert_eq!(trigger.cause_at, ts(1_500));
    assert_eq!(trigger.dispatch_seq, 1);

    let settled = wait_for_settled(&h.controller, event).await;
    assert_eq!(settled[0].status, DeliveryStatus::Delivered { attempts: 1 });

    quiesce().await;
    let metrics = h.controller.metrics(event).await.unwrap();
    assert_eq!(metrics.matching.promoted, 1);
    assert_eq!(metrics.intake.accepted, 31);
    assert_eq!(metrics.dispatch.acknowledged, 1);
    assert_eq!(h.sink.accepted().await.len(), 1);

    // 3. The promoted pattern reached the audit log
    let causes = wait_for_causes(&h.audit, 1).await;
    match &causes[..] {
        [CausalRecord::Pattern(p)] => {
            assert_eq!(p.template, TemplateId::new("raise-arms"));
            assert_eq!(p.stream.0, "dancer-1");
            assert_eq!(p.window_end, ts(1_500));
        }
        other => panic!("expected one pattern, got {:?}", other),
    }

    let summary = h.controller.close(event).await.unwrap();
    assert_eq!(summary.detected_patterns, 1);
    assert_eq!(summary.triggers, 1);
    assert_eq!(summary.undelivered, 0);
}

#[tokio::test]
async fn test_closed_event_produces_nothing() {
    let h = harness(test_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;
    h.controller.close(event).await.unwrap();

    let mut t = 0;
    while t <= 3_000 {
        let height = if t == 1_500 { SPIKE_HEIGHT } else { REST_HEIGHT };
        let err: Error = h
            .controller
            .ingest(movement_record(event, "dancer-1", t, height))
            .await
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::InvalidRecord(_)), "{}", err);
        t += 100;
    }

    quiesce().await;
    assert!(h.controller.triggers(event).await.is_empty());
    assert!(h.sink.accepted().await.is_empty());
    assert!(h.audit.records().await.is_empty());
    let metrics = h.controller.metrics(event).await.unwrap();
    assert_eq!(metrics.intake.rejected_inactive, 31);
    assert_eq!(metrics.matching.candidates, 0);
}

#[tokio::test]
async fn test_cooldown_suppresses_repeat_within_window() {
    let h = harness(test_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;

    // Spikes at 1.5 s, 2.0 s and 4.0 s with a 2 s cool-down
    feed_stream(&h.controller, event, "dancer-1", 0, 4_500, &[1_500, 2_000, 4_000]).await;

    let metrics = wait_for_metrics(&h.controller, event, |m| m.matching.candidates >= 3).await;
    quiesce().await;
    let metrics = h.controller.metrics(event).await.unwrap_or(metrics);
    assert_eq!(metrics.matching.promoted, 2);
    assert_eq!(metrics.matching.cooling_down, 1);

    let triggers = wait_for_triggers(&h.controller, event, 2).await;
    let cause_times: Vec<u64> = triggers.iter().map(|t| t.cause_at.ms).collect();
    assert_eq!(cause_times, vec![1_500, 4_000]);
}

#[tokio::test]
async fn test_other_streams_are_not_cooling_down() {
    let h = harness(test_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;

    feed_stream(&h.controller, event, "dancer-1", 0, 2_000, &[1_500]).await;
    feed_stream(&h.controller, event, "dancer-2", 0, 2_000, &[1_600]).await;

    let triggers = wait_for_triggers(&h.controller, event, 2).await;
    assert_eq!(triggers.len(), 2);
    let causes = wait_for_causes(&h.audit, 2).await;
    assert_eq!(pattern_sequences(&causes), vec![1, 2]);
}

fn gated_config() -> PipelineConfig {
    let mut config = test_config();
    config.correlation = RuleBook {
        rules: vec![gated_sound_rule("raise-arms", 0.5)],
        crossing: None,
        ..RuleBook::default()
    };
    config
}

#[tokio::test]
async fn test_gated_rule_without_biometrics_is_suppressed() {
    let h = harness(gated_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;

    feed_stream(&h.controller, event, "dancer-1", 0, 2_000, &[1_500]).await;

    let metrics = wait_for_metrics(&h.controller, event, |m| m.matching.stale_snapshot >= 1).await;
    assert_eq!(metrics.matching.stale_snapshot, 1);
    assert_eq!(metrics.matching.promoted, 0);
    quiesce().await;
    assert!(h.controller.triggers(event).await.is_empty());
}

#[tokio::test]
async fn test_gated_rule_with_old_biometrics_is_suppressed() {
    let h = harness(gated_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;

    h.controller.ingest(excited_record(event, "wearable-1", 0)).await.unwrap();
    feed_stream(&h.controller, event, "dancer-1", 4_000, 6_000, &[6_000]).await;

    let metrics = wait_for_metrics(&h.controller, event, |m| m.matching.stale_snapshot >= 1).await;
    assert_eq!(metrics.matching.stale_snapshot, 1, "6 s old snapshot exceeds the 5 s window");
    assert_eq!(metrics.matching.promoted, 0);
}

#[tokio::test]
async fn test_gated_rule_with_fresh_biometrics() {
    let h = harness(gated_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;

    // 1. Calm crowd: out of range
    h.controller.ingest(calm_record(event, "wearable-1", 0)).await.unwrap();
    feed_stream(&h.controller, event, "dancer-1", 0, 1_000, &[1_000]).await;
    let metrics = wait_for_metrics(&h.controller, event, |m| m.matching.out_of_range >= 1).await;
    assert_eq!(metrics.matching.out_of_range, 1);

    // 2. Excited crowd at a fresh event: promoted with evidence
    let h = harness(gated_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;
    h.controller.ingest(excited_record(event, "wearable-1", 1_000)).await.unwrap();
    feed_stream(&h.controller, event, "dancer-1", 0, 2_000, &[1_500]).await;

    let triggers = wait_for_triggers(&h.controller, event, 1).await;
    assert_eq!(triggers.len(), 1);
    let causes = wait_for_causes(&h.audit, 1).await;
    match &causes[0] {
        CausalRecord::Pattern(p) => {
            let evidence = p.biometric.as_ref().expect("snapshot attached");
            assert!((evidence.intensity - 0.775).abs() < 1e-4);
        }
        other => panic!("expected a pattern, got {:?}", other),
    }
}

#[tokio::test]
async fn test_crowd_crossing_fires_visualization() {
    let mut config = test_config();
    config.correlation.crossing = Some(Default::default());
    let h = harness(config, vec![raise_arms()]).await;
    let event = start_event(&h.controller, 2).await;

    // First sample seeds intensity at 0.775, above the 0.75 edge
    h.controller.ingest(excited_record(event, "wearable-1", 0)).await.unwrap();

    let triggers = wait_for_triggers(&h.controller, event, 1).await;
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].kind(), TriggerKind::Visualization);
    assert_eq!(triggers[0].key.to_string(), "2:crossing-1:visualization");

    // Staying high is not a new edge
    h.controller.ingest(excited_record(event, "wearable-1", 500)).await.unwrap();
    quiesce().await;
    assert_eq!(h.controller.triggers(event).await.len(), 1);
    let metrics = h.controller.metrics(event).await.unwrap();
    assert_eq!(metrics.matching.crossings, 1);
}

#[tokio::test]
async fn test_events_are_isolated() {
    let h = harness(test_config(), vec![raise_arms()]).await;
    let first = start_event(&h.controller, 1).await;
    let second = start_event(&h.controller, 2).await;

    feed_stream(&h.controller, first, "dancer-1", 0, 2_000, &[1_500]).await;
    feed_stream(&h.controller, second, "dancer-1", 0, 2_000, &[1_500]).await;
    wait_for_triggers(&h.controller, first, 1).await;
    wait_for_triggers(&h.controller, second, 1).await;

    h.controller.close(first).await.unwrap();
    assert_eq!(h.controller.status(second).await, Some(EventStatus::Active));

    feed_stream(&h.controller, second, "dancer-1", 2_100, 4_500, &[4_000]).await;
    let triggers = wait_for_triggers(&h.controller, second, 2).await;
    let causes: Vec<CauseId> = triggers.iter().map(|t| t.cause()).collect();
    assert_eq!(causes, vec![CauseId::Pattern(1), CauseId::Pattern(2)]);

    assert_eq!(h.controller.triggers(first).await.len(), 1);
    let err = h
        .controller
        .ingest(movement_record(first, "dancer-1", 5_000, 1.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::EventNotActive);
}

#[tokio::test]
async fn test_redispatch_is_idempotent() {
    let h = harness(test_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;
    feed_stream(&h.controller, event, "dancer-1", 0, 2_000, &[1_500]).await;

    wait_for_triggers(&h.controller, event, 1).await;
    wait_for_settled(&h.controller, event).await;
    let cause = wait_for_causes(&h.audit, 1).await.remove(0);

    // 1. Same cause again while active
    let plan = h.controller.dispatch(&cause).await.unwrap();
    assert!(plan.fresh.is_empty());
    assert_eq!(plan.replayed.len(), 1);

    // 2. And after close
    h.controller.close(event).await.unwrap();
    let plan = h.controller.dispatch(&cause).await.unwrap();
    assert!(plan.fresh.is_empty());
    assert_eq!(plan.replayed.len(), 1);

    assert_eq!(h.sink.calls().await, 1, "Sink saw the trigger exactly once");
    assert_eq!(h.controller.triggers(event).await.len(), 1);
    let metrics = h.controller.metrics(event).await.unwrap();
    assert_eq!(metrics.dispatch.replayed, 1);
}

#[tokio::test]
async fn test_flaky_sink_is_retried() {
    let flaky = Arc::new(FlakySink::new(2));
    let h = harness_with_sink(
        test_config(),
        vec![raise_arms()],
        flaky.clone(),
        Arc::new(RecordingTriggerSink::new()),
    )
    .await;
    let event = start_event(&h.controller, 1).await;
    feed_stream(&h.controller, event, "dancer-1", 0, 2_000, &[1_500]).await;

    wait_for_triggers(&h.controller, event, 1).await;
    let settled = wait_for_settled(&h.controller, event).await;
    assert_eq!(settled[0].status, DeliveryStatus::Delivered { attempts: 3 });
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);

    let metrics = h.controller.metrics(event).await.unwrap();
    assert_eq!(metrics.dispatch.total_attempts, 3);
}

#[tokio::test]
async fn test_unacknowledged_trigger_is_kept_as_failed() {
    let silent = Arc::new(SilentSink::default());
    let h = harness_with_sink(
        test_config(),
        vec![raise_arms()],
        silent.clone(),
        Arc::new(RecordingTriggerSink::new()),
    )
    .await;
    let event = start_event(&h.controller, 1).await;
    feed_stream(&h.controller, event, "dancer-1", 0, 2_000, &[1_500]).await;

    wait_for_triggers(&h.controller, event, 1).await;
    let settled = wait_for_settled(&h.controller, event).await;
    match &settled[0].status {
        DeliveryStatus::Failed { attempts, reason } => {
            assert_eq!(*attempts, 3);
            assert!(reason.contains("dispatch timeout"), "{}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(silent.calls.load(Ordering::SeqCst), 3);

    let metrics = h.controller.metrics(event).await.unwrap();
    assert_eq!(metrics.dispatch.timed_out, 1);
    assert_eq!(metrics.matching.promoted, 1, "Detection stands even if delivery fails");

    // Audit has both the cause and the trigger intent
    quiesce().await;
    let records = h.audit.records().await;
    assert!(records.iter().any(|r| matches!(r, AuditRecord::Trigger(_))));
    assert!(records.iter().any(|r| matches!(r, AuditRecord::Cause(_))));
}

#[tokio::test]
async fn test_rejecting_sink_fails_after_one_attempt() {
    let rejecting = Arc::new(RejectingSink::default());
    let h = harness_with_sink(
        test_config(),
        vec![raise_arms()],
        rejecting.clone(),
        Arc::new(RecordingTriggerSink::new()),
    )
    .await;
    let event = start_event(&h.controller, 1).await;
    feed_stream(&h.controller, event, "dancer-1", 0, 2_000, &[1_500]).await;

    wait_for_triggers(&h.controller, event, 1).await;
    let settled = wait_for_settled(&h.controller, event).await;
    assert!(matches!(settled[0].status, DeliveryStatus::Failed { attempts: 1, .. }));
    assert_eq!(rejecting.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_abandons_pending_delivery() {
    let mut config = test_config();
    config.dispatch.ack_timeout_ms = 5_000;
    let h = harness_with_sink(
        config,
        vec![raise_arms()],
        Arc::new(SilentSink::default()),
        Arc::new(RecordingTriggerSink::new()),
    )
    .await;
    let event = start_event(&h.controller, 1).await;
    feed_stream(&h.controller, event, "dancer-1", 0, 2_000, &[1_500]).await;
    wait_for_triggers(&h.controller, event, 1).await;

    let started = std::time::Instant::now();
    let summary = h.controller.close(event).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2), "Close must not wait on the sink");
    assert_eq!(summary.triggers, 1);
    assert_eq!(summary.undelivered, 0);

    match &h.controller.triggers(event).await[0].status {
        DeliveryStatus::Failed { reason, .. } => assert!(reason.contains("event closed"), "{}", reason),
        other => panic!("expected abandoned delivery, got {:?}", other),
    }
}

#[tokio::test]
async fn test_abandoned_delivery_is_not_a_timeout() {
    let mut config = test_config();
    config.dispatch.ack_timeout_ms = 5_000;
    let h = harness_with_sink(
        config,
        vec![raise_arms()],
        Arc::new(SilentSink::default()),
        Arc::new(RecordingTriggerSink::new()),
    )
    .await;
    let event = start_event(&h.controller, 1).await;
    feed_stream(&h.controller, event, "dancer-1", 0, 2_000, &[1_500]).await;
    wait_for_triggers(&h.controller, event, 1).await;

    let summary = h.controller.close(event).await.unwrap();
    assert_eq!(summary.metrics.dispatch.abandoned, 1);
    assert_eq!(summary.metrics.dispatch.timed_out, 0);
}

#[tokio::test]
async fn test_long_event_keeps_every_count() {
    let h = harness(test_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;

    // 1. One promotion early in the show
    feed_stream(&h.controller, event, "dancer-1", 0, 3_000, &[1_500]).await;
    wait_for_settled(&h.controller, event).await;
    wait_for_metrics(&h.controller, event, |m| m.dispatch.acknowledged == 1).await;

    // 2. Far more biometric traffic than the telemetry log holds
    for i in 0..10_000u64 {
        h.controller
            .ingest(calm_record(event, "wearer-1", 3_100 + i))
            .await
            .expect("biometric accepted");
    }

    // 3. Nothing from step 1 drops out of the totals
    let summary = h.controller.close(event).await.unwrap();
    assert_eq!(summary.detected_patterns, 1);
    assert_eq!(summary.triggers, 1);
    assert_eq!(summary.metrics.matching.promoted, 1);
    assert_eq!(summary.metrics.intake.accepted, 31 + 10_000);
    assert_eq!(summary.metrics.intake.overflows, 10_000 - 256, "Every overflow past capacity counted");
    assert_eq!(summary.metrics.dispatch.acknowledged, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_streams_keep_sequence_order() {
    let h = harness(test_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;

    // 1. Six dancers feeding the same event at once, two gestures each
    let mut feeders = Vec::new();
    for i in 0..6 {
        let controller = h.controller.clone();
        feeders.push(tokio::spawn(async move {
            let stream = format!("dancer-{}", i);
            feed_stream(&controller, event, &stream, 0, 4_500, &[1_500, 4_000]).await;
        }));
    }
    for feeder in feeders {
        feeder.await.expect("feeder finished");
    }

    // 2. Gapless, and dispatch follows promotion order without re-sorting
    let triggers = wait_for_triggers(&h.controller, event, 12).await;
    assert_eq!(triggers.len(), 12);
    for (i, trigger) in triggers.iter().enumerate() {
        let expected = i as u64 + 1;
        assert_eq!(trigger.dispatch_seq, expected, "dispatch order");
        assert_eq!(trigger.cause(), CauseId::Pattern(expected), "promotion order");
    }

    let metrics = wait_for_metrics(&h.controller, event, |m| m.matching.promoted >= 12).await;
    assert_eq!(metrics.matching.promoted, 12);
    assert_eq!(metrics.matching.cooling_down, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_freezes_promotions() {
    let h = harness(test_config(), vec![raise_arms()]).await;
    let event = start_event(&h.controller, 1).await;

    // 1. A burst of gestures still queued in the stages
    for i in 0..8 {
        feed_stream(&h.controller, event, &format!("dancer-{}", i), 0, 1_500, &[1_500]).await;
    }
    let summary = h.controller.close(event).await.unwrap();

    // 2. Nothing is promoted or planned once close has returned
    quiesce().await;
    let metrics = h.controller.metrics(event).await.unwrap();
    assert_eq!(metrics.matching.promoted, summary.detected_patterns);
    assert_eq!(metrics.dispatch.dispatched, summary.metrics.dispatch.dispatched);
    let triggers = h.controller.triggers(event).await;
    assert_eq!(triggers.len(), summary.triggers);
    assert!(triggers.iter().all(|t| t.status != DeliveryStatus::Pending));
    assert!(h.sink.accepted().await.len() <= summary.triggers);
}

#[tokio::test]
async fn test_simulated_show() {
    let catalog = CatalogStore::with_templates(simulate::demo_templates()).await;
    let sink = Arc::new(RecordingTriggerSink::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let controller = SessionController::new(test_config(), catalog, Sinks::new(sink.clone(), audit));

    let event = EventId(1);
    controller
        .schedule(resonance::kernel::lifecycle::EventSpec::new(event, "sim").with_capacity(4))
        .await
        .unwrap();
    controller.activate(event).await.unwrap();
    for p in 0..4 {
        controller.check_in(event, ParticipantId(p)).await.unwrap();
    }

    let mut sim = Simulator::new(SimulationConfig {
        event,
        dancers: 4,
        wearers: 3,
        ..SimulationConfig::default()
    });
    let report = simulate::feed(&controller, &mut sim, 100, None).await;
    assert_eq!(report.rejected, 0);
    assert_eq!(report.accepted, 100 * 4 + 10 * 3);

    let metrics = wait_for_metrics(&controller, event, |m| m.matching.promoted > 0).await;
    assert!(metrics.matching.promoted > 0, "Raise-arms gestures should be detected");

    let summary = controller.close(event).await.unwrap();
    assert_eq!(summary.checked_out_on_close, 4);
    assert!(summary.triggers > 0);
    assert!(!sink.accepted().await.is_empty());
}

#[test]
fn test_simulator_is_deterministic() {
    let config = SimulationConfig {
        dancers: 3,
        wearers: 2,
        seed: 42,
        ..SimulationConfig::default()
    };
    let mut a = Simulator::new(config.clone());
    let mut b = Simulator::new(config);
    for _ in 0..20 {
        assert_eq!(a.step(), b.step());
    }
    assert_eq!(a.now(), ts(2_000));
}
