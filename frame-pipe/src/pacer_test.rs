// ============================================================================
// Pacer Tests
// ============================================================================

use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{FramePacer, PacerExit, PacingClock};
use crate::{
    config::PipelineConfig,
    encoder::EncoderProcess,
    error::CaptureError,
    stats::PipelineStats,
    testing::{FakeLauncher, FakeSource, HandleScript},
};

const TICK: Duration = Duration::from_millis(40);

fn cancel_after(after: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        token.cancel();
    });
    cancel
}

async fn running_encoder(script: HandleScript) -> (EncoderProcess, Arc<crate::testing::LauncherProbe>) {
    let launcher = FakeLauncher::new(vec![Ok(script)]);
    let probe = launcher.probe();
    let mut encoder = EncoderProcess::new(Box::new(launcher));
    encoder.start().await.unwrap();
    (encoder, probe)
}

fn pacer(config: &PipelineConfig) -> (FramePacer, Arc<PipelineStats>) {
    let stats = Arc::new(PipelineStats::default());
    (FramePacer::new(config, Arc::clone(&stats)), stats)
}

// ------------------------------------------------------------------------
// PacingClock Tests
// ------------------------------------------------------------------------

#[test]
fn test_deadlines_are_absolute() {
    let start = Instant::now();
    let clock = PacingClock::new(start, TICK);
    assert_eq!(clock.deadline(0), start);
    assert_eq!(clock.deadline(1), start + TICK);
    assert_eq!(clock.deadline(250), start + Duration::from_secs(10));
}

#[test]
fn test_catch_up_skips_missed_ticks() {
    let start = Instant::now();
    let mut clock = PacingClock::new(start, TICK);
    assert_eq!(clock.fire(), 0);

    // finished early: nothing to skip
    assert_eq!(clock.catch_up(start + Duration::from_millis(30)), 0);
    assert_eq!(clock.next_tick(), 1);

    // exactly on the next deadline: it is still due
    assert_eq!(clock.catch_up(start + TICK), 0);

    // at 95ms ticks 1 and 2 are gone, tick 3 is next
    assert_eq!(clock.catch_up(start + Duration::from_millis(95)), 2);
    assert_eq!(clock.next_tick(), 3);
    assert_eq!(clock.next_deadline(), start + Duration::from_millis(120));
}

// ------------------------------------------------------------------------
// FramePacer Tests
// ------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_no_cumulative_drift_with_jitter() {
    let config = PipelineConfig::default();
    let (pacer, stats) = pacer(&config);
    let mut source = FakeSource::new().with_delay(|call| Duration::from_millis((call * 7) % 31));
    let source_probe = source.probe();
    let (mut encoder, _) = running_encoder(HandleScript::default()).await;

    let start = Instant::now();
    let cancel = cancel_after(Duration::from_secs(10) + Duration::from_millis(20));
    let exit = pacer.run(&mut source, &mut encoder, &cancel).await;
    assert_eq!(exit, PacerExit::Cancelled);

    let captures = source_probe.captures();
    assert_eq!(captures.len(), 251);
    for (n, at) in captures.iter().enumerate() {
        assert_eq!(*at - start, TICK * n as u32, "tick {} off schedule", n);
    }
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.skipped_ticks, 0);
    assert_eq!(snapshot.dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_buffer_full_drops_exactly_those_frames() {
    let config = PipelineConfig::default();
    let (pacer, stats) = pacer(&config);
    let mut source = FakeSource::new();
    let source_probe = source.probe();
    let (mut encoder, encoder_probe) = running_encoder(HandleScript {
        busy_writes: vec![2, 3, 4],
        ..Default::default()
    })
    .await;

    let start = Instant::now();
    let cancel = cancel_after(TICK * 6 + Duration::from_millis(10));
    assert_eq!(pacer.run(&mut source, &mut encoder, &cancel).await, PacerExit::Cancelled);

    let seqs: Vec<u64> = encoder_probe.delivered().iter().map(|(_, seq)| *seq).collect();
    assert_eq!(seqs, vec![1, 5, 6, 7]);
    assert_eq!(stats.snapshot().dropped, 3);
    // dropping never held up the schedule
    for (n, at) in source_probe.captures().iter().enumerate() {
        assert_eq!(*at - start, TICK * n as u32);
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_capture_never_overlaps() {
    let config = PipelineConfig {
        capture_timeout_ms: Some(100),
        ..Default::default()
    };
    let (pacer, stats) = pacer(&config);
    let mut source = FakeSource::new().with_delay(|_| Duration::from_millis(55));
    let source_probe = source.probe();
    let (mut encoder, encoder_probe) = running_encoder(HandleScript::default()).await;

    let start = Instant::now();
    let cancel = cancel_after(Duration::from_millis(1010));
    assert_eq!(pacer.run(&mut source, &mut encoder, &cancel).await, PacerExit::Cancelled);

    assert!(!source_probe.overlapped());
    let captures = source_probe.captures();
    assert_eq!(captures.len(), 13);
    for (n, at) in captures.iter().enumerate() {
        // every overrun costs exactly one tick
        assert_eq!(*at - start, TICK * 2 * n as u32);
    }
    assert_eq!(stats.snapshot().skipped_ticks, 12);
    assert_eq!(encoder_probe.delivered().len(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_closed_input_reports_encoder_lost() {
    let config = PipelineConfig::default();
    let (pacer, stats) = pacer(&config);
    let mut source = FakeSource::new();
    let (mut encoder, encoder_probe) = running_encoder(HandleScript {
        closed_at_write: Some(3),
        ..Default::default()
    })
    .await;

    let exit = pacer
        .run(&mut source, &mut encoder, &CancellationToken::new())
        .await;
    assert_eq!(exit, PacerExit::EncoderLost);
    assert_eq!(encoder_probe.delivered(), vec![(1, 1), (1, 2)]);
    assert_eq!(stats.snapshot().dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exited_process_reports_encoder_lost() {
    let config = PipelineConfig::default();
    let (pacer, _) = pacer(&config);
    let mut source = FakeSource::new();
    let (mut encoder, encoder_probe) = running_encoder(HandleScript {
        exit_after_writes: Some(2),
        ..Default::default()
    })
    .await;

    let exit = pacer
        .run(&mut source, &mut encoder, &CancellationToken::new())
        .await;
    assert_eq!(exit, PacerExit::EncoderLost);
    assert_eq!(encoder_probe.delivered().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_capture_failure_budget() {
    let config = PipelineConfig {
        capture_failure_budget: 5,
        ..Default::default()
    };
    let (pacer, stats) = pacer(&config);
    let mut source = FakeSource::new()
        .failing_with(|_| Some(CaptureError::Timeout(Duration::from_millis(40))));
    let source_probe = source.probe();
    let (mut encoder, _) = running_encoder(HandleScript::default()).await;

    let exit = pacer
        .run(&mut source, &mut encoder, &CancellationToken::new())
        .await;
    assert_eq!(exit, PacerExit::RendererLost);
    assert_eq!(source_probe.captures().len(), 6);
    assert_eq!(stats.snapshot().capture_errors, 6);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_failure_streak() {
    let config = PipelineConfig {
        capture_failure_budget: 2,
        ..Default::default()
    };
    let (pacer, stats) = pacer(&config);
    // two failures, one success, repeated
    let mut source = FakeSource::new().failing_with(|call| {
        (call % 3 != 0).then(|| CaptureError::RendererUnavailable("busy".into()))
    });
    let (mut encoder, _) = running_encoder(HandleScript::default()).await;

    let cancel = cancel_after(Duration::from_secs(2));
    assert_eq!(pacer.run(&mut source, &mut encoder, &cancel).await, PacerExit::Cancelled);
    assert!(stats.snapshot().delivered > 10);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_errors_have_own_ceiling() {
    let config = PipelineConfig {
        capture_failure_budget: 1,
        capture_error_ceiling: 10,
        ..Default::default()
    };
    let (pacer, stats) = pacer(&config);
    let mut source = FakeSource::new().failing_with(|_| Some(CaptureError::Unknown("garbage".into())));
    let source_probe = source.probe();
    let (mut encoder, _) = running_encoder(HandleScript::default()).await;

    let exit = pacer
        .run(&mut source, &mut encoder, &CancellationToken::new())
        .await;
    // the renderer-fault budget of 1 does not apply, the ceiling of 10 does
    assert_eq!(exit, PacerExit::RendererLost);
    assert_eq!(source_probe.captures().len(), 11);
    assert_eq!(stats.snapshot().capture_errors, 11);
}

#[tokio::test(start_paused = true)]
async fn test_mixed_errors_share_ceiling() {
    let config = PipelineConfig {
        capture_failure_budget: 5,
        capture_error_ceiling: 8,
        ..Default::default()
    };
    let (pacer, _) = pacer(&config);
    // alternating kinds never exhaust the fault budget on their own
    let mut source = FakeSource::new().failing_with(|call| {
        Some(if call % 2 == 0 {
            CaptureError::RendererUnavailable("gone".into())
        } else {
            CaptureError::Unknown("garbage".into())
        })
    });
    let source_probe = source.probe();
    let (mut encoder, _) = running_encoder(HandleScript::default()).await;

    let exit = pacer
        .run(&mut source, &mut encoder, &CancellationToken::new())
        .await;
    assert_eq!(exit, PacerExit::RendererLost);
    assert_eq!(source_probe.captures().len(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_hung_capture_is_bounded() {
    let config = PipelineConfig {
        capture_failure_budget: 2,
        ..Default::default()
    };
    let (pacer, stats) = pacer(&config);
    let mut source = FakeSource::new().with_delay(|_| Duration::from_secs(60));
    let source_probe = source.probe();
    let (mut encoder, _) = running_encoder(HandleScript::default()).await;

    let start = Instant::now();
    let exit = pacer
        .run(&mut source, &mut encoder, &CancellationToken::new())
        .await;
    assert_eq!(exit, PacerExit::RendererLost);
    // each capture is cut off after one 40ms interval
    assert_eq!(start.elapsed(), TICK * 3);
    assert!(!source_probe.overlapped());
    assert_eq!(source_probe.captures().len(), 3);
    assert_eq!(stats.snapshot().capture_errors, 3);
}

#[tokio::test(start_paused = true)]
async fn test_stop_observed_within_one_interval() {
    let config = PipelineConfig::default();
    let (pacer, _) = pacer(&config);
    let mut source = FakeSource::new().with_delay(|_| Duration::from_millis(25));
    let (mut encoder, _) = running_encoder(HandleScript::default()).await;

    let start = Instant::now();
    let cancel = cancel_after(Duration::from_millis(90));
    assert_eq!(pacer.run(&mut source, &mut encoder, &cancel).await, PacerExit::Cancelled);
    // cancelled mid-capture of tick 2, returned at once
    assert_eq!(start.elapsed(), Duration::from_millis(90));
}
