//! Pipeline orchestrator integration tests
//!
//! Scripted describer + generator, in-memory store, temp media dir.
//! Pacing tests run on a paused clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{insert_staggered, memory_store, temp_media, ScriptedDescriber, ScriptedGenerator};
use vision_relay::broadcast::EventBus;
use vision_relay::generator::{GeneratorError, ImageGenerator};
use vision_relay::pipeline::{PipelineError, PipelineOrchestrator, StageFloors};
use vision_relay::storage::{MediaStore, RecordStore};
use vision_relay::types::{CaptureStatus, RelayEvent, StateUpdate};
use vision_relay::vision::VisionDescriber;

fn orchestrator(
    store: &Arc<dyn RecordStore>,
    describer: ScriptedDescriber,
    generator: ScriptedGenerator,
    media: MediaStore,
    events: &EventBus,
    floors: StageFloors,
) -> PipelineOrchestrator {
    let describer: Arc<dyn VisionDescriber> = Arc::new(describer);
    let generator: Arc<dyn ImageGenerator> = Arc::new(generator);
    PipelineOrchestrator::new(
        Arc::clone(store),
        describer,
        generator,
        media,
        events.clone(),
        floors,
        Duration::from_secs(30),
    )
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<RelayEvent>) -> Vec<RelayEvent> {
    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        received.push(event);
    }
    received
}

#[tokio::test]
async fn test_full_chain_links_records() {
    let store = memory_store();
    let (media, _dir) = temp_media();
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let orchestrator = orchestrator(
        &store,
        ScriptedDescriber::new(),
        ScriptedGenerator::new(),
        media.clone(),
        &events,
        StageFloors::none(),
    );

    let capture = insert_staggered(store.as_ref(), &["frame.jpg"], CaptureStatus::Pending).remove(0);
    let run = orchestrator.run(&capture).await.unwrap();

    assert_eq!(run.capture.status, CaptureStatus::Described);
    assert_eq!(run.description.camera_image_id, capture.id);
    assert_eq!(run.generation.text_description_id, run.description.id);
    assert_eq!(run.generation.prompt, run.description.description);

    let chain = store.resolve_chain(&run.generation.id).unwrap().unwrap();
    assert_eq!(chain.capture.id, capture.id);
    assert_eq!(chain.description.id, run.description.id);
    assert!(chain.timestamps_ordered());

    let bytes = tokio::fs::read(media.path_for(&run.generation.filename)).await.unwrap();
    assert_eq!(bytes, ScriptedGenerator::PAYLOAD);
    assert!(run.generation.filename.ends_with(".webp"));

    let names: Vec<&str> = drain(&mut rx).iter().map(RelayEvent::name).collect();
    assert_eq!(
        names,
        vec!["state-updated", "state-updated", "state-updated", "generation-complete"]
    );
}

#[tokio::test]
async fn test_generator_failure_keeps_description() {
    let store = memory_store();
    let (media, _dir) = temp_media();
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let orchestrator = orchestrator(
        &store,
        ScriptedDescriber::new(),
        ScriptedGenerator::failing(),
        media,
        &events,
        StageFloors::none(),
    );

    let capture = insert_staggered(store.as_ref(), &["frame.jpg"], CaptureStatus::Pending).remove(0);
    let err = orchestrator.run(&capture).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Generator(GeneratorError::Status { status: 500, .. })
    ));
    assert_eq!(
        store.get_capture(&capture.id).unwrap().unwrap().status,
        CaptureStatus::Described
    );
    assert!(store.description_for_capture(&capture.id).unwrap().is_some());
    assert!(store.list_generated_images().unwrap().is_empty());

    // Earlier broadcasts stay sent; no completion
    let received = drain(&mut rx);
    assert_eq!(received.len(), 2);
    assert!(received
        .iter()
        .all(|e| !matches!(e, RelayEvent::GenerationComplete(_))));
}

#[tokio::test]
async fn test_describer_failure_skips_generation() {
    let store = memory_store();
    let (media, _dir) = temp_media();
    let events = EventBus::new(64);
    let describer = ScriptedDescriber::new();
    describer.fail_on("frame.jpg");
    let generator = ScriptedGenerator::new();
    let orchestrator = orchestrator(&store, describer, generator, media, &events, StageFloors::none());

    let capture = insert_staggered(store.as_ref(), &["frame.jpg"], CaptureStatus::Pending).remove(0);
    let err = orchestrator.run(&capture).await.unwrap_err();

    assert!(matches!(err, PipelineError::Describer(_)));
    assert_eq!(
        store.get_capture(&capture.id).unwrap().unwrap().status,
        CaptureStatus::Error
    );
    assert!(store.list_generated_images().unwrap().is_empty());
}

#[tokio::test]
async fn test_accepts_capture_claimed_by_caller() {
    let store = memory_store();
    let (media, _dir) = temp_media();
    let events = EventBus::new(64);
    let orchestrator = orchestrator(
        &store,
        ScriptedDescriber::new(),
        ScriptedGenerator::new(),
        media,
        &events,
        StageFloors::none(),
    );

    let capture = insert_staggered(store.as_ref(), &["frame.jpg"], CaptureStatus::Processing).remove(0);
    let run = orchestrator.run(&capture).await.unwrap();
    assert_eq!(run.capture.status, CaptureStatus::Described);
}

#[tokio::test]
async fn test_concurrent_runs_do_not_interleave() {
    let store = memory_store();
    let (media, _dir) = temp_media();
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let orchestrator = orchestrator(
        &store,
        ScriptedDescriber::with_delay(Duration::from_millis(50)),
        ScriptedGenerator::new(),
        media,
        &events,
        StageFloors::none(),
    );

    let captures = insert_staggered(store.as_ref(), &["a.jpg", "b.jpg"], CaptureStatus::Pending);
    let (first, second) = tokio::join!(orchestrator.run(&captures[0]), orchestrator.run(&captures[1]));
    first.unwrap();
    second.unwrap();

    // Each chain's four events arrive contiguously
    let received = drain(&mut rx);
    assert_eq!(received.len(), 8);
    for chain in received.chunks(4) {
        assert!(matches!(
            chain[0],
            RelayEvent::StateUpdated(StateUpdate::Capture { .. })
        ));
        assert!(matches!(
            chain[1],
            RelayEvent::StateUpdated(StateUpdate::Description { .. })
        ));
        assert!(matches!(
            chain[2],
            RelayEvent::StateUpdated(StateUpdate::Generation { .. })
        ));
        assert!(matches!(chain[3], RelayEvent::GenerationComplete(_)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_description_stage_is_held_to_floor() {
    let store = memory_store();
    let (media, _dir) = temp_media();
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let floors = StageFloors {
        description: Duration::from_millis(10_000),
        generation: Duration::from_millis(5_000),
    };
    let orchestrator = orchestrator(
        &store,
        ScriptedDescriber::new(),
        ScriptedGenerator::failing(),
        media,
        &events,
        floors,
    );

    let capture = insert_staggered(store.as_ref(), &["frame.jpg"], CaptureStatus::Pending).remove(0);

    let start = tokio::time::Instant::now();
    let listener = tokio::spawn(async move {
        let mut stamps = Vec::new();
        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            stamps.push((event, start.elapsed()));
        }
        stamps
    });

    // Generation fails, so the run ends right after the description hold
    let err = orchestrator.run(&capture).await.unwrap_err();
    assert!(matches!(err, PipelineError::Generator(_)));
    assert!(start.elapsed() >= Duration::from_millis(10_000));

    let stamps = listener.await.unwrap();
    assert!(matches!(
        stamps[0].0,
        RelayEvent::StateUpdated(StateUpdate::Capture { .. })
    ));
    assert!(stamps[0].1 < Duration::from_millis(10));
    assert!(matches!(
        stamps[1].0,
        RelayEvent::StateUpdated(StateUpdate::Description { .. })
    ));
    assert!(stamps[1].1 >= Duration::from_millis(9_990));
}

#[tokio::test(start_paused = true)]
async fn test_slow_stage_is_not_held_further() {
    let store = memory_store();
    let (media, _dir) = temp_media();
    let events = EventBus::new(64);
    let floors = StageFloors {
        description: Duration::from_millis(1_000),
        generation: Duration::ZERO,
    };
    let orchestrator = orchestrator(
        &store,
        ScriptedDescriber::with_delay(Duration::from_millis(3_000)),
        ScriptedGenerator::failing(),
        media,
        &events,
        floors,
    );

    let capture = insert_staggered(store.as_ref(), &["frame.jpg"], CaptureStatus::Pending).remove(0);

    let start = tokio::time::Instant::now();
    let _ = orchestrator.run(&capture).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(3_000));
    assert!(elapsed < Duration::from_millis(4_000));
}

#[tokio::test]
async fn test_reset_during_description_stops_the_chain() {
    let store = memory_store();
    let (media, _dir) = temp_media();
    let events = EventBus::new(64);
    let generator = ScriptedGenerator::new();
    let orchestrator = orchestrator(
        &store,
        ScriptedDescriber::with_delay(Duration::from_millis(200)),
        generator,
        media,
        &events,
        StageFloors::none(),
    );

    let capture = insert_staggered(store.as_ref(), &["frame.jpg"], CaptureStatus::Pending).remove(0);
    let (result, reset) = tokio::join!(orchestrator.run(&capture), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store
            .transition_capture_status(&capture.id, CaptureStatus::Processing, CaptureStatus::Pending)
            .unwrap()
    });

    assert!(reset);
    assert!(matches!(
        result,
        Err(PipelineError::NotRunnable {
            status: CaptureStatus::Pending,
            ..
        })
    ));
    assert_eq!(
        store.get_capture(&capture.id).unwrap().unwrap().status,
        CaptureStatus::Pending
    );
    assert!(store.description_for_capture(&capture.id).unwrap().is_none());
    assert!(store.list_generated_images().unwrap().is_empty());
}
