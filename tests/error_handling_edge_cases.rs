//! Failure paths of the segmentation pipeline
//!
//! Every failure must end the job with one stage-qualified error and must
//! not leave a partial output behind.

mod common;

use common::{pipeline, FakeFactory, FakeMediaTool, Workspace, CORRUPT, HEIGHT, WIDTH};
use std::sync::Arc;
use video_bgremove::{
    BackgroundSpec, BoundingBox, FrameRange, JobStage, SegmentationError, SegmentationJob,
};

fn full_box() -> BoundingBox {
    BoundingBox::full_frame(WIDTH, HEIGHT)
}

#[tokio::test]
async fn test_inverted_range_fails_before_any_tool_call() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(10));
    let factory = Arc::new(FakeFactory::default());
    let job = workspace
        .job("inverted", full_box(), "#00FF00")
        .with_frame_range(FrameRange::new(8, 2));

    let error = pipeline(&tool, &factory, false).run(&job).await.unwrap_err();

    assert_eq!(error.stage(), Some(JobStage::Init));
    assert!(matches!(
        error.root(),
        SegmentationError::InvalidFrameRange { start: 8, end: 2 }
    ));
    assert_eq!(tool.calls(), 0);
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_range_starting_past_the_last_frame_fails_in_decode() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(10));
    let factory = Arc::new(FakeFactory::default());
    let job = workspace
        .job("past-end", full_box(), "#00FF00")
        .with_frame_range(FrameRange::new(10, 0));

    let error = pipeline(&tool, &factory, false).run(&job).await.unwrap_err();

    assert_eq!(error.stage(), Some(JobStage::Decode));
    assert!(matches!(error.root(), SegmentationError::InvalidFrameRange { .. }));
    assert!(!job.work_dir.exists());
}

#[tokio::test]
async fn test_segmentation_failure_aborts_the_job() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(10));
    let factory = Arc::new(FakeFactory::failing_on_frame(3));
    let job = workspace.job("model-error", full_box(), "#00FF00");

    let error = pipeline(&tool, &factory, false).run(&job).await.unwrap_err();

    assert_eq!(error.stage(), Some(JobStage::PerFrame));
    assert!(matches!(
        error.root(),
        SegmentationError::SegmentationFailed { frame: 3, .. }
    ));
    assert!(tool.encodes().is_empty(), "nothing may be encoded after a failed frame");
    assert!(!job.output_path.exists());
    assert!(!job.work_dir.exists());
}

#[tokio::test]
async fn test_failed_job_keeps_work_dir_when_asked() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(5).rotated(180));
    let factory = Arc::new(FakeFactory::failing_on_frame(0));
    let job = workspace.job("retained", full_box(), "transparent");

    let error = pipeline(&tool, &factory, true).run(&job).await.unwrap_err();

    assert_eq!(error.stage(), Some(JobStage::PerFrame));
    assert!(job.work_dir.join("raw").join("frame_0.png").exists());
    assert!(
        !job.work_dir.join("rotated_clip.mp4").exists(),
        "rotation copy is removed even when the work directory is kept"
    );
}

#[tokio::test]
async fn test_failed_rotation_fix_continues_with_original() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(4).rotated(90).without_rotation_fix());
    let factory = Arc::new(FakeFactory::default());
    let job = workspace.job("unrotated", full_box(), "#00FF00");

    let result = pipeline(&tool, &factory, false).run(&job).await.unwrap();

    assert_eq!(result.frame_count, 4);
    assert_eq!(tool.bakes(), 0);
    assert!(!job.work_dir.exists());
    assert!(workspace.source.exists());
}

#[tokio::test]
async fn test_model_load_failure_is_reported_as_model_ready() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(5));
    let factory = Arc::new(FakeFactory::failing_to_load());
    let job = workspace.job("no-model", full_box(), "#00FF00");

    let error = pipeline(&tool, &factory, false).run(&job).await.unwrap_err();

    assert_eq!(error.stage(), Some(JobStage::ModelReady));
    assert!(matches!(error.root(), SegmentationError::Model(_)));
    assert!(!job.work_dir.exists());
}

#[tokio::test]
async fn test_unreadable_video_fails_decode_after_fallback() {
    let workspace = Workspace::with_source(CORRUPT);
    let tool = Arc::new(FakeMediaTool::new(5));
    let factory = Arc::new(FakeFactory::default());
    let job = workspace.job("corrupt", full_box(), "#00FF00");

    let error = pipeline(&tool, &factory, false).run(&job).await.unwrap_err();

    assert_eq!(error.stage(), Some(JobStage::Decode));
    assert!(matches!(error.root(), SegmentationError::UnreadableVideo(_)));
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_first_frame_of_corrupt_video_is_unreadable() {
    let workspace = Workspace::with_source(CORRUPT);
    let tool = Arc::new(FakeMediaTool::new(5));
    let factory = Arc::new(FakeFactory::default());
    let output = workspace.temp_dir.path().join("first.png");

    let error = pipeline(&tool, &factory, false)
        .extract_first_frame(&workspace.source, &output)
        .await
        .unwrap_err();

    assert!(matches!(error, SegmentationError::UnreadableVideo(_)));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_missing_source_video() {
    let workspace = Workspace::new();
    let missing = workspace.temp_dir.path().join("missing.mp4");

    let error = SegmentationJob::in_directories(
        "missing",
        &missing,
        full_box(),
        BackgroundSpec::Transparent,
        &workspace.work_root,
        &workspace.output_dir,
    )
    .unwrap_err();
    assert!(matches!(error, SegmentationError::JobNotFound(_)));

    // Source removed between job creation and execution
    let tool = Arc::new(FakeMediaTool::new(5));
    let factory = Arc::new(FakeFactory::default());
    let job = workspace.job("vanished", full_box(), "#00FF00");
    std::fs::remove_file(&workspace.source).unwrap();

    let error = pipeline(&tool, &factory, false).run(&job).await.unwrap_err();
    assert_eq!(error.stage(), Some(JobStage::Init));
    assert!(matches!(error.root(), SegmentationError::JobNotFound(_)));
    assert_eq!(tool.calls(), 0);
}

#[test]
fn test_invalid_background_specs_are_rejected() {
    for spec in ["", "green", "#00FF0", "#GG0000", "#00FF00AA", "#00 FF00"] {
        assert!(
            matches!(
                BackgroundSpec::parse(spec),
                Err(SegmentationError::InvalidBackgroundSpec(_))
            ),
            "{spec:?} should be rejected"
        );
    }
}
