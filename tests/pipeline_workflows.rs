//! Integration tests for complete segmentation workflows
//!
//! The whole pipeline runs end to end against a fake media tool and a fake
//! box segmenter, so frame contents can be checked pixel by pixel without
//! ffmpeg or model weights.

mod common;

use common::{
    pipeline, source_frame, source_pixel, FakeFactory, FakeMediaTool, Workspace, FPS, HEIGHT,
    WIDTH,
};
use image::{Rgb, Rgba};
use std::sync::Arc;
use video_bgremove::{BackgroundSpec, BoundingBox, ContainerFormat, FrameRange};

#[tokio::test]
async fn test_full_box_on_green_keeps_every_frame_unchanged() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(10));
    let factory = Arc::new(FakeFactory::default());
    let job = workspace.job("green", BoundingBox::full_frame(WIDTH, HEIGHT), "#00FF00");

    let result = pipeline(&tool, &factory, false).run(&job).await.unwrap();

    assert_eq!(result.frame_count, 10);
    assert_eq!(result.fps, FPS);
    assert_eq!(result.container_format, ContainerFormat::Mp4);
    assert_eq!(result.output_path, workspace.output_dir.join("green_segmented.mp4"));
    assert!(!result.format_changed());
    assert_eq!(result.device, "tract:cpu");
    assert!(result.output_path.exists());

    let frames = tool.last_encoded_frames();
    assert_eq!(frames.len(), 10);
    for (index, frame) in frames.iter().enumerate() {
        assert_eq!(frame.to_rgb8(), source_frame(index as u64), "frame {index}");
    }
}

#[tokio::test]
async fn test_pixels_outside_the_box_take_the_background_color() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(4));
    let factory = Arc::new(FakeFactory::default());
    let bbox = BoundingBox::new(2.0, 1.0, 6.0, 5.0);
    let job = workspace.job("inner", bbox, "#00FF00");

    pipeline(&tool, &factory, false).run(&job).await.unwrap();

    let frames = tool.last_encoded_frames();
    assert_eq!(frames.len(), 4);
    for (index, frame) in frames.iter().enumerate() {
        let frame = frame.to_rgb8();
        for (x, y, pixel) in frame.enumerate_pixels() {
            let inside = (2..6).contains(&x) && (1..5).contains(&y);
            let expected = if inside {
                source_pixel(index as u64, x, y)
            } else {
                Rgb([0, 255, 0])
            };
            assert_eq!(*pixel, expected, "frame {index} pixel ({x}, {y})");
        }
    }
}

#[tokio::test]
async fn test_transparent_background_encodes_mask_as_alpha() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(3));
    let factory = Arc::new(FakeFactory::default());
    let job = workspace.job("alpha", BoundingBox::new(0.0, 0.0, 4.0, 6.0), "transparent");

    let result = pipeline(&tool, &factory, false).run(&job).await.unwrap();

    assert_eq!(result.container_format, ContainerFormat::WebM);
    assert_eq!(result.output_path, workspace.output_dir.join("alpha_segmented.webm"));
    assert!(tool.encodes().iter().all(|record| record.alpha));

    let frames = tool.last_encoded_frames();
    assert_eq!(frames.len(), 3);
    let first = frames[0].to_rgba8();
    let Rgb([r, g, b]) = source_pixel(0, 1, 2);
    assert_eq!(*first.get_pixel(1, 2), Rgba([r, g, b, 255]));
    assert_eq!(first.get_pixel(6, 2).0[3], 0);
}

#[tokio::test]
async fn test_alpha_encode_failure_falls_back_to_opaque_mp4() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(3).without_alpha_encoder());
    let factory = Arc::new(FakeFactory::default());
    let job = workspace.job("downgrade", BoundingBox::full_frame(WIDTH, HEIGHT), "transparent");

    let result = pipeline(&tool, &factory, false).run(&job).await.unwrap();

    assert!(result.format_changed());
    assert_eq!(result.container_format, ContainerFormat::Mp4);
    assert_eq!(result.requested_path, workspace.output_dir.join("downgrade_segmented.webm"));
    assert_eq!(result.output_path, workspace.output_dir.join("downgrade_segmented.mp4"));
    assert!(result.output_path.exists());
    assert!(!result.requested_path.exists(), "partial alpha output must be removed");

    let encodes = tool.encodes();
    assert_eq!(encodes.len(), 2);
    assert!(encodes[0].alpha);
    assert!(!encodes[1].alpha);
}

#[tokio::test]
async fn test_webm_rewrite_of_transparent_job_is_not_a_format_change() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(3));
    let factory = Arc::new(FakeFactory::default());
    let mut job = workspace.job("library", BoundingBox::full_frame(WIDTH, HEIGHT), "transparent");
    job.output_path = workspace.output_dir.join("library.mp4");

    let result = pipeline(&tool, &factory, false).run(&job).await.unwrap();

    assert_eq!(result.output_path, workspace.output_dir.join("library.webm"));
    assert_eq!(result.container_format, ContainerFormat::WebM);
    assert_eq!(result.requested_format, ContainerFormat::WebM);
    assert!(!result.format_changed());
}

#[tokio::test]
async fn test_identical_jobs_produce_identical_frames() {
    let workspace = Workspace::new();
    let bbox = BoundingBox::new(1.0, 1.0, 7.0, 4.0);

    let mut runs = Vec::new();
    for job_id in ["first", "second"] {
        let tool = Arc::new(FakeMediaTool::new(5));
        let factory = Arc::new(FakeFactory::default());
        let job = workspace.job(job_id, bbox, "#102030");
        pipeline(&tool, &factory, false).run(&job).await.unwrap();
        runs.push(
            tool.last_encoded_frames()
                .iter()
                .map(|frame| frame.to_rgb8().into_raw())
                .collect::<Vec<_>>(),
        );
    }

    assert_eq!(runs[0].len(), 5);
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
async fn test_sub_range_is_renumbered_and_padded_for_the_whole_video() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(120));
    let factory = Arc::new(FakeFactory::default());
    let job = workspace
        .job("range", BoundingBox::full_frame(WIDTH, HEIGHT), "#00FF00")
        .with_frame_range(FrameRange::new(5, 7));

    let result = pipeline(&tool, &factory, false).run(&job).await.unwrap();
    assert_eq!(result.frame_count, 3);

    let record = tool.encodes().pop().unwrap();
    assert_eq!(record.padding, 3);
    assert_eq!(
        record.frame_names,
        ["frame_000.png", "frame_001.png", "frame_002.png"]
    );
    assert_eq!(record.frames[0].to_rgb8(), source_frame(5));
    assert_eq!(record.frames[2].to_rgb8(), source_frame(7));
}

#[tokio::test]
async fn test_range_end_past_the_video_is_clamped() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(12));
    let factory = Arc::new(FakeFactory::default());
    let job = workspace
        .job("clamped", BoundingBox::full_frame(WIDTH, HEIGHT), "#00FF00")
        .with_frame_range(FrameRange::new(3, 100));

    let result = pipeline(&tool, &factory, false).run(&job).await.unwrap();
    assert_eq!(result.frame_count, 9);
}

#[tokio::test]
async fn test_successful_job_leaves_no_scratch_files() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(4).rotated(90));
    let factory = Arc::new(FakeFactory::default());
    let job = workspace.job("rotated", BoundingBox::full_frame(WIDTH, HEIGHT), "#00FF00");

    let result = pipeline(&tool, &factory, false).run(&job).await.unwrap();

    assert_eq!(tool.bakes(), 1);
    assert!(result.output_path.exists());
    assert!(!job.work_dir.exists(), "work directory must be purged");
    assert!(workspace.source.exists(), "source video must be left alone");
}

#[tokio::test]
async fn test_every_frame_is_prompted_with_the_job_box() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(6));
    let factory = Arc::new(FakeFactory::default());
    let bbox = BoundingBox::new(1.0, 2.0, 5.0, 6.0);
    let job = workspace.job("prompts", bbox, "#000000");

    pipeline(&tool, &factory, false).run(&job).await.unwrap();

    assert_eq!(factory.created(), 1, "one model per job");
    let prompts = factory.prompts();
    assert_eq!(prompts.len(), 6);
    assert!(prompts.iter().all(|prompt| *prompt == bbox));
}

#[tokio::test]
async fn test_auto_remove_prompts_with_a_centered_box() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(2));
    let factory = Arc::new(FakeFactory::default());

    let result = pipeline(&tool, &factory, false)
        .auto_remove(
            "auto",
            &workspace.source,
            "#00FF00".parse().unwrap(),
            &workspace.work_root,
            &workspace.output_dir,
        )
        .await
        .unwrap();

    assert_eq!(result.frame_count, 2);
    assert_eq!(result.output_path, workspace.output_dir.join("auto_segmented.mp4"));
    let expected = BoundingBox::centered(WIDTH, HEIGHT);
    assert!(factory.prompts().iter().all(|prompt| *prompt == expected));
}

#[tokio::test]
async fn test_auto_remove_box_follows_quarter_turn_rotation() {
    for degrees in [90, -90, 270] {
        let workspace = Workspace::new();
        let tool = Arc::new(FakeMediaTool::new(2).rotated(degrees));
        let factory = Arc::new(FakeFactory::default());

        pipeline(&tool, &factory, false)
            .auto_remove(
                "portrait",
                &workspace.source,
                BackgroundSpec::Transparent,
                &workspace.work_root,
                &workspace.output_dir,
            )
            .await
            .unwrap();

        let expected = BoundingBox::centered(HEIGHT, WIDTH);
        assert_eq!(expected, BoundingBox::new(0.0, 0.0, 6.0, 8.0));
        let prompts = factory.prompts();
        assert!(!prompts.is_empty());
        assert!(
            prompts.iter().all(|prompt| *prompt == expected),
            "rotation {degrees}: prompted with {:?}",
            prompts[0]
        );
    }

    // Half turns keep the landscape box
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(2).rotated(180));
    let factory = Arc::new(FakeFactory::default());
    pipeline(&tool, &factory, false)
        .auto_remove(
            "upside-down",
            &workspace.source,
            BackgroundSpec::Transparent,
            &workspace.work_root,
            &workspace.output_dir,
        )
        .await
        .unwrap();
    assert!(factory
        .prompts()
        .iter()
        .all(|prompt| *prompt == BoundingBox::centered(WIDTH, HEIGHT)));
}

#[tokio::test]
async fn test_first_frame_extraction() {
    let workspace = Workspace::new();
    let tool = Arc::new(FakeMediaTool::new(3));
    let factory = Arc::new(FakeFactory::default());
    let output = workspace.temp_dir.path().join("first.png");

    pipeline(&tool, &factory, false)
        .extract_first_frame(&workspace.source, &output)
        .await
        .unwrap();

    assert_eq!(image::open(&output).unwrap().to_rgb8(), source_frame(0));
}
