//! 2x2 grid thumbnails for downloaded videos, newest first. Frames are
//! pulled at 10/30/50/70% of the duration with ffmpeg and composed with an
//! xstack layout; temp frames are removed on every exit path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{error, info, warn};

use crate::store::Store;

pub const THUMBNAILS_PER_RUN: usize = 50;
const FRAME_WIDTH: u32 = 320;
const FRAME_HEIGHT: u32 = 180;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

async fn run_command(cmd: &mut Command) -> Option<std::process::Output> {
    let child = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .ok()?;
    tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output())
        .await
        .ok()?
        .ok()
}

/// Duration in seconds via ffprobe, or None when the probe fails.
pub async fn video_duration(video_path: &Path) -> Option<f64> {
    let output = run_command(Command::new("ffprobe").args([
        "-v",
        "quiet",
        "-show_entries",
        "format=duration",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
        &video_path.display().to_string(),
    ]))
    .await?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse().ok()
}

fn pad_filter(input: usize) -> String {
    format!(
        "[{input}]scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1[s{input}]",
        w = FRAME_WIDTH,
        h = FRAME_HEIGHT
    )
}

/// Extract four frames and compose the grid. Soft-fails (false) on videos
/// shorter than a second or when any frame cannot be extracted.
pub async fn generate_thumbnail(video_path: &Path, output_path: &Path) -> bool {
    let Some(duration) = video_duration(video_path).await else {
        warn!("cannot probe duration: {}", video_path.display());
        return false;
    };
    if duration < 1.0 {
        warn!("video too short for thumbnail: {}", video_path.display());
        return false;
    }

    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "thumb".to_string());
    let parent = output_path.parent().unwrap_or(Path::new("."));

    let mut temp_frames: Vec<PathBuf> = Vec::new();
    for (i, pct) in [0.1, 0.3, 0.5, 0.7].iter().enumerate() {
        let ts = duration * pct;
        let frame_path = parent.join(format!("_temp_frame_{stem}_{i}.jpg"));
        run_command(Command::new("ffmpeg").args([
            "-y",
            "-ss",
            &ts.to_string(),
            "-i",
            &video_path.display().to_string(),
            "-frames:v",
            "1",
            "-update",
            "1",
            "-q:v",
            "2",
            "-vf",
            &format!("scale={FRAME_WIDTH}:-1"),
            &frame_path.display().to_string(),
        ]))
        .await;
        if frame_path.exists() {
            temp_frames.push(frame_path);
        }
    }

    let cleanup = |frames: &[PathBuf]| {
        for f in frames {
            std::fs::remove_file(f).ok();
        }
    };

    if temp_frames.len() < 4 {
        warn!(
            "could only extract {}/4 frames from {}",
            temp_frames.len(),
            video_path.display()
        );
        cleanup(&temp_frames);
        return false;
    }

    let filter = format!(
        "{};{};{};{};[s0][s1][s2][s3]xstack=inputs=4:layout=0_0|w0_0|0_h0|w0_h0",
        pad_filter(0),
        pad_filter(1),
        pad_filter(2),
        pad_filter(3)
    );
    let output = run_command(Command::new("ffmpeg").args([
        "-y",
        "-i",
        &temp_frames[0].display().to_string(),
        "-i",
        &temp_frames[1].display().to_string(),
        "-i",
        &temp_frames[2].display().to_string(),
        "-i",
        &temp_frames[3].display().to_string(),
        "-filter_complex",
        &filter,
        "-frames:v",
        "1",
        "-update",
        "1",
        "-q:v",
        "2",
        &output_path.display().to_string(),
    ]))
    .await;

    cleanup(&temp_frames);

    if output_path.exists() {
        true
    } else {
        let stderr = output
            .map(|o| String::from_utf8_lossy(&o.stderr).to_string())
            .unwrap_or_default();
        let tail: String = stderr.chars().rev().take(1000).collect::<Vec<_>>().into_iter().rev().collect();
        warn!(
            "failed to compose grid thumbnail for {}: ...{tail}",
            video_path.display()
        );
        false
    }
}

pub async fn run(store: &Store, media_dir: &Path) -> anyhow::Result<()> {
    info!("starting video thumbnail generation...");
    let channels = store.active_channels();
    if channels.is_empty() {
        info!("no active channels found");
        return Ok(());
    }

    let mut generated = 0usize;
    let mut failed = 0usize;

    for channel in channels {
        let videos = store.videos_without_thumbnails(channel.id, THUMBNAILS_PER_RUN);
        if videos.is_empty() {
            continue;
        }
        info!("processing {} videos from: {}", videos.len(), channel.title);

        for (message_id, rel_path) in videos {
            let video_path = media_dir.join(&rel_path);
            if !video_path.exists() {
                warn!("  video file not found: {}", video_path.display());
                continue;
            }
            let stem = video_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| message_id.to_string());
            let thumb_name = format!("{stem}_thumb.jpg");
            let thumb_path = video_path.with_file_name(&thumb_name);
            let thumb_rel = Path::new(&rel_path)
                .parent()
                .unwrap_or(Path::new(""))
                .join(&thumb_name)
                .display()
                .to_string();

            if generate_thumbnail(&video_path, &thumb_path).await {
                if let Err(e) = store.update_video_thumbnail(channel.id, message_id, &thumb_rel) {
                    error!("  failed to record thumbnail: {e}");
                } else {
                    generated += 1;
                    info!("  generated: {thumb_rel}");
                }
            } else {
                failed += 1;
            }
        }
    }

    info!("thumbnail generation completed: generated={generated} failed={failed}");
    Ok(())
}
