//! Clip concatenation with the `ffmpeg` CLI.
//!
//! Clips are stream-copied through the concat demuxer, so they must share
//! codecs and parameters (which generated clips from one provider do).
//! Both subprocesses are spawned with `kill_on_drop`, so aborting the job
//! that awaits them also stops them.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::{Value, json};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::runner::ProgressReporter;

/// Merged outputs land here, relative to the storage directory.
pub const MERGED_DIR: &str = "videos/merged";

#[derive(Debug, Clone)]
pub struct FfmpegMerger {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    storage_dir: PathBuf,
    base_url: String,
}

impl FfmpegMerger {
    pub fn new(storage_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            storage_dir: storage_dir.into(),
            base_url: base_url.into(),
        }
    }

    pub fn with_binaries(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Concatenates `clips` (local paths or http(s) URLs, in order) into
    /// `<storage>/videos/merged/<output_name>.mp4`.
    ///
    /// Returns `{"url", "duration", "path"}`; `duration` is `null` when
    /// `ffprobe` cannot read it.
    pub async fn merge_clips(
        &self,
        clips: &[String],
        output_name: &str,
        reporter: &ProgressReporter,
    ) -> Result<Value, JobError> {
        if clips.is_empty() {
            return Err(JobError::failed("no clips to merge"));
        }
        if !is_safe_name(output_name) {
            return Err(JobError::failed(format!("invalid output name '{output_name}'")));
        }

        let out_dir = self.storage_dir.join(MERGED_DIR);
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| JobError::failed(format!("failed to create {}: {e}", out_dir.display())))?;

        let list_path = out_dir.join(format!("{output_name}.txt"));
        let output_path = out_dir.join(format!("{output_name}.mp4"));
        tokio::fs::write(&list_path, concat_list(clips))
            .await
            .map_err(|e| JobError::failed(format!("failed to write concat list: {e}")))?;

        reporter.report(10, format!("merging {} clips", clips.len()));
        debug!(task_id = reporter.task_id(), output = %output_path.display(), "running ffmpeg concat");

        let output = Command::new(&self.ffmpeg)
            .args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(["-protocol_whitelist", "file,http,https,tcp,tls"])
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-c", "copy", "-movflags", "+faststart"])
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        if let Err(e) = tokio::fs::remove_file(&list_path).await {
            debug!(error = %e, "failed to remove concat list");
        }

        let output = output.map_err(|e| JobError::failed(format!("failed to spawn ffmpeg: {e}")))?;
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_owned(), |c| c.to_string());
            return Err(JobError::failed(format!(
                "ffmpeg exit {code}: {}",
                stderr_tail(&output.stderr)
            )));
        }

        reporter.report(90, "probing duration");
        let duration = self.probe_duration(&output_path).await;
        let url = file_url(&self.base_url, &format!("{MERGED_DIR}/{output_name}.mp4"));
        info!(task_id = reporter.task_id(), url = %url, ?duration, "clips merged");

        Ok(json!({
            "url": url,
            "duration": duration,
            "path": output_path.display().to_string(),
        }))
    }

    /// Container duration in seconds via `ffprobe`.
    pub async fn probe_duration(&self, path: &Path) -> Option<f64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                parse_duration(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                warn!(path = %path.display(), stderr = %stderr_tail(&output.stderr), "ffprobe failed");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ffprobe spawn failed");
                None
            }
        }
    }
}

/// Builds a concat demuxer list. Single quotes are closed, escaped, and
/// reopened as the demuxer expects.
pub fn concat_list(clips: &[String]) -> String {
    clips
        .iter()
        .map(|clip| format!("file '{}'\n", clip.replace('\'', r"'\''")))
        .collect()
}

pub fn file_url(base_url: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

pub fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .find_map(|line| line.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Last few non-empty stderr lines, for error messages.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    let tail = lines[start..].join("; ");
    if tail.is_empty() {
        "no output".to_owned()
    } else {
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_list_escapes_quotes() {
        let clips = vec!["/data/a.mp4".to_owned(), "/data/it's.mp4".to_owned()];
        assert_eq!(
            concat_list(&clips),
            "file '/data/a.mp4'\nfile '/data/it'\\''s.mp4'\n"
        );
    }

    #[test]
    fn urls_join_cleanly() {
        assert_eq!(
            file_url("http://localhost:5678/static/", "/videos/merged/ep.mp4"),
            "http://localhost:5678/static/videos/merged/ep.mp4"
        );
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("12.480000\n"), Some(12.48));
        assert_eq!(parse_duration("N/A\n"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr = b"line one\n\nline two\nline three\nline four\n";
        assert_eq!(stderr_tail(stderr), "line two; line three; line four");
        assert_eq!(stderr_tail(b""), "no output");
    }

    #[tokio::test]
    async fn empty_clip_list_fails_without_spawning() {
        let merger = FfmpegMerger::new(std::env::temp_dir(), "http://localhost/static");
        let (reporter, _rx) = ProgressReporter::channel("t");
        let err = merger.merge_clips(&[], "out", &reporter).await.unwrap_err();
        assert_eq!(err, JobError::failed("no clips to merge"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_job_failure() {
        let dir = std::env::temp_dir().join(format!("drama-ffmpeg-{}", uuid::Uuid::new_v4()));
        let merger = FfmpegMerger::new(&dir, "http://localhost/static")
            .with_binaries("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let (reporter, _rx) = ProgressReporter::channel("t");

        let err = merger
            .merge_clips(&["a.mp4".to_owned()], "episode_1", &reporter)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Failed(msg) if msg.starts_with("failed to spawn ffmpeg")));
        assert!(!dir.join(MERGED_DIR).join("episode_1.txt").exists());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn rejects_unsafe_output_names() {
        assert!(is_safe_name("episode_12-ab"));
        assert!(!is_safe_name("../etc/passwd"));
        assert!(!is_safe_name(""));
    }
}
