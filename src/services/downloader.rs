use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static PROGRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%(?:\s+of\s+~?\S+)?(?:\s+at\s+(\S+))?(?:\s+ETA\s+(\S+))?")
        .unwrap()
});

static DESTINATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\] Destination: (.+)$").unwrap());

static MERGE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[Merger\] Merging formats into "(.+)""#).unwrap());

#[derive(Clone, Debug)]
pub struct YtDlpConfig {
    pub binary_path: PathBuf,
    pub format_spec: String,
    pub geo_bypass: bool,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("yt-dlp"),
            format_spec: "bestvideo*+bestaudio/best".to_string(),
            geo_bypass: false,
        }
    }
}

/// Tagged event stream for one download. Consumers receive these over the
/// channel handed to `download`; the final outcome also comes back as the
/// return value for the caller driving the lifecycle coordinator.
#[derive(Clone, Debug)]
pub enum DownloadEvent {
    Started { video_id: i64, url: String },
    Progress { video_id: i64, percent: f64, speed: Option<String>, eta: Option<String> },
    Completed { video_id: i64, file_path: PathBuf },
    Failed { video_id: i64, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum DownloaderError {
    #[error("yt-dlp exited with status {code:?}: {stderr_tail}")]
    CommandFailed { code: Option<i32>, stderr_tail: String },

    #[error("Download cancelled")]
    Cancelled,

    #[error("yt-dlp reported no output file")]
    NoOutputFile,

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct DownloadRequest {
    pub video_id: i64,
    pub url: String,
    pub dest_dir: PathBuf,
    pub output_template: String,
}

impl DownloadRequest {
    pub fn new<U: Into<String>, P: Into<PathBuf>>(video_id: i64, url: U, dest_dir: P) -> Self {
        Self {
            video_id,
            url: url.into(),
            dest_dir: dest_dir.into(),
            output_template: "%(id)s.%(ext)s".to_string(),
        }
    }
}

/// yt-dlp subprocess wrapper. Progress lines on stdout are regex-parsed
/// into events; cancellation kills the child. The wrapper reports facts
/// only -- status transitions stay with the caller.
pub struct Downloader {
    config: YtDlpConfig,
}

impl Downloader {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    pub async fn download(
        &self,
        request: &DownloadRequest,
        events: mpsc::Sender<DownloadEvent>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloaderError> {
        let mut command = Command::new(&self.config.binary_path);
        command
            .arg("--newline")
            .arg("--no-playlist")
            .args(["--format", &self.config.format_spec])
            .args(["--output", &request.output_template]);

        if self.config.geo_bypass {
            command.arg("--geo-bypass");
        }

        command
            .arg("--paths")
            .arg(request.dest_dir.as_os_str())
            .arg(&request.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;

        let _ = events
            .send(DownloadEvent::Started {
                video_id: request.video_id,
                url: request.url.clone(),
            })
            .await;

        // Drain stderr concurrently so a chatty child cannot deadlock on a
        // full pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer).await;
                buffer
            })
        });

        let mut destination: Option<String> = None;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();

            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        match line? {
                            Some(line) => {
                                self.handle_line(&line, request.video_id, &events, &mut destination).await;
                            }
                            None => break,
                        }
                    }
                    _ = cancel.cancelled() => {
                        let _ = child.kill().await;
                        let _ = events
                            .send(DownloadEvent::Failed {
                                video_id: request.video_id,
                                message: "cancelled".to_string(),
                            })
                            .await;
                        return Err(DownloaderError::Cancelled);
                    }
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(DownloaderError::Cancelled);
            }
        };

        let stderr_tail = match stderr_task {
            Some(task) => {
                let output = task.await.unwrap_or_default();
                let tail_start = output.len().saturating_sub(500);
                output[tail_start..].trim().to_string()
            }
            None => String::new(),
        };

        if !status.success() {
            log::error!("yt-dlp failed for {}: {stderr_tail}", request.url);
            let _ = events
                .send(DownloadEvent::Failed {
                    video_id: request.video_id,
                    message: stderr_tail.clone(),
                })
                .await;

            return Err(DownloaderError::CommandFailed { code: status.code(), stderr_tail });
        }

        let destination = destination.ok_or(DownloaderError::NoOutputFile)?;
        let mut file_path = PathBuf::from(destination);
        if file_path.is_relative() {
            file_path = request.dest_dir.join(file_path);
        }

        let _ = events
            .send(DownloadEvent::Completed {
                video_id: request.video_id,
                file_path: file_path.clone(),
            })
            .await;

        Ok(file_path)
    }

    async fn handle_line(
        &self,
        line: &str,
        video_id: i64,
        events: &mpsc::Sender<DownloadEvent>,
        destination: &mut Option<String>,
    ) {
        if let Some(path) = parse_destination(line) {
            *destination = Some(path);
            return;
        }

        if let Some((percent, speed, eta)) = parse_progress(line) {
            let _ = events
                .send(DownloadEvent::Progress { video_id, percent, speed, eta })
                .await;
        }
    }
}

fn parse_progress(line: &str) -> Option<(f64, Option<String>, Option<String>)> {
    let captures = PROGRESS_REGEX.captures(line)?;

    let percent: f64 = captures.get(1)?.as_str().parse().ok()?;
    let speed = captures.get(2).map(|m| m.as_str().to_string());
    let eta = captures.get(3).map(|m| m.as_str().to_string());

    Some((percent, speed, eta))
}

fn parse_destination(line: &str) -> Option<String> {
    if let Some(captures) = MERGE_REGEX.captures(line) {
        return Some(captures.get(1)?.as_str().to_string());
    }

    DESTINATION_REGEX
        .captures(line)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_real_progress_lines() {
        let (percent, speed, eta) =
            parse_progress("[download]  42.7% of ~120.32MiB at 5.46MiB/s ETA 00:12").unwrap();
        assert_eq!(percent, 42.7);
        assert_eq!(speed.as_deref(), Some("5.46MiB/s"));
        assert_eq!(eta.as_deref(), Some("00:12"));

        let (percent, speed, eta) = parse_progress("[download] 100% of 10.00MiB").unwrap();
        assert_eq!(percent, 100.0);
        assert!(speed.is_none());
        assert!(eta.is_none());

        assert!(parse_progress("[info] Downloading video thumbnail").is_none());
    }

    #[test]
    fn parses_destination_and_merge_lines() {
        assert_eq!(
            parse_destination("[download] Destination: dQw4w9WgXcQ.webm").as_deref(),
            Some("dQw4w9WgXcQ.webm")
        );
        assert_eq!(
            parse_destination("[Merger] Merging formats into \"dQw4w9WgXcQ.mp4\"").as_deref(),
            Some("dQw4w9WgXcQ.mp4")
        );
        assert!(parse_destination("[youtube] dQw4w9WgXcQ: Downloading webpage").is_none());
    }

    #[cfg(unix)]
    mod unix_tests {
        use std::os::unix::fs::PermissionsExt;

        use tempfile::TempDir;

        use super::*;

        fn fake_ytdlp(dir: &TempDir, script_body: &str) -> YtDlpConfig {
            let path = dir.path().join("yt-dlp");
            std::fs::write(&path, format!("#!/bin/sh\n{script_body}")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

            YtDlpConfig {
                binary_path: path,
                ..YtDlpConfig::default()
            }
        }

        #[tokio::test]
        async fn successful_run_emits_progress_and_completion() {
            let dir = TempDir::new().unwrap();
            let dest = TempDir::new().unwrap();

            let config = fake_ytdlp(
                &dir,
                "echo '[download] Destination: clip123.mp4'\n\
                 echo '[download]  50.0% of 10.00MiB at 1.00MiB/s ETA 00:05'\n\
                 echo '[download] 100% of 10.00MiB'\n\
                 exit 0\n",
            );

            let downloader = Downloader::new(config);
            let request = DownloadRequest::new(7, "https://youtube.com/watch?v=clip123", dest.path());
            let (tx, mut rx) = mpsc::channel(16);

            let path = downloader
                .download(&request, tx, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(path, dest.path().join("clip123.mp4"));

            let mut saw_started = false;
            let mut progress = Vec::new();
            let mut completed = None;
            while let Some(event) = rx.recv().await {
                match event {
                    DownloadEvent::Started { video_id: 7, .. } => saw_started = true,
                    DownloadEvent::Progress { percent, .. } => progress.push(percent),
                    DownloadEvent::Completed { file_path, .. } => completed = Some(file_path),
                    other => panic!("unexpected event: {other:?}"),
                }
            }

            assert!(saw_started);
            assert_eq!(progress, vec![50.0, 100.0]);
            assert_eq!(completed, Some(dest.path().join("clip123.mp4")));
        }

        #[tokio::test]
        async fn nonzero_exit_surfaces_stderr_tail() {
            let dir = TempDir::new().unwrap();
            let dest = TempDir::new().unwrap();

            let config = fake_ytdlp(&dir, "echo 'ERROR: Video unavailable' >&2\nexit 1\n");

            let downloader = Downloader::new(config);
            let request = DownloadRequest::new(7, "https://youtube.com/watch?v=gone", dest.path());
            let (tx, mut rx) = mpsc::channel(16);

            let result = downloader.download(&request, tx, &CancellationToken::new()).await;

            match result {
                Err(DownloaderError::CommandFailed { code: Some(1), stderr_tail }) => {
                    assert!(stderr_tail.contains("Video unavailable"));
                }
                other => panic!("expected CommandFailed, got {other:?}"),
            }

            let mut saw_failed = false;
            while let Some(event) = rx.recv().await {
                if let DownloadEvent::Failed { message, .. } = event {
                    assert!(message.contains("Video unavailable"));
                    saw_failed = true;
                }
            }
            assert!(saw_failed);
        }

        #[tokio::test]
        async fn cancellation_kills_the_child_promptly() {
            let dir = TempDir::new().unwrap();
            let dest = TempDir::new().unwrap();

            let config = fake_ytdlp(&dir, "echo '[download] Destination: slow.mp4'\nsleep 30\n");

            let downloader = Downloader::new(config);
            let request = DownloadRequest::new(7, "https://youtube.com/watch?v=slow", dest.path());
            let (tx, _rx) = mpsc::channel(16);

            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                cancel_clone.cancel();
            });

            let started = std::time::Instant::now();
            let result = downloader.download(&request, tx, &cancel).await;

            assert!(matches!(result, Err(DownloaderError::Cancelled)));
            assert!(started.elapsed() < std::time::Duration::from_secs(5));
        }
    }
}
