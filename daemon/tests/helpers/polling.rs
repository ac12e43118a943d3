use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 20;
const MAX_DELAY_MS: u64 = 500;

/// Error returned when waiting for file content times out.
#[derive(Debug)]
pub struct WaitError {
    path: PathBuf,
    attempts: u32,
    waited: Duration,
    last_content: Option<String>,
    last_error: Option<String>,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}. Last content: {}. Last error: {}",
            self.attempts,
            self.waited,
            self.path.display(),
            self.last_content
                .as_deref()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .unwrap_or("<empty>"),
            self.last_error
                .as_deref()
                .unwrap_or("file not created or unreadable")
        )
    }
}

impl std::error::Error for WaitError {}

/// Poll a file until `predicate` accepts its content, backing off from 20ms up to 500ms.
pub async fn wait_for_file_content<P, F>(
    path: P,
    predicate: F,
    timeout: Duration,
) -> Result<String, WaitError>
where
    P: AsRef<Path>,
    F: Fn(&str) -> bool,
{
    let path = path.as_ref();
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;
    let mut last_error = None;
    let mut last_content = None;

    loop {
        attempts += 1;
        match tokio::fs::read_to_string(path).await {
            Ok(content) if predicate(&content) => return Ok(content),
            Ok(content) => last_content = Some(content),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => last_error = Some(err.to_string()),
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(WaitError {
                path: path.to_path_buf(),
                attempts,
                waited: start.elapsed(),
                last_content,
                last_error,
            });
        }

        tokio::time::sleep(delay.min(remaining)).await;
        delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
    }
}

/// Poll a condition until it holds; panics with `desc` after `timeout`.
pub async fn wait_until<F>(desc: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while !condition() {
        if start.elapsed() >= timeout {
            panic!("Timeout after {:?} waiting for {}", timeout, desc);
        }
        tokio::time::sleep(Duration::from_millis(INITIAL_DELAY_MS)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn wait_for_file_content_returns_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("report.kdl");
        std::fs::write(&file, "annotation id=\"a\"").unwrap();

        let content = wait_for_file_content(
            &file,
            |text| text.contains("annotation"),
            Duration::from_secs(1),
        )
        .await
        .expect("should read file immediately");
        assert_eq!(content, "annotation id=\"a\"");
    }

    #[tokio::test]
    async fn wait_for_file_content_times_out_with_context() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("missing.kdl");

        let err = wait_for_file_content(&file, |_| true, Duration::from_millis(1))
            .await
            .expect_err("should time out");
        assert!(
            err.to_string().contains("missing.kdl"),
            "error message should reference file path"
        );
    }
}
