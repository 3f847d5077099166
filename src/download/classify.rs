//! Classification of transport failures.
//!
//! A failed whole-archive request is either a sign that the archive endpoint
//! is unreliable right now (timeouts, 5xx), which moves the whole run to the
//! per-page strategy, or an ordinary task failure that is recorded and left
//! alone.

use super::DownloadError;

/// What a transport failure means for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The archive endpoint is unreliable; switch the run to per-page fetch.
    FallbackTrigger,
    /// Ordinary failure, recorded against the chapter.
    Task,
}

/// Classifies a download error.
///
/// Timeouts and any 5xx status trigger the fallback; everything else
/// (4xx, connection errors, IO, bad URLs) is a task failure.
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureClass {
    match error {
        DownloadError::Timeout { .. } => FailureClass::FallbackTrigger,
        DownloadError::HttpStatus { status, .. } if (500..600).contains(status) => {
            FailureClass::FallbackTrigger
        }
        DownloadError::HttpStatus { .. }
        | DownloadError::Network { .. }
        | DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. } => FailureClass::Task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_timeout_triggers_fallback() {
        let error = DownloadError::timeout("http://c/a.zip");
        assert_eq!(classify_error(&error), FailureClass::FallbackTrigger);
    }

    #[test]
    fn test_classify_5xx_triggers_fallback() {
        for status in [500, 502, 503, 504, 599] {
            let error = DownloadError::http_status("http://c/a.zip", status);
            assert_eq!(
                classify_error(&error),
                FailureClass::FallbackTrigger,
                "status {status}"
            );
        }
    }

    #[test]
    fn test_classify_4xx_is_task_failure() {
        for status in [400, 403, 404, 429] {
            let error = DownloadError::http_status("http://c/a.zip", status);
            assert_eq!(classify_error(&error), FailureClass::Task, "status {status}");
        }
    }

    #[test]
    fn test_classify_io_and_invalid_url_are_task_failures() {
        let io = DownloadError::io(
            "/tmp/a.zip",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(classify_error(&io), FailureClass::Task);
        assert_eq!(
            classify_error(&DownloadError::invalid_url("nope")),
            FailureClass::Task
        );
    }
}
