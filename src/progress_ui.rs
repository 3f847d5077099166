//! Progress UI (spinner) fed by fetch run events.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use chapterdl_core::{ProgressAction, ProgressEvent, ProgressKind, ProgressSink, TracingProgressSink};

/// Shows the latest event on a stderr spinner and mirrors every event to
/// the log.
#[derive(Debug)]
pub(crate) struct SpinnerProgressSink {
    spinner: ProgressBar,
}

impl SpinnerProgressSink {
    /// A visible spinner, or a hidden one when `use_spinner` is false.
    pub(crate) fn new(use_spinner: bool) -> Self {
        if !use_spinner {
            return Self {
                spinner: ProgressBar::hidden(),
            };
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self { spinner }
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressSink for SpinnerProgressSink {
    fn notify(&self, event: ProgressEvent) {
        let message = describe(&event);
        match event.kind {
            ProgressKind::Missing | ProgressKind::Removed | ProgressKind::Fallback => {
                self.spinner.suspend(|| eprintln!("{message}"));
            }
            _ => self.spinner.set_message(message),
        }
        TracingProgressSink.notify(event);
    }
}

fn describe(event: &ProgressEvent) -> String {
    let subject = match event.chapter {
        Some(chapter) => format!("{} {chapter}", event.collection_id),
        None => event.collection_id.clone(),
    };
    match (event.action, event.kind) {
        (ProgressAction::Check, ProgressKind::Start) => format!("Checking {subject}..."),
        (ProgressAction::Check, _) => format!("Checked {subject}"),
        (ProgressAction::Queue, _) => {
            let chapters: Vec<String> = event.new_chapters.iter().map(ToString::to_string).collect();
            format!("Queued {subject}: {}", chapters.join(", "))
        }
        (_, ProgressKind::Missing) => format!("{subject} is not listed"),
        (_, ProgressKind::Removed) => format!("{subject} was removed from the catalog"),
        (_, ProgressKind::Fallback) => {
            "Archive downloads are failing, switching to page-by-page".to_string()
        }
        (ProgressAction::Download, ProgressKind::Start) => format!("Downloading {subject}..."),
        (ProgressAction::Download, _) => format!("Downloaded {subject}"),
        (ProgressAction::Cleanup, ProgressKind::Start) => format!("Cleaning {subject}..."),
        (ProgressAction::Cleanup, _) => format!("Cleaned {subject}"),
    }
}

#[cfg(test)]
mod tests {
    use chapterdl_core::ChapterNumber;

    use super::*;

    #[test]
    fn test_describe_chapter_events() {
        let start = ProgressEvent::chapter(
            ProgressAction::Download,
            ProgressKind::Start,
            "Naruto",
            ChapterNumber::whole(700),
        );
        assert_eq!(describe(&start), "Downloading Naruto 700...");

        let removed = ProgressEvent::chapter(
            ProgressAction::Download,
            ProgressKind::Removed,
            "Naruto",
            ChapterNumber::whole(3),
        );
        assert_eq!(describe(&removed), "Naruto 3 was removed from the catalog");
    }

    #[test]
    fn test_describe_queue_lists_chapters() {
        let event = ProgressEvent::queued(
            "Bleach",
            vec![ChapterNumber::whole(1), ChapterNumber::whole(2)],
        );
        assert_eq!(describe(&event), "Queued Bleach: 1, 2");
    }

    #[test]
    fn test_hidden_spinner_accepts_events() {
        let sink = SpinnerProgressSink::new(false);
        sink.notify(ProgressEvent::series(
            ProgressAction::Check,
            ProgressKind::Start,
            "Bleach",
        ));
        sink.finish();
    }
}
