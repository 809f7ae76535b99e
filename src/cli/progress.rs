//! CLI progress display for accessibility runs
//!
//! Renders scheduler progress events as a tile progress bar on stderr.

use butterfly_access::{ProgressEvent, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};

/// Creates a progress bar counting computed tiles
pub fn create_progress_bar(total_tiles: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_tiles);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} tiles ({percent}%) ETA: {eta} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Progress bar driven by scheduler events
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    pub fn new(message: &str) -> Self {
        // Print initial message to stderr
        eprintln!("{message}");

        Self {
            pb: create_progress_bar(0),
        }
    }
}

impl ProgressSink for ProgressManager {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started => {}
            ProgressEvent::TileCount(total) => self.pb.set_length(total as u64),
            ProgressEvent::TileDone { remaining } => {
                let total = self.pb.length().unwrap_or(0);
                self.pb.set_position(total.saturating_sub(remaining as u64));
            }
            ProgressEvent::AllDone { rows } => {
                self.pb.finish_with_message(format!("✅ {rows} rows"));
            }
            ProgressEvent::Failed(_) => self.pb.abandon_with_message("❌ failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar() {
        let pb = create_progress_bar(12);
        assert_eq!(pb.length().unwrap(), 12);
        pb.set_position(3);
        pb.finish();
    }

    #[test]
    fn test_events_drive_position() {
        let manager = ProgressManager::new("Test run");
        manager.emit(ProgressEvent::Started);
        manager.emit(ProgressEvent::TileCount(4));
        assert_eq!(manager.pb.length(), Some(4));

        manager.emit(ProgressEvent::TileDone { remaining: 3 });
        manager.emit(ProgressEvent::TileDone { remaining: 1 });
        assert_eq!(manager.pb.position(), 3);

        manager.emit(ProgressEvent::AllDone { rows: 10 });
        assert!(manager.pb.is_finished());
    }
}
