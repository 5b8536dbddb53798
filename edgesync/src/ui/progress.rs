//! Upload and download progress bars.

use edgesync_common::TransferTarget;
use edgesync_common::remote::TransferProgress;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;

const TEMPLATE: &str = "{msg:24!} {bar:40.cyan/blue} {bytes:>10}/{total_bytes:<10} {bytes_per_sec}";

/// Hands out one progress bar per transfer.
///
/// Bars are hidden when stderr is not a terminal or JSON output was asked
/// for, so piped output stays clean.
#[derive(Debug, Clone, Copy)]
pub struct TransferBars {
    enabled: bool,
}

impl TransferBars {
    pub fn new(json: bool) -> Self {
        Self {
            enabled: !json && std::io::stderr().is_terminal(),
        }
    }

    #[cfg(test)]
    pub fn hidden() -> Self {
        Self { enabled: false }
    }

    fn bar(&self, label: String) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .map(|s| s.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_message(label);
        bar
    }

    /// Callback that drives a bar labelled `label`.
    pub fn callback(&self, label: String) -> Box<dyn FnMut(TransferProgress)> {
        let bar = self.bar(label);
        Box::new(move |p: TransferProgress| {
            if bar.length() != Some(p.total_bytes) {
                bar.set_length(p.total_bytes);
            }
            bar.set_position(p.bytes_sent);
            if p.bytes_sent >= p.total_bytes {
                bar.finish_and_clear();
            }
        })
    }

    /// Callback for uploading `target`.
    pub fn for_target(&self, target: &TransferTarget) -> Box<dyn FnMut(TransferProgress)> {
        self.callback(target.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_callback_accepts_updates() {
        let bars = TransferBars::hidden();
        let target = TransferTarget::new("build/model.onnx", "/d/model.onnx");
        let mut cb = bars.for_target(&target);
        cb(TransferProgress {
            bytes_sent: 0,
            total_bytes: 10,
        });
        cb(TransferProgress {
            bytes_sent: 10,
            total_bytes: 10,
        });
    }

    #[test]
    fn test_json_mode_disables_bars() {
        assert!(!TransferBars::new(true).enabled);
    }
}
