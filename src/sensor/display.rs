//! Local status display
//!
//! The panel is 128x64 with an 8x8 font: 8 rows of 16 characters. Rows are
//! truncated to fit before they reach the sink.

use super::instruments::Sample;
use tracing::debug;

pub const DISPLAY_ROWS: u8 = 8;
pub const DISPLAY_COLS: usize = 16;

/// Output-only text display
pub trait DisplaySink: Send + Sync {
    fn clear(&mut self);
    /// `text` is at most [`DISPLAY_COLS`] characters
    fn write_row(&mut self, row: u8, text: &str);
}

/// Cut `text` to the display width at a character boundary
pub fn fit_row(text: &str) -> &str {
    match text.char_indices().nth(DISPLAY_COLS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Row layout for one report cycle
pub fn status_rows(node_id: &str, sample: &Sample) -> Vec<(u8, String)> {
    vec![
        (0, format!("Node: {node_id}")),
        (2, format!("Temp:{}C", sample.temp_c)),
        (3, format!("Humi:{}%", sample.humidity)),
        (4, format!("Light:{:.2}V", sample.light_volts())),
        (
            5,
            format!("Motion:{}", if sample.motion { "YES" } else { "NO" }),
        ),
    ]
}

/// Clear the panel and draw the status rows
pub fn render(display: &mut dyn DisplaySink, node_id: &str, sample: &Sample) {
    display.clear();
    for (row, text) in status_rows(node_id, sample) {
        if row < DISPLAY_ROWS {
            display.write_row(row, fit_row(&text));
        }
    }
}

/// Display that writes rows to the debug log; used when no panel is attached
#[derive(Debug, Clone)]
pub struct LogDisplay {
    node_id: String,
}

impl LogDisplay {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

impl DisplaySink for LogDisplay {
    fn clear(&mut self) {}

    fn write_row(&mut self, row: u8, text: &str) {
        debug!(node_id = %self.node_id, row, text, "display");
    }
}
