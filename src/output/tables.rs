use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::model::Classification;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

/// Flakiness score cell, colored by the classification thresholds the
/// score drives.
pub fn score_cell(score: f64) -> Cell {
    let text = format!("{score:.1}");
    if score >= 60.0 {
        Cell::new(text).fg(TableColor::Red)
    } else if score >= 30.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Green)
    }
}

pub fn classification_cell(classification: Classification) -> Cell {
    let color = match classification {
        Classification::Stable => TableColor::Green,
        Classification::Suspect => TableColor::Yellow,
        Classification::Flaky | Classification::PersistentFailure => TableColor::Red,
        Classification::Quarantined => TableColor::Magenta,
        Classification::InsufficientData => TableColor::DarkGrey,
    };
    Cell::new(classification.to_string()).fg(color)
}

pub fn success_rate_cell(rate: Option<f64>) -> Cell {
    match rate {
        None => Cell::new("N/A").fg(TableColor::DarkGrey),
        Some(rate) => {
            let text = format!("{rate:.1}%");
            if rate > 80.0 {
                Cell::new(text).fg(TableColor::Green)
            } else if rate >= 50.0 {
                Cell::new(text).fg(TableColor::Yellow)
            } else {
                Cell::new(text).fg(TableColor::Red)
            }
        }
    }
}

pub fn duration_cell(seconds: Option<f64>) -> Cell {
    match seconds {
        None => Cell::new("N/A").fg(TableColor::DarkGrey),
        Some(seconds) => {
            let minutes = seconds / 60.0;
            let text = format!("{minutes:.1}min");
            if minutes <= 10.0 {
                Cell::new(text).fg(TableColor::Green)
            } else if minutes <= 15.0 {
                Cell::new(text).fg(TableColor::Yellow)
            } else {
                Cell::new(text).fg(TableColor::Red)
            }
        }
    }
}

/// Estimated recoverable time, always worth highlighting.
pub fn time_saved_cell(seconds: f64) -> Cell {
    let minutes = seconds / 60.0;
    Cell::new(format!("{minutes:.1}min")).fg(TableColor::Yellow)
}
