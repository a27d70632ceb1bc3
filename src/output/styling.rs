use console::style;

use crate::model::Classification;

/// Styling helpers for terminal output
pub fn bright_yellow(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn cyan(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Classification label in its severity color.
pub fn classification_label(classification: Classification) -> console::StyledObject<String> {
    match classification {
        Classification::Stable => bright_green(classification),
        Classification::Suspect => bright_yellow(classification),
        Classification::Flaky | Classification::PersistentFailure => bright_red(classification),
        Classification::Quarantined => magenta_bold(classification),
        Classification::InsufficientData => dim(classification),
    }
}
