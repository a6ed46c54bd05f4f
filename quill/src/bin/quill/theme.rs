use colored::{Color, ColoredString, Colorize};

/// Colors for everything that is not a status line.
pub mod palette {
    use colored::Color;

    pub const HEADING: Color = Color::BrightMagenta;
    pub const COMMAND: Color = Color::Magenta;
    pub const SECTION: Color = Color::Cyan;
    pub const KEY: Color = Color::BrightCyan;
    pub const VALUE: Color = Color::White;
}

/// The kinds of status line the CLI prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Error,
    Warning,
    Info,
    Detail,
    Working,
    Item,
}

impl Tone {
    pub fn icon(self) -> &'static str {
        match self {
            Tone::Success => "✓",
            Tone::Error => "✗",
            Tone::Warning => "⚠",
            Tone::Info => "ℹ",
            Tone::Detail => "→",
            Tone::Working => "⟳",
            Tone::Item => "•",
        }
    }

    pub fn color(self) -> Color {
        match self {
            Tone::Success => Color::Green,
            Tone::Error => Color::Red,
            Tone::Warning => Color::Yellow,
            Tone::Info => Color::Blue,
            Tone::Detail | Tone::Item => Color::BrightBlack,
            Tone::Working => Color::Cyan,
        }
    }
}

/// Color `text` when `enabled`, optionally bold.
pub fn paint(text: &str, color: Color, bold: bool, enabled: bool) -> String {
    if !enabled {
        return text.to_string();
    }
    let styled: ColoredString = text.color(color);
    if bold { styled.bold().to_string() } else { styled.to_string() }
}
