//! Display colors for severity levels.
//!
//! The log service reports levels as capitalised strings (`ERROR`, `WARN`,
//! `INFO`, `DEBUG`). Unknown level names fall back to grey so a level added
//! server-side never breaks rendering; the mapping feeds presentation only.

pub const KNOWN_LEVELS: [&str; 4] = ["ERROR", "WARN", "INFO", "DEBUG"];

/// Display color name for a severity level.
pub fn level_color(level: &str) -> &'static str {
    match level.trim().to_ascii_uppercase().as_str() {
        "ERROR" => "red",
        "WARN" | "WARNING" => "yellow",
        "INFO" => "green",
        _ => "grey",
    }
}

/// ANSI foreground escape for one of the palette colors.
pub fn ansi_color(color: &str) -> &'static str {
    match color {
        "red" => "\x1b[31m",
        "yellow" => "\x1b[33m",
        "green" => "\x1b[32m",
        _ => "\x1b[90m",
    }
}

pub const ANSI_RESET: &str = "\x1b[0m";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_levels_map_to_distinct_colors() {
        assert_eq!(level_color("ERROR"), "red");
        assert_eq!(level_color("WARN"), "yellow");
        assert_eq!(level_color("INFO"), "green");
        assert_eq!(level_color("DEBUG"), "grey");
    }

    #[test]
    fn unknown_and_untrimmed_levels_normalize() {
        assert_eq!(level_color(" error "), "red");
        assert_eq!(level_color("TRACE"), "grey");
        assert_eq!(level_color(""), "grey");
    }
}
