//! Table formatting utilities for CLI output.

use toolmux_core::ServerConfig;

/// Truncates a string to at most `max_len` characters, adding "..." if needed.
///
/// ```rust
/// use toolmux_cli::presentation::truncate_string;
///
/// assert_eq!(truncate_string("Hello", 10), "Hello");
/// assert_eq!(truncate_string("Hello World", 8), "Hello...");
/// ```
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Print a horizontal separator line.
pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// Format an optional value for table display, returning a default if None.
pub fn format_optional<T: std::fmt::Display>(value: Option<&T>, default: &str) -> String {
    value.map_or_else(|| default.to_string(), ToString::to_string)
}

/// Where a server lives: its URL, or its full command line.
pub fn server_target(config: &ServerConfig) -> String {
    if config.transport.is_remote() {
        return format_optional(config.url.as_ref(), "-");
    }
    let mut parts: Vec<&str> = config.command.iter().map(String::as_str).collect();
    parts.extend(config.args.iter().map(String::as_str));
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use toolmux_core::{NewServerConfig, TransportKind};

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate_string("héllo wörld", 8), "héllo...");
        assert_eq!(truncate_string("ab", 2), "ab");
    }

    #[test]
    fn target_shows_url_or_command_line() {
        let stdio = NewServerConfig::stdio("fs", "npx -y", vec!["fs-server".into()])
            .into_config(1, Utc::now());
        assert_eq!(server_target(&stdio), "npx -y fs-server");

        let remote = NewServerConfig::remote("web", TransportKind::Sse, "https://x/sse")
            .into_config(2, Utc::now());
        assert_eq!(server_target(&remote), "https://x/sse");
    }
}
