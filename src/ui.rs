use std::time::Duration;

use colored::Colorize;
use similar::{ChangeTag, TextDiff};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a unified diff of `old` and `new`
///
/// The diff is assembled first and printed in one go, so diffs from
/// resources running in parallel do not interleave.
pub fn print_diff(label: &str, old: &[u8], new: &[u8]) {
    print!("{}", render_diff(label, old, new));
}

pub fn render_diff(label: &str, old: &[u8], new: &[u8]) -> String {
    let old = String::from_utf8_lossy(old);
    let new = String::from_utf8_lossy(new);
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());

    let mut out = format!("{}\n", format!("--- {label}").red());
    out.push_str(&format!("{}\n", format!("+++ {label}").green()));
    for hunk in diff.unified_diff().context_radius(3).iter_hunks() {
        out.push_str(&format!("{}\n", hunk.header().to_string().cyan()));
        for change in hunk.iter_changes() {
            let line = format!("{}{}", change.tag(), change.value());
            let line = line.trim_end_matches('\n');
            let line = match change.tag() {
                ChangeTag::Delete => line.red(),
                ChangeTag::Insert => line.green(),
                ChangeTag::Equal => line.normal(),
            };
            out.push_str(&format!("{line}\n"));
        }
    }
    out
}

/// Short human duration, coarser the longer it gets
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{}m", secs / 3600, secs % 3600 / 60)
    } else if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else if secs >= 1 {
        let tenths = d.as_millis() / 100;
        format!("{}.{}s", tenths / 10, tenths % 10)
    } else if d.as_millis() >= 1 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}µs", d.as_micros())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(850)), "850µs");
        assert_eq!(format_duration(Duration::from_micros(15_400)), "15ms");
        assert_eq!(format_duration(Duration::from_millis(1_250)), "1.2s");
        assert_eq!(format_duration(Duration::from_secs(123)), "2m3s");
        assert_eq!(format_duration(Duration::from_secs(7_260)), "2h1m");
        assert_eq!(format_duration(Duration::ZERO), "0µs");
    }

    #[test]
    fn test_render_diff() {
        colored::control::set_override(false);
        let out = render_diff("/etc/motd", b"one\ntwo\nthree\n", b"one\n2\nthree\n");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "--- /etc/motd");
        assert_eq!(lines[1], "+++ /etc/motd");
        assert!(lines[2].starts_with("@@"));
        assert!(lines.contains(&"-two"));
        assert!(lines.contains(&"+2"));
        assert!(lines.contains(&" one"));
    }

    #[test]
    fn test_render_diff_from_nothing() {
        colored::control::set_override(false);
        let out = render_diff("new", b"", b"hello\n");
        assert!(out.lines().any(|l| l == "+hello"));
    }
}
