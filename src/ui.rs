use anyhow::Result;
use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

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

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Ask a yes/no question on the terminal
pub fn confirm(prompt: &str, default: bool) -> Result<bool> {
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?;
    Ok(confirmed)
}

/// Truncate text for display, keeping the end
pub fn truncate_start(text: &str, max_len: usize) -> String {
    let len = text.chars().count();
    if len <= max_len {
        text.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let tail: String = text.chars().skip(len - max_len + 3).collect();
        format!("...{tail}")
    }
}

/// Indent every line of `text`
pub fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_start_short() {
        assert_eq!(truncate_start("short.txt", 20), "short.txt");
        assert_eq!(truncate_start("exact", 5), "exact");
    }

    #[test]
    fn test_truncate_start_long() {
        assert_eq!(
            truncate_start("/srv/app/site/etc/nginx.conf", 15),
            "...c/nginx.conf"
        );
    }

    #[test]
    fn test_truncate_start_edge_cases() {
        assert_eq!(truncate_start("test", 3), "...");
        assert_eq!(truncate_start("", 10), "");
    }

    #[test]
    fn test_indent() {
        assert_eq!(indent("a\nb", "  > "), "  > a\n  > b");
        assert_eq!(indent("", "  "), "");
    }
}
