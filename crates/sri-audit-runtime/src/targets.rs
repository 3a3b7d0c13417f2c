//! Target list input.

use anyhow::{Context, Result};
use sri_audit::parse_target;
use std::path::Path;
use url::Url;

/// Parse newline-separated targets. Blank lines and `#` comments are skipped;
/// any line that is not an http(s) URL fails the whole list.
pub fn parse_target_list(text: &str) -> Result<Vec<Url>> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| parse_target(line).with_context(|| format!("line {line_no}")))
        .collect()
}

/// Read and parse a target list file.
pub fn read_targets(path: &Path) -> Result<Vec<Url>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read targets from {}", path.display()))?;
    parse_target_list(&text).with_context(|| format!("invalid target in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_blank_lines_and_comments() {
        let targets = parse_target_list(
            "# audit list\nhttps://example.com/\n\n   \nhttp://other.example/page  \n",
        )
        .unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].as_str(), "http://other.example/page");
    }

    #[test]
    fn test_rejects_non_http_scheme_with_line_number() {
        let err = parse_target_list("https://example.com/\nftp://example.com/\n").unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("line 2"), "{chain}");
        assert!(chain.contains("ftp"), "{chain}");
    }

    #[test]
    fn test_read_targets_missing_file() {
        let err = read_targets(Path::new("/nonexistent/targets.txt")).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read targets"));
    }
}
