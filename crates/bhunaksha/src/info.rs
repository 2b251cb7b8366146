//! Parsing of the free-text plot info block and the report link fragment.
//!
//! The info text is loosely structured: blocks of `key : value` lines
//! separated by a dashed line, one block per owner or holding. No schema is
//! assumed beyond that.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::FieldMap;

/// Separator between blocks in the info text.
pub const RECORD_SEPARATOR: &str = "---------------------------------";

/// Local path that legacy report pages are rewritten to.
pub const REPORT_PROXY_PATH: &str = "/api/report";

/// Split info text into ordered field maps.
///
/// Each line is split on its first colon; lines without one are ignored.
/// Blocks that yield no fields are dropped.
pub fn parse_info_text(text: &str) -> Vec<FieldMap> {
    text.split(RECORD_SEPARATOR)
        .filter_map(|chunk| {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                return None;
            }
            let fields: FieldMap = chunk
                .lines()
                .filter_map(|line| line.split_once(':'))
                .map(|(k, v)| (k.trim(), v.trim()))
                .collect();
            (!fields.is_empty()).then_some(fields)
        })
        .collect()
}

/// Pull the report URL out of the `infoLinks` HTML fragment and point it at
/// the local proxy.
pub fn extract_report_url(html: &str) -> Option<String> {
    static HREF: OnceLock<Regex> = OnceLock::new();
    let re = HREF.get_or_init(|| {
        Regex::new(r#"(?i)href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
            .expect("href regex is valid")
    });

    let caps = re.captures(html)?;
    let raw = caps
        .get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str()
        .trim();
    if raw.is_empty() {
        return None;
    }
    Some(rewrite_report_path(&raw.replace("&amp;", "&")))
}

/// Replace any variant of the legacy report page (`signplotreport.jsp`,
/// `signplotreportpublic.jsp`, with or without `../`) by the proxy path.
pub fn rewrite_report_path(url: &str) -> String {
    static LEGACY: OnceLock<Regex> = OnceLock::new();
    let re = LEGACY.get_or_init(|| {
        Regex::new(r"(?:\.\./)*signplotreport(?:public)?\.jsp").expect("legacy path regex is valid")
    });
    re.replace_all(url, REPORT_PROXY_PATH).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_blocks() {
        let text = "Survey No. : 1\nArea : 2.5\n---------------------------------\nOwner : X";
        let records = parse_info_text(text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("Survey No."), Some("1"));
        assert_eq!(records[0].get("Area"), Some("2.5"));
        assert_eq!(records[0].len(), 2);
        assert_eq!(records[1].get("Owner"), Some("X"));
        assert_eq!(records[1].len(), 1);
    }

    #[test]
    fn test_value_keeps_later_colons() {
        let records = parse_info_text("Updated : 12:30 PM");
        assert_eq!(records[0].get("Updated"), Some("12:30 PM"));
    }

    #[test]
    fn test_blocks_without_fields_are_dropped() {
        let text = format!(
            "{sep}\nno colon here\n{sep}\n\n{sep}\nName : A\r\nShare : 1/2\n{sep}",
            sep = RECORD_SEPARATOR
        );
        let records = parse_info_text(&text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("Share"), Some("1/2"));
    }

    #[test]
    fn test_empty_text() {
        assert!(parse_info_text("").is_empty());
        assert!(parse_info_text("   \n  ").is_empty());
    }

    #[test]
    fn test_extract_and_rewrite_report_link() {
        let html = r#"<a href="../signplotreport.jsp?state=27&amp;plotno=5" target="_blank">Report</a>"#;
        assert_eq!(
            extract_report_url(html).as_deref(),
            Some("/api/report?state=27&plotno=5")
        );

        let html = "<a href='signplotreportpublic.jsp?gis=RVM1'>r</a>";
        assert_eq!(
            extract_report_url(html).as_deref(),
            Some("/api/report?gis=RVM1")
        );
    }

    #[test]
    fn test_unrelated_links_pass_through() {
        let html = r#"<A HREF=https://example.org/doc.pdf>doc</A>"#;
        assert_eq!(
            extract_report_url(html).as_deref(),
            Some("https://example.org/doc.pdf")
        );
    }

    #[test]
    fn test_no_href() {
        assert_eq!(extract_report_url("<span>none</span>"), None);
        assert_eq!(extract_report_url(r#"<a href="">x</a>"#), None);
    }
}
