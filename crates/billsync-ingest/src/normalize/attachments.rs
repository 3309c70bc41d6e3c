//! Attachment URL resolution

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use url::Url;

/// Path under the host where relative upload paths are served
pub const PUBLIC_ASSET_PREFIX: &str = "/suthra-punjab/backend/public";

static HREF: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"href=['"](.*?)['"]"#));

/// Resolve one fragment to an absolute URL
///
/// Absolute `http(s)` URLs pass through; relative paths are served from the
/// public asset prefix on `base`. Anything that still does not form a valid
/// URL is dropped.
pub fn resolve_attachment(fragment: &str, base: &Url) -> Option<String> {
    let fragment = fragment.trim().replace("public//", "public/");
    if fragment.is_empty() {
        return None;
    }

    let lowered = fragment.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        return Url::parse(&fragment)
            .ok()
            .filter(|u| u.host_str().is_some())
            .map(|_| fragment);
    }

    if fragment.contains("://") || fragment.chars().any(char::is_whitespace) {
        return None;
    }

    let path = if fragment.starts_with('/') {
        format!("{}{}", PUBLIC_ASSET_PREFIX, fragment)
    } else {
        format!("{}/{}", PUBLIC_ASSET_PREFIX, fragment)
    };
    base.join(&path).ok().map(String::from)
}

/// Resolve a link relative to the host root (bill PDFs)
pub fn resolve_against_host(fragment: &str, base: &Url) -> String {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return String::new();
    }
    let lowered = fragment.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        return fragment.to_string();
    }
    base.join(fragment).map(String::from).unwrap_or_default()
}

/// All attachment URLs on a record, in order of appearance
///
/// The attachment field is either an HTML snippet of anchors or a comma
/// separated list of paths.
pub fn attachment_urls(raw: &Value, base: &Url) -> Vec<String> {
    let field = ["attachment", "new_str"]
        .iter()
        .filter_map(|key| raw.get(*key).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .unwrap_or("");

    let hrefs: Vec<&str> = match HREF.as_ref() {
        Ok(re) => re
            .captures_iter(field)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect(),
        Err(_) => Vec::new(),
    };

    let fragments: Vec<&str> = if hrefs.is_empty() {
        field.split(',').collect()
    } else {
        hrefs
    };

    fragments
        .into_iter()
        .filter_map(|f| resolve_attachment(f, base))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Url {
        Url::parse("https://suthra.punjab.gov.pk").unwrap()
    }

    #[test]
    fn test_relative_fragment_resolved_under_public_prefix() {
        assert_eq!(
            resolve_attachment("/uploads/survey/1.jpg", &base()).as_deref(),
            Some("https://suthra.punjab.gov.pk/suthra-punjab/backend/public/uploads/survey/1.jpg")
        );
        assert_eq!(
            resolve_attachment("uploads/2.jpg", &base()).as_deref(),
            Some("https://suthra.punjab.gov.pk/suthra-punjab/backend/public/uploads/2.jpg")
        );
    }

    #[test]
    fn test_absolute_url_unchanged() {
        let url = "https://cdn.example.org/img/3.png?sig=abc";
        assert_eq!(resolve_attachment(url, &base()).as_deref(), Some(url));
    }

    #[test]
    fn test_double_slash_after_public_collapsed() {
        assert_eq!(
            resolve_attachment("https://host.pk/backend/public//uploads/4.jpg", &base()).as_deref(),
            Some("https://host.pk/backend/public/uploads/4.jpg")
        );
    }

    #[test]
    fn test_malformed_fragments_dropped() {
        assert_eq!(resolve_attachment("http://", &base()), None);
        assert_eq!(resolve_attachment("ftp://files/5.jpg", &base()), None);
        assert_eq!(resolve_attachment("not a path", &base()), None);
        assert_eq!(resolve_attachment("   ", &base()), None);
    }

    #[test]
    fn test_html_anchors_preferred_over_commas() {
        let raw = json!({
            "new_str": "<a href='/uploads/a.jpg'>1</a>, <a href=\"https://x.pk/b.jpg\">2</a>"
        });
        assert_eq!(
            attachment_urls(&raw, &base()),
            vec![
                "https://suthra.punjab.gov.pk/suthra-punjab/backend/public/uploads/a.jpg".to_string(),
                "https://x.pk/b.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn test_comma_list() {
        let raw = json!({"attachment": "/uploads/a.jpg, , http://"});
        assert_eq!(attachment_urls(&raw, &base()).len(), 1);
    }

    #[test]
    fn test_bill_links_resolve_against_host_root() {
        assert_eq!(
            resolve_against_host("/bills/pdf/77.pdf", &base()),
            "https://suthra.punjab.gov.pk/bills/pdf/77.pdf"
        );
        assert_eq!(resolve_against_host("", &base()), "");
    }
}
