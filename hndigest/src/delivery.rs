use std::fmt::Write;

use crate::error::Result;
use crate::model::{DeliveryHandle, EnrichedArticle};

pub const HN_ITEM_URL: &str = "https://news.ycombinator.com/item?id=";

/// Outbound message channel.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, recipient: &str, rendered: &str) -> Result<DeliveryHandle>;
}

/// Telegram HTML rendering of one digest entry.
pub fn render_article(article: &EnrichedArticle) -> String {
    let item = &article.item;
    let mut out = String::new();

    let _ = writeln!(out, "<b>{}</b>", escape_html(&item.title));
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", escape_html(article.summary.trim()));

    let tags: Vec<String> = article
        .tags
        .iter()
        .filter_map(|t| hashtag(t))
        .map(|t| format!("#{}", escape_html(&t)))
        .collect();
    if !tags.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", tags.join(" "));
    }

    let _ = writeln!(out);
    if let Some(url) = &item.url {
        let _ = writeln!(out, "<a href=\"{}\">Read article</a>", escape_html(url));
    }
    let _ = write!(
        out,
        "<a href=\"{}{}\">Discussion</a> · ▲ {} · 💬 {}",
        HN_ITEM_URL, item.id, item.popularity, item.discussion_count
    );
    out
}

/// Escape the characters Telegram's HTML parse mode treats specially.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Telegram hashtags stop at the first non-word character. Separators become a single
/// `_`; a tag with no letters or digits has no hashtag form.
fn hashtag(tag: &str) -> Option<String> {
    let mut out = String::with_capacity(tag.len());
    for c in tag.chars() {
        match c {
            '+' => out.push_str("plus"),
            '#' => out.push_str("sharp"),
            c if c.is_alphanumeric() => out.push(c),
            _ if out.ends_with('_') || out.is_empty() => {}
            _ => out.push('_'),
        }
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.chars().any(char::is_alphanumeric) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CandidateItem;
    use chrono::Utc;

    fn article(url: Option<&str>, tags: &[&str]) -> EnrichedArticle {
        EnrichedArticle {
            item: CandidateItem {
                id: 42,
                title: "Rust <3 & \"friends\"".to_string(),
                url: url.map(str::to_string),
                popularity: 120,
                discussion_count: 33,
            },
            summary: "A summary with <tags>.".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn escapes_special_characters() {
        assert_eq!(escape_html("a < b && \"c\" > d"), "a &lt; b &amp;&amp; &quot;c&quot; &gt; d");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn renders_all_parts() {
        let text = render_article(&article(Some("https://example.com/?a=1&b=2"), &["rust", "web-dev"]));
        assert!(text.starts_with("<b>Rust &lt;3 &amp; &quot;friends&quot;</b>"));
        assert!(text.contains("A summary with &lt;tags&gt;."));
        assert!(text.contains("#rust #web_dev"));
        assert!(text.contains("<a href=\"https://example.com/?a=1&amp;b=2\">Read article</a>"));
        assert!(text.contains("https://news.ycombinator.com/item?id=42"));
        assert!(text.contains("▲ 120"));
        assert!(text.contains("💬 33"));
    }

    #[test]
    fn hashtags_collapse_separators_and_skip_symbol_only_tags() {
        assert_eq!(hashtag("c++").as_deref(), Some("cplusplus"));
        assert_eq!(hashtag("c#").as_deref(), Some("csharp"));
        assert_eq!(hashtag("  machine -- learning! ").as_deref(), Some("machine_learning"));
        assert_eq!(hashtag("-"), None);
        assert_eq!(hashtag("..."), None);

        let text = render_article(&article(None, &["-", "?!"]));
        assert!(!text.contains('#'));
        let text = render_article(&article(None, &["-", "rust"]));
        assert!(text.lines().any(|l| l == "#rust"));
    }

    #[test]
    fn omits_missing_link_and_tags() {
        let text = render_article(&article(None, &[]));
        assert!(!text.contains("Read article"));
        assert!(!text.contains('#'));
        assert!(text.contains("Discussion"));
    }
}
