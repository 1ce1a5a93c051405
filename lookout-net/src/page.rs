//! Article page text extraction
//!
//! Pulls the headline and readable body out of a news article page,
//! skipping script/style/navigation chrome.

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

/// Readable content of one article page
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub title: Option<String>,
    pub text: String,
    pub truncated: bool,
}

/// Elements whose text never belongs to the article body
const EXCLUDED: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "figcaption",
];

/// Extract title and body text, capped at `max_chars` characters
pub fn extract_content(html: &str, max_chars: usize) -> PageContent {
    let document = Html::parse_document(html);

    let title = Selector::parse("title").ok().and_then(|sel| {
        document
            .select(&sel)
            .next()
            .map(|el| normalize_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    });

    // Prefer the <article> element; many news themes wrap the story in one
    let root = ["article", "main", "body"]
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .find_map(|sel| document.select(&sel).next());

    let text = root.map(visible_text).unwrap_or_default();
    let (text, truncated) = truncate_chars(text, max_chars);

    PageContent {
        title,
        text,
        truncated,
    }
}

/// Plain text of an HTML fragment (feed summaries often carry markup)
pub fn html_to_text(fragment: &str) -> String {
    if !fragment.contains('<') {
        return normalize_whitespace(fragment);
    }
    let parsed = Html::parse_fragment(fragment);
    visible_text(parsed.root_element())
}

fn visible_text(root: ElementRef<'_>) -> String {
    let mut parts = Vec::new();

    for node_ref in root.descendants() {
        if let Node::Text(text_node) = node_ref.value() {
            let in_excluded = node_ref.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map(|el| EXCLUDED.contains(&el.name()))
                    .unwrap_or(false)
            });

            if !in_excluded {
                let trimmed = text_node.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
            }
        }
    }

    normalize_whitespace(&parts.join(" "))
}

fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text, false),
    }
}

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content_prefers_article() {
        let html = r#"
            <html>
            <head><title>Gunmen kill 12 in Bokkos | News</title></head>
            <body>
                <nav>Home Politics Sports</nav>
                <script>var x = 1;</script>
                <article>
                    <h1>Gunmen kill 12 in Bokkos</h1>
                    <p>Armed men attacked Mushere community on Sunday night.</p>
                    <style>.x { color: red; }</style>
                </article>
                <footer>Copyright</footer>
            </body>
            </html>
        "#;

        let page = extract_content(html, 10_000);
        assert_eq!(page.title.as_deref(), Some("Gunmen kill 12 in Bokkos | News"));
        assert!(page.text.contains("Mushere community"));
        assert!(!page.text.contains("Home Politics"));
        assert!(!page.text.contains("var x"));
        assert!(!page.text.contains("color: red"));
        assert!(!page.truncated);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let html = "<html><body><p>Ọ̀run àti ayé</p></body></html>";
        let page = extract_content(html, 4);
        assert!(page.truncated);
        assert_eq!(page.text.chars().count(), 4);
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<p>Bandits <b>abducted</b> 20</p><p>in Maru</p>"),
            "Bandits abducted 20 in Maru"
        );
        assert_eq!(html_to_text("  plain   summary "), "plain summary");
    }

    #[test]
    fn test_normalize_whitespace() {
        let input = "  hello   world  \n\t  test  ";
        assert_eq!(normalize_whitespace(input), "hello world test");
    }
}
