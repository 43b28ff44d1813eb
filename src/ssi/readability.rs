// src/ssi/readability.rs
//! Main-content extraction for news article pages, via the Readability
//! transform in `spider_transformations`. Output is markdown, so headings,
//! list items and tables survive as text the extractor can read.

use reqwest::Url;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

fn transform_config() -> TransformConfig {
    TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    }
}

/// Extract the readable body of `html`. `None` when fewer than `min_chars`
/// characters of text survive.
pub fn extract_main_text(html: &str, url: Option<&str>, min_chars: usize) -> Option<String> {
    let parsed_url = url.and_then(|u| Url::parse(u).ok());
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };
    let text = transform_content_input(input, &transform_config());
    let text = text.trim();
    (text.chars().count() >= min_chars).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"
    <html><head><title>BofA sell side indicator edges higher</title><script>var a = 1;</script></head>
    <body>
      <article>
        <h2>BofA sell side indicator edges higher</h2>
        <p>Bank of America's Sell Side Indicator, which tracks the average recommended equity allocation of Wall Street strategists, rose to 55.7% in March.</p>
        <p>That is the highest level since 2021, strategists said, though still below the 59.1% sell threshold that has historically preceded weak returns.</p>
        <p>The gauge is treated as a contrarian signal: extreme bullishness among strategists has tended to come before below-average twelve-month returns.</p>
      </article>
    </body></html>"#;

    #[test]
    fn keeps_article_text_drops_scripts() {
        let text = extract_main_text(ARTICLE, Some("https://news.example.com/ssi"), 100).unwrap();
        assert!(text.contains("55.7%"));
        assert!(!text.contains("var a"));
    }

    #[test]
    fn short_page_is_rejected() {
        let html = "<html><body><p>Access denied.</p></body></html>";
        assert_eq!(extract_main_text(html, None, 100), None);
    }

    #[test]
    fn unparseable_url_is_ignored() {
        assert!(extract_main_text(ARTICLE, Some("not a url"), 50).is_some());
    }
}
