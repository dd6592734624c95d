use std::collections::HashMap;

use chrono::{DateTime, Utc};
use feed_rs::parser;

use crate::error::Result;

/// One entry of a fetched feed, as consumed by the ingestion pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
    pub thumbnail: Option<String>,
}

/// Parse raw feed bytes into items, in document order.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedItem>> {
    // feed_rs folds <media:content> and <enclosure> into one list, so the
    // preference between them is read from the raw XML instead.
    let raw_items = extract_raw_items(bytes);

    let parsed = parser::parse(bytes)?;

    // Both lists are in document order; fall back to joining on the link
    // only when the raw scan saw a different number of items.
    let positional = raw_items.len() == parsed.entries.len();
    let by_link: HashMap<&str, &str> = if positional {
        HashMap::new()
    } else {
        raw_items
            .iter()
            .filter_map(|raw| Some((raw.link.as_deref()?, raw.thumbnail.as_deref()?)))
            .collect()
    };

    let items = parsed
        .entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let title = entry
                .title
                .as_ref()
                .map(|t| t.content.trim().to_string())
                .unwrap_or_default();

            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();

            let description = entry
                .summary
                .as_ref()
                .map(|s| s.content.clone())
                .unwrap_or_default();

            let thumbnail = if positional {
                raw_items[index].thumbnail.clone()
            } else {
                by_link
                    .get(link.as_str())
                    .map(|t| t.to_string())
                    .or_else(|| media_thumbnail(&entry))
            };

            FeedItem {
                title,
                link,
                description,
                published: entry.published,
                thumbnail,
            }
        })
        .collect();

    Ok(items)
}

fn media_thumbnail(entry: &feed_rs::model::Entry) -> Option<String> {
    entry.media.iter().find_map(|media| {
        media
            .content
            .iter()
            .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
            .or_else(|| media.thumbnails.first().map(|t| t.image.uri.clone()))
    })
}

/// Fields read straight from one raw `<item>` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub link: Option<String>,
    /// `media:content@url` when present, otherwise `enclosure@url`.
    pub thumbnail: Option<String>,
}

/// Scan every `<item>` in document order. Invalid UTF-8 is replaced
/// rather than rejected; attribute URLs are ASCII.
pub fn extract_raw_items(xml_bytes: &[u8]) -> Vec<RawItem> {
    let xml_str = String::from_utf8_lossy(xml_bytes);
    let mut items = Vec::new();

    for item_block in xml_str.split("<item").skip(1) {
        if !starts_tag_body(item_block) {
            continue;
        }
        let item_end = item_block.find("</item>").unwrap_or(item_block.len());
        let item = &item_block[..item_end];

        let link = extract_xml_element(item, "link").filter(|l| !l.is_empty());
        let thumbnail = extract_xml_attribute(item, "media:content", "url")
            .filter(|t| !t.is_empty())
            .or_else(|| extract_xml_attribute(item, "enclosure", "url"))
            .filter(|t| !t.is_empty());

        items.push(RawItem { link, thumbnail });
    }

    items
}

fn starts_tag_body(rest: &str) -> bool {
    matches!(rest.chars().next(), Some(c) if c == '>' || c == '/' || c.is_whitespace())
}

pub fn extract_xml_element(xml: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = xml.find(&start_tag)? + start_tag.len();
    let end = xml[start..].find(&end_tag)? + start;

    let value = xml[start..end].trim();
    let value = value
        .strip_prefix("<![CDATA[")
        .and_then(|v| v.strip_suffix("]]>"))
        .map(str::trim)
        .unwrap_or(value);

    Some(unescape_xml(value))
}

/// Value of `attr` on the first `<tag …>` that carries it.
pub fn extract_xml_attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let mut rest = xml;

    while let Some(pos) = rest.find(&open) {
        let after = &rest[pos + open.len()..];
        rest = after;
        if !starts_tag_body(after) {
            continue;
        }
        let tag_end = after.find('>').unwrap_or(after.len());
        if let Some(value) = attribute_value(&after[..tag_end], attr) {
            return Some(unescape_xml(value));
        }
    }

    None
}

fn attribute_value<'a>(tag_body: &'a str, attr: &str) -> Option<&'a str> {
    let needle = format!("{}=", attr);
    let mut search_from = 0;

    while let Some(found) = tag_body[search_from..].find(&needle) {
        let start = search_from + found;
        search_from = start + needle.len();

        let preceded_by_space = tag_body[..start]
            .chars()
            .next_back()
            .map(char::is_whitespace)
            .unwrap_or(false);
        if !preceded_by_space {
            continue;
        }

        let value = &tag_body[search_from..];
        let quote = value.chars().next()?;
        if quote != '"' && quote != '\'' {
            continue;
        }
        let value = &value[1..];
        let end = value.find(quote)?;
        return Some(value[..end].trim());
    }

    None
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod extract_xml_element_tests {
        use super::*;

        #[test]
        fn test_extract_simple_element() {
            let xml = "<title>Hello World</title>";
            assert_eq!(
                extract_xml_element(xml, "title"),
                Some("Hello World".to_string())
            );
        }

        #[test]
        fn test_extract_cdata_element() {
            let xml = "<link><![CDATA[ https://tuoitre.vn/a.htm ]]></link>";
            assert_eq!(
                extract_xml_element(xml, "link"),
                Some("https://tuoitre.vn/a.htm".to_string())
            );
        }

        #[test]
        fn test_extract_unescapes_entities() {
            let xml = "<link>https://example.com/?a=1&amp;b=2</link>";
            assert_eq!(
                extract_xml_element(xml, "link"),
                Some("https://example.com/?a=1&b=2".to_string())
            );
        }

        #[test]
        fn test_extract_element_not_found() {
            assert_eq!(extract_xml_element("<title>Hello</title>", "link"), None);
        }

        #[test]
        fn test_extract_element_no_closing_tag() {
            assert_eq!(extract_xml_element("<title>Hello", "title"), None);
        }
    }

    mod extract_xml_attribute_tests {
        use super::*;

        #[test]
        fn test_double_quoted_attribute() {
            let xml = r#"<enclosure type="image/jpeg" url="https://img.example.com/1.jpg" length="0"/>"#;
            assert_eq!(
                extract_xml_attribute(xml, "enclosure", "url"),
                Some("https://img.example.com/1.jpg".to_string())
            );
        }

        #[test]
        fn test_single_quoted_attribute() {
            let xml = "<media:content url='https://img.example.com/2.png' medium='image'/>";
            assert_eq!(
                extract_xml_attribute(xml, "media:content", "url"),
                Some("https://img.example.com/2.png".to_string())
            );
        }

        #[test]
        fn test_attribute_name_must_match_whole_word() {
            let xml = r#"<enclosure dataurl="https://wrong.example.com" url="https://right.example.com"/>"#;
            assert_eq!(
                extract_xml_attribute(xml, "enclosure", "url"),
                Some("https://right.example.com".to_string())
            );
        }

        #[test]
        fn test_tag_prefix_is_not_a_match() {
            let xml = r#"<enclosures url="https://wrong.example.com"/>"#;
            assert_eq!(extract_xml_attribute(xml, "enclosure", "url"), None);
        }

        #[test]
        fn test_missing_attribute() {
            let xml = r#"<enclosure type="image/jpeg"/>"#;
            assert_eq!(extract_xml_attribute(xml, "enclosure", "url"), None);
        }
    }

    mod extract_raw_items_tests {
        use super::*;

        #[test]
        fn test_media_content_preferred_over_enclosure() {
            let xml = r#"
                <rss xmlns:media="http://search.yahoo.com/mrss/">
                    <channel>
                        <item>
                            <link>https://news.example.com/1</link>
                            <enclosure url="https://img.example.com/enclosure.jpg" type="image/jpeg"/>
                            <media:content url="https://img.example.com/media.jpg" medium="image"/>
                        </item>
                    </channel>
                </rss>
            "#;

            let items = extract_raw_items(xml.as_bytes());
            assert_eq!(
                items,
                vec![RawItem {
                    link: Some("https://news.example.com/1".to_string()),
                    thumbnail: Some("https://img.example.com/media.jpg".to_string()),
                }]
            );
        }

        #[test]
        fn test_enclosure_used_when_no_media_content() {
            let xml = r#"
                <rss>
                    <channel>
                        <item>
                            <link>https://news.example.com/2</link>
                            <enclosure url="https://img.example.com/enclosure.jpg" type="image/jpeg"/>
                        </item>
                        <item>
                            <link>https://news.example.com/3</link>
                        </item>
                    </channel>
                </rss>
            "#;

            let items = extract_raw_items(xml.as_bytes());
            assert_eq!(items.len(), 2);
            assert_eq!(
                items[0].thumbnail.as_deref(),
                Some("https://img.example.com/enclosure.jpg")
            );
            assert_eq!(items[1].thumbnail, None);
        }

        #[test]
        fn test_item_without_link_is_kept_in_order() {
            let xml = r#"
                <item><enclosure url="https://img.example.com/a.jpg"/></item>
                <item><link>https://news.example.com/b</link></item>
            "#;

            let items = extract_raw_items(xml.as_bytes());
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].link, None);
            assert_eq!(items[0].thumbnail.as_deref(), Some("https://img.example.com/a.jpg"));
            assert_eq!(items[1].link.as_deref(), Some("https://news.example.com/b"));
        }

        #[test]
        fn test_invalid_utf8() {
            assert!(extract_raw_items(&[0xFF, 0xFE, 0x00, 0x01]).is_empty());
        }
    }

    mod parse_feed_tests {
        use super::*;

        #[test]
        fn test_parse_rss_items() {
            let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
                <rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
                    <channel>
                        <title>Tuổi Trẻ - Thể thao</title>
                        <link>https://tuoitre.vn</link>
                        <description>Tin thể thao</description>
                        <item>
                            <title><![CDATA[Việt Nam vô địch]]></title>
                            <link>https://tuoitre.vn/viet-nam-vo-dich.htm</link>
                            <description><![CDATA[<p>Đội tuyển thắng 2-0</p>]]></description>
                            <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                            <enclosure url="https://cdn.tuoitre.vn/1.jpg" type="image/jpeg" length="0"/>
                        </item>
                        <item>
                            <title>Không có ngày</title>
                            <link>https://tuoitre.vn/khong-co-ngay.htm</link>
                        </item>
                    </channel>
                </rss>
            "#;

            let items = parse_feed(xml.as_bytes()).unwrap();

            assert_eq!(items.len(), 2);
            assert_eq!(items[0].title, "Việt Nam vô địch");
            assert_eq!(items[0].link, "https://tuoitre.vn/viet-nam-vo-dich.htm");
            assert_eq!(items[0].description, "<p>Đội tuyển thắng 2-0</p>");
            assert_eq!(
                items[0].published.map(|p| p.to_rfc3339()),
                Some("2024-12-09T12:00:00+00:00".to_string())
            );
            assert_eq!(
                items[0].thumbnail.as_deref(),
                Some("https://cdn.tuoitre.vn/1.jpg")
            );

            assert_eq!(items[1].description, "");
            assert!(items[1].published.is_none());
            assert!(items[1].thumbnail.is_none());
        }

        #[test]
        fn test_item_without_link_prefers_media_content() {
            let xml = r#"<?xml version="1.0"?>
                <rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
                    <channel>
                        <title>T</title>
                        <link>https://example.com</link>
                        <description>D</description>
                        <item>
                            <title>Không có liên kết</title>
                            <enclosure url="https://img.example.com/enc.jpg" type="image/jpeg" length="0"/>
                            <media:content url="https://img.example.com/media.jpg" medium="image"/>
                        </item>
                    </channel>
                </rss>
            "#;

            let items = parse_feed(xml.as_bytes()).unwrap();

            assert_eq!(items.len(), 1);
            assert_eq!(items[0].link, "");
            assert_eq!(
                items[0].thumbnail.as_deref(),
                Some("https://img.example.com/media.jpg")
            );
        }

        #[test]
        fn test_items_sharing_a_link_keep_their_own_thumbnails() {
            let xml = r#"<?xml version="1.0"?>
                <rss version="2.0">
                    <channel>
                        <title>T</title>
                        <link>https://example.com</link>
                        <description>D</description>
                        <item>
                            <title>First</title>
                            <link>https://example.com/same</link>
                            <enclosure url="https://img.example.com/a.jpg" type="image/jpeg" length="0"/>
                        </item>
                        <item>
                            <title>Second</title>
                            <link>https://example.com/same</link>
                            <enclosure url="https://img.example.com/b.jpg" type="image/jpeg" length="0"/>
                        </item>
                    </channel>
                </rss>
            "#;

            let items = parse_feed(xml.as_bytes()).unwrap();

            let thumbnails: Vec<_> = items.iter().map(|i| i.thumbnail.as_deref()).collect();
            assert_eq!(
                thumbnails,
                vec![
                    Some("https://img.example.com/a.jpg"),
                    Some("https://img.example.com/b.jpg")
                ]
            );
        }

        #[test]
        fn test_parse_feed_without_items() {
            let xml = r#"<?xml version="1.0"?>
                <rss version="2.0">
                    <channel>
                        <title>Empty</title>
                        <link>https://example.com</link>
                        <description>Nothing yet</description>
                    </channel>
                </rss>
            "#;

            let items = parse_feed(xml.as_bytes()).unwrap();
            assert!(items.is_empty());
        }

        #[test]
        fn test_parse_malformed_xml() {
            let result = parse_feed(b"<rss><channel><item><title>broken</channel></rss>");
            assert!(matches!(result, Err(crate::error::IngestError::Parse(_))));
        }

        #[test]
        fn test_parse_not_a_feed() {
            let result = parse_feed(b"<html><body>Not a feed</body></html>");
            assert!(matches!(result, Err(crate::error::IngestError::Parse(_))));
        }
    }
}
