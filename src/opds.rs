//! OPDS catalog generation.
//!
//! Feeds are pure functions of catalog rows: the same rows and options
//! always produce the same bytes.

use crate::db::{Entry, Series, timestamp_to_datetime};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Writer;
use quick_xml::escape::escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

/// Path prefix of every OPDS route.
pub const ROOT: &str = "/api/v1/opds";

/// MIME type of navigation feeds.
pub const NAVIGATION_TYPE: &str = "application/atom+xml;profile=opds-catalog;kind=navigation";
/// MIME type of acquisition feeds.
pub const ACQUISITION_TYPE: &str = "application/atom+xml;profile=opds-catalog;kind=acquisition";
/// MIME type of the search descriptor.
pub const OPENSEARCH_TYPE: &str = "application/opensearchdescription+xml";

const REL_THUMBNAIL: &str = "http://opds-spec.org/image/thumbnail";
const REL_IMAGE: &str = "http://opds-spec.org/image";
const REL_ACQUISITION: &str = "http://opds-spec.org/acquisition";
const REL_STREAM: &str = "http://vaemendis.net/opds-pse/stream";

/// Presentation settings shared by every feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedOptions {
    /// Title of the root catalog.
    pub title: String,
    /// Author name of the root catalog.
    pub author: String,
    /// Spaces per nesting level; 0 writes the document on one line.
    pub indent: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            title: "Comics".to_string(),
            author: "comic-opds".to_string(),
            indent: 2,
        }
    }
}

/// OPDS feed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Link relation type (e.g., "self", "subsection", "acquisition").
    pub rel: String,
    /// URL of the linked resource.
    pub href: String,
    /// MIME type of the linked resource.
    pub link_type: String,
    /// Page count, for page-streaming links.
    pub count: Option<usize>,
}

impl Link {
    fn new(rel: &str, href: impl Into<String>, link_type: &str) -> Self {
        Self {
            rel: rel.to_string(),
            href: href.into(),
            link_type: link_type.to_string(),
            count: None,
        }
    }
}

/// OPDS feed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Unique identifier for the entry.
    pub id: String,
    /// Entry title.
    pub title: String,
    /// Last update timestamp.
    pub updated: DateTime<Utc>,
    /// Author name, if known.
    pub author: Option<String>,
    /// Plain-text content.
    pub content: Option<String>,
    /// Links associated with this entry.
    pub links: Vec<Link>,
}

/// OPDS feed builder.
pub struct FeedBuilder {
    id: String,
    title: String,
    updated: DateTime<Utc>,
    author_name: Option<String>,
    links: Vec<Link>,
    entries: Vec<FeedEntry>,
}

impl FeedBuilder {
    /// Create a new feed builder.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            updated: timestamp_to_datetime(0),
            author_name: None,
            links: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Set the feed timestamp.
    pub fn updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = updated;
        self
    }

    /// Set the feed author.
    pub fn author(mut self, name: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self
    }

    /// Add a feed-level link.
    pub fn link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Add an entry.
    pub fn entry(mut self, entry: FeedEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Build the XML feed.
    pub fn build(self, indent: usize) -> String {
        let mut writer = if indent > 0 {
            Writer::new_with_indent(Cursor::new(Vec::new()), b' ', indent)
        } else {
            Writer::new(Cursor::new(Vec::new()))
        };

        // XML declaration - writing to Vec can't fail
        let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", "http://www.w3.org/2005/Atom"));
        feed.push_attribute(("xmlns:opds", "http://opds-spec.org/2010/catalog"));
        feed.push_attribute(("xmlns:pse", "http://vaemendis.net/opds-pse/ns"));
        let _ = writer.write_event(Event::Start(feed));

        write_text_element(&mut writer, "id", &self.id);
        write_text_element(&mut writer, "title", &self.title);
        write_text_element(&mut writer, "updated", &format_time(&self.updated));

        if let Some(name) = &self.author_name {
            write_author(&mut writer, name);
        }

        for link in &self.links {
            write_link(&mut writer, link);
        }

        for entry in &self.entries {
            write_entry(&mut writer, entry);
        }

        let _ = writer.write_event(Event::End(BytesEnd::new("feed")));

        String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
    }
}

/// Root navigation feed: one entry per series.
///
/// `series` is expected in catalog order, already filtered if a search was
/// requested.
pub fn catalog_feed(series: &[Series], options: &FeedOptions) -> String {
    let updated = series.iter().map(|s| s.mod_time).max().unwrap_or(0);
    let catalog = format!("{}/catalog", ROOT);

    let mut feed = FeedBuilder::new("urn:catalog", options.title.as_str())
        .updated(timestamp_to_datetime(updated))
        .author(options.author.as_str())
        .link(Link::new("self", catalog.as_str(), NAVIGATION_TYPE))
        .link(Link::new("start", catalog.as_str(), NAVIGATION_TYPE))
        .link(Link::new("search", format!("{}/search", ROOT), OPENSEARCH_TYPE));

    for s in series {
        feed = feed.entry(FeedEntry {
            id: format!("urn:series:{}", s.sid),
            title: s.title.clone(),
            updated: timestamp_to_datetime(s.mod_time),
            author: s.author.clone(),
            content: None,
            links: vec![Link::new(
                "subsection",
                format!("{}/series/{}", ROOT, s.sid),
                ACQUISITION_TYPE,
            )],
        });
    }

    feed.build(options.indent)
}

/// Acquisition feed of one series: one entry per archive.
pub fn series_feed(series: &Series, entries: &[Entry], options: &FeedOptions) -> String {
    let mut feed = FeedBuilder::new(format!("urn:series:{}", series.sid), series.title.as_str())
        .updated(timestamp_to_datetime(series.mod_time))
        .author(series.author.as_deref().unwrap_or(options.author.as_str()))
        .link(Link::new(
            "self",
            format!("{}/series/{}", ROOT, series.sid),
            ACQUISITION_TYPE,
        ))
        .link(Link::new("start", format!("{}/catalog", ROOT), NAVIGATION_TYPE))
        .link(Link::new("up", format!("{}/catalog", ROOT), NAVIGATION_TYPE));

    for entry in entries {
        feed = feed.entry(archive_entry(series, entry));
    }

    feed.build(options.indent)
}

fn archive_entry(series: &Series, entry: &Entry) -> FeedEntry {
    let base = format!("{}/series/{}/entries/{}", ROOT, entry.sid, entry.eid);
    let kind = entry.kind();
    let label = kind.map(|k| k.label()).unwrap_or("UNKNOWN");
    let archive_type = kind
        .map(|k| k.mime_type(entry.archive_path()))
        .unwrap_or("application/octet-stream");
    let cover_type = entry
        .pages
        .first()
        .map(|p| p.mime.as_str())
        .unwrap_or("image/jpeg");

    let mut stream = Link::new(
        REL_STREAM,
        format!("{}/page/{{pageNumber}}", base),
        "image/jpeg",
    );
    stream.count = Some(entry.pages.len());

    FeedEntry {
        id: format!("urn:entry:{}:{}", entry.sid, entry.eid),
        title: entry.title.clone(),
        updated: timestamp_to_datetime(entry.mod_time),
        author: series.author.clone(),
        content: Some(format!(
            "Type: {}, Size: {}",
            label,
            format_size(entry.filesize)
        )),
        links: vec![
            Link::new(
                REL_THUMBNAIL,
                format!("{}/cover?thumbnail=true", base),
                "image/jpeg",
            ),
            Link::new(REL_IMAGE, format!("{}/cover", base), cover_type),
            Link::new(REL_ACQUISITION, format!("{}/archive", base), archive_type),
            stream,
        ],
    }
}

/// Human-readable archive size: KiB below 500 KiB, MiB otherwise.
pub fn format_size(bytes: i64) -> String {
    let bytes = bytes.max(0) as f64;
    if bytes < 500.0 * 1024.0 {
        format!("{:.1} KiB", bytes / 1024.0)
    } else {
        format!("{:.1} MiB", bytes / (1024.0 * 1024.0))
    }
}

/// Ordered-subsequence match: every non-space character of `term` must
/// appear in `title` in the same order, ignoring case.
pub fn fuzzy_match(term: &str, title: &str) -> bool {
    let mut haystack = title.chars().flat_map(char::to_lowercase);

    term.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .all(|needle| haystack.any(|c| c == needle))
}

/// Keep the series whose title matches the search term.
pub fn filter_series(series: Vec<Series>, term: &str) -> Vec<Series> {
    series
        .into_iter()
        .filter(|s| fuzzy_match(term, &s.title))
        .collect()
}

/// Generate OpenSearch description XML.
pub fn generate_opensearch(title: &str) -> String {
    let title = escape(title);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OpenSearchDescription xmlns="http://a9.com/-/spec/opensearch/1.1/">
  <ShortName>{}</ShortName>
  <Description>Search the {} catalog</Description>
  <InputEncoding>UTF-8</InputEncoding>
  <OutputEncoding>UTF-8</OutputEncoding>
  <Url type="{}" template="{}/catalog?search={{searchTerms}}"/>
</OpenSearchDescription>"#,
        title, title, NAVIGATION_TYPE, ROOT
    )
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Write a simple text element.
fn write_text_element<W: std::io::Write>(writer: &mut Writer<W>, name: &str, text: &str) {
    let _ = writer.write_event(Event::Start(BytesStart::new(name)));
    let _ = writer.write_event(Event::Text(BytesText::new(text)));
    let _ = writer.write_event(Event::End(BytesEnd::new(name)));
}

fn write_author<W: std::io::Write>(writer: &mut Writer<W>, name: &str) {
    let _ = writer.write_event(Event::Start(BytesStart::new("author")));
    write_text_element(writer, "name", name);
    let _ = writer.write_event(Event::End(BytesEnd::new("author")));
}

/// Write a link element.
fn write_link<W: std::io::Write>(writer: &mut Writer<W>, link: &Link) {
    let mut elem = BytesStart::new("link");
    elem.push_attribute(("rel", link.rel.as_str()));
    elem.push_attribute(("href", link.href.as_str()));
    elem.push_attribute(("type", link.link_type.as_str()));
    if let Some(count) = link.count {
        elem.push_attribute(("pse:count", count.to_string().as_str()));
    }
    let _ = writer.write_event(Event::Empty(elem));
}

/// Write an entry element.
fn write_entry<W: std::io::Write>(writer: &mut Writer<W>, entry: &FeedEntry) {
    let _ = writer.write_event(Event::Start(BytesStart::new("entry")));

    write_text_element(writer, "id", &entry.id);
    write_text_element(writer, "title", &entry.title);
    write_text_element(writer, "updated", &format_time(&entry.updated));

    if let Some(author) = &entry.author {
        write_author(writer, author);
    }

    if let Some(content) = &entry.content {
        let mut elem = BytesStart::new("content");
        elem.push_attribute(("type", "text"));
        let _ = writer.write_event(Event::Start(elem));
        let _ = writer.write_event(Event::Text(BytesText::new(content)));
        let _ = writer.write_event(Event::End(BytesEnd::new("content")));
    }

    for link in &entry.links {
        write_link(writer, link);
    }

    let _ = writer.write_event(Event::End(BytesEnd::new("entry")));
}
