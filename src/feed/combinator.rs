//! Serializes the combined RSS 2.0 document.
//!
//! The header is written up front, then items are streamed as each source
//! completes. Item descriptions are replaced by an anchor pointing at the
//! item itself.

use super::parser::{Item, ParsedFeed};
use super::scatter::FetchResults;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt::Display;
use std::io::Write;
use thiserror::Error;

const ATOM_NAMESPACE: &str = "http://www.w3.org/2005/Atom";
const RSS_MIME: &str = "application/rss+xml";

#[derive(Debug, Error)]
pub enum CombineError {
    /// The output sink rejected a write. The document is incomplete.
    #[error("Failed to write combined feed: {0}")]
    Write(String),
}

fn write_failed(e: impl Display) -> CombineError {
    CombineError::Write(e.to_string())
}

/// Channel header of the combined document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedHeader {
    pub title: String,
    /// Canonical address of the combined feed; also published as the
    /// atom self link.
    pub link: String,
    pub description: String,
}

/// Writes the combined document to `output`, draining `results`.
///
/// Sources that failed were already dropped by `results`, so the document is
/// well-formed even when nothing succeeded. Returns the sink once the
/// document is complete and flushed.
pub async fn combine<W: Write>(
    output: W,
    header: &FeedHeader,
    results: &mut FetchResults,
) -> Result<W, CombineError> {
    let mut writer = Writer::new(output);

    write_header(&mut writer, header)?;

    let mut sources = 0usize;
    let mut items = 0usize;
    while results.has_next().await {
        let Ok(feed) = results.next().await else {
            break;
        };
        sources += 1;
        items += write_feed(&mut writer, &feed)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .map_err(write_failed)?;
    writer
        .write_event(Event::End(BytesEnd::new("rss")))
        .map_err(write_failed)?;

    let mut output = writer.into_inner();
    output.flush().map_err(write_failed)?;

    tracing::debug!(title = %header.title, sources, items, "Combined feed written");
    Ok(output)
}

fn write_header<W: Write>(writer: &mut Writer<W>, header: &FeedHeader) -> Result<(), CombineError> {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_failed)?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:atom", ATOM_NAMESPACE));
    writer.write_event(Event::Start(rss)).map_err(write_failed)?;
    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .map_err(write_failed)?;

    write_text_element(writer, "title", &header.title)?;
    write_text_element(writer, "link", &header.link)?;

    let mut self_link = BytesStart::new("atom:link");
    self_link.push_attribute(("href", header.link.as_str()));
    self_link.push_attribute(("rel", "self"));
    self_link.push_attribute(("type", RSS_MIME));
    writer
        .write_event(Event::Empty(self_link))
        .map_err(write_failed)?;

    write_text_element(writer, "description", &header.description)
}

/// Writes every item of one source, in document order.
fn write_feed<W: Write>(writer: &mut Writer<W>, feed: &ParsedFeed) -> Result<usize, CombineError> {
    for item in &feed.items {
        write_item(writer, item)?;
    }
    Ok(feed.items.len())
}

fn write_item<W: Write>(writer: &mut Writer<W>, item: &Item) -> Result<(), CombineError> {
    writer
        .write_event(Event::Start(BytesStart::new("item")))
        .map_err(write_failed)?;

    write_text_element(writer, "title", &item.title)?;
    write_text_element(writer, "category", &item.category)?;
    write_text_element(writer, "link", &item.link)?;
    write_text_element(writer, "guid", &item.guid)?;
    write_text_element(writer, "description", &anchor(item))?;
    write_text_element(writer, "pubDate", &item.pub_date)?;

    writer
        .write_event(Event::End(BytesEnd::new("item")))
        .map_err(write_failed)
}

/// `<a href="{link}">{title}</a>`, stored escaped as element text.
pub fn anchor(item: &Item) -> String {
    format!(r#"<a href="{}">{}</a>"#, item.link, item.title)
}

fn write_text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), CombineError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(write_failed)?;
    if !text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(write_failed)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(write_failed)
}
