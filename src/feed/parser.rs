//! Pull parser for RSS 2.0 documents.
//!
//! Only the first `<channel>` of an `<rss version="2.0">` document is read.
//! Unknown elements are skipped together with their whole subtree so that,
//! for example, `<image><title>` never overwrites the channel title.

use quick_xml::errors::IllFormedError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

pub const RSS: &[u8] = b"rss";
pub const VERSION_ATTRIBUTE: &[u8] = b"version";
pub const VERSION_VALUE: &str = "2.0";

const CHANNEL: &[u8] = b"channel";
const ITEM: &[u8] = b"item";
const TITLE: &[u8] = b"title";
const LINK: &[u8] = b"link";
const DESCRIPTION: &[u8] = b"description";
const CATEGORY: &[u8] = b"category";
const GUID: &[u8] = b"guid";
const PUB_DATE: &[u8] = b"pubDate";

#[derive(Debug, Error)]
pub enum ParseError {
    /// The first element is not `<rss>`.
    #[error("Not a supported feed: root element is <{0}>, expected <rss>")]
    NotRss(String),
    #[error("Not a supported feed: RSS version {0:?}, expected \"2.0\"")]
    UnsupportedVersion(Option<String>),
    #[error("Document ended before any element was found")]
    Empty,
    #[error("Feed contains no channel")]
    MissingChannel,
    #[error("Multi-channel feeds are not supported")]
    MultipleChannels,
    #[error("Invalid RSS channel, input ended before </channel>")]
    UnterminatedChannel,
    #[error("Invalid RSS channel item, input ended before </item>")]
    UnterminatedItem,
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// One fetched-and-parsed source feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<Item>,
}

/// A single `<item>`. Absent fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub category: String,
    pub link: String,
    pub guid: String,
    pub description: String,
    pub pub_date: String,
}

/// Parses an RSS 2.0 document.
///
/// # Errors
///
/// - [`ParseError::NotRss`] / [`ParseError::UnsupportedVersion`] when the
///   first element is not `<rss version="2.0">`
/// - [`ParseError::MultipleChannels`] when a second `<channel>` follows the first
/// - [`ParseError::MissingChannel`] when the document has no channel at all
/// - [`ParseError::UnterminatedChannel`] / [`ParseError::UnterminatedItem`]
///   when input ends inside those blocks
/// - [`ParseError::Xml`] for malformed XML
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    // quick-xml never expands <!ENTITY> declarations, only the five builtins.
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let (root, has_children) = loop {
        match reader.read_event()? {
            Event::Start(e) => break (e, true),
            Event::Empty(e) => break (e, false),
            Event::Eof => return Err(ParseError::Empty),
            _ => {}
        }
    };
    check_root(&root, &reader)?;
    if !has_children {
        return Err(ParseError::MissingChannel);
    }

    let mut channel: Option<ParsedFeed> = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if e.name().as_ref() == CHANNEL {
                    if channel.is_some() {
                        return Err(ParseError::MultipleChannels);
                    }
                    channel = Some(parse_channel(&mut reader)?);
                } else {
                    tracing::debug!(tag = %tag_name(&e), "Unsupported tag in rss");
                    skip(&mut reader, &e, ParseError::Xml(missing_end(&e)))?;
                }
            }
            Event::Empty(e) => {
                if e.name().as_ref() == CHANNEL {
                    if channel.is_some() {
                        return Err(ParseError::MultipleChannels);
                    }
                    channel = Some(ParsedFeed::default());
                } else {
                    tracing::debug!(tag = %tag_name(&e), "Unsupported tag in rss");
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    channel.ok_or(ParseError::MissingChannel)
}

fn check_root(root: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<(), ParseError> {
    if root.name().as_ref() != RSS {
        return Err(ParseError::NotRss(tag_name(root)));
    }

    let version = match root
        .try_get_attribute(VERSION_ATTRIBUTE)
        .map_err(quick_xml::Error::from)?
    {
        Some(attr) => Some(
            attr.decode_and_unescape_value(reader.decoder())?
                .into_owned(),
        ),
        None => None,
    };

    match version.as_deref() {
        Some(VERSION_VALUE) => Ok(()),
        _ => Err(ParseError::UnsupportedVersion(version)),
    }
}

fn parse_channel(reader: &mut Reader<&[u8]>) -> Result<ParsedFeed, ParseError> {
    let mut feed = ParsedFeed::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                TITLE => feed.title = read_text(reader, &e, ParseError::UnterminatedChannel)?,
                LINK => feed.link = read_text(reader, &e, ParseError::UnterminatedChannel)?,
                DESCRIPTION => {
                    feed.description = read_text(reader, &e, ParseError::UnterminatedChannel)?
                }
                ITEM => feed.items.push(parse_item(reader)?),
                _ => {
                    tracing::debug!(tag = %tag_name(&e), "Unsupported tag in channel");
                    skip(reader, &e, ParseError::UnterminatedChannel)?;
                }
            },
            Event::Empty(e) => match e.name().as_ref() {
                TITLE => feed.title.clear(),
                LINK => feed.link.clear(),
                DESCRIPTION => feed.description.clear(),
                ITEM => feed.items.push(Item::default()),
                _ => tracing::debug!(tag = %tag_name(&e), "Unsupported tag in channel"),
            },
            Event::End(e) if e.name().as_ref() == CHANNEL => return Ok(feed),
            Event::Eof => return Err(ParseError::UnterminatedChannel),
            _ => {}
        }
    }
}

fn parse_item(reader: &mut Reader<&[u8]>) -> Result<Item, ParseError> {
    let mut item = Item::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let field = match e.name().as_ref() {
                    TITLE => Some(&mut item.title),
                    CATEGORY => Some(&mut item.category),
                    LINK => Some(&mut item.link),
                    GUID => Some(&mut item.guid),
                    DESCRIPTION => Some(&mut item.description),
                    PUB_DATE => Some(&mut item.pub_date),
                    _ => None,
                };
                match field {
                    Some(field) => *field = read_text(reader, &e, ParseError::UnterminatedItem)?,
                    None => {
                        tracing::debug!(tag = %tag_name(&e), "Unsupported tag in item");
                        skip(reader, &e, ParseError::UnterminatedItem)?;
                    }
                }
            }
            Event::Empty(e) => match e.name().as_ref() {
                TITLE => item.title.clear(),
                CATEGORY => item.category.clear(),
                LINK => item.link.clear(),
                GUID => item.guid.clear(),
                DESCRIPTION => item.description.clear(),
                PUB_DATE => item.pub_date.clear(),
                _ => tracing::debug!(tag = %tag_name(&e), "Unsupported tag in item"),
            },
            Event::End(e) if e.name().as_ref() == ITEM => return Ok(item),
            Event::Eof => return Err(ParseError::UnterminatedItem),
            _ => {}
        }
    }
}

/// Reads the text content of the element just opened by `start`, up to its
/// end tag. Text and CDATA sections are concatenated; nested markup is
/// skipped. An element without text yields an empty string.
fn read_text(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    unterminated: ParseError,
) -> Result<String, ParseError> {
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Text(t) => text.push_str(&t.unescape()?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::Start(nested) => skip(reader, &nested, ParseError::Xml(missing_end(start)))?,
            Event::End(e) if e.name() == start.name() => return Ok(text),
            Event::Eof => return Err(unterminated),
            _ => {}
        }
    }
}

/// Skips the subtree opened by `start`, mapping a premature end of input to
/// `unterminated`.
fn skip(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
    unterminated: ParseError,
) -> Result<(), ParseError> {
    match reader.read_to_end(start.name()) {
        Ok(_) => Ok(()),
        Err(quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(_))) => Err(unterminated),
        Err(e) => Err(e.into()),
    }
}

fn missing_end(start: &BytesStart<'_>) -> quick_xml::Error {
    quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(tag_name(start)))
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}
