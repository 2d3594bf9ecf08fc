use std::{any::type_name_of_val, fmt::Debug, io::BufRead, str::FromStr};

use compact_str::CompactString;
use quick_xml::{
    events::{BytesEnd, BytesStart, Event},
    name::QName,
};
use rustc_hash::FxHashMap;

// we normally don't retrieve the value of the tags, so this is the most efficient backend
type TagStringInterner = string_interner::StringInterner<string_interner::backend::BucketBackend>;

// tags we need a value (or attribute) of, plus their parents
#[derive(PartialEq, Eq)]
enum Tag {
    MediaWiki,                               // <mediawiki version="0.11" ...>...</mediawiki> is the root tag
    SiteInfo,                                // <siteinfo><dbname>...</dbname><namespaces>...</namespaces></siteinfo>
    DbName,                                  // <dbname>enwiki</dbname>
    Namespaces,                              // <namespaces><namespace key="0" /> ...</namespaces>
    Namespace(String),                       // <namespace key="1">Talk</namespace>
    Page,                                    // <page>...tags are (title, ns, id, redirect, revision)</page>
    Title,                                   // <title>blah</title>
    Id,                                      // <id>500</id>
    Redirect(Option<String>),                // <redirect title="Target" />
    Revision,                                // <revision>...</revision>
    ParentId,                                // <parentid>499</parentid>
    Timestamp,                               // <timestamp>2003-12-05T06:41:50Z</timestamp>
    Contributor,                             // <contributor><username>blah</username><id>500</id></contributor> or <contributor><ip>1.2.3.4</ip></contributor>
    Username,                                // <username>blah</username>
    Ip,                                      // <ip>1.2.3.4</ip>
    // <text bytes="20" sha1="3h3w..." /> (stub dumps) or <text bytes="20" sha1="...">blah</text>
    // the sha1 attribute wins over the <sha1> element
    Text {
        bytes: Option<String>,
        sha1: Option<String>,
    },
    Sha1,                                    // <sha1>3h3w...</sha1>
    Comment,                                 // <comment>blah</comment>
    Minor,                                   // <minor />
    Unknown(string_interner::DefaultSymbol), // any other tag
}

impl Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tag::MediaWiki => write!(f, "<mediawiki>"),
            Tag::SiteInfo => write!(f, "<siteinfo>"),
            Tag::DbName => write!(f, "<dbname>"),
            Tag::Namespaces => write!(f, "<namespaces>"),
            Tag::Namespace(key) => write!(f, "<namespace key={}>", key),
            Tag::Page => write!(f, "<page>"),
            Tag::Title => write!(f, "<title>"),
            Tag::Id => write!(f, "<id>"),
            Tag::Redirect(target) => match target {
                Some(target) => write!(f, "<redirect title={:?}>", target),
                None => write!(f, "<redirect>"),
            },
            Tag::Revision => write!(f, "<revision>"),
            Tag::ParentId => write!(f, "<parentid>"),
            Tag::Timestamp => write!(f, "<timestamp>"),
            Tag::Contributor => write!(f, "<contributor>"),
            Tag::Username => write!(f, "<username>"),
            Tag::Ip => write!(f, "<ip>"),
            Tag::Text { bytes, sha1 } => {
                write!(f, "<text")?;
                if let Some(bytes) = bytes {
                    write!(f, " bytes={}", bytes)?;
                }
                if let Some(sha1) = sha1 {
                    write!(f, " sha1={:?}", sha1)?;
                }
                write!(f, ">")
            }
            Tag::Sha1 => write!(f, "<sha1>"),
            Tag::Comment => write!(f, "<comment>"),
            Tag::Minor => write!(f, "<minor>"),
            Tag::Unknown(tag) => write!(f, "<unknown tag - interned symbol: {:?}>", tag),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum TagReadingError<T> {
    /// Error returned to indicate that the input is not valid UTF-8.
    ///
    /// Allows continuing to parse the XML file, but this may lead to incorrect results if there is more than one distinct non-UTF-8 tag.
    #[error("non-UTF-8 tag detected")]
    NonUtf8Tag(T),
    #[error("XML error")]
    XmlError(#[from] quick_xml::Error),
}

#[derive(Debug)]
struct NonUtf8Tag<T>(T);

fn read_attribute(e: &BytesStart, key: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

impl Tag {
    fn from_start_bytes(
        e: &BytesStart,
        tag_interner: &mut TagStringInterner,
    ) -> Result<Self, TagReadingError<Tag>> {
        match e.name().as_ref() {
            b"mediawiki" => Ok(Tag::MediaWiki),
            b"siteinfo" => Ok(Tag::SiteInfo),
            b"dbname" => Ok(Tag::DbName),
            b"namespaces" => Ok(Tag::Namespaces),
            b"namespace" => Ok(Tag::Namespace(
                read_attribute(e, b"key")?.unwrap_or_default(),
            )),
            b"page" => Ok(Tag::Page),
            b"title" => Ok(Tag::Title),
            b"id" => Ok(Tag::Id),
            b"redirect" => Ok(Tag::Redirect(read_attribute(e, b"title")?)),
            b"revision" => Ok(Tag::Revision),
            b"parentid" => Ok(Tag::ParentId),
            b"timestamp" => Ok(Tag::Timestamp),
            b"contributor" => Ok(Tag::Contributor),
            b"username" => Ok(Tag::Username),
            b"ip" => Ok(Tag::Ip),
            b"text" => {
                let mut bytes = None;
                let mut sha1 = None;

                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    match attr.key.as_ref() {
                        b"bytes" => bytes = Some(attr.unescape_value()?.into_owned()),
                        b"sha1" => sha1 = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }

                Ok(Tag::Text { bytes, sha1 })
            }
            b"sha1" => Ok(Tag::Sha1),
            b"comment" => Ok(Tag::Comment),
            b"minor" => Ok(Tag::Minor),
            _ => {
                let name = e.name().into_inner();

                if let Ok(name) = std::str::from_utf8(name) {
                    Ok(Tag::Unknown(tag_interner.get_or_intern(name)))
                } else {
                    Err(TagReadingError::NonUtf8Tag(Tag::Unknown(
                        tag_interner.get_or_intern("non-utf8 tag"),
                    )))
                }
            }
        }
    }

    fn matches_end_bytes(
        &self,
        e: &BytesEnd,
        tag_interner: &mut TagStringInterner,
    ) -> Result<bool, NonUtf8Tag<bool>> {
        match (self, e.name().as_ref()) {
            (Tag::MediaWiki, b"mediawiki") => Ok(true),
            (Tag::SiteInfo, b"siteinfo") => Ok(true),
            (Tag::DbName, b"dbname") => Ok(true),
            (Tag::Namespaces, b"namespaces") => Ok(true),
            (Tag::Namespace(_), b"namespace") => Ok(true),
            (Tag::Page, b"page") => Ok(true),
            (Tag::Title, b"title") => Ok(true),
            (Tag::Id, b"id") => Ok(true),
            (Tag::Redirect(_), b"redirect") => Ok(true),
            (Tag::Revision, b"revision") => Ok(true),
            (Tag::ParentId, b"parentid") => Ok(true),
            (Tag::Timestamp, b"timestamp") => Ok(true),
            (Tag::Contributor, b"contributor") => Ok(true),
            (Tag::Username, b"username") => Ok(true),
            (Tag::Ip, b"ip") => Ok(true),
            (Tag::Text { .. }, b"text") => Ok(true),
            (Tag::Sha1, b"sha1") => Ok(true),
            (Tag::Comment, b"comment") => Ok(true),
            (Tag::Minor, b"minor") => Ok(true),
            (Tag::Unknown(expected_tag), tag_name) => {
                if let Ok(tag) = std::str::from_utf8(tag_name) {
                    let tag = tag_interner.get_or_intern(tag);
                    Ok(tag == *expected_tag)
                } else {
                    let tag = tag_interner.get_or_intern("non-utf8 tag");
                    Err(NonUtf8Tag(tag == *expected_tag))
                }
            }
            _ => Ok(false),
        }
    }
}

/// Paths whose text content we actually read. Everything else (notably full
/// revision text in `pages-meta-history` dumps) is never unescaped or copied.
fn captures_text(path: &[Tag]) -> bool {
    use Tag::*;

    matches!(
        path,
        [.., SiteInfo, DbName]
            | [.., Namespaces, Namespace(_)]
            | [.., Page, Title]
            | [.., Page, Id]
            | [.., Revision, Id]
            | [.., Revision, ParentId]
            | [.., Revision, Timestamp]
            | [.., Contributor, Username]
            | [.., Contributor, Id]
            | [.., Contributor, Ip]
            | [.., Revision, Sha1]
            | [.., Revision, Comment]
            | [.., Revision, Minor]
    )
}

/// Who made an edit. Registered and anonymous contributors are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Contributor {
    Registered {
        username: Option<CompactString>,
        id: Option<i64>,
    },
    Anonymous {
        ip: CompactString,
    },
    /// `<contributor deleted="deleted" />`
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision {
    pub id: Option<i64>,
    pub parent_id: Option<i64>,
    /// Kept verbatim (ISO-8601 in current dumps).
    pub timestamp: Option<CompactString>,
    pub contributor: Contributor,
    pub comment: Option<String>,
    pub minor: bool,
    pub text_bytes: Option<i64>,
    pub sha1: Option<CompactString>,
}

#[derive(Debug, Default)]
struct RevisionBuilder {
    id: Option<i64>,
    parent_id: Option<i64>,
    timestamp: Option<CompactString>,
    contributor_name: Option<CompactString>,
    contributor_id: Option<i64>,
    contributor_ip: Option<CompactString>,
    comment: Option<String>,
    minor: bool,
    text_bytes: Option<i64>,
    text_sha1_attribute: Option<CompactString>,
    sha1_element: Option<CompactString>,
}

impl RevisionBuilder {
    fn build(self) -> Revision {
        let contributor = match (self.contributor_ip, self.contributor_name, self.contributor_id) {
            (Some(ip), _, _) => Contributor::Anonymous { ip },
            (None, None, None) => Contributor::Suppressed,
            (None, username, id) => Contributor::Registered { username, id },
        };

        Revision {
            id: self.id,
            parent_id: self.parent_id,
            timestamp: self.timestamp,
            contributor,
            comment: self.comment,
            minor: self.minor,
            text_bytes: self.text_bytes,
            sha1: self.text_sha1_attribute.or(self.sha1_element),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Page {
    /// `0` when the dump does not carry a usable page id.
    pub id: i64,
    pub title: CompactString,
    pub is_redirect: bool,
    pub redirect_target: Option<CompactString>,
    pub revisions: Vec<Revision>,
}

#[derive(Debug, Default)]
struct PageBuilder {
    id: Option<i64>,
    title: String,
    title_seen: bool,
    is_redirect: bool,
    redirect_target: Option<CompactString>,
    revisions: Vec<Revision>,
}

impl PageBuilder {
    fn build(self) -> Page {
        Page {
            id: self.id.unwrap_or(0),
            title: CompactString::from(self.title.trim()),
            is_redirect: self.is_redirect,
            redirect_target: self.redirect_target,
            revisions: self.revisions,
        }
    }
}

/// Result of scanning one `<page>` element.
#[derive(Debug)]
pub enum ScannedPage {
    Matched(Page),
    /// The title was not wanted; the rest of the element was skipped without being materialized.
    Skipped,
}

#[derive(Debug, Default)]
pub struct SiteInfo {
    pub dbname: CompactString,
    pub namespaces: FxHashMap<i32, CompactString>,
}

/// Counts fields that were present but unusable (bad numbers, missing revision ids).
#[derive(Debug, Default)]
struct FieldAnomalies {
    count: usize,
}

impl FieldAnomalies {
    fn parse<T: FromStr>(
        &mut self,
        field: &'static str,
        value: &str,
    ) -> Result<Option<T>, ParsingError> {
        let value = value.trim();
        match value.parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => self.record(field, value).map(|()| None),
        }
    }

    fn record(&mut self, field: &'static str, value: &str) -> Result<(), ParsingError> {
        self.count += 1;
        tracing::debug!(message = "Malformed field in dump", field, value);

        if cfg!(feature = "strict") {
            Err(ParsingError::Malformed {
                field,
                value: value.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
struct NonUtf8Reporter {
    num_tags: usize,
}

impl NonUtf8Reporter {
    fn new() -> Self {
        Self { num_tags: 0 }
    }

    fn register(&mut self, name: &[u8]) {
        self.num_tags += 1;

        if self.num_tags == 1 {
            tracing::warn!(message = "Non-UTF-8 tag in XML detected. This is not expected. Parsing will continue, but the results may be incorrect. Further non-UTF-8 tags will not be reported.", name = String::from_utf8_lossy(name).as_ref());
        }
    }

    fn tag_from_start_bytes(
        &mut self,
        e: &BytesStart,
        tag_interner: &mut TagStringInterner,
    ) -> Result<Tag, quick_xml::Error> {
        match Tag::from_start_bytes(e, tag_interner) {
            Ok(tag) => Ok(tag),
            Err(TagReadingError::NonUtf8Tag(tag)) => {
                self.register(e.name().as_ref());
                Ok(tag)
            }
            Err(TagReadingError::XmlError(e)) => Err(e),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParsingError {
    #[error("XML error: {0}")]
    XmlError(#[from] quick_xml::Error),
    #[error("unexpected end of file inside <page>")]
    Eof,
    #[error("malformed value {value:?} for field `{field}`")]
    Malformed { field: &'static str, value: String },
    #[error("mismatched closing tag </{actual}>, expected {expected}")]
    MismatchedTag { expected: String, actual: String },
}

// one parser event, detached from the read buffer
enum Step {
    Open(Tag),
    Empty(Tag),
    Text(String),
    Close(Option<Tag>),
    Eof,
    Other,
}

/// Pull parser over a MediaWiki XML dump that hands out one page at a time.
///
/// Only the current page is ever held in memory; pages whose title is rejected are
/// skipped at the XML level right after their `<title>`.
pub struct DumpParser<R: BufRead> {
    tag_interner: TagStringInterner,
    xml_parser: quick_xml::Reader<R>,
    buf: Vec<u8>,
    current_path: Vec<Tag>,
    site_info: SiteInfo,
    non_utf8_reporter: NonUtf8Reporter,
    anomalies: FieldAnomalies,
    // set when reading the site info already consumed the first <page> start tag
    page_pending: bool,
}

impl<R: BufRead> Debug for DumpParser<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpParser")
            .field("tag_interner", &type_name_of_val(&self.tag_interner))
            .field("xml_parser", &type_name_of_val(&self.xml_parser))
            .field("buf.len", &self.buf.len())
            .field("buf.capacity", &self.buf.capacity())
            .field("current_path", &self.current_path)
            .field("site_info", &self.site_info)
            .field("anomalies", &self.anomalies.count)
            .finish()
    }
}

impl<R: BufRead> DumpParser<R> {
    pub fn new(reader: R) -> Result<Self, ParsingError> {
        let xml_parser = quick_xml::Reader::from_reader(reader);
        // expand_empty_elements not set, take care to handle empty elements!

        let mut new = Self {
            tag_interner: TagStringInterner::new(),
            xml_parser,
            // preallocate 64 KiB for the buffer, stub dumps have small elements
            buf: Vec::with_capacity(64 * 1024),
            current_path: Vec::new(),
            site_info: SiteInfo::default(),
            non_utf8_reporter: NonUtf8Reporter::new(),
            anomalies: FieldAnomalies::default(),
            page_pending: false,
        };

        new.parse_site_info()?;

        Ok(new)
    }

    pub fn site_info(&self) -> &SiteInfo {
        &self.site_info
    }

    /// Number of malformed or missing fields replaced by nulls so far.
    pub fn anomalies(&self) -> usize {
        self.anomalies.count
    }

    fn read_step(&mut self) -> Result<Step, ParsingError> {
        let step = match self.xml_parser.read_event_into(&mut self.buf)? {
            Event::Start(ref e) => Step::Open(
                self.non_utf8_reporter
                    .tag_from_start_bytes(e, &mut self.tag_interner)?,
            ),
            Event::Empty(ref e) => Step::Empty(
                self.non_utf8_reporter
                    .tag_from_start_bytes(e, &mut self.tag_interner)?,
            ),
            Event::Text(ref e) if captures_text(&self.current_path) => {
                Step::Text(e.unescape()?.into_owned())
            }
            Event::End(ref e) => {
                let Some(tag) = self.current_path.pop() else {
                    let tag = String::from_utf8_lossy(e.name().into_inner()).into_owned();
                    tracing::error!(message = "Unexpected end tag", tag = tag.as_str(), position = self.xml_parser.buffer_position());
                    self.buf.clear();

                    if cfg!(feature = "strict") {
                        return Err(ParsingError::MismatchedTag {
                            expected: "nothing".to_string(),
                            actual: tag,
                        });
                    }
                    tracing::warn!("Ignoring unexpected end tag. This may lead to incorrect results.");
                    return Ok(Step::Close(None));
                };

                // ignore non-utf8 error here because we already reported it when the tag was read
                let matches = tag
                    .matches_end_bytes(e, &mut self.tag_interner)
                    .unwrap_or_else(|e| e.0);
                if !matches {
                    let actual = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    tracing::error!(
                        message = "Mismatched tags",
                        expected = ?tag,
                        actual = actual.as_str(),
                        current_path = ?self.current_path,
                        position = self.xml_parser.buffer_position()
                    );

                    if cfg!(feature = "strict") {
                        self.buf.clear();
                        return Err(ParsingError::MismatchedTag {
                            expected: format!("{:?}", tag),
                            actual,
                        });
                    }
                    // we can't tell a missing opening tag from a missing closing tag, so just continue
                    tracing::warn!("Ignoring mismatched tag. This may lead to incorrect results.");
                }

                Step::Close(Some(tag))
            }
            Event::Eof => Step::Eof,
            _ => Step::Other,
        };
        self.buf.clear();
        Ok(step)
    }

    fn parse_site_info(&mut self) -> Result<(), ParsingError> {
        use Tag::*;

        loop {
            match self.read_step()? {
                Step::Open(tag) => {
                    let is_page = tag == Page;
                    self.current_path.push(tag);
                    if is_page {
                        // dump without a <siteinfo> block
                        self.page_pending = true;
                        break;
                    }
                }
                Step::Empty(tag) => {
                    if let Namespace(key) = &tag {
                        if let Ok(key) = key.parse() {
                            self.site_info.namespaces.insert(key, CompactString::default());
                        }
                    }
                }
                Step::Text(text) => match self.current_path.as_slice() {
                    [.., SiteInfo, DbName] => {
                        self.site_info.dbname = CompactString::from(text.trim());
                    }
                    [.., Namespaces, Namespace(key)] => {
                        if let Ok(key) = key.parse() {
                            self.site_info
                                .namespaces
                                .insert(key, CompactString::from(text.trim()));
                        } else {
                            tracing::warn!(
                                message = "Ignoring namespace with invalid id",
                                id = key.as_str(),
                                name = text.as_str()
                            );
                        }
                    }
                    _ => {}
                },
                Step::Close(Some(SiteInfo)) => break,
                Step::Close(_) | Step::Other => {}
                // empty dump
                Step::Eof => break,
            }
        }

        Ok(())
    }

    /// Reads the next `<page>` element.
    ///
    /// `wanted` is asked once per page with its title. Returns `Ok(None)` at the end of the dump.
    pub fn next_page(
        &mut self,
        wanted: impl Fn(&str) -> bool,
    ) -> Result<Option<ScannedPage>, ParsingError> {
        let span = tracing::span!(tracing::Level::DEBUG, "next_page", title = tracing::field::Empty);
        let _enter = span.enter();

        let mut started_page = std::mem::take(&mut self.page_pending);
        let mut page = PageBuilder::default();
        let mut revision_builder: Option<RevisionBuilder> = None;

        loop {
            match self.read_step()? {
                Step::Open(tag) => {
                    if tag == Tag::Page {
                        started_page = true;
                        page = PageBuilder::default();
                    }
                    if tag == Tag::Revision {
                        revision_builder = Some(RevisionBuilder::default());
                    }

                    self.current_path.push(tag);
                    self.apply_attributes(&mut page, revision_builder.as_mut())?;
                }
                Step::Empty(tag) => {
                    self.current_path.push(tag);
                    self.apply_attributes(&mut page, revision_builder.as_mut())?;
                    self.current_path.pop();
                }
                Step::Text(text) => {
                    self.apply_text(&text, &mut page, revision_builder.as_mut())?;
                }
                Step::Close(Some(Tag::Title)) if started_page => {
                    page.title_seen = true;
                    span.record("title", page.title.trim());

                    if !wanted(page.title.trim()) {
                        self.skip_rest_of_page()?;
                        return Ok(Some(ScannedPage::Skipped));
                    }
                }
                Step::Close(Some(Tag::Revision)) => {
                    if let Some(revision_builder) = revision_builder.take() {
                        if revision_builder.id.is_none() {
                            self.anomalies.record("revision_id", "")?;
                        }
                        page.revisions.push(revision_builder.build());
                    }
                }
                Step::Close(Some(Tag::Page)) => {
                    if !page.title_seen && !wanted(page.title.trim()) {
                        return Ok(Some(ScannedPage::Skipped));
                    }
                    if page.id.is_none() {
                        self.anomalies.record("page_id", "")?;
                    }
                    return Ok(Some(ScannedPage::Matched(page.build())));
                }
                Step::Close(_) | Step::Other => {}
                Step::Eof => {
                    if started_page {
                        tracing::error!(partial_page = ?page, current_path = ?self.current_path);
                        return Err(ParsingError::Eof);
                    } else {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn skip_rest_of_page(&mut self) -> Result<(), ParsingError> {
        self.xml_parser
            .read_to_end_into(QName(b"page"), &mut self.buf)?;
        self.buf.clear();

        while let Some(tag) = self.current_path.pop() {
            if tag == Tag::Page {
                break;
            }
        }
        Ok(())
    }

    // values carried by attributes of the tag just pushed onto `current_path`
    fn apply_attributes(
        &mut self,
        page: &mut PageBuilder,
        revision_builder: Option<&mut RevisionBuilder>,
    ) -> Result<(), ParsingError> {
        use Tag::*;

        match (self.current_path.as_slice(), revision_builder) {
            ([.., Page, Redirect(target)], _) => {
                page.is_redirect = true;
                page.redirect_target = target.as_deref().map(CompactString::from);
            }
            ([.., Revision, Text { bytes, sha1 }], Some(revision_builder)) => {
                if let Some(bytes) = bytes {
                    revision_builder.text_bytes = self.anomalies.parse("text_bytes", bytes)?;
                }
                revision_builder.text_sha1_attribute = sha1
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(CompactString::from);
            }
            ([.., Revision, Minor], Some(revision_builder)) => {
                revision_builder.minor = true;
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_text(
        &mut self,
        text: &str,
        page: &mut PageBuilder,
        revision_builder: Option<&mut RevisionBuilder>,
    ) -> Result<(), ParsingError> {
        use Tag::*;

        fn non_empty(text: &str) -> Option<CompactString> {
            let text = text.trim();
            (!text.is_empty()).then(|| CompactString::from(text))
        }

        match (self.current_path.as_slice(), revision_builder) {
            ([.., Page, Title], _) => page.title.push_str(text),
            ([.., Page, Id], _) => page.id = self.anomalies.parse("page_id", text)?,
            ([.., Revision, Id], Some(rb)) => rb.id = self.anomalies.parse("revision_id", text)?,
            ([.., Revision, ParentId], Some(rb)) => {
                rb.parent_id = self.anomalies.parse("parent_id", text)?
            }
            ([.., Revision, Timestamp], Some(rb)) => rb.timestamp = non_empty(text),
            ([.., Contributor, Username], Some(rb)) => rb.contributor_name = non_empty(text),
            ([.., Contributor, Id], Some(rb)) => {
                rb.contributor_id = self.anomalies.parse("contributor_id", text)?
            }
            ([.., Contributor, Ip], Some(rb)) => rb.contributor_ip = non_empty(text),
            ([.., Revision, Sha1], Some(rb)) => rb.sha1_element = non_empty(text),
            ([.., Revision, Comment], Some(rb)) => {
                let comment = rb.comment.get_or_insert_with(String::new);
                comment.push_str(text);
            }
            // <minor> should be empty, but just in case it's not handle it here as well
            ([.., Revision, Minor], Some(rb)) => rb.minor = true,
            _ => {}
        }
        Ok(())
    }
}
