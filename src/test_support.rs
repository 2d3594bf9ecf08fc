use std::io::Cursor;

use chrono::{DateTime, Duration, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::rows::RevisionRow;

pub mod prelude {
    pub(crate) use super::proptest as proptest_support;
    pub(crate) use super::{revision_row, timestamp_at};
    pub(crate) use proptest::prelude::*;
}

const TIMESTAMP_FORMAT_LONG: &str = "%Y-%m-%dT%H:%M:%SZ";

/// `2020-01-01T00:00:00Z` plus `seconds`.
pub fn timestamp_at(seconds: i64) -> String {
    let base = DateTime::<Utc>::from_timestamp(1_577_836_800, 0).unwrap();
    (base + Duration::seconds(seconds))
        .format(TIMESTAMP_FORMAT_LONG)
        .to_string()
}

/// A revision row with a registered contributor; an empty comment becomes `None`.
pub fn revision_row(
    title: &str,
    id: i64,
    sha1: Option<&str>,
    timestamp: &str,
    comment: &str,
) -> RevisionRow {
    RevisionRow {
        page_id: 1,
        page_title: title.into(),
        is_redirect: false,
        redirect_target: None,
        revision_id: Some(id),
        parent_id: None,
        timestamp: Some(timestamp.into()),
        contributor_username: Some("Editor".into()),
        contributor_id: Some(1),
        contributor_ip: None,
        comment: (!comment.is_empty()).then(|| comment.to_string()),
        is_minor: false,
        text_bytes: Some(100),
        text_sha1: sha1.map(Into::into),
    }
}

#[derive(Debug, Clone)]
pub struct XmlRevision {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub timestamp: String,
    pub username: Option<String>,
    pub ip: Option<String>,
    pub comment: Option<String>,
    pub minor: bool,
    pub sha1: Option<String>,
    /// Write the hash as a standalone `<sha1>` element instead of a `<text>` attribute.
    pub sha1_as_element: bool,
}

impl XmlRevision {
    pub fn new(id: i64, sha1: &str) -> Self {
        Self {
            id,
            parent_id: None,
            timestamp: timestamp_at(id * 60),
            username: Some("Editor".to_string()),
            ip: None,
            comment: None,
            minor: false,
            sha1: Some(sha1.to_string()),
            sha1_as_element: false,
        }
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn anonymous(mut self, ip: &str) -> Self {
        self.username = None;
        self.ip = Some(ip.to_string());
        self
    }

    pub fn sha1_as_element(mut self) -> Self {
        self.sha1_as_element = true;
        self
    }
}

fn write_text_element<W: std::io::Write>(writer: &mut quick_xml::Writer<W>, name: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .unwrap();
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .unwrap();
    writer.write_event(Event::End(BytesEnd::new(name))).unwrap();
}

/// Renders a complete dump (with `<siteinfo>`) containing the given pages.
pub fn dump_xml(pages: &[(&str, i64, Vec<XmlRevision>)]) -> String {
    let mut xml = Vec::new();
    let mut writer = quick_xml::Writer::new(Cursor::new(&mut xml));

    writer
        .write_event(Event::Start(
            BytesStart::new("mediawiki").with_attributes([("version", "0.11"), ("xml:lang", "en")]),
        ))
        .unwrap();

    writer
        .write_event(Event::Start(BytesStart::new("siteinfo")))
        .unwrap();
    write_text_element(&mut writer, "sitename", "Wikipedia");
    write_text_element(&mut writer, "dbname", "enwiki");
    writer
        .write_event(Event::Start(BytesStart::new("namespaces")))
        .unwrap();
    writer
        .write_event(Event::Empty(
            BytesStart::new("namespace").with_attributes([("key", "0"), ("case", "first-letter")]),
        ))
        .unwrap();
    writer
        .write_event(Event::Start(
            BytesStart::new("namespace").with_attributes([("key", "1"), ("case", "first-letter")]),
        ))
        .unwrap();
    writer
        .write_event(Event::Text(BytesText::new("Talk")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("namespace")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("namespaces")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("siteinfo")))
        .unwrap();

    for (title, page_id, revisions) in pages {
        writer
            .write_event(Event::Start(BytesStart::new("page")))
            .unwrap();
        write_text_element(&mut writer, "title", title);
        write_text_element(&mut writer, "ns", "0");
        write_text_element(&mut writer, "id", &page_id.to_string());

        for revision in revisions {
            writer
                .write_event(Event::Start(BytesStart::new("revision")))
                .unwrap();
            write_text_element(&mut writer, "id", &revision.id.to_string());
            if let Some(parent_id) = revision.parent_id {
                write_text_element(&mut writer, "parentid", &parent_id.to_string());
            }
            write_text_element(&mut writer, "timestamp", &revision.timestamp);

            writer
                .write_event(Event::Start(BytesStart::new("contributor")))
                .unwrap();
            if let Some(username) = &revision.username {
                write_text_element(&mut writer, "username", username);
                write_text_element(&mut writer, "id", "1");
            }
            if let Some(ip) = &revision.ip {
                write_text_element(&mut writer, "ip", ip);
            }
            writer
                .write_event(Event::End(BytesEnd::new("contributor")))
                .unwrap();

            if revision.minor {
                writer
                    .write_event(Event::Empty(BytesStart::new("minor")))
                    .unwrap();
            }
            if let Some(comment) = &revision.comment {
                write_text_element(&mut writer, "comment", comment);
            }
            write_text_element(&mut writer, "model", "wikitext");
            write_text_element(&mut writer, "format", "text/x-wiki");

            let mut text = BytesStart::new("text").with_attributes([("bytes", "100")]);
            if let (Some(sha1), false) = (&revision.sha1, revision.sha1_as_element) {
                text.push_attribute(("sha1", sha1.as_str()));
            }
            writer.write_event(Event::Empty(text)).unwrap();
            if let (Some(sha1), true) = (&revision.sha1, revision.sha1_as_element) {
                write_text_element(&mut writer, "sha1", sha1);
            }

            writer
                .write_event(Event::End(BytesEnd::new("revision")))
                .unwrap();
        }

        writer
            .write_event(Event::End(BytesEnd::new("page")))
            .unwrap();
    }

    writer
        .write_event(Event::End(BytesEnd::new("mediawiki")))
        .unwrap();

    String::from_utf8(xml).unwrap()
}

pub mod proptest {
    use proptest::prelude::*;
    use proptest::strategy::Strategy;

    use super::{revision_row, timestamp_at};
    use crate::rows::RevisionRow;

    /// Content hash of a piece of text. Same text, same hash.
    pub fn content_hash(text: &str) -> String {
        let hash = blake3::Hasher::new().update(text.as_bytes()).finalize();
        hex::encode(&hash.as_bytes()[..20])
    }

    pub fn maybe_comment() -> impl Strategy<Value = String> {
        prop_oneof![
            6 => Just(String::new()),
            1 => Just("rvv".to_string()),
            1 => Just("Undid revision 1234 by Someone".to_string()),
            2 => "[a-z ]{0,20}",
        ]
    }

    /// One content version out of a small alphabet so hashes repeat often, or none at all.
    pub fn maybe_content() -> impl Strategy<Value = Option<u8>> {
        prop_oneof![
            9 => (0u8..4).prop_map(Some),
            1 => Just(None),
        ]
    }

    prop_compose! {
        fn revision_parts()
                (content in maybe_content(), comment in maybe_comment(), gap in 0i64..86_400)
        -> (Option<u8>, String, i64) {
            (content, comment, gap)
        }
    }

    /// A chronologically ordered page history with unique revision ids.
    pub fn page_history(title: &'static str, max_revisions: usize) -> impl Strategy<Value = Vec<RevisionRow>> {
        proptest::collection::vec(revision_parts(), 0..max_revisions).prop_map(move |parts| {
            let mut elapsed = 0;
            parts
                .into_iter()
                .enumerate()
                .map(|(i, (content, comment, gap))| {
                    elapsed += gap;
                    let sha1 = content.map(|c| content_hash(&format!("version {c}")));
                    revision_row(title, i as i64 + 1, sha1.as_deref(), &timestamp_at(elapsed), &comment)
                })
                .collect()
        })
    }
}
