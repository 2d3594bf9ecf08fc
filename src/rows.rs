use compact_str::CompactString;

use crate::dump_parser::{Contributor, Page, Revision};

/// One flattened edit, as written by the extractor and read back by the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRow {
    pub page_id: i64,
    pub page_title: CompactString,
    pub is_redirect: bool,
    pub redirect_target: Option<CompactString>,
    pub revision_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub timestamp: Option<CompactString>,
    pub contributor_username: Option<CompactString>,
    pub contributor_id: Option<i64>,
    pub contributor_ip: Option<CompactString>,
    pub comment: Option<String>,
    pub is_minor: bool,
    pub text_bytes: Option<i64>,
    pub text_sha1: Option<CompactString>,
}

impl RevisionRow {
    pub fn flatten(page: &Page, revision: Revision) -> Self {
        let (contributor_username, contributor_id, contributor_ip) = match revision.contributor {
            Contributor::Registered { username, id } => (username, id, None),
            Contributor::Anonymous { ip } => (None, None, Some(ip)),
            Contributor::Suppressed => (None, None, None),
        };

        Self {
            page_id: page.id,
            page_title: page.title.clone(),
            is_redirect: page.is_redirect,
            redirect_target: page.redirect_target.clone(),
            revision_id: revision.id,
            parent_id: revision.parent_id,
            timestamp: revision.timestamp,
            contributor_username,
            contributor_id,
            contributor_ip,
            comment: revision.comment,
            is_minor: revision.minor,
            text_bytes: revision.text_bytes,
            text_sha1: revision.sha1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Vandalism,
    Restoration,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Vandalism => "vandalism",
            EventType::Restoration => "restoration",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "vandalism" => Some(EventType::Vandalism),
            "restoration" => Some(EventType::Restoration),
            _ => None,
        }
    }
}

/// `Both` when the restoring edit's comment also carries a revert keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionMethod {
    Sha1Revert,
    Both,
}

impl DetectionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionMethod::Sha1Revert => "sha1_revert",
            DetectionMethod::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sha1_revert" => Some(DetectionMethod::Sha1Revert),
            "both" => Some(DetectionMethod::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub revision: RevisionRow,
    pub event_type: EventType,
    pub vandalism_group_id: i64,
    /// Only set on restoration rows.
    pub restored_to_revision_id: Option<i64>,
    /// Only set on vandalism rows; negative when the source timestamps are skewed.
    pub restoration_time_seconds: Option<f64>,
    pub detection_method: DetectionMethod,
    pub party_group: CompactString,
}
