//! Linker
//!
//! Assigns every incoming source record to a stable internal proposal id,
//! keyed on the registry number both sources share. Records without a usable
//! registry number fall back to a title-similarity search whose hits are only
//! ever parked for manual confirmation.

use crate::error::SyncIssue;
use crate::models::sources::{SourceKind, SourceRecord};
use crate::proposal::{fold_text, IdentityEntry, IdentityIndex, Origin};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use uuid::Uuid;

static BILL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?:rzadowy|poselski|senacki|obywatelski|prezydencki|komisyjny)\s+)?(?:projekt\s+(?:ustawy|rozporzadzenia|uchwaly)\s+)?",
    )
    .expect("static regex")
});

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("static regex"));

/// Identity-relevant view of a source record
#[derive(Debug, Clone, Copy)]
pub struct SourceClaim<'a> {
    pub source_kind: SourceKind,
    pub source_id: &'a str,
    pub registry_ref: Option<&'a str>,
    pub title: Option<&'a str>,
    pub initiator: Option<&'a str>,
}

impl<'a> From<&'a SourceRecord> for SourceClaim<'a> {
    fn from(record: &'a SourceRecord) -> Self {
        Self {
            source_kind: record.kind(),
            source_id: record.source_id(),
            registry_ref: record.registry_ref(),
            title: record.title(),
            initiator: record.initiator(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    /// Attached to a proposal that already existed
    Existing(Uuid),
    /// A new proposal identity was assigned
    Created(Uuid),
    /// A low-confidence title match; the record must wait for confirmation
    NeedsReview { candidate: Uuid, similarity: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkDecision {
    pub outcome: LinkOutcome,
    pub registry_number: Option<String>,
    /// Raw reference that was present but unparseable
    pub unparseable_ref: Option<String>,
}

pub struct Linker {
    pattern: Regex,
    prefix: String,
    title_threshold: f64,
}

impl Linker {
    pub fn new(prefix: &str, title_threshold: f64) -> Result<Self, regex::Error> {
        let prefix = prefix.trim().to_uppercase();
        let pattern = Regex::new(&format!(
            r"(?i)\b{}[\s\-_]*(\d{{1,4}})[\s\-_/]+(\d{{1,4}})[\s\-_/]+(\d{{2}})\b",
            regex::escape(&prefix)
        ))?;
        Ok(Self {
            pattern,
            prefix,
            title_threshold,
        })
    }

    /// Canonical registry number found anywhere in `raw`
    pub fn extract_registry(&self, raw: &str) -> Option<String> {
        let caps = self.pattern.captures(raw)?;
        Some(format!("{}-{}-{}-{}", self.prefix, &caps[1], &caps[2], &caps[3]))
    }

    /// Resolve the proposal a record belongs to, updating the index
    pub fn link(
        &self,
        index: &mut IdentityIndex,
        claim: &SourceClaim<'_>,
    ) -> Result<LinkDecision, SyncIssue> {
        let raw_ref = claim.registry_ref.map(str::trim).filter(|r| !r.is_empty());
        let registry = raw_ref.and_then(|r| self.extract_registry(r));
        let unparseable_ref = match (raw_ref, &registry) {
            (Some(raw), None) => Some(raw.to_string()),
            _ => None,
        };
        let known = index.find_by_source(claim.source_kind, claim.source_id);

        let outcome = match registry.as_deref() {
            Some(reg) => self.link_by_registry(index, claim, reg, known)?,
            None => match known {
                Some(id) => {
                    refresh(index, id, claim, None);
                    LinkOutcome::Existing(id)
                }
                None => match self.best_title_match(index, claim) {
                    Some((candidate, similarity)) => LinkOutcome::NeedsReview {
                        candidate,
                        similarity,
                    },
                    None => LinkOutcome::Created(create(index, claim, None)),
                },
            },
        };

        Ok(LinkDecision {
            outcome,
            registry_number: registry,
            unparseable_ref,
        })
    }

    /// Attach a parked record to a proposal after manual confirmation
    pub fn attach(
        &self,
        index: &mut IdentityIndex,
        id: Uuid,
        claim: &SourceClaim<'_>,
    ) -> Result<(), SyncIssue> {
        if let Some(other) = index.find_by_source(claim.source_kind, claim.source_id) {
            if other != id {
                return Err(collision(
                    claim,
                    None,
                    other,
                    "source record was linked to another proposal in the meantime".to_string(),
                ));
            }
        }
        if let Some(entry) = index.get(id) {
            if let Some(held) = entry.source_id(claim.source_kind) {
                if held != claim.source_id {
                    return Err(collision(
                        claim,
                        entry.registry_number.clone(),
                        id,
                        format!("proposal already linked to {} record {}", claim.source_kind, held),
                    ));
                }
            }
        }
        refresh(index, id, claim, None);
        Ok(())
    }

    /// Assign a fresh proposal identity to a record (dismissed review)
    pub fn create_identity(&self, index: &mut IdentityIndex, claim: &SourceClaim<'_>) -> Uuid {
        match index.find_by_source(claim.source_kind, claim.source_id) {
            Some(id) => id,
            None => create(index, claim, None),
        }
    }

    fn link_by_registry(
        &self,
        index: &mut IdentityIndex,
        claim: &SourceClaim<'_>,
        registry: &str,
        known: Option<Uuid>,
    ) -> Result<LinkOutcome, SyncIssue> {
        let holder = index.find_by_registry(registry);
        let owned = Some(registry.to_string());

        match (known, holder) {
            (Some(k), Some(h)) if k != h => Err(collision(
                claim,
                owned,
                h,
                format!("source record is already linked to proposal {}", k),
            )),
            (Some(k), _) => {
                if let Some(existing) = index.get(k).and_then(|e| e.registry_number.clone()) {
                    if existing != registry {
                        return Err(collision(
                            claim,
                            owned,
                            k,
                            format!("proposal is already confirmed with registry {}", existing),
                        ));
                    }
                }
                refresh(index, k, claim, Some(registry));
                Ok(LinkOutcome::Existing(k))
            }
            (None, Some(h)) => {
                if let Some(held) = index.get(h).and_then(|e| e.source_id(claim.source_kind)) {
                    if held != claim.source_id {
                        let detail =
                            format!("registry already linked to {} record {}", claim.source_kind, held);
                        return Err(collision(claim, owned, h, detail));
                    }
                }
                refresh(index, h, claim, Some(registry));
                Ok(LinkOutcome::Existing(h))
            }
            (None, None) => Ok(LinkOutcome::Created(create(index, claim, Some(registry)))),
        }
    }

    /// Best unlinked counterpart by title similarity, if above the threshold
    fn best_title_match(&self, index: &IdentityIndex, claim: &SourceClaim<'_>) -> Option<(Uuid, f64)> {
        let title = normalize_title(claim.title?);
        if title.is_empty() {
            return None;
        }
        let this_side = claim.source_kind;
        index
            .entries()
            .filter(|e| e.source_id(this_side).is_none())
            .filter(|e| e.source_id(this_side.other()).is_some())
            .filter(|e| initiators_agree(e.initiator.as_deref(), claim.initiator))
            .map(|e| (e.id, strsim::jaro_winkler(&title, &normalize_title(&e.title))))
            .filter(|(_, similarity)| *similarity >= self.title_threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
    }
}

fn create(index: &mut IdentityIndex, claim: &SourceClaim<'_>, registry: Option<&str>) -> Uuid {
    let id = Uuid::new_v4();
    index.upsert(IdentityEntry::new(id));
    refresh(index, id, claim, registry);
    id
}

fn refresh(index: &mut IdentityIndex, id: Uuid, claim: &SourceClaim<'_>, registry: Option<&str>) {
    let mut entry = index.get(id).cloned().unwrap_or_else(|| IdentityEntry::new(id));
    entry.set_source_id(claim.source_kind, claim.source_id);
    if let Some(reg) = registry {
        entry.registry_number = Some(reg.to_string());
    }
    if let Some(title) = claim.title.map(str::trim).filter(|t| !t.is_empty()) {
        if entry.title.is_empty() || claim.source_kind == SourceKind::Government {
            entry.title = title.to_string();
        }
    }
    if let Some(initiator) = claim.initiator.map(str::trim).filter(|i| !i.is_empty()) {
        if entry.initiator.is_none() || claim.source_kind == SourceKind::Government {
            entry.initiator = Some(initiator.to_string());
        }
    }
    index.upsert(entry);
}

fn collision(
    claim: &SourceClaim<'_>,
    registry_number: Option<String>,
    existing: Uuid,
    detail: String,
) -> SyncIssue {
    SyncIssue::LinkingCollision {
        source_kind: claim.source_kind,
        source_id: claim.source_id.to_string(),
        registry_number,
        existing,
        detail,
    }
}

/// Folded title with the generic bill prefix removed
pub fn normalize_title(title: &str) -> String {
    let folded = fold_text(title);
    let spaced = NON_WORD.replace_all(&folded, " ");
    let trimmed = spaced.trim();
    BILL_PREFIX.replace(trimmed, "").trim().to_string()
}

fn initiators_agree(a: Option<&str>, b: Option<&str>) -> bool {
    let (Some(a), Some(b)) = (a, b) else {
        return false;
    };
    let (a, b) = (fold_text(a.trim()), fold_text(b.trim()));
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b || a.contains(&b) || b.contains(&a) {
        return true;
    }
    match (Origin::from_initiator(&a), Origin::from_initiator(&b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
