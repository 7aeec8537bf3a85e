//! Asset Graph Service — a tag-annotated, in-memory view over one card's
//! asset links.
//!
//! # Mutation model
//! Every mutation returns a NEW graph; nothing mutates in place.  An
//! editing session keeps the original snapshot and applies changes by
//! [`AssetGraph::diff`]-ing against it — only changed links are written
//! back.  The graph is single-writer within a session; independent cards
//! can be processed in parallel with no cross-talk.
//!
//! # Validation
//! [`AssetGraph::validate`] is advisory: it runs on demand, never
//! automatically, and never blocks a mutation.  Persisting a graph with a
//! duplicated single-holder tag is the orchestrator's `InvariantViolation`,
//! not this module's.

use std::collections::BTreeSet;

use crate::model::{AssetKind, CardAssetLink};

/// At most one link per graph holds this tag; it wins the portrait lookup.
pub const TAG_PORTRAIT_OVERRIDE: &str = "portrait-override";
/// At most one link per graph holds this tag; it wins the background lookup.
pub const TAG_MAIN_BACKGROUND: &str = "main-background";
/// Prefix for actor binding tags (`actor-1`, `actor-2`, …).
pub const TAG_ACTOR_PREFIX: &str = "actor-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One advisory finding from [`AssetGraph::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub asset_id: String,
    pub severity: Severity,
    pub message: String,
}

/// One changed link, produced by [`AssetGraph::diff`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinkChange {
    pub asset_id: String,
    pub updated: CardAssetLink,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssetGraph {
    links: Vec<CardAssetLink>,
}

impl AssetGraph {
    pub fn new(links: Vec<CardAssetLink>) -> Self {
        Self { links }
    }

    pub fn links(&self) -> &[CardAssetLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Visible assets only (package-original and other meta entries do not
    /// count toward what the user sees).
    pub fn visible_len(&self) -> usize {
        self.links.iter().filter(|l| l.kind.is_visible()).count()
    }

    fn by_id(&self, asset_id: &str) -> Option<&CardAssetLink> {
        self.links.iter().find(|l| l.asset_id == asset_id)
    }

    // ── Derived queries (pure) ───────────────────────────────────────────────

    /// Precedence: `portrait-override` tag, then the `is_main` icon, then
    /// the first icon, else none.
    pub fn main_portrait(&self) -> Option<&CardAssetLink> {
        self.links
            .iter()
            .find(|l| l.tags.contains(TAG_PORTRAIT_OVERRIDE))
            .or_else(|| self.links.iter().find(|l| l.kind == AssetKind::Icon && l.is_main))
            .or_else(|| self.links.iter().find(|l| l.kind == AssetKind::Icon))
    }

    /// Same precedence pattern as [`Self::main_portrait`], keyed on the
    /// `main-background` tag.
    pub fn main_background(&self) -> Option<&CardAssetLink> {
        self.links
            .iter()
            .find(|l| l.tags.contains(TAG_MAIN_BACKGROUND))
            .or_else(|| self.links.iter().find(|l| l.kind == AssetKind::Background && l.is_main))
            .or_else(|| self.links.iter().find(|l| l.kind == AssetKind::Background))
    }

    /// Icon/emotion links bound to actor `n`, ordered by `order`.
    pub fn expressions_for_actor(&self, n: u32) -> Vec<&CardAssetLink> {
        let mut out: Vec<&CardAssetLink> = self
            .links
            .iter()
            .filter(|l| matches!(l.kind, AssetKind::Icon | AssetKind::Emotion))
            .filter(|l| l.actor_index == Some(n))
            .collect();
        out.sort_by_key(|l| l.order);
        out
    }

    /// Sorted distinct actor indices present in the graph.
    pub fn actors(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = self.links.iter().filter_map(|l| l.actor_index).collect();
        set.into_iter().collect()
    }

    // ── Mutations (return a new graph) ───────────────────────────────────────

    /// Tags `asset_id` as the portrait override and strips the tag from
    /// every other link (single-holder invariant).
    pub fn set_portrait_override(&self, asset_id: &str) -> Self {
        self.set_exclusive_tag(asset_id, TAG_PORTRAIT_OVERRIDE)
    }

    pub fn set_main_background(&self, asset_id: &str) -> Self {
        self.set_exclusive_tag(asset_id, TAG_MAIN_BACKGROUND)
    }

    fn set_exclusive_tag(&self, asset_id: &str, tag: &str) -> Self {
        let links = self
            .links
            .iter()
            .map(|l| {
                let mut l = l.clone();
                if l.asset_id == asset_id {
                    l.tags.insert(tag.to_owned());
                } else {
                    l.tags.remove(tag);
                }
                l
            })
            .collect();
        Self { links }
    }

    /// Binds `asset_id` to actor `n`, replacing any previous actor tag.
    pub fn bind_actor(&self, asset_id: &str, n: u32) -> Self {
        let links = self
            .links
            .iter()
            .map(|l| {
                let mut l = l.clone();
                if l.asset_id == asset_id {
                    l.tags.retain(|t| !t.starts_with(TAG_ACTOR_PREFIX));
                    l.tags.insert(format!("{TAG_ACTOR_PREFIX}{n}"));
                    l.actor_index = Some(n);
                }
                l
            })
            .collect();
        Self { links }
    }

    pub fn unbind_actor(&self, asset_id: &str) -> Self {
        let links = self
            .links
            .iter()
            .map(|l| {
                let mut l = l.clone();
                if l.asset_id == asset_id {
                    l.tags.retain(|t| !t.starts_with(TAG_ACTOR_PREFIX));
                    l.actor_index = None;
                }
                l
            })
            .collect();
        Self { links }
    }

    /// Rewrites `order` to match list position.  Ids not in the list keep
    /// their relative order after the listed ones.
    pub fn reorder(&self, ids_in_new_order: &[&str]) -> Self {
        let mut links = self.links.clone();
        links.sort_by_key(|l| {
            ids_in_new_order
                .iter()
                .position(|id| *id == l.asset_id)
                .unwrap_or(usize::MAX)
        });
        for (i, l) in links.iter_mut().enumerate() {
            l.order = i as u32;
        }
        Self { links }
    }

    /// Appends `_1`, `_2`, … to later duplicates of the same name; the
    /// first occurrence is unchanged.
    pub fn deduplicate_names(&self) -> Self {
        let mut seen: Vec<String> = Vec::new();
        let links = self
            .links
            .iter()
            .map(|l| {
                let mut l = l.clone();
                let duplicates = seen.iter().filter(|n| **n == l.name).count();
                seen.push(l.name.clone());
                if duplicates > 0 {
                    l.name = format!("{}_{duplicates}", l.name);
                }
                l
            })
            .collect();
        Self { links }
    }

    // ── Validation (advisory) ────────────────────────────────────────────────

    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        // Duplicate names → warning per affected link.
        for l in &self.links {
            if self.links.iter().filter(|o| o.name == l.name).count() > 1 {
                issues.push(ValidationIssue {
                    asset_id: l.asset_id.clone(),
                    severity: Severity::Warning,
                    message: format!("duplicate asset name {:?}", l.name),
                });
            }
        }

        // Multiple single-holder tags → error on each holder.
        for tag in [TAG_PORTRAIT_OVERRIDE, TAG_MAIN_BACKGROUND] {
            let holders: Vec<&CardAssetLink> =
                self.links.iter().filter(|l| l.tags.contains(tag)).collect();
            if holders.len() > 1 {
                for holder in holders {
                    issues.push(ValidationIssue {
                        asset_id: holder.asset_id.clone(),
                        severity: Severity::Error,
                        message: format!("tag {tag:?} held by more than one asset"),
                    });
                }
            }
        }

        // Actor indices should be contiguous starting at 1.
        let actors = self.actors();
        if let Some(&max) = actors.last() {
            let gaps: Vec<u32> = (1..=max).filter(|n| !actors.contains(n)).collect();
            if !gaps.is_empty() || actors.first() == Some(&0) {
                issues.push(ValidationIssue {
                    asset_id: String::new(),
                    severity: Severity::Warning,
                    message: format!("actor indices are not contiguous from 1: present {actors:?}, gaps {gaps:?}"),
                });
            }
        }

        issues
    }

    // ── Session diff ─────────────────────────────────────────────────────────

    /// Changed links only, compared against the session's original
    /// snapshot.  Comparison covers tags, name, order, main flag, and actor
    /// binding — the mutable surface of a link.
    pub fn diff(&self, original: &AssetGraph) -> Vec<LinkChange> {
        self.links
            .iter()
            .filter(|l| original.by_id(&l.asset_id) != Some(*l))
            .map(|l| LinkChange { asset_id: l.asset_id.clone(), updated: l.clone() })
            .collect()
    }
}
