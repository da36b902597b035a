//! Applies an accepted plugin report to the book store.
//!
//! Application is ordered: the last-document guard runs before any
//! mutation, then additions, deletions, and finally modifications with the
//! package document and NCX rewritten last so structural documents observe
//! every content change. The change watcher is suspended for the whole
//! batch and resumed on every exit path.
//!
//! Structural documents are protected. A tracked package document is never
//! deleted, the NCX only on version-3 books where it is optional, and the
//! designated navigation document never.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use folio_epub::{mediatype, BookStore, ResourceKind};

use crate::descriptor::PluginKind;
use crate::error::PluginError;
use crate::interact::Interaction;
use crate::protocol::{ChangeRecord, PluginReport};
use crate::views::ViewManager;

/// Tracing target for change application.
const APPLIER_TARGET: &str = "folio_plugins::applier";

/// What applying a report did to the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No change reached the store.
    Unchanged,
    /// At least one addition, deletion, or modification was applied.
    Changed,
    /// An input plugin produced a replacement book at the given path; the
    /// caller must load it and discard the current store.
    ReplacedBook(PathBuf),
}

/// Applies plugin reports to a book store and its open views.
pub struct Applier<'a> {
    store: &'a mut BookStore,
    views: &'a mut dyn ViewManager,
    interaction: &'a dyn Interaction,
}

impl<'a> Applier<'a> {
    /// Creates an applier over the given collaborators.
    #[must_use]
    pub fn new(
        store: &'a mut BookStore,
        views: &'a mut dyn ViewManager,
        interaction: &'a dyn Interaction,
    ) -> Self {
        Self {
            store,
            views,
            interaction,
        }
    }

    /// Applies one report, honouring the structural protections.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LastDocumentGuard`] when the report would
    /// leave the book without a single content document. The guard runs
    /// before any mutation, so a rejected report leaves the store exactly
    /// as it was.
    pub fn apply(
        &mut self,
        report: &PluginReport,
        kind: PluginKind,
        working_dir: &Path,
    ) -> Result<ApplyOutcome, PluginError> {
        let remaining =
            i64::try_from(self.store.content_document_count()).unwrap_or(i64::MAX)
                + report.content_document_delta;
        if report.content_document_delta < 0 && remaining <= 0 {
            return Err(PluginError::LastDocumentGuard);
        }

        self.store.suspend_watching();
        let outcome = self.apply_batch(report, kind, working_dir);
        self.store.resume_watching();
        outcome
    }

    fn apply_batch(
        &mut self,
        report: &PluginReport,
        kind: PluginKind,
        working_dir: &Path,
    ) -> Result<ApplyOutcome, PluginError> {
        let mut changed = false;

        for record in &report.added {
            match self.apply_add(record, kind, working_dir) {
                AddResult::Applied => changed = true,
                AddResult::Skipped => {}
                AddResult::ReplaceBook(path) => return Ok(ApplyOutcome::ReplacedBook(path)),
                // Earlier records in the batch may already have landed;
                // the outcome must say so even though the rest is skipped.
                AddResult::ReplaceDeclined => return Ok(self.conclude(changed)),
            }
        }

        self.redirect_orphaned_views(report);
        for record in &report.deleted {
            if self.apply_delete(record) {
                changed = true;
            }
        }

        for record in ordered_modifications(report, self.store) {
            if self.apply_modify(record, working_dir) {
                changed = true;
            }
        }

        Ok(self.conclude(changed))
    }

    fn conclude(&mut self, changed: bool) -> ApplyOutcome {
        if changed {
            self.store.set_modified(true);
            info!(target: APPLIER_TARGET, "plugin changes applied");
            ApplyOutcome::Changed
        } else {
            ApplyOutcome::Unchanged
        }
    }

    fn apply_add(&mut self, record: &ChangeRecord, kind: PluginKind, working_dir: &Path) -> AddResult {
        if !is_plain_relative(&record.href) {
            warn!(target: APPLIER_TARGET, href = record.href.as_str(), "ignored addition outside the book");
            return AddResult::Skipped;
        }
        if record.media_type == mediatype::EPUB && kind == PluginKind::Input {
            return self.replace_book(record, working_dir);
        }
        if record.media_type == mediatype::OPF {
            warn!(target: APPLIER_TARGET, href = record.href.as_str(), "ignored added package document");
            return AddResult::Skipped;
        }
        if record.media_type == mediatype::NCX
            && (self.store.ncx_href().is_some() || !self.store.is_version3())
        {
            warn!(target: APPLIER_TARGET, href = record.href.as_str(), "ignored added NCX");
            return AddResult::Skipped;
        }

        let source = working_dir.join(&record.href);
        match self
            .store
            .add_content_file(&source, &record.href, &record.id, &record.media_type)
        {
            Ok(_) => {}
            Err(err) => {
                warn!(target: APPLIER_TARGET, href = record.href.as_str(), %err, "could not add resource");
                return AddResult::Skipped;
            }
        }
        if record.media_type == mediatype::NCX {
            self.store.set_ncx(Some(record.href.clone()));
        }
        self.obfuscate_new_font(&record.href);
        debug!(target: APPLIER_TARGET, href = record.href.as_str(), "resource added");
        AddResult::Applied
    }

    fn replace_book(&mut self, record: &ChangeRecord, working_dir: &Path) -> AddResult {
        if self.store.is_modified() && !self.interaction.confirm_replace_book() {
            info!(target: APPLIER_TARGET, "book replacement declined");
            return AddResult::ReplaceDeclined;
        }
        AddResult::ReplaceBook(working_dir.join(&record.href))
    }

    /// New fonts inherit the book's obfuscation algorithm, when one is in
    /// use, so they round-trip through export like the originals.
    fn obfuscate_new_font(&mut self, href: &str) {
        let algorithm = self
            .store
            .font_obfuscation_pairs()
            .first()
            .map(|(_, algorithm)| algorithm.clone());
        let Some(algorithm) = algorithm else {
            return;
        };
        if let Some(resource) = self.store.resource_mut(href) {
            if resource.kind() == ResourceKind::Font {
                resource.set_obfuscation_algorithm(algorithm);
            }
        }
    }

    /// Keeps at least one content-document view open across the batch.
    ///
    /// When every open content-document view targets a file this report
    /// deletes, a view onto the first surviving spine document is opened
    /// before the deletions run.
    fn redirect_orphaned_views(&mut self, report: &PluginReport) {
        let doomed: BTreeSet<&str> = report
            .deleted
            .iter()
            .map(|record| record.href.as_str())
            .collect();
        let open_documents: Vec<String> = self
            .views
            .open_views()
            .into_iter()
            .filter(|href| {
                self.store
                    .resource(href)
                    .is_some_and(|r| r.kind() == ResourceKind::Html)
            })
            .collect();
        if open_documents.is_empty()
            || open_documents.iter().any(|href| !doomed.contains(href.as_str()))
        {
            return;
        }
        let survivor = self
            .store
            .spine()
            .iter()
            .chain(self.store.hrefs_by_kind(ResourceKind::Html).iter())
            .find(|href| !doomed.contains(href.as_str()))
            .cloned();
        if let Some(href) = survivor {
            debug!(target: APPLIER_TARGET, href = href.as_str(), "redirecting views to survivor");
            self.views.open_view(&href);
        }
    }

    fn apply_delete(&mut self, record: &ChangeRecord) -> bool {
        let href = record.href.as_str();
        if !self.store.contains(href) {
            return match self.store.remove_raw_file(href) {
                Ok(removed) => removed,
                Err(err) => {
                    warn!(target: APPLIER_TARGET, href, %err, "could not remove untracked file");
                    false
                }
            };
        }
        if href == self.store.opf_href() {
            warn!(target: APPLIER_TARGET, href, "refused to delete package document");
            return false;
        }
        if self.store.ncx_href() == Some(href) && !self.store.is_version3() {
            warn!(target: APPLIER_TARGET, href, "refused to delete mandatory NCX");
            return false;
        }
        if self.store.nav_href() == Some(href) {
            warn!(target: APPLIER_TARGET, href, "refused to delete navigation document");
            return false;
        }
        self.views.close_view(href);
        match self.store.remove_resource(href) {
            Ok(_) => {
                debug!(target: APPLIER_TARGET, href, "resource deleted");
                true
            }
            Err(err) => {
                warn!(target: APPLIER_TARGET, href, %err, "could not delete resource");
                false
            }
        }
    }

    fn apply_modify(&mut self, record: &ChangeRecord, working_dir: &Path) -> bool {
        let href = record.href.as_str();
        if !is_plain_relative(href) {
            warn!(target: APPLIER_TARGET, href, "ignored modification outside the book");
            return false;
        }
        if !self.store.contains(href) {
            warn!(target: APPLIER_TARGET, href, "ignored modification of untracked resource");
            return false;
        }
        let source = working_dir.join(href);
        let dest = self.store.full_path(href);
        if let Some(parent) = dest.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(target: APPLIER_TARGET, href, %err, "could not prepare destination");
                return false;
            }
        }
        if let Err(err) = fs::copy(&source, &dest) {
            warn!(target: APPLIER_TARGET, href, %err, "could not copy modified file");
            return false;
        }
        if let Some(resource) = self.store.resource_mut(href) {
            if let Err(err) = resource.reload_from(&dest) {
                warn!(target: APPLIER_TARGET, href, %err, "could not reload modified resource");
            }
        }
        debug!(target: APPLIER_TARGET, href, "resource modified");
        true
    }
}

enum AddResult {
    Applied,
    Skipped,
    ReplaceBook(PathBuf),
    ReplaceDeclined,
}

/// Reported hrefs must stay inside the snapshot directories, so anything
/// with a root or parent-directory component never reaches a join.
fn is_plain_relative(href: &str) -> bool {
    !href.is_empty()
        && Path::new(href)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// Reorders modifications so the package document is rewritten after every
/// content change and the NCX after the package document.
fn ordered_modifications<'r>(
    report: &'r PluginReport,
    store: &BookStore,
) -> Vec<&'r ChangeRecord> {
    let mut ordinary = Vec::new();
    let mut package = Vec::new();
    let mut ncx = Vec::new();
    for record in &report.modified {
        if record.href == store.opf_href() && record.media_type == mediatype::OPF {
            package.push(record);
        } else if store.ncx_href() == Some(record.href.as_str())
            && record.media_type == mediatype::NCX
        {
            ncx.push(record);
        } else {
            ordinary.push(record);
        }
    }
    ordinary.extend(package);
    ordinary.extend(ncx);
    ordinary
}

#[cfg(test)]
mod tests;
