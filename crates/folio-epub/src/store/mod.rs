//! The live resource store backing an open book.
//!
//! [`BookStore`] tracks every manifested resource of the book, keyed by its
//! book-root-relative href, and mirrors the book root directory on disk.
//! Editable kinds keep a cached text payload that [`BookStore::save_all_to_disk`]
//! flushes before a plugin snapshot is taken and that the change applier
//! reloads after an accepted modification.
//!
//! The store also owns the one piece of shared state the plugin pipeline
//! must coordinate: the filesystem change watcher. Watching is suspended
//! around bulk flush and bulk apply operations only, never across a plugin's
//! execution window.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::mediatype;
use crate::resource::{Resource, ResourceKind};

/// Tracing target for store operations.
const STORE_TARGET: &str = "folio_epub::store";

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A resource with the same href is already tracked.
    #[error("resource '{href}' is already tracked")]
    Duplicate {
        /// Conflicting href.
        href: String,
    },

    /// The requested resource is not tracked.
    #[error("resource '{href}' is not tracked")]
    Missing {
        /// Requested href.
        href: String,
    },

    /// An I/O operation on the book root failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl StoreError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// The in-memory resource store mirroring a book root directory.
#[derive(Debug)]
pub struct BookStore {
    root: PathBuf,
    version: String,
    opf_href: String,
    ncx_href: Option<String>,
    nav_href: Option<String>,
    spine: Vec<String>,
    resources: BTreeMap<String, Resource>,
    modified: bool,
    watcher_suspended: bool,
}

impl BookStore {
    /// Creates a store over an existing book root directory.
    ///
    /// The manifest document is registered immediately; every book has one.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, version: impl Into<String>, opf_href: &str) -> Self {
        let mut resources = BTreeMap::new();
        resources.insert(
            opf_href.to_owned(),
            Resource::new(opf_href, "opf", mediatype::OPF),
        );
        Self {
            root: root.into(),
            version: version.into(),
            opf_href: opf_href.to_owned(),
            ncx_href: None,
            nav_href: None,
            spine: Vec::new(),
            resources,
            modified: false,
            watcher_suspended: false,
        }
    }

    /// Returns the book root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the archive version string (e.g. `"3.0"`).
    #[must_use]
    pub fn epub_version(&self) -> &str {
        &self.version
    }

    /// Returns `true` when the archive version is in the version-3 family.
    #[must_use]
    pub fn is_version3(&self) -> bool {
        self.version.starts_with('3')
    }

    /// Returns the manifest document's href.
    #[must_use]
    pub fn opf_href(&self) -> &str {
        &self.opf_href
    }

    /// Returns the navigation-control document's href, when one exists.
    #[must_use]
    pub fn ncx_href(&self) -> Option<&str> {
        self.ncx_href.as_deref()
    }

    /// Records which tracked resource is the navigation-control document.
    pub fn set_ncx(&mut self, href: Option<String>) {
        self.ncx_href = href;
    }

    /// Returns the designated navigation document's href, when one exists.
    #[must_use]
    pub fn nav_href(&self) -> Option<&str> {
        self.nav_href.as_deref()
    }

    /// Designates a tracked content document as the navigation document.
    pub fn set_nav(&mut self, href: Option<String>) {
        self.nav_href = href;
    }

    /// Returns the spine (linear reading order) as tracked hrefs.
    #[must_use]
    pub fn spine(&self) -> &[String] {
        &self.spine
    }

    /// Replaces the spine order.
    pub fn set_spine(&mut self, spine: Vec<String>) {
        self.spine = spine;
    }

    /// Removes a structural reference from the spine, if present.
    pub fn remove_from_spine(&mut self, href: &str) {
        self.spine.retain(|h| h != href);
    }

    /// Returns the absolute path of a book-relative href.
    #[must_use]
    pub fn full_path(&self, href: &str) -> PathBuf {
        self.root.join(href)
    }

    /// Returns `true` when the href is tracked.
    #[must_use]
    pub fn contains(&self, href: &str) -> bool {
        self.resources.contains_key(href)
    }

    /// Looks up a tracked resource.
    #[must_use]
    pub fn resource(&self, href: &str) -> Option<&Resource> {
        self.resources.get(href)
    }

    /// Looks up a tracked resource mutably.
    pub fn resource_mut(&mut self, href: &str) -> Option<&mut Resource> {
        self.resources.get_mut(href)
    }

    /// Iterates all tracked resources in href order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Returns the hrefs of all resources of the given kind, in href order.
    #[must_use]
    pub fn hrefs_by_kind(&self, kind: ResourceKind) -> Vec<String> {
        self.resources
            .values()
            .filter(|r| r.kind() == kind)
            .map(|r| r.href().to_owned())
            .collect()
    }

    /// Returns the number of tracked primary content documents.
    #[must_use]
    pub fn content_document_count(&self) -> usize {
        self.resources
            .values()
            .filter(|r| r.kind() == ResourceKind::Html)
            .count()
    }

    /// Returns per-font (relative path, obfuscation algorithm) pairs for
    /// every tracked font that declares an algorithm.
    #[must_use]
    pub fn font_obfuscation_pairs(&self) -> Vec<(String, String)> {
        self.resources
            .values()
            .filter(|r| r.kind() == ResourceKind::Font)
            .filter_map(|r| {
                r.obfuscation_algorithm()
                    .map(|a| (r.href().to_owned(), a.to_owned()))
            })
            .collect()
    }

    /// Registers an already-materialised resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] when the href is already tracked.
    pub fn insert(&mut self, resource: Resource) -> Result<(), StoreError> {
        let href = resource.href().to_owned();
        if self.resources.contains_key(&href) {
            return Err(StoreError::Duplicate { href });
        }
        self.resources.insert(href, resource);
        Ok(())
    }

    /// Copies a file into the book root and tracks it as a new resource.
    ///
    /// Editable kinds have their text cache loaded from the copied file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] for an already-tracked href and
    /// [`StoreError::Io`] when the copy fails.
    pub fn add_content_file(
        &mut self,
        source: &Path,
        href: &str,
        id: &str,
        media_type: &str,
    ) -> Result<&Resource, StoreError> {
        if self.resources.contains_key(href) {
            return Err(StoreError::Duplicate {
                href: href.to_owned(),
            });
        }
        let dest = self.full_path(href);
        copy_into(source, &dest)?;
        let mut resource = Resource::new(href, id, media_type);
        resource
            .reload_from(&dest)
            .map_err(|err| StoreError::io(&dest, err))?;
        self.resources.insert(href.to_owned(), resource);
        self.modified = true;
        debug!(target: STORE_TARGET, href, media_type, "added resource");
        self.resources
            .get(href)
            .ok_or_else(|| StoreError::Missing {
                href: href.to_owned(),
            })
    }

    /// Stops tracking a resource and removes its backing file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when the href is not tracked. A
    /// backing file that is already gone is not an error.
    pub fn remove_resource(&mut self, href: &str) -> Result<Resource, StoreError> {
        let resource = self
            .resources
            .remove(href)
            .ok_or_else(|| StoreError::Missing {
                href: href.to_owned(),
            })?;
        self.remove_from_spine(href);
        if self.ncx_href.as_deref() == Some(href) {
            self.ncx_href = None;
        }
        if self.nav_href.as_deref() == Some(href) {
            self.nav_href = None;
        }
        let path = self.full_path(href);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(target: STORE_TARGET, href, %err, "could not remove backing file");
            }
        }
        self.modified = true;
        debug!(target: STORE_TARGET, href, "removed resource");
        Ok(resource)
    }

    /// Deletes an untracked file, constrained to lie inside the book root.
    ///
    /// Parent-directory segments are stripped from the href before it is
    /// resolved, so a hostile path cannot escape the book. Returns `true`
    /// when a file was actually removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the removal itself fails.
    pub fn remove_raw_file(&mut self, href: &str) -> Result<bool, StoreError> {
        let relative = sanitize_relative(href);
        if relative.is_empty() {
            return Ok(false);
        }
        let path = self.root.join(&relative);
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|err| StoreError::io(&path, err))?;
        self.modified = true;
        debug!(target: STORE_TARGET, href = relative.as_str(), "removed untracked file");
        Ok(true)
    }

    /// Suspends the filesystem change watcher.
    pub fn suspend_watching(&mut self) {
        self.watcher_suspended = true;
        debug!(target: STORE_TARGET, "watcher suspended");
    }

    /// Resumes the filesystem change watcher.
    pub fn resume_watching(&mut self) {
        self.watcher_suspended = false;
        debug!(target: STORE_TARGET, "watcher resumed");
    }

    /// Returns `true` while the change watcher is suspended.
    #[must_use]
    pub const fn watching_suspended(&self) -> bool {
        self.watcher_suspended
    }

    /// Flushes every cached text payload to its backing file.
    ///
    /// Callers are expected to bracket this with
    /// [`BookStore::suspend_watching`] / [`BookStore::resume_watching`] so
    /// the flush is not misread as an external edit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on the first write that fails.
    pub fn save_all_to_disk(&self) -> Result<(), StoreError> {
        for resource in self.resources.values() {
            if let Some(text) = resource.text() {
                let path = self.full_path(resource.href());
                write_text(&path, text)?;
            }
        }
        Ok(())
    }

    /// Returns whether the book has unsaved modifications.
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.modified
    }

    /// Sets the modification flag.
    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }
}

/// Strips parent-directory segments and leading separators from an href.
#[must_use]
pub fn sanitize_relative(href: &str) -> String {
    let mut path = format!("/{href}");
    while path.contains("/../") {
        path = path.replace("/../", "/");
    }
    path.trim_start_matches('/').to_owned()
}

fn copy_into(source: &Path, dest: &Path) -> Result<(), StoreError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
    }
    fs::copy(source, dest).map_err(|err| StoreError::io(dest, err))?;
    Ok(())
}

/// Writes a text file, creating parent directories as needed.
pub(crate) fn write_text(path: &Path, text: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
    }
    fs::write(path, text).map_err(|err| StoreError::io(path, err))
}
