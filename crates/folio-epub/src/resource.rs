//! Typed resource records tracked by the book store.
//!
//! [`ResourceKind`] is the closed set of resource categories the applier
//! dispatches over. Each kind answers one question the change applier cares
//! about: whether the resource carries editable text that must be reloaded
//! from disk after an external modification. Binary kinds (fonts, images,
//! audio, video, PDF) are served straight from disk and carry no cache.

use std::fs;
use std::io;
use std::path::Path;

/// Category of a tracked book resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A primary XHTML content document.
    Html,
    /// A stylesheet.
    Css,
    /// An SVG image document.
    Svg,
    /// The manifest (OPF package) document.
    Opf,
    /// The legacy navigation-control (NCX) document.
    Ncx,
    /// An embedded font.
    Font,
    /// A raster image.
    Image,
    /// An audio stream.
    Audio,
    /// A video stream.
    Video,
    /// A PDF document.
    Pdf,
    /// Plain text that is not markup.
    MiscText,
    /// Any other XML document (page maps, SMIL overlays, ...).
    Xml,
    /// Anything else, served as opaque bytes.
    Raw,
}

impl ResourceKind {
    /// Classifies a media type into a resource kind.
    #[must_use]
    pub fn from_media_type(media_type: &str) -> Self {
        match media_type {
            crate::mediatype::XHTML | "text/html" => Self::Html,
            "text/css" => Self::Css,
            "image/svg+xml" => Self::Svg,
            crate::mediatype::OPF => Self::Opf,
            crate::mediatype::NCX => Self::Ncx,
            "application/pdf" => Self::Pdf,
            "application/vnd.ms-opentype" | "application/x-font-ttf" => Self::Font,
            mt if mt.starts_with("font/") => Self::Font,
            mt if mt.starts_with("image/") => Self::Image,
            mt if mt.starts_with("audio/") => Self::Audio,
            mt if mt.starts_with("video/") => Self::Video,
            mt if mt.ends_with("+xml") => Self::Xml,
            mt if mt.starts_with("text/") => Self::MiscText,
            _ => Self::Raw,
        }
    }

    /// Returns `true` when the kind carries an editable text payload that
    /// must be reloaded from disk after an external modification.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(
            self,
            Self::Html
                | Self::Css
                | Self::Svg
                | Self::Opf
                | Self::Ncx
                | Self::MiscText
                | Self::Xml
        )
    }
}

/// A single resource tracked by the [`crate::BookStore`].
#[derive(Debug, Clone)]
pub struct Resource {
    href: String,
    id: String,
    media_type: String,
    kind: ResourceKind,
    text: Option<String>,
    obfuscation_algorithm: Option<String>,
}

impl Resource {
    /// Creates a resource record for the given book-relative href.
    #[must_use]
    pub fn new(href: impl Into<String>, id: impl Into<String>, media_type: impl Into<String>) -> Self {
        let media_type = media_type.into();
        let kind = ResourceKind::from_media_type(&media_type);
        Self {
            href: href.into(),
            id: id.into(),
            media_type,
            kind,
            text: None,
            obfuscation_algorithm: None,
        }
    }

    /// Returns the book-relative path.
    #[must_use]
    pub fn href(&self) -> &str {
        &self.href
    }

    /// Returns the manifest identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the declared media type.
    #[must_use]
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Returns the classified resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Returns the cached text for editable kinds, if loaded.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Replaces the cached text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    /// Reloads the cached text from the given on-disk file.
    ///
    /// Binary kinds ignore the call; they are always served from disk.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be read.
    pub fn reload_from(&mut self, path: &Path) -> io::Result<()> {
        if self.kind.is_text() {
            self.text = Some(fs::read_to_string(path)?);
        }
        Ok(())
    }

    /// Returns the font obfuscation algorithm identifier, if set.
    #[must_use]
    pub fn obfuscation_algorithm(&self) -> Option<&str> {
        self.obfuscation_algorithm.as_deref()
    }

    /// Records the font obfuscation algorithm for this resource.
    pub fn set_obfuscation_algorithm(&mut self, algorithm: impl Into<String>) {
        self.obfuscation_algorithm = Some(algorithm.into());
    }
}
