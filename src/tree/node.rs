//! Node model deserialized from "list children" payloads.

use serde::{Deserialize, Serialize};

use crate::download::{clean_filename, extension_of, strip_extension};

/// Content type the workspace reports for its own online documents.
const ONLINE_DOC_CONTENT_TYPE: &str = "alidoc";

/// Suffix the workspace gives to link entries.
const LINK_SUFFIX: &str = "dlink";

/// Type discriminator of a tree entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DentryType {
    /// A container whose children are listed when it is expanded.
    Folder,
    /// A stored file.
    File,
    /// A shortcut to a file elsewhere.
    Link,
    /// Anything the workspace may add later.
    #[default]
    #[serde(other)]
    Unknown,
}

/// One ancestor of a node, root first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ancestor {
    /// Display name of the ancestor folder.
    #[serde(default)]
    pub name: String,
}

/// Target metadata of a link entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSourceInfo {
    /// Real extension of the linked file.
    #[serde(default)]
    pub extension: Option<String>,
}

/// One entry of the remote tree.
///
/// Immutable once deserialized; identity is [`dentry_uuid`](Self::dentry_uuid).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Display name, usually with an extension for files.
    #[serde(default)]
    pub name: String,
    /// Unique tree-node identifier.
    pub dentry_uuid: String,
    /// Folder, file or link.
    #[serde(default)]
    pub dentry_type: DentryType,
    /// Content type, `alidoc` for online documents.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Ancestors from the library root down to the parent.
    #[serde(default)]
    pub ancestor_list: Vec<Ancestor>,
    /// Present on link entries.
    #[serde(default)]
    pub link_source_info: Option<LinkSourceInfo>,
    /// Extension reported by the workspace, if any.
    #[serde(default)]
    pub extension: Option<String>,
}

impl Node {
    /// Returns `true` if the node must be exported rather than expanded.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.content_type.as_deref() == Some(ONLINE_DOC_CONTENT_TYPE)
            || matches!(self.dentry_type, DentryType::File | DentryType::Link)
    }

    /// Name of the direct parent, or `None` for a root-level node.
    #[must_use]
    pub fn parent_name(&self) -> Option<&str> {
        self.ancestor_list.last().map(|a| a.name.as_str())
    }

    /// Ancestor names, root first.
    pub fn ancestor_names(&self) -> impl Iterator<Item = &str> {
        self.ancestor_list.iter().map(|a| a.name.as_str())
    }

    /// Sanitized ancestor names joined with `/`, as recorded in ledgers.
    #[must_use]
    pub fn display_path(&self) -> String {
        self.ancestor_names()
            .map(clean_filename)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Sanitized name without its extension; the export's base name.
    #[must_use]
    pub fn base_name(&self) -> String {
        clean_filename(strip_extension(&self.name))
    }

    /// Extension as written in the name (text after the last dot).
    ///
    /// Falls back to the reported extension, then to the whole name, so a
    /// category can always be derived.
    #[must_use]
    pub fn name_extension(&self) -> String {
        extension_of(&self.name)
            .map(str::to_string)
            .or_else(|| self.extension.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    /// Extension used to pick the export strategy, lowercased.
    ///
    /// Link entries resolve to the extension of the file they point at.
    #[must_use]
    pub fn resolved_extension(&self) -> String {
        let own = self.name_extension();
        let is_link = own.eq_ignore_ascii_case(LINK_SUFFIX) || self.dentry_type == DentryType::Link;
        let resolved = if is_link {
            self.link_source_info
                .as_ref()
                .and_then(|info| info.extension.clone())
                .unwrap_or(own)
        } else {
            own
        };
        resolved.to_lowercase()
    }
}
