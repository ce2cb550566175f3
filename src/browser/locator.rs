//! Element locators understood by every browser backend.

use std::fmt;

/// How to find an element on the page.
///
/// Text matching is substring-based on the element's visible text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Attribute equals value: `[name="value"]`.
    Attr {
        /// Attribute name.
        name: String,
        /// Exact value.
        value: String,
    },
    /// Attribute contains value: `[name*="value"]`.
    AttrContains {
        /// Attribute name.
        name: String,
        /// Substring of the value.
        value: String,
    },
    /// Any element whose own text contains the string.
    Text(String),
    /// An element with the given tag whose text contains the string.
    TagText {
        /// Tag name, lowercase.
        tag: String,
        /// Substring of the text.
        text: String,
    },
    /// Raw CSS selector.
    Css(String),
}

impl Locator {
    /// `[name="value"]`
    pub fn attr(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Attr {
            name: name.into(),
            value: value.into(),
        }
    }

    /// `[name*="value"]`
    pub fn attr_contains(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::AttrContains {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Element whose text contains `text`.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// `tag` element whose text contains `text`.
    pub fn tag_text(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self::TagText {
            tag: tag.into(),
            text: text.into(),
        }
    }

    /// Raw CSS selector.
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// `[data-testid="value"]`
    pub fn test_id(value: impl Into<String>) -> Self {
        Self::attr("data-testid", value)
    }

    /// `[data-item-key="value"]`
    pub fn item_key(value: impl Into<String>) -> Self {
        Self::attr("data-item-key", value)
    }

    /// CSS equivalent, for locators that have one.
    #[must_use]
    pub fn as_css(&self) -> Option<String> {
        match self {
            Self::Attr { name, value } => Some(format!("[{name}=\"{}\"]", escape(value))),
            Self::AttrContains { name, value } => {
                Some(format!("[{name}*=\"{}\"]", escape(value)))
            }
            Self::Css(selector) => Some(selector.clone()),
            Self::Text(_) | Self::TagText { .. } => None,
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "text:{text}"),
            Self::TagText { tag, text } => write!(f, "{tag}:text:{text}"),
            other => match other.as_css() {
                Some(css) => f.write_str(&css),
                None => Ok(()),
            },
        }
    }
}
