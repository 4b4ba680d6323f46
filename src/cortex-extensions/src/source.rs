//! Extension source descriptors and their classification.

use serde::{Deserialize, Serialize};

/// Where an extension's code comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExtensionSource {
    /// A module specifier (local path, blob URL, or remote URL).
    Module { specifier: String },
    /// Code supplied inline by the installing user.
    Inline { code: String },
}

impl ExtensionSource {
    /// Create a module source.
    pub fn module(specifier: impl Into<String>) -> Self {
        Self::Module {
            specifier: specifier.into(),
        }
    }

    /// Create an inline source.
    pub fn inline(code: impl Into<String>) -> Self {
        Self::Inline { code: code.into() }
    }

    /// Classify this source for the loader.
    pub fn kind(&self) -> SourceKind {
        classify_source(self)
    }

    /// Short label for logs and status views.
    pub fn describe(&self) -> String {
        match self {
            Self::Module { specifier } => specifier.clone(),
            Self::Inline { code } => format!("inline ({} bytes)", code.len()),
        }
    }

    pub(crate) fn validate(&self) -> crate::Result<()> {
        let empty = match self {
            Self::Module { specifier } => specifier.trim().is_empty(),
            Self::Inline { code } => code.trim().is_empty(),
        };
        if empty {
            return Err(crate::ExtensionError::validation(
                "Extension source cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Loader-facing classification of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    LocalModule,
    Inline,
    RemoteUrl,
    BlobUrl,
    Unsupported,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalModule => write!(f, "local-module"),
            Self::Inline => write!(f, "inline"),
            Self::RemoteUrl => write!(f, "remote-url"),
            Self::BlobUrl => write!(f, "blob-url"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Classify a source descriptor.
pub fn classify_source(source: &ExtensionSource) -> SourceKind {
    match source {
        ExtensionSource::Inline { .. } => SourceKind::Inline,
        ExtensionSource::Module { specifier } => classify_specifier(specifier),
    }
}

/// Classify a module specifier.
pub fn classify_specifier(specifier: &str) -> SourceKind {
    let specifier = specifier.trim();
    if specifier.is_empty() {
        return SourceKind::Unsupported;
    }

    let lower = specifier.to_ascii_lowercase();
    if lower.starts_with("blob:") {
        return SourceKind::BlobUrl;
    }
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return SourceKind::RemoteUrl;
    }
    if specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/') {
        return SourceKind::LocalModule;
    }
    if has_scheme(specifier) {
        return SourceKind::Unsupported;
    }

    SourceKind::LocalModule
}

fn has_scheme(specifier: &str) -> bool {
    let Some((scheme, _)) = specifier.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_specifiers() {
        assert_eq!(classify_specifier("blob:null/1234"), SourceKind::BlobUrl);
        assert_eq!(
            classify_specifier("https://cdn.example.com/ext.js"),
            SourceKind::RemoteUrl
        );
        assert_eq!(
            classify_specifier("HTTP://example.com/ext.js"),
            SourceKind::RemoteUrl
        );
        assert_eq!(
            classify_specifier("./extensions/hello.js"),
            SourceKind::LocalModule
        );
        assert_eq!(classify_specifier("snake"), SourceKind::LocalModule);
        assert_eq!(classify_specifier("file:///etc/passwd"), SourceKind::Unsupported);
        assert_eq!(classify_specifier("data:text/javascript,1"), SourceKind::Unsupported);
        assert_eq!(classify_specifier("   "), SourceKind::Unsupported);
    }

    #[test]
    fn test_inline_source_kind() {
        assert_eq!(
            ExtensionSource::inline("export function activate() {}").kind(),
            SourceKind::Inline
        );
    }

    #[test]
    fn test_source_serialization_shape() {
        let json = serde_json::to_value(ExtensionSource::module("./a.js")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "module", "specifier": "./a.js"}));

        let json = serde_json::to_value(ExtensionSource::inline("code")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "inline", "code": "code"}));
    }

    #[test]
    fn test_empty_source_rejected() {
        assert!(ExtensionSource::inline("  ").validate().is_err());
        assert!(ExtensionSource::module("./a.js").validate().is_ok());
    }
}
