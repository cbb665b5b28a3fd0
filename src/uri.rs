//! Asset and dependency URIs.
//!
//! Assets are identified by a `file://` URI carrying the resolution
//! parameters as query pairs:
//!
//! ```text
//! file:///srv/app/assets/app.coffee?type=application%2Fjavascript&pipeline=self&id=9f2c...
//! ```
//!
//! Dependencies recorded in asset metadata are opaque strings in one of
//! these schemes:
//!
//! | URI                                   | Resolves to                       |
//! |---------------------------------------|-----------------------------------|
//! | `file-digest:///abs/path`             | content or listing digest of path |
//! | `environment-version`                 | digest of the configured version  |
//! | `environment-paths`                   | digest of the load path list      |
//! | `processors:type=..&file_type=..`     | digest of the processor chain     |

use std::fmt;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use url::Url;
use url::form_urlencoded;

use crate::error::{Error, Result};

pub const ENVIRONMENT_VERSION: &str = "environment-version";
pub const ENVIRONMENT_PATHS: &str = "environment-paths";

// =============================================================================
// Asset URI
// =============================================================================

/// Identifier of a (possibly not yet loaded) asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssetUri {
    /// Absolute source file path
    pub path: PathBuf,
    /// Requested content type
    pub content_type: Option<String>,
    /// Pipeline name (`self`, `source`, `debug`; `None` = default)
    pub pipeline: Option<String>,
    /// Directory path this `index.*` file stands in for
    pub index_alias: Option<PathBuf>,
    /// Content id, present once the asset has been loaded
    pub id: Option<String>,
}

impl AssetUri {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_pipeline(mut self, pipeline: Option<impl Into<String>>) -> Self {
        self.pipeline = pipeline.map(Into::into);
        self
    }

    pub fn with_index_alias(mut self, alias: Option<PathBuf>) -> Self {
        self.index_alias = alias;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Same URI without the content id.
    pub fn without_id(&self) -> Self {
        Self {
            id: None,
            ..self.clone()
        }
    }

    /// Pipeline name, `default` when unset.
    pub fn pipeline_name(&self) -> &str {
        self.pipeline.as_deref().unwrap_or("default")
    }

    /// Parse a `file://` asset URI.
    pub fn parse(s: &str) -> Result<Self> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUri(format!("{s}: {e}")))?;
        if url.scheme() != "file" {
            return Err(Error::InvalidUri(format!("{s}: expected file scheme")));
        }
        let path = decode_path(url.path())?;

        let mut uri = Self::new(path);
        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "type" => uri.content_type = Some(value),
                "pipeline" => uri.pipeline = Some(value),
                "index_alias" => uri.index_alias = Some(PathBuf::from(value)),
                "id" => uri.id = Some(value),
                other => {
                    return Err(Error::InvalidUri(format!("{s}: unknown parameter '{other}'")));
                }
            }
        }
        Ok(uri)
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(ty) = &self.content_type {
            pairs.push(("type", ty.clone()));
        }
        if let Some(pipeline) = &self.pipeline {
            pairs.push(("pipeline", pipeline.clone()));
        }
        if let Some(alias) = &self.index_alias {
            pairs.push(("index_alias", alias.to_string_lossy().into_owned()));
        }
        if let Some(id) = &self.id {
            pairs.push(("id", id.clone()));
        }
        pairs
    }
}

impl fmt::Display for AssetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", file_url("file", &self.path))?;
        let pairs = self.query_pairs();
        if !pairs.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AssetUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl serde::Serialize for AssetUri {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for AssetUri {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Dependency URIs
// =============================================================================

/// A parsed dependency URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyUri {
    FileDigest(PathBuf),
    EnvironmentVersion,
    EnvironmentPaths,
    Processors {
        content_type: String,
        file_type: String,
        pipeline: String,
    },
}

impl DependencyUri {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            ENVIRONMENT_VERSION => return Ok(Self::EnvironmentVersion),
            ENVIRONMENT_PATHS => return Ok(Self::EnvironmentPaths),
            _ => {}
        }

        if let Some(rest) = s.strip_prefix("file-digest://") {
            let path = rest.split('?').next().unwrap_or_default();
            return Ok(Self::FileDigest(decode_path(path)?));
        }

        if let Some(query) = s.strip_prefix("processors:") {
            let mut content_type = None;
            let mut file_type = None;
            let mut pipeline = None;
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                match key.as_ref() {
                    "type" => content_type = Some(value.into_owned()),
                    "file_type" => file_type = Some(value.into_owned()),
                    "pipeline" => pipeline = Some(value.into_owned()),
                    _ => {}
                }
            }
            return match (content_type, file_type) {
                (Some(content_type), Some(file_type)) => Ok(Self::Processors {
                    content_type,
                    file_type,
                    pipeline: pipeline.unwrap_or_else(|| "default".into()),
                }),
                _ => Err(Error::InvalidUri(s.to_string())),
            };
        }

        Err(Error::InvalidUri(format!("{s}: unknown dependency scheme")))
    }
}

impl fmt::Display for DependencyUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileDigest(path) => write!(f, "{}", file_url("file-digest", path)),
            Self::EnvironmentVersion => f.write_str(ENVIRONMENT_VERSION),
            Self::EnvironmentPaths => f.write_str(ENVIRONMENT_PATHS),
            Self::Processors {
                content_type,
                file_type,
                pipeline,
            } => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("type", content_type)
                    .append_pair("file_type", file_type)
                    .append_pair("pipeline", pipeline)
                    .finish();
                write!(f, "processors:{query}")
            }
        }
    }
}

/// Build a `file-digest://` dependency string for a path.
pub fn file_digest_uri(path: &Path) -> String {
    DependencyUri::FileDigest(path.to_path_buf()).to_string()
}

/// Build a `processors:` dependency string.
pub fn processors_uri(content_type: &str, file_type: &str, pipeline: &str) -> String {
    DependencyUri::Processors {
        content_type: content_type.to_string(),
        file_type: file_type.to_string(),
        pipeline: pipeline.to_string(),
    }
    .to_string()
}

// =============================================================================
// Helpers
// =============================================================================

/// `scheme://` + percent-encoded absolute path.
fn file_url(scheme: &str, path: &Path) -> String {
    let mut url = match Url::parse("file:///") {
        Ok(url) => url,
        Err(_) => return format!("{scheme}://{}", path.display()),
    };
    url.set_path(&path.to_string_lossy());
    format!("{scheme}://{}", url.path())
}

fn decode_path(path: &str) -> Result<PathBuf> {
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|e| Error::InvalidUri(format!("{path}: {e}")))?;
    Ok(PathBuf::from(decoded.into_owned()))
}
