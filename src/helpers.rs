//! Named helper functions for compilers.
//!
//! Stylesheet and template compilers call back into the pipeline by name,
//! e.g. `asset-url("logo.png")`. Helpers are plain entries in a table on
//! [`Config`](crate::Config), looked up when called. Anything a helper
//! touches is recorded on the caller's [`ProcessorOutput`] so the calling
//! asset stays fresh in the cache.
//!
//! ```ignore
//! let mut output = ProcessorOutput::default();
//! let url = call_helper(input, "asset-url", &["logo.png"], &mut output)?;
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use percent_encoding::{AsciiSet, CONTROLS, percent_encode};

use crate::asset::Asset;
use crate::processor::{ProcessorInput, ProcessorOutput};
use crate::resolve::ResolveOptions;

/// A helper: caller input, string arguments, and the caller's output to
/// record dependencies and links on.
pub type HelperFn = Arc<
    dyn Fn(&ProcessorInput<'_>, &[&str], &mut ProcessorOutput) -> Result<String> + Send + Sync,
>;

/// Bytes escaped in `data:` URLs.
const DATA_URL: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>');

/// Look up `name` in the caller's config and run it.
pub fn call_helper(
    input: &ProcessorInput<'_>,
    name: &str,
    args: &[&str],
    output: &mut ProcessorOutput,
) -> Result<String> {
    let helper = input.env.config().helper(name)?;
    helper(input, args, output)
}

/// Built-in helpers registered on every default config.
pub(crate) fn builtins() -> [(&'static str, HelperFn); 3] {
    [
        ("asset-path", Arc::new(asset_path) as HelperFn),
        ("asset-url", Arc::new(asset_url) as HelperFn),
        ("asset-data-url", Arc::new(asset_data_url) as HelperFn),
    ]
}

/// Fingerprinted path of an asset. The asset is linked.
fn asset_path(input: &ProcessorInput<'_>, args: &[&str], output: &mut ProcessorOutput) -> Result<String> {
    let asset = load_arg(input, args, output)?;
    output.links.insert(asset.uri.without_id());
    Ok(asset.digest_path())
}

/// `url(...)` around [`asset_path`].
fn asset_url(input: &ProcessorInput<'_>, args: &[&str], output: &mut ProcessorOutput) -> Result<String> {
    Ok(format!("url({})", asset_path(input, args, output)?))
}

/// Inline an asset as a `data:` URL. The caller depends on the asset's
/// content rather than linking it.
fn asset_data_url(
    input: &ProcessorInput<'_>,
    args: &[&str],
    output: &mut ProcessorOutput,
) -> Result<String> {
    let asset = load_arg(input, args, output)?;
    output
        .dependencies
        .extend(asset.metadata.dependencies.iter().cloned());

    let mut url = format!("data:{}", asset.content_type);
    if let Some(charset) = asset.charset() {
        url.push_str(";charset=");
        url.push_str(charset);
    }
    url.push(',');
    url.extend(percent_encode(&asset.source, DATA_URL));
    Ok(format!("url(\"{url}\")"))
}

/// Resolve and load the single path argument relative to the caller.
fn load_arg(
    input: &ProcessorInput<'_>,
    args: &[&str],
    output: &mut ProcessorOutput,
) -> Result<Arc<Asset>> {
    let [path] = args else {
        bail!("expected one path argument, got {}", args.len());
    };
    let base = input.filename.parent().unwrap_or(Path::new(""));
    let resolution = input
        .env
        .resolve(path, ResolveOptions::default().with_base_path(base))?;
    output.dependencies.extend(resolution.dependencies);
    Ok(input.env.load(&resolution.uri)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_escapes() {
        let encoded: String = percent_encode(b"<svg fill=\"#fff\"/>", DATA_URL).collect();
        assert_eq!(encoded, "%3Csvg%20fill=%22%23fff%22/%3E");
    }

    #[test]
    fn test_builtin_names() {
        let names: Vec<_> = builtins().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["asset-path", "asset-url", "asset-data-url"]);
    }
}
