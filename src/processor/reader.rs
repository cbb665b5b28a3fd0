//! Terminal file reader.

use crate::uri::file_digest_uri;

use super::{Processor, ProcessorInput, ProcessorOutput};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// Reads the source file and records its digest as a dependency.
///
/// Charset types are normalized to UTF-8: a UTF-8 BOM is dropped and
/// UTF-16 input (detected by BOM) is re-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileReader;

impl Processor for FileReader {
    fn name(&self) -> &str {
        "file-reader"
    }

    fn cache_key(&self) -> String {
        "file-reader:1".into()
    }

    fn call(&self, input: &ProcessorInput<'_>) -> anyhow::Result<ProcessorOutput> {
        let bytes = input.env.read_file(input.filename)?;
        let mut output = ProcessorOutput::unchanged().with_dependency(file_digest_uri(input.filename));

        if input.env.config().mime().is_charset(input.content_type) {
            output.data = Some(decode_text(bytes));
            output.charset = Some("utf-8".into());
        } else {
            output.data = Some(bytes);
        }
        Ok(output)
    }
}

/// Normalize text bytes to UTF-8 without a BOM.
pub(crate) fn decode_text(bytes: Vec<u8>) -> Vec<u8> {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return rest.to_vec();
    }
    if let Some(rest) = bytes.strip_prefix(UTF16_LE_BOM) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(UTF16_BE_BOM) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    bytes
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Vec<u8> {
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect::<String>()
        .into_bytes()
}
