//! Base64 VLQ codec for the `mappings` field.
//!
//! Layout: lines separated by `;`, segments by `,`. Each segment holds
//! 1, 4 or 5 VLQ fields: generated column, source index, original line,
//! original column, name index. The generated column resets on every
//! line; the other four fields are deltas carried across the whole string.

use thiserror::Error;

use super::{Mapping, Position};

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const SHIFT: u32 = 5;
const CONTINUATION: i64 = 1 << SHIFT;
const MASK: i64 = CONTINUATION - 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VlqError {
    #[error("invalid base64 character '{0}' in mappings")]
    InvalidChar(char),
    #[error("unterminated VLQ value in mappings")]
    Unterminated,
    #[error("segment with {0} fields (expected 1, 4 or 5)")]
    SegmentLength(usize),
    #[error("mapping field out of range")]
    OutOfRange,
}

fn base64_value(c: u8) -> Option<i64> {
    BASE64.iter().position(|&b| b == c).map(|i| i as i64)
}

/// Append one signed value.
pub fn encode_value(value: i64, out: &mut String) {
    let mut vlq = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = vlq & MASK;
        vlq >>= SHIFT;
        if vlq > 0 {
            digit |= CONTINUATION;
        }
        out.push(BASE64[digit as usize] as char);
        if vlq == 0 {
            break;
        }
    }
}

/// Decode every value of one segment.
pub fn decode_segment(segment: &str) -> Result<Vec<i64>, VlqError> {
    let mut values = Vec::with_capacity(5);
    let mut value = 0i64;
    let mut shift = 0u32;
    let mut pending = false;

    for c in segment.bytes() {
        let digit = base64_value(c).ok_or(VlqError::InvalidChar(c as char))?;
        value += (digit & MASK) << shift;
        if digit & CONTINUATION != 0 {
            shift += SHIFT;
            pending = true;
            if shift > 60 {
                return Err(VlqError::OutOfRange);
            }
        } else {
            let negative = value & 1 == 1;
            let magnitude = value >> 1;
            values.push(if negative { -magnitude } else { magnitude });
            value = 0;
            shift = 0;
            pending = false;
        }
    }

    if pending {
        return Err(VlqError::Unterminated);
    }
    Ok(values)
}

fn to_u32(value: i64) -> Result<u32, VlqError> {
    u32::try_from(value).map_err(|_| VlqError::OutOfRange)
}

/// Decode a `mappings` string into absolute mappings.
///
/// Lines are 1-based, columns 0-based. Segments with only a generated
/// column carry no source position and are skipped.
pub fn decode_mappings(mappings: &str) -> Result<Vec<Mapping>, VlqError> {
    let mut result = Vec::new();
    let mut source = 0i64;
    let mut original_line = 1i64;
    let mut original_column = 0i64;
    let mut name = 0i64;

    for (index, line) in mappings.split(';').enumerate() {
        let generated_line = to_u32(index as i64 + 1)?;
        let mut generated_column = 0i64;

        for segment in line.split(',').filter(|s| !s.is_empty()) {
            let fields = decode_segment(segment)?;
            match fields.len() {
                1 => {
                    generated_column += fields[0];
                }
                4 | 5 => {
                    generated_column += fields[0];
                    source += fields[1];
                    original_line += fields[2];
                    original_column += fields[3];
                    let name_index = if fields.len() == 5 {
                        name += fields[4];
                        Some(to_u32(name)?)
                    } else {
                        None
                    };
                    result.push(Mapping {
                        generated: Position::new(generated_line, to_u32(generated_column)?),
                        original: Position::new(to_u32(original_line)?, to_u32(original_column)?),
                        source: to_u32(source)?,
                        name: name_index,
                    });
                }
                n => return Err(VlqError::SegmentLength(n)),
            }
        }
    }

    Ok(result)
}

/// Encode mappings into a `mappings` string.
///
/// Mappings are grouped by generated line; empty lines up to the last
/// mapped line are emitted as bare separators.
pub fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut sorted;
    let mappings = if mappings.is_sorted_by_key(|m| m.generated.line) {
        mappings
    } else {
        // Stable, so segments keep their order within a line
        sorted = mappings.to_vec();
        sorted.sort_by_key(|m| m.generated.line);
        sorted.as_slice()
    };

    let mut out = String::new();
    let mut line = 1;
    let mut generated_column = 0i64;
    let mut source = 0i64;
    let mut original_line = 1i64;
    let mut original_column = 0i64;
    let mut name = 0i64;
    let mut first = true;

    for mapping in mappings {
        while line < mapping.generated.line {
            out.push(';');
            line += 1;
            generated_column = 0;
            first = true;
        }
        if !first {
            out.push(',');
        }
        first = false;

        encode_value(i64::from(mapping.generated.column) - generated_column, &mut out);
        encode_value(i64::from(mapping.source) - source, &mut out);
        encode_value(i64::from(mapping.original.line) - original_line, &mut out);
        encode_value(i64::from(mapping.original.column) - original_column, &mut out);
        if let Some(n) = mapping.name {
            encode_value(i64::from(n) - name, &mut out);
            name = i64::from(n);
        }

        generated_column = i64::from(mapping.generated.column);
        source = i64::from(mapping.source);
        original_line = i64::from(mapping.original.line);
        original_column = i64::from(mapping.original.column);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(gl: u32, gc: u32, ol: u32, oc: u32, source: u32, name: Option<u32>) -> Mapping {
        Mapping {
            generated: Position::new(gl, gc),
            original: Position::new(ol, oc),
            source,
            name,
        }
    }

    #[test]
    fn test_encode_known_values() {
        let cases = [(0, "A"), (1, "C"), (-1, "D"), (15, "e"), (16, "gB"), (-16, "hB"), (1000, "w+B")];
        for (value, expected) in cases {
            let mut out = String::new();
            encode_value(value, &mut out);
            assert_eq!(out, expected, "value {value}");
            assert_eq!(decode_segment(expected).unwrap(), vec![value]);
        }
    }

    #[test]
    fn test_decode_simple_mappings() {
        // Line 1: col 0 → source 0, line 1, col 0; line 2: col 0 → line 2, col 0
        let decoded = decode_mappings("AAAA;AACA").unwrap();
        assert_eq!(
            decoded,
            vec![mapping(1, 0, 1, 0, 0, None), mapping(2, 0, 2, 0, 0, None)]
        );
    }

    #[test]
    fn test_fields_are_delta_encoded_across_lines() {
        let mappings = vec![
            mapping(1, 4, 3, 2, 0, Some(0)),
            mapping(1, 10, 3, 8, 1, None),
            mapping(3, 2, 7, 0, 1, Some(2)),
        ];
        let encoded = encode_mappings(&mappings);
        assert_eq!(encoded.matches(';').count(), 2);
        assert_eq!(decode_mappings(&encoded).unwrap(), mappings);
    }

    #[test]
    fn test_canonical_string_roundtrip() {
        for s in ["AAAA", "AAAA,EAAE;;AACA", "AAAAA,IAAIC;AACAC", ""] {
            let decoded = decode_mappings(s).unwrap();
            assert_eq!(encode_mappings(&decoded), s);
        }
    }

    #[test]
    fn test_unsorted_lines_are_grouped() {
        let mappings = vec![
            mapping(2, 0, 2, 0, 0, None),
            mapping(1, 0, 1, 0, 0, None),
            mapping(2, 6, 2, 6, 0, None),
        ];
        let decoded = decode_mappings(&encode_mappings(&mappings)).unwrap();
        assert_eq!(
            decoded,
            vec![mappings[1], mappings[0], mappings[2]]
        );
    }

    #[test]
    fn test_long_identity_map() {
        let mappings: Vec<_> = (1..=50_000).map(|l| mapping(l, 0, l, 0, 0, None)).collect();
        let encoded = encode_mappings(&mappings);
        assert_eq!(encoded.matches(';').count(), 49_999);
        assert!(encoded.starts_with("AAAA;AACA;AACA"));
    }

    #[test]
    fn test_generated_only_segments_are_skipped() {
        let decoded = decode_mappings("A,CAAA").unwrap();
        assert_eq!(decoded, vec![mapping(1, 1, 1, 0, 0, None)]);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode_mappings("A!"), Err(VlqError::InvalidChar('!')));
        assert_eq!(decode_mappings("g"), Err(VlqError::Unterminated));
        assert_eq!(decode_mappings("AA"), Err(VlqError::SegmentLength(2)));
        // Original line goes negative
        assert_eq!(decode_mappings("AAFA"), Err(VlqError::OutOfRange));
    }
}
