//! SAM/BAM header model and codec.
//!
//! The header is a reference dictionary plus free-form metadata lines
//! (`@HD`, `@RG`, `@PG`, `@CO`, and unknown types) kept verbatim.
//!
//! # BAM Format
//!
//! ```text
//! BAM Header:
//! - 4 bytes: Magic ("BAM\1")
//! - 4 bytes: SAM header text length (l_text, int32)
//! - l_text bytes: SAM header text
//! - 4 bytes: Number of reference sequences (n_ref, int32)
//! - For each reference:
//!   - 4 bytes: Reference name length (l_name, int32, includes null terminator)
//!   - l_name bytes: Reference name (null-terminated)
//!   - 4 bytes: Reference length (l_ref, int32)
//! ```
//!
//! When reading BAM, the binary dictionary is authoritative; extra fields
//! from matching `@SQ` text lines (`M5`, `AS`, `UR`, ...) are carried over.
//!
//! # SAM Format
//!
//! Header text is written `@HD` first, then one `@SQ` line per reference in
//! dictionary order, then every other line in its original order.

use crate::error::{BamflowError, Result};
use log::warn;
use std::collections::HashMap;
use std::io::{self, Read, Write};

/// BAM magic bytes.
pub const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// Reference sequence information.
///
/// Each reference sequence (chromosome/contig) has a name and length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Reference sequence name (e.g., "chr1", "chrM")
    pub name: String,
    /// Reference sequence length in bases
    pub length: u32,
    /// Additional `@SQ` fields other than SN and LN, in original order
    pub fields: Vec<(String, String)>,
}

impl Reference {
    /// Create a new reference.
    pub fn new(name: impl Into<String>, length: u32) -> Self {
        Self {
            name: name.into(),
            length,
            fields: Vec::new(),
        }
    }

    /// Look up an extra `@SQ` field such as `M5`.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parse an `@SQ` header line.
    fn from_sq_line(line: &str) -> Result<Self> {
        let mut name = None;
        let mut length = None;
        let mut fields = Vec::new();

        for field in line.split('\t').skip(1) {
            let (key, value) = field.split_once(':').ok_or_else(|| {
                BamflowError::header(format!("@SQ field {:?} is not KEY:VALUE", field))
            })?;
            match key {
                "SN" => name = Some(value.to_string()),
                "LN" => {
                    let len: i64 = value.parse().map_err(|_| {
                        BamflowError::header(format!("@SQ LN {:?} is not an integer", value))
                    })?;
                    let len = u32::try_from(len).map_err(|_| {
                        BamflowError::header(format!("@SQ LN {} out of range", len))
                    })?;
                    length = Some(len);
                }
                _ => fields.push((key.to_string(), value.to_string())),
            }
        }

        let name = name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| BamflowError::header(format!("@SQ line without SN: {:?}", line)))?;
        let length = length
            .ok_or_else(|| BamflowError::header(format!("@SQ line for {} without LN", name)))?;

        Ok(Self {
            name,
            length,
            fields,
        })
    }

    fn to_sq_line(&self) -> String {
        let mut line = format!("@SQ\tSN:{}\tLN:{}", self.name, self.length);
        for (key, value) in &self.fields {
            line.push('\t');
            line.push_str(key);
            line.push(':');
            line.push_str(value);
        }
        line
    }
}

/// Alignment file header.
///
/// Built once per stream and not modified during a read pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    references: Vec<Reference>,
    /// Non-`@SQ` lines, verbatim
    lines: Vec<String>,
    index: HashMap<String, usize>,
}

impl Header {
    /// Create an empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference sequences in dictionary order.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Get reference by ID.
    ///
    /// Returns `None` if the reference ID is out of bounds.
    pub fn reference(&self, id: usize) -> Option<&Reference> {
        self.references.get(id)
    }

    /// Get reference name by ID.
    pub fn reference_name(&self, id: usize) -> Option<&str> {
        self.reference(id).map(|r| r.name.as_str())
    }

    /// Get the ID of a reference by name.
    pub fn reference_id(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Get number of reference sequences.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Non-`@SQ` header lines in original order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Format version from the `@HD VN` field.
    pub fn version(&self) -> Option<&str> {
        self.lines
            .iter()
            .find(|l| l.starts_with("@HD"))?
            .split('\t')
            .skip(1)
            .find_map(|f| f.strip_prefix("VN:"))
    }

    /// Append a reference, returning its ID.
    ///
    /// # Errors
    ///
    /// Returns `MalformedHeader` if a reference with the same name exists.
    pub fn add_reference(&mut self, reference: Reference) -> Result<usize> {
        if self.index.contains_key(&reference.name) {
            return Err(BamflowError::header(format!(
                "duplicate reference name {:?}",
                reference.name
            )));
        }
        let id = self.references.len();
        self.index.insert(reference.name.clone(), id);
        self.references.push(reference);
        Ok(id)
    }

    /// Append a header line. `@SQ` lines are added to the dictionary.
    pub fn push_line(&mut self, line: impl Into<String>) -> Result<()> {
        let line = line.into();
        let line = line.trim_end_matches(['\r', '\n']);

        let bytes = line.as_bytes();
        if bytes.len() < 3 || bytes[0] != b'@' || !bytes[1..3].iter().all(u8::is_ascii_alphabetic) {
            return Err(BamflowError::header(format!(
                "header line must start with '@' and a two-letter type: {:?}",
                line
            )));
        }

        if line == "@SQ" || line.starts_with("@SQ\t") {
            self.add_reference(Reference::from_sq_line(line)?)?;
        } else {
            self.lines.push(line.to_string());
        }
        Ok(())
    }

    /// Serialize as SAM header text, one `\n`-terminated line each.
    pub fn to_sam_text(&self) -> String {
        let mut text = String::new();
        let (hd, rest): (Vec<&String>, Vec<&String>) =
            self.lines.iter().partition(|l| l.starts_with("@HD"));

        for line in hd {
            text.push_str(line);
            text.push('\n');
        }
        for reference in &self.references {
            text.push_str(&reference.to_sq_line());
            text.push('\n');
        }
        for line in rest {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

/// Parse SAM header text into a [`Header`].
///
/// Blank lines are ignored.
///
/// # Example
///
/// ```
/// use bamflow::io::bam::parse_header_text;
///
/// let header = parse_header_text("@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n").unwrap();
/// assert_eq!(header.version(), Some("1.6"));
/// assert_eq!(header.reference_id("chr1"), Some(0));
/// ```
pub fn parse_header_text(text: &str) -> Result<Header> {
    let mut header = Header::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        header.push_line(line)?;
    }
    Ok(header)
}

/// Map a read failure to a header error, keeping stream-level errors intact.
fn header_read_error(err: io::Error, what: &str) -> BamflowError {
    match BamflowError::from(err) {
        BamflowError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            BamflowError::header(format!("truncated header while reading {}", what))
        }
        other => other,
    }
}

fn read_i32<R: Read>(reader: &mut R, what: &str) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| header_read_error(e, what))?;
    Ok(i32::from_le_bytes(buf))
}

fn read_len<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let value = read_i32(reader, what)?;
    usize::try_from(value).map_err(|_| BamflowError::header(format!("negative {}: {}", what, value)))
}

fn read_bytes<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| header_read_error(e, what))?;
    if buf.len() < len {
        return Err(BamflowError::header(format!(
            "truncated header while reading {}",
            what
        )));
    }
    Ok(buf)
}

/// Read and validate BAM magic bytes.
pub fn read_magic<R: Read>(reader: &mut R) -> Result<()> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| header_read_error(e, "magic"))?;
    if &magic != BAM_MAGIC {
        return Err(BamflowError::header(format!(
            "invalid BAM magic: expected {:?}, got {:?}",
            BAM_MAGIC, magic
        )));
    }
    Ok(())
}

/// Read the embedded SAM header text (`l_text` + text).
///
/// Trailing NUL padding is removed.
pub fn read_header_text<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_len(reader, "l_text")?;
    let mut text = read_bytes(reader, len, "header text")?;
    while text.last() == Some(&0) {
        text.pop();
    }
    String::from_utf8(text)
        .map_err(|e| BamflowError::header(format!("invalid UTF-8 in header text: {}", e)))
}

/// Read a single binary reference entry.
pub fn read_reference<R: Read>(reader: &mut R) -> Result<Reference> {
    let name_len = read_len(reader, "l_name")?;
    if name_len == 0 {
        return Err(BamflowError::header("reference name length is zero"));
    }

    let mut name_bytes = read_bytes(reader, name_len, "reference name")?;
    if name_bytes.pop() != Some(0) {
        return Err(BamflowError::header("reference name not null-terminated"));
    }
    let name = String::from_utf8(name_bytes)
        .map_err(|e| BamflowError::header(format!("invalid UTF-8 in reference name: {}", e)))?;

    let length = read_i32(reader, "l_ref")?;
    let length = u32::try_from(length).map_err(|_| {
        BamflowError::header(format!("negative length {} for reference {}", length, name))
    })?;

    Ok(Reference::new(name, length))
}

/// Read the binary reference dictionary (`n_ref` + entries).
pub fn read_references<R: Read>(reader: &mut R) -> Result<Vec<Reference>> {
    let count = read_len(reader, "n_ref")?;
    // Cap the preallocation; a corrupt count should fail on read, not on alloc
    let mut references = Vec::with_capacity(count.min(1 << 16));
    for i in 0..count {
        let reference = read_reference(reader).map_err(|e| match e {
            BamflowError::MalformedHeader { msg } => {
                BamflowError::header(format!("reference {}: {}", i, msg))
            }
            other => other,
        })?;
        references.push(reference);
    }
    Ok(references)
}

/// Read a complete binary BAM header.
///
/// # Example
///
/// ```no_run
/// use bamflow::io::bam::read_header;
/// use bamflow::io::compression::BgzfReader;
/// use std::fs::File;
///
/// # fn main() -> bamflow::Result<()> {
/// let mut reader = BgzfReader::new(File::open("alignments.bam")?);
/// let header = read_header(&mut reader)?;
///
/// for (i, ref_seq) in header.references().iter().enumerate() {
///     println!("  {}: {} ({} bp)", i, ref_seq.name, ref_seq.length);
/// }
/// # Ok(())
/// # }
/// ```
pub fn read_header<R: Read>(reader: &mut R) -> Result<Header> {
    read_magic(reader)?;
    let text = read_header_text(reader)?;
    let binary_refs = read_references(reader)?;

    let text_header = parse_header_text(&text)?;

    let mut header = Header::new();
    header.lines = text_header.lines.clone();
    for mut reference in binary_refs {
        match text_header
            .reference_id(&reference.name)
            .and_then(|id| text_header.reference(id))
        {
            Some(text_ref) => {
                if text_ref.length != reference.length {
                    warn!(
                        "@SQ LN for {} ({}) disagrees with binary dictionary ({}); using binary",
                        reference.name, text_ref.length, reference.length
                    );
                }
                reference.fields = text_ref.fields.clone();
            }
            None if text_header.reference_count() > 0 => {
                warn!("reference {} has no @SQ line in header text", reference.name);
            }
            None => {}
        }
        header.add_reference(reference)?;
    }

    Ok(header)
}

fn checked_i32(field: &'static str, value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| BamflowError::EncodingOverflow {
        field,
        value: value as u64,
        max: i32::MAX as u64,
    })
}

/// Write a binary BAM header (magic, text, reference dictionary).
pub fn write_header<W: Write>(writer: &mut W, header: &Header) -> Result<()> {
    let text = header.to_sam_text();
    let mut buf = Vec::with_capacity(12 + text.len() + header.reference_count() * 16);

    buf.extend_from_slice(BAM_MAGIC);
    buf.extend_from_slice(&checked_i32("l_text", text.len())?.to_le_bytes());
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(&checked_i32("n_ref", header.reference_count())?.to_le_bytes());

    for reference in header.references() {
        if reference.name.as_bytes().contains(&0) {
            return Err(BamflowError::header(format!(
                "reference name {:?} contains a NUL byte",
                reference.name
            )));
        }
        buf.extend_from_slice(&checked_i32("l_name", reference.name.len() + 1)?.to_le_bytes());
        buf.extend_from_slice(reference.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&checked_i32("l_ref", reference.length as usize)?.to_le_bytes());
    }

    writer.write_all(&buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn binary_reference(name: &str, length: i32) -> Vec<u8> {
        let mut data = ((name.len() + 1) as i32).to_le_bytes().to_vec();
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(&length.to_le_bytes());
        data
    }

    fn binary_header(text: &str, refs: &[(&str, i32)]) -> Vec<u8> {
        let mut data = BAM_MAGIC.to_vec();
        data.extend_from_slice(&(text.len() as i32).to_le_bytes());
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(&(refs.len() as i32).to_le_bytes());
        for (name, len) in refs {
            data.extend_from_slice(&binary_reference(name, *len));
        }
        data
    }

    #[test]
    fn test_read_magic_invalid() {
        let err = read_magic(&mut Cursor::new(b"BAMX")).unwrap_err();
        assert!(matches!(err, BamflowError::MalformedHeader { .. }));
        assert!(read_magic(&mut Cursor::new(b"BAM\x01extra")).is_ok());
    }

    #[test]
    fn test_read_header_text_strips_padding() {
        let mut data = vec![7, 0, 0, 0];
        data.extend_from_slice(b"@CO\tx\0");
        data.push(0);
        let text = read_header_text(&mut Cursor::new(data)).unwrap();
        assert_eq!(text, "@CO\tx");
    }

    #[test]
    fn test_read_reference() {
        let data = binary_reference("chr1", 248_956_422);
        let reference = read_reference(&mut Cursor::new(data)).unwrap();
        assert_eq!(reference, Reference::new("chr1", 248_956_422));
    }

    #[test]
    fn test_read_reference_not_terminated() {
        let mut data = 4i32.to_le_bytes().to_vec();
        data.extend_from_slice(b"chr1");
        data.extend_from_slice(&100i32.to_le_bytes());
        let err = read_reference(&mut Cursor::new(data)).unwrap_err();
        assert!(err.to_string().contains("null-terminated"));
    }

    #[test]
    fn test_read_reference_negative_length() {
        let data = binary_reference("chr1", -5);
        let err = read_reference(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, BamflowError::MalformedHeader { .. }));
    }

    #[test]
    fn test_negative_counts() {
        let mut data = BAM_MAGIC.to_vec();
        data.extend_from_slice(&(-1i32).to_le_bytes());
        let err = read_header(&mut Cursor::new(data)).unwrap_err();
        assert!(err.to_string().contains("negative l_text"));
    }

    #[test]
    fn test_truncated_header() {
        let mut data = binary_header("", &[("chr1", 10)]);
        data.truncate(data.len() - 2);
        let err = read_header(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, BamflowError::MalformedHeader { .. }), "{err}");
    }

    #[test]
    fn test_read_header_merges_text_fields() {
        let text = "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:100\tM5:abc\n@RG\tID:g1\n";
        let data = binary_header(text, &[("chr1", 100), ("chr2", 50)]);
        let header = read_header(&mut Cursor::new(data)).unwrap();

        assert_eq!(header.reference_count(), 2);
        assert_eq!(header.reference(0).unwrap().field("M5"), Some("abc"));
        assert_eq!(header.reference_name(1), Some("chr2"));
        assert_eq!(header.reference_id("chr2"), Some(1));
        assert_eq!(header.version(), Some("1.6"));
        assert_eq!(header.lines().len(), 2);
    }

    #[test]
    fn test_parse_text_keeps_unknown_lines() {
        let text = "@CO\tfree text: here\n@ZZ\tunknown\n@HD\tVN:1.6\n@SQ\tSN:c\tLN:5\n";
        let header = parse_header_text(text).unwrap();
        assert_eq!(header.lines(), &["@CO\tfree text: here", "@ZZ\tunknown", "@HD\tVN:1.6"]);

        // @HD first, then @SQ, then the rest in order
        assert_eq!(
            header.to_sam_text(),
            "@HD\tVN:1.6\n@SQ\tSN:c\tLN:5\n@CO\tfree text: here\n@ZZ\tunknown\n"
        );
    }

    #[test]
    fn test_parse_text_errors() {
        for bad in [
            "@SQ\tLN:10",
            "@SQ\tSN:chr1",
            "@SQ\tSN:chr1\tLN:-1",
            "@SQ\tSN:chr1\tLN:abc",
            "@SQ\tSN:chr1\tLN:5000000000",
            "@SQ\tSN:a\tLN:1\n@SQ\tSN:a\tLN:2",
            "HD\tVN:1.6",
        ] {
            let err = parse_header_text(bad).unwrap_err();
            assert!(matches!(err, BamflowError::MalformedHeader { .. }), "{bad:?}");
        }
    }

    #[test]
    fn test_binary_roundtrip() {
        let mut header = parse_header_text("@HD\tVN:1.6\n@PG\tID:bamflow\n").unwrap();
        let mut chr1 = Reference::new("chr1", 1000);
        chr1.fields.push(("AS".into(), "hg38".into()));
        header.add_reference(chr1).unwrap();
        header.add_reference(Reference::new("chrM", 16569)).unwrap();

        let mut buf = Vec::new();
        write_header(&mut buf, &header).unwrap();
        let parsed = read_header(&mut Cursor::new(buf)).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_write_length_overflow() {
        let mut header = Header::new();
        header
            .add_reference(Reference::new("big", u32::MAX))
            .unwrap();
        let err = write_header(&mut Vec::new(), &header).unwrap_err();
        assert!(matches!(err, BamflowError::EncodingOverflow { field: "l_ref", .. }));
    }
}
