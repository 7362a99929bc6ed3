//! Minimal PLY header reader used to validate splat assets as they stream in.

use thiserror::Error;

const END_HEADER: &[u8] = b"end_header";
const MAGIC: &[u8] = b"ply";
const MAX_HEADER_BYTES: usize = 64 * 1024;
const OPACITY_PROPERTY: &str = "opacity";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlyError {
    #[error("missing `ply` magic line")]
    BadMagic,
    #[error("malformed header line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("unsupported PLY format `{0}`")]
    UnsupportedFormat(String),
    #[error("header declares no vertex element")]
    MissingVertexElement,
    #[error("truncated body: expected at least {expected} bytes, got {actual}")]
    TruncatedBody { expected: usize, actual: usize },
    #[error("truncated body: expected {expected} rows, got {actual}")]
    MissingRows { expected: usize, actual: usize },
    #[error("element `{0}` is too large to address")]
    Oversized(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl ScalarType {
    fn parse(raw: &str) -> Option<Self> {
        let parsed = match raw {
            "char" | "int8" => Self::Int8,
            "uchar" | "uint8" => Self::Uint8,
            "short" | "int16" => Self::Int16,
            "ushort" | "uint16" => Self::Uint16,
            "int" | "int32" => Self::Int32,
            "uint" | "uint32" => Self::Uint32,
            "float" | "float32" => Self::Float32,
            "double" | "float64" => Self::Float64,
            _ => return None,
        };
        Some(parsed)
    }

    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyProperty {
    pub name: String,
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyElement {
    pub name: String,
    pub count: usize,
    pub properties: Vec<PlyProperty>,
}

impl PlyElement {
    /// Bytes per row in binary encodings; `None` when a list property makes rows variable.
    pub fn stride(&self) -> Option<usize> {
        self.properties
            .iter()
            .map(|property| match property.kind {
                PropertyKind::Scalar(scalar) => Some(scalar.size()),
                PropertyKind::List { .. } => None,
            })
            .sum()
    }

    fn scalar_offset(&self, name: &str) -> Option<(usize, ScalarType)> {
        let mut offset = 0;
        for property in &self.properties {
            let PropertyKind::Scalar(scalar) = property.kind else {
                return None;
            };
            if property.name == name {
                return Some((offset, scalar));
            }
            offset += scalar.size();
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlyHeader {
    pub format: PlyFormat,
    pub elements: Vec<PlyElement>,
    /// Length of the header in bytes, including the `end_header` line.
    pub header_len: usize,
}

impl PlyHeader {
    /// Parses the header from the start of a possibly incomplete download.
    ///
    /// Returns `Ok(None)` while `end_header` has not arrived yet; a wrong magic
    /// is reported as soon as the first bytes are available.
    pub fn parse_prefix(bytes: &[u8]) -> Result<Option<Self>, PlyError> {
        let magic_len = bytes.len().min(MAGIC.len());
        if bytes[..magic_len] != MAGIC[..magic_len] {
            return Err(PlyError::BadMagic);
        }

        let Some(header_len) = find_header_end(bytes) else {
            if bytes.len() > MAX_HEADER_BYTES {
                return Err(PlyError::Malformed {
                    line: 0,
                    reason: format!("no end_header within {MAX_HEADER_BYTES} bytes"),
                });
            }
            return Ok(None);
        };

        let text = std::str::from_utf8(&bytes[..header_len]).map_err(|_| PlyError::Malformed {
            line: 0,
            reason: "header is not valid UTF-8".to_string(),
        })?;
        Self::parse_text(text, header_len).map(Some)
    }

    fn parse_text(text: &str, header_len: usize) -> Result<Self, PlyError> {
        let mut lines = text.lines().enumerate().map(|(idx, line)| (idx + 1, line.trim()));
        match lines.next() {
            Some((_, line)) if line == "ply" => {}
            _ => return Err(PlyError::BadMagic),
        }

        let mut format = None;
        let mut elements: Vec<PlyElement> = Vec::new();

        for (line_no, line) in lines {
            let malformed = |reason: &str| PlyError::Malformed {
                line: line_no,
                reason: reason.to_string(),
            };
            let mut tokens = line.split_whitespace();
            let Some(keyword) = tokens.next() else {
                continue;
            };

            match keyword {
                "comment" | "obj_info" => {}
                "format" => {
                    let raw = tokens.next().ok_or_else(|| malformed("missing format name"))?;
                    format = Some(match raw {
                        "ascii" => PlyFormat::Ascii,
                        "binary_little_endian" => PlyFormat::BinaryLittleEndian,
                        "binary_big_endian" => PlyFormat::BinaryBigEndian,
                        other => return Err(PlyError::UnsupportedFormat(other.to_string())),
                    });
                }
                "element" => {
                    let name = tokens.next().ok_or_else(|| malformed("missing element name"))?;
                    let count = tokens
                        .next()
                        .and_then(|raw| raw.parse::<usize>().ok())
                        .ok_or_else(|| malformed("invalid element count"))?;
                    elements.push(PlyElement {
                        name: name.to_string(),
                        count,
                        properties: Vec::new(),
                    });
                }
                "property" => {
                    let element = elements
                        .last_mut()
                        .ok_or_else(|| malformed("property declared before any element"))?;
                    let first = tokens.next().ok_or_else(|| malformed("missing property type"))?;
                    let kind = if first == "list" {
                        let count = tokens
                            .next()
                            .and_then(ScalarType::parse)
                            .ok_or_else(|| malformed("invalid list count type"))?;
                        let item = tokens
                            .next()
                            .and_then(ScalarType::parse)
                            .ok_or_else(|| malformed("invalid list item type"))?;
                        PropertyKind::List { count, item }
                    } else {
                        PropertyKind::Scalar(
                            ScalarType::parse(first)
                                .ok_or_else(|| malformed("unknown property type"))?,
                        )
                    };
                    let name = tokens.next().ok_or_else(|| malformed("missing property name"))?;
                    element.properties.push(PlyProperty {
                        name: name.to_string(),
                        kind,
                    });
                }
                "end_header" => break,
                other => return Err(malformed(&format!("unknown keyword `{other}`"))),
            }
        }

        let format = format.ok_or(PlyError::Malformed {
            line: 0,
            reason: "missing format line".to_string(),
        })?;

        Ok(Self {
            format,
            elements,
            header_len,
        })
    }

    pub fn vertex(&self) -> Option<&PlyElement> {
        self.elements.iter().find(|element| element.name == "vertex")
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex().map(|vertex| vertex.count).unwrap_or(0)
    }

    /// Byte offset of the vertex rows inside a binary body, when computable.
    fn vertex_offset(&self) -> Result<Option<usize>, PlyError> {
        let mut offset: usize = 0;
        for element in &self.elements {
            if element.name == "vertex" {
                return Ok(Some(offset));
            }
            let Some(stride) = element.stride() else {
                return Ok(None);
            };
            offset = element
                .count
                .checked_mul(stride)
                .and_then(|size| offset.checked_add(size))
                .ok_or_else(|| PlyError::Oversized(element.name.clone()))?;
        }
        Ok(None)
    }

    /// Checks that `body` holds every vertex row the header promises.
    pub fn validate_body(&self, body: &[u8]) -> Result<(), PlyError> {
        let vertex = self.vertex().ok_or(PlyError::MissingVertexElement)?;
        match self.format {
            PlyFormat::Ascii => {
                let expected = self
                    .elements
                    .iter()
                    .take_while(|element| element.name != "vertex")
                    .chain(std::iter::once(vertex))
                    .try_fold(0usize, |rows, element| rows.checked_add(element.count))
                    .ok_or_else(|| PlyError::Oversized(vertex.name.clone()))?;
                let actual = body
                    .split(|byte| *byte == b'\n')
                    .filter(|row| !row.iter().all(u8::is_ascii_whitespace))
                    .count();
                if actual < expected {
                    return Err(PlyError::MissingRows { expected, actual });
                }
            }
            PlyFormat::BinaryLittleEndian | PlyFormat::BinaryBigEndian => {
                let (Some(offset), Some(stride)) = (self.vertex_offset()?, vertex.stride()) else {
                    return Ok(());
                };
                let expected = vertex
                    .count
                    .checked_mul(stride)
                    .and_then(|size| offset.checked_add(size))
                    .ok_or_else(|| PlyError::Oversized(vertex.name.clone()))?;
                if body.len() < expected {
                    return Err(PlyError::TruncatedBody {
                        expected,
                        actual: body.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Counts splats whose opacity survives the alpha-removal threshold (0-255).
    ///
    /// Only binary bodies with a float `opacity` property (stored pre-sigmoid)
    /// can be inspected; everything else yields `None`.
    pub fn count_retained_splats(&self, body: &[u8], threshold: u8) -> Option<usize> {
        let vertex = self.vertex()?;
        let stride = vertex.stride()?;
        let base = self.vertex_offset().ok().flatten()?;
        let (field, scalar) = vertex.scalar_offset(OPACITY_PROPERTY)?;
        if scalar != ScalarType::Float32 || self.format == PlyFormat::Ascii {
            return None;
        }

        let mut retained = 0;
        for row in 0..vertex.count {
            let start = row
                .checked_mul(stride)
                .and_then(|offset| offset.checked_add(base))
                .and_then(|offset| offset.checked_add(field))?;
            let raw: [u8; 4] = body.get(start..start.checked_add(4)?)?.try_into().ok()?;
            let logit = match self.format {
                PlyFormat::BinaryBigEndian => f32::from_be_bytes(raw),
                _ => f32::from_le_bytes(raw),
            };
            let alpha = 255.0 / (1.0 + (-logit).exp());
            if alpha >= f32::from(threshold) {
                retained += 1;
            }
        }
        Some(retained)
    }
}

fn find_header_end(bytes: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    while line_start < bytes.len() {
        let newline = line_start + bytes[line_start..].iter().position(|b| *b == b'\n')?;
        let mut line = &bytes[line_start..newline];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if line == END_HEADER {
            return Some(newline + 1);
        }
        line_start = newline + 1;
    }
    None
}
