/// ISOBMFF (MP4/MOV) atom scanning
///
/// Walks the box structure of a container one header at a time, seeking
/// over payloads instead of reading them. All offsets are `u64`, so boxes
/// beyond the 2 GiB / 4 GiB marks are handled the same as the first one.
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::error::{AtomError, InvalidAtomPath};

/// A four character atom tag, e.g. `*b"moov"`
pub type FourCc = [u8; 4];

/// Provenance atom written by the drones into their video files
pub const PVAT: FourCc = *b"pvat";

/// Padding box; readers skip it
pub const FREE: FourCc = *b"free";

/// Size of a compact header: 32-bit size + tag
const HEADER_LEN: u64 = 8;
/// Size of an extended header: compact header + 64-bit size
const WIDE_HEADER_LEN: u64 = 16;

/// Convert a string tag into a [`FourCc`]. Returns `None` unless the
/// string is exactly four bytes.
pub fn fourcc(tag: &str) -> Option<FourCc> {
    tag.as_bytes().try_into().ok()
}

/// One decoded box header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomHeader {
    /// Effective size of the whole box, header included
    pub size: u64,
    pub tag: FourCc,
    /// 8 for a compact header, 16 when a 64-bit size follows
    pub header_len: u64,
    /// Declared size was 0: the box runs to the end of the enclosing range
    pub is_terminal: bool,
}

impl AtomHeader {
    /// Read the header of the box starting at `offset`.
    /// `remaining` is the number of bytes between `offset` and the end of
    /// the range being scanned.
    fn read<R: Read>(reader: &mut R, offset: u64, remaining: u64) -> Result<Self, AtomError> {
        if remaining < HEADER_LEN {
            return Err(AtomError::Corrupt {
                offset,
                reason: "truncated atom header",
            });
        }

        let mut raw = [0u8; 8];
        reader.read_exact(&mut raw)?;
        let size32 = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let tag = [raw[4], raw[5], raw[6], raw[7]];

        match size32 {
            0 => Ok(AtomHeader {
                size: remaining,
                tag,
                header_len: HEADER_LEN,
                is_terminal: true,
            }),
            1 => {
                if remaining < WIDE_HEADER_LEN {
                    return Err(AtomError::Corrupt {
                        offset,
                        reason: "truncated extended atom size",
                    });
                }
                let mut wide = [0u8; 8];
                reader.read_exact(&mut wide)?;
                let size = u64::from_be_bytes(wide);
                if size < WIDE_HEADER_LEN {
                    return Err(AtomError::Corrupt {
                        offset,
                        reason: "atom smaller than its header",
                    });
                }
                Ok(AtomHeader {
                    size,
                    tag,
                    header_len: WIDE_HEADER_LEN,
                    is_terminal: false,
                })
            }
            size if u64::from(size) < HEADER_LEN => Err(AtomError::Corrupt {
                offset,
                reason: "atom smaller than its header",
            }),
            size => Ok(AtomHeader {
                size: u64::from(size),
                tag,
                header_len: HEADER_LEN,
                is_terminal: false,
            }),
        }
    }
}

/// Location of a matched box inside the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomSpan {
    /// Offset of the box header
    pub start: u64,
    pub payload_start: u64,
    pub payload_len: u64,
}

impl AtomSpan {
    fn end(&self) -> u64 {
        self.payload_start + self.payload_len
    }
}

/// One step of an [`AtomPath`]: the tag and which matching sibling to take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomPathSegment {
    pub tag: FourCc,
    /// 1-based occurrence among siblings with the same tag
    pub occurrence: u32,
}

/// A nested atom address such as `moov/2:trak/tkhd`
///
/// Each segment is searched for only inside the payload of the previous
/// one. A `N:` prefix selects the N-th sibling carrying that tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomPath {
    segments: Vec<AtomPathSegment>,
}

impl AtomPath {
    pub fn segments(&self) -> &[AtomPathSegment] {
        &self.segments
    }
}

impl FromStr for AtomPath {
    type Err = InvalidAtomPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        for raw in s.split('/').filter(|part| !part.is_empty()) {
            let (occurrence, tag) = match raw.split_once(':') {
                Some((index, tag)) => {
                    let index: u32 = index
                        .parse()
                        .map_err(|_| InvalidAtomPath(raw.to_string()))?;
                    (index, tag)
                }
                None => (1, raw),
            };
            let tag = fourcc(tag).ok_or_else(|| InvalidAtomPath(raw.to_string()))?;
            if occurrence == 0 {
                return Err(InvalidAtomPath(raw.to_string()));
            }
            segments.push(AtomPathSegment { tag, occurrence });
        }

        if segments.is_empty() {
            return Err(InvalidAtomPath(s.to_string()));
        }
        Ok(AtomPath { segments })
    }
}

impl fmt::Display for AtomPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            if segment.occurrence != 1 {
                write!(f, "{}:", segment.occurrence)?;
            }
            f.write_str(&String::from_utf8_lossy(&segment.tag))?;
        }
        Ok(())
    }
}

/// Find the top-level atom tagged `tag` and return its payload.
///
/// `Ok(None)` means the stream was walked to its end without a match.
/// The stream position is left wherever the scan stopped.
pub fn locate<R: Read + Seek>(stream: &mut R, tag: FourCc) -> Result<Option<Vec<u8>>, AtomError> {
    let len = stream_len(stream)?;
    match find_atom(stream, 0, len, tag, 1)? {
        Some(span) => read_span(stream, span).map(Some),
        None => Ok(None),
    }
}

/// Follow a nested [`AtomPath`] and return the payload of its last segment.
pub fn locate_path<R: Read + Seek>(
    stream: &mut R,
    path: &AtomPath,
) -> Result<Option<Vec<u8>>, AtomError> {
    let mut start = 0;
    let mut end = stream_len(stream)?;
    let mut found = None;

    for segment in path.segments() {
        match find_atom(stream, start, end, segment.tag, segment.occurrence)? {
            Some(span) => {
                start = span.payload_start;
                end = span.end();
                found = Some(span);
            }
            None => return Ok(None),
        }
    }

    match found {
        Some(span) => read_span(stream, span).map(Some),
        None => Ok(None),
    }
}

/// Open `path` and [`locate`] `tag` in it
pub fn locate_in_file(path: &Path, tag: FourCc) -> Result<Option<Vec<u8>>, AtomError> {
    let mut reader = BufReader::new(File::open(path)?);
    let payload = locate(&mut reader, tag)?;
    debug!(
        "atom {} {} in {}",
        String::from_utf8_lossy(&tag),
        if payload.is_some() { "found" } else { "not found" },
        path.display()
    );
    Ok(payload)
}

/// Scan the boxes laid out in `[start, end)` for the `occurrence`-th one
/// tagged `tag`.
fn find_atom<R: Read + Seek>(
    stream: &mut R,
    start: u64,
    end: u64,
    tag: FourCc,
    occurrence: u32,
) -> Result<Option<AtomSpan>, AtomError> {
    let mut remaining_matches = occurrence;
    let mut pos = start;

    while pos < end {
        stream.seek(SeekFrom::Start(pos))?;
        let header = AtomHeader::read(stream, pos, end - pos)?;

        let box_end = if header.is_terminal {
            end
        } else {
            pos.checked_add(header.size).ok_or(AtomError::Corrupt {
                offset: pos,
                reason: "atom size overflows stream offsets",
            })?
        };

        if header.tag == tag {
            remaining_matches -= 1;
            if remaining_matches == 0 {
                if box_end > end {
                    return Err(AtomError::Corrupt {
                        offset: pos,
                        reason: "atom extends past the end of its container",
                    });
                }
                return Ok(Some(AtomSpan {
                    start: pos,
                    payload_start: pos + header.header_len,
                    payload_len: box_end - pos - header.header_len,
                }));
            }
        }

        if header.is_terminal {
            break;
        }
        pos = box_end;
    }

    Ok(None)
}

/// Read exactly the bytes covered by `span`
fn read_span<R: Read + Seek>(stream: &mut R, span: AtomSpan) -> Result<Vec<u8>, AtomError> {
    let len = usize::try_from(span.payload_len).map_err(|_| AtomError::Corrupt {
        offset: span.payload_start,
        reason: "atom payload does not fit in memory",
    })?;

    stream.seek(SeekFrom::Start(span.payload_start))?;
    let mut payload = Vec::new();
    payload.try_reserve_exact(len).map_err(|_| AtomError::Corrupt {
        offset: span.payload_start,
        reason: "atom payload does not fit in memory",
    })?;
    stream.take(span.payload_len).read_to_end(&mut payload)?;

    if payload.len() != len {
        return Err(AtomError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream ended inside atom payload",
        )));
    }
    Ok(payload)
}

fn stream_len<S: Seek>(stream: &mut S) -> io::Result<u64> {
    let len = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(0))?;
    Ok(len)
}

/// Header bytes of a box with `tag` around `payload_len` bytes.
///
/// A compact header is used whenever the total size fits in 32 bits,
/// otherwise the box gets a 64-bit extended size.
fn encode_header(tag: FourCc, payload_len: u64) -> Vec<u8> {
    let mut header = Vec::with_capacity(WIDE_HEADER_LEN as usize);
    match u32::try_from(payload_len + HEADER_LEN) {
        Ok(size) => {
            header.extend_from_slice(&size.to_be_bytes());
            header.extend_from_slice(&tag);
        }
        Err(_) => {
            header.extend_from_slice(&1u32.to_be_bytes());
            header.extend_from_slice(&tag);
            header.extend_from_slice(&(payload_len + WIDE_HEADER_LEN).to_be_bytes());
        }
    }
    header
}

/// Write one box with `tag` around `payload`
pub fn write_atom<W: Write>(writer: &mut W, tag: FourCc, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&encode_header(tag, payload.len() as u64))?;
    writer.write_all(payload)
}

/// Encode one box into a fresh buffer
pub fn encode_atom(tag: FourCc, payload: &[u8]) -> Vec<u8> {
    let mut out = encode_header(tag, payload.len() as u64);
    out.extend_from_slice(payload);
    out
}

/// Append one box to the end of the file at `path`
pub fn append_atom(path: &Path, tag: FourCc, payload: &[u8]) -> Result<(), AtomError> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_len = file.metadata()?.len();
    close_open_ended(&mut file, file_len)?;
    file.seek(SeekFrom::End(0))?;
    write_atom(&mut file, tag, payload)?;
    file.flush()?;
    debug!("appended atom {} to {}", String::from_utf8_lossy(&tag), path.display());
    Ok(())
}

/// Replace the payload of the first top-level box tagged `tag` in the file
/// at `path`. Returns `false` when there is no such box.
///
/// A payload of the same length is overwritten in place. Otherwise a box
/// at the end of the file is cut off and rewritten, and a box elsewhere is
/// retagged `free` with the new box appended after everything else.
pub fn replace_atom(path: &Path, tag: FourCc, payload: &[u8]) -> Result<bool, AtomError> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_len = file.metadata()?.len();
    let Some(span) = find_atom(&mut file, 0, file_len, tag, 1)? else {
        return Ok(false);
    };

    if span.payload_len == payload.len() as u64 {
        file.seek(SeekFrom::Start(span.payload_start))?;
        file.write_all(payload)?;
    } else if span.end() == file_len {
        file.set_len(span.start)?;
        file.seek(SeekFrom::Start(span.start))?;
        write_atom(&mut file, tag, payload)?;
    } else {
        file.seek(SeekFrom::Start(span.start + 4))?;
        file.write_all(&FREE)?;
        close_open_ended(&mut file, file_len)?;
        file.seek(SeekFrom::End(0))?;
        write_atom(&mut file, tag, payload)?;
    }
    file.flush()?;
    debug!("replaced atom {} in {}", String::from_utf8_lossy(&tag), path.display());
    Ok(true)
}

/// Give an open-ended (size 0) last box its real size so that boxes
/// appended after it stay visible.
fn close_open_ended<F: Read + Write + Seek>(file: &mut F, file_len: u64) -> Result<(), AtomError> {
    let mut pos = 0;
    while pos < file_len {
        file.seek(SeekFrom::Start(pos))?;
        let header = AtomHeader::read(file, pos, file_len - pos)?;
        if header.is_terminal {
            let size = u32::try_from(header.size).map_err(|_| AtomError::Corrupt {
                offset: pos,
                reason: "open-ended atom too large to close",
            })?;
            file.seek(SeekFrom::Start(pos))?;
            file.write_all(&size.to_be_bytes())?;
            return Ok(());
        }
        match pos.checked_add(header.size) {
            Some(next) => pos = next,
            None => break,
        }
    }
    Ok(())
}
