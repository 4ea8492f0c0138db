use std::io::{self, Read};

use log::debug;

/// Reads the external rasterizer's page stream: an 8-byte length prefix
/// followed by that many bytes of PNG, repeated until EOF.
///
/// The upstream tool has historically been ambiguous about prefix byte order,
/// so the length is taken as `min(big-endian, little-endian)` — a legacy
/// compatibility quirk, not a design. A sane big-endian writer is read
/// correctly either way.
pub fn read_page_stream(mut reader: impl Read) -> io::Result<Vec<Vec<u8>>> {
    let mut pages = Vec::new();
    loop {
        let mut prefix = [0u8; 8];
        match read_exact_or_eof(&mut reader, &mut prefix)? {
            Prefix::Eof => return Ok(pages),
            Prefix::Full => {}
        }
        let length = u64::from_be_bytes(prefix).min(u64::from_le_bytes(prefix));
        let length = usize::try_from(length)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "page length overflow"))?;
        debug!("page[{}] length {length}", pages.len());

        let mut page = vec![0u8; length];
        reader.read_exact(&mut page)?;
        pages.push(page);
    }
}

enum Prefix {
    Full,
    Eof,
}

/// Distinguishes a clean end-of-stream (zero bytes) from a torn prefix.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8; 8]) -> io::Result<Prefix> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(Prefix::Eof);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "torn page length prefix",
            ));
        }
        filled += n;
    }
    Ok(Prefix::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stream_with(pages: &[&[u8]], big_endian: bool) -> Vec<u8> {
        let mut out = Vec::new();
        for page in pages {
            let len = page.len() as u64;
            if big_endian {
                out.extend_from_slice(&len.to_be_bytes());
            } else {
                out.extend_from_slice(&len.to_le_bytes());
            }
            out.extend_from_slice(page);
        }
        out
    }

    #[test]
    fn test_reads_big_endian_stream() {
        let stream = stream_with(&[b"first page", b"second"], true);
        let pages = read_page_stream(Cursor::new(stream)).unwrap();
        assert_eq!(pages, vec![b"first page".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_reads_little_endian_stream() {
        let stream = stream_with(&[b"payload"], false);
        let pages = read_page_stream(Cursor::new(stream)).unwrap();
        assert_eq!(pages, vec![b"payload".to_vec()]);
    }

    #[test]
    fn test_empty_stream_is_no_pages() {
        let pages = read_page_stream(Cursor::new(Vec::new())).unwrap();
        assert!(pages.is_empty());
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let mut stream = 20u64.to_be_bytes().to_vec();
        stream.extend_from_slice(b"short");
        let err = read_page_stream(Cursor::new(stream)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_torn_prefix_is_an_error() {
        let stream = vec![0u8, 0, 0];
        let err = read_page_stream(Cursor::new(stream)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
