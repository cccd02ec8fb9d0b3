//! Chunked line reading for large import files.
//!
//! Files are read in fixed-size byte windows. A line that straddles two
//! windows is carried over and completed by the next one, and so is a
//! multi-byte character cut in half. Blank lines are dropped and a trailing
//! `\r` is removed, so CRLF files read the same as LF files.

use crate::{ImportError, ImportResult};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default read window (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Reassembles lines from arbitrary byte chunks
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and collect every line it completes
    pub fn push(&mut self, chunk: &[u8], lines: &mut Vec<String>) {
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            emit(&self.partial, lines);
            self.partial.clear();
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);
    }

    /// Flush the last line if the input did not end with a newline
    pub fn finish(self, lines: &mut Vec<String>) {
        emit(&self.partial, lines);
    }
}

fn emit(raw: &[u8], lines: &mut Vec<String>) {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    if !line.trim().is_empty() {
        lines.push(line.into_owned());
    }
}

/// Read every non-blank line from `reader`, `chunk_size` bytes at a time
pub async fn read_lines_from<R: AsyncRead + Unpin>(
    mut reader: R,
    chunk_size: usize,
) -> ImportResult<Vec<String>> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut assembler = LineAssembler::new();
    let mut lines = Vec::new();

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        assembler.push(&buf[..n], &mut lines);
    }
    assembler.finish(&mut lines);
    Ok(lines)
}

/// Read every non-blank line of a file
pub async fn read_lines(path: impl AsRef<Path>, chunk_size: usize) -> ImportResult<Vec<String>> {
    let path = path.as_ref();
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let lines = read_lines_from(file, chunk_size).await?;
    tracing::debug!(path = %path.display(), lines = lines.len(), "read import file");
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assemble(input: &[u8], chunk: usize) -> Vec<String> {
        let mut assembler = LineAssembler::new();
        let mut lines = Vec::new();
        for piece in input.chunks(chunk) {
            assembler.push(piece, &mut lines);
        }
        assembler.finish(&mut lines);
        lines
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let input = b"Name,ID\r\nJane Doe,ID1\n\n  \nJohn Roe,ID2";
        assert_eq!(
            assemble(input, 5),
            vec!["Name,ID", "Jane Doe,ID1", "John Roe,ID2"]
        );
    }

    #[test]
    fn test_multibyte_character_split() {
        let input = "Zoë,ID1\nRené,ID2\n".as_bytes();
        assert_eq!(assemble(input, 3), vec!["Zoë,ID1", "René,ID2"]);
    }

    #[tokio::test]
    async fn test_read_lines_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("members.csv");
        std::fs::write(&path, "a\nb\nc").unwrap();

        assert_eq!(read_lines(&path, 2).await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = read_lines("/definitely/not/here.csv", DEFAULT_CHUNK_SIZE).await;
        assert!(matches!(result, Err(ImportError::FileNotFound(_))));
    }

    proptest! {
        #[test]
        fn chunk_size_does_not_change_lines(
            lines in prop::collection::vec("[a-zA-Z0-9 ,é]{0,12}", 0..20),
            chunk in 1usize..16,
        ) {
            let text = lines.join("\n");
            let whole = assemble(text.as_bytes(), text.len().max(1));
            prop_assert_eq!(assemble(text.as_bytes(), chunk), whole);
        }
    }
}
