use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::decoder::RowDecodeError;
use crate::error::Result;

/// One line of input. Undecodable bytes are a row-level problem, not an I/O failure.
pub type SourceLine = std::result::Result<String, RowDecodeError>;

pub type LineStream = BoxStream<'static, io::Result<SourceLine>>;

/// Finite, line-oriented input. `count_lines` is an independent pass that must agree with
/// the number of items `lines` yields.
#[async_trait]
pub trait LineSource: Send + Sync {
    async fn count_lines(&self) -> Result<usize>;
    async fn lines(&self) -> Result<LineStream>;
}

#[derive(Debug, Clone)]
pub struct FileLineSource {
    path: PathBuf,
}

impl FileLineSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LineSource for FileLineSource {
    async fn count_lines(&self) -> Result<usize> {
        let mut file = File::open(&self.path).await?;
        let mut buffer = vec![0u8; 64 * 1024];
        let mut count = 0usize;
        let mut last_byte = None;

        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            count += buffer[..read].iter().filter(|byte| **byte == b'\n').count();
            last_byte = Some(buffer[read - 1]);
        }

        // A final line without a trailing newline is still a line.
        if matches!(last_byte, Some(byte) if byte != b'\n') {
            count += 1;
        }
        Ok(count)
    }

    async fn lines(&self) -> Result<LineStream> {
        let file = File::open(&self.path).await?;
        let reader = BufReader::new(file);

        let stream = stream::unfold(reader, |mut reader| async move {
            let mut buffer = Vec::new();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => None,
                Ok(_) => Some((Ok(decode_line(buffer)), reader)),
                Err(err) => Some((Err(err), reader)),
            }
        });
        Ok(stream.boxed())
    }
}

fn decode_line(mut bytes: Vec<u8>) -> SourceLine {
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }
    String::from_utf8(bytes).map_err(|err| {
        RowDecodeError::Malformed(format!("line is not valid UTF-8: {}", err.utf8_error()))
    })
}

/// In-memory lines, mostly for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLineSource {
    lines: Vec<String>,
}

impl MemoryLineSource {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }
}

#[async_trait]
impl LineSource for MemoryLineSource {
    async fn count_lines(&self) -> Result<usize> {
        Ok(self.lines.len())
    }

    async fn lines(&self) -> Result<LineStream> {
        let lines: Vec<io::Result<SourceLine>> =
            self.lines.iter().cloned().map(|line| Ok(Ok(line))).collect();
        Ok(stream::iter(lines).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Write;

    async fn collect_results(source: &dyn LineSource) -> Vec<SourceLine> {
        source
            .lines()
            .await
            .expect("open lines")
            .try_collect()
            .await
            .expect("read lines")
    }

    async fn collect(source: &dyn LineSource) -> Vec<String> {
        collect_results(source)
            .await
            .into_iter()
            .map(|line| line.expect("valid utf-8"))
            .collect()
    }

    #[tokio::test]
    async fn file_count_matches_streamed_lines() {
        for contents in ["a,b\n1,2\n3,4\n", "a,b\n1,2\n3,4", "a,b\r\n1,2\r\n", ""] {
            let mut file = tempfile::NamedTempFile::new().expect("temp file");
            file.write_all(contents.as_bytes()).expect("write");

            let source = FileLineSource::new(file.path());
            let streamed = collect(&source).await;
            assert_eq!(source.count_lines().await.expect("count"), streamed.len());
        }
    }

    #[tokio::test]
    async fn file_lines_strip_line_endings() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"a,b\r\n1,2\n").expect("write");

        let lines = collect(&FileLineSource::new(file.path())).await;
        assert_eq!(lines, vec!["a,b".to_string(), "1,2".to_string()]);
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_a_row_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"a,b\n1,\xff\n3,4\n").expect("write");

        let source = FileLineSource::new(file.path());
        let lines = collect_results(&source).await;
        assert_eq!(lines.len(), 3);
        assert_eq!(source.count_lines().await.expect("count"), 3);
        assert_eq!(lines[0].as_deref(), Ok("a,b"));
        assert!(matches!(lines[1], Err(RowDecodeError::Malformed(_))));
        assert_eq!(lines[2].as_deref(), Ok("3,4"));
    }

    #[tokio::test]
    async fn memory_source_counts_lines() {
        let source = MemoryLineSource::from_text("a\nb\nc\n");
        assert_eq!(source.count_lines().await.expect("count"), 3);
        assert_eq!(collect(&source).await.len(), 3);
    }
}
