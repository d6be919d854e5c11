//! Named pipe access.
//!
//! The host application owns the pipe servers; the bridge connects as a client
//! for every single line, the same way a script would `open()` the pipe path.

use async_trait::async_trait;
use interprocess::local_socket::tokio::Stream as LocalStream;
use interprocess::local_socket::traits::tokio::Stream as _;
use interprocess::local_socket::{GenericFilePath, ToFsName};
use std::io;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Reads newline-terminated text from an open pipe.
#[async_trait]
pub trait LineSource: Send {
    /// Next line without its terminator; `None` at end of data.
    async fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Writes newline-terminated text to an open pipe.
#[async_trait]
pub trait LineSink: Send {
    /// Writes `line` plus a newline in one piece.
    async fn write_line(&mut self, line: &str) -> io::Result<()>;
}

/// The pipe capability the bridge depends on.
#[async_trait]
pub trait PipeChannels: Send + Sync + 'static {
    fn exists(&self, path: &str) -> bool;

    async fn open_read(&self, path: &str) -> io::Result<Box<dyn LineSource>>;

    async fn open_write(&self, path: &str) -> io::Result<Box<dyn LineSink>>;
}

/// Pipes reached through `interprocess` local sockets.
#[derive(Debug, Default, Clone)]
pub struct LocalPipes;

impl LocalPipes {
    async fn connect(path: &str) -> io::Result<LocalStream> {
        let name = path.to_fs_name::<GenericFilePath>()?;
        LocalStream::connect(name).await
    }
}

#[async_trait]
impl PipeChannels for LocalPipes {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    async fn open_read(&self, path: &str) -> io::Result<Box<dyn LineSource>> {
        let stream = Self::connect(path).await?;
        Ok(Box::new(StreamSource(BufReader::new(stream))))
    }

    async fn open_write(&self, path: &str) -> io::Result<Box<dyn LineSink>> {
        let stream = Self::connect(path).await?;
        Ok(Box::new(StreamSink(stream)))
    }
}

struct StreamSource(BufReader<LocalStream>);

#[async_trait]
impl LineSource for StreamSource {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        read_one_line(&mut self.0).await
    }
}

struct StreamSink(LocalStream);

#[async_trait]
impl LineSink for StreamSink {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        write_one_line(&mut self.0, line).await
    }
}

pub(crate) async fn read_one_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin + Send,
{
    let mut buffer = String::new();
    let n = reader.read_line(&mut buffer).await?;
    if n == 0 {
        return Ok(None); // EOF
    }
    let trimmed = buffer.trim_end_matches(['\r', '\n']).len();
    buffer.truncate(trimmed);
    Ok(Some(buffer))
}

pub(crate) async fn write_one_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    writer.write_all(buf.as_bytes()).await?;
    writer.flush().await
}
