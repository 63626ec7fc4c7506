use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use anyhow::Context;

/// The sender's view of the file it transmits: random access by byte offset, so that
///  go-back-N can re-read from any acknowledged position
pub trait ByteSource: Send {
    fn total_len(&mut self) -> anyhow::Result<u64>;

    /// Reads as many bytes as fit into `buf` starting at `offset`, returning fewer only at the
    ///  end of the source
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize>;
}

impl<T: Read + Seek + Send> ByteSource for T {
    fn total_len(&mut self) -> anyhow::Result<u64> {
        let len = self.seek(SeekFrom::End(0))
            .context("determining the length of the source")?;
        self.seek(SeekFrom::Start(0))?;
        Ok(len)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<usize> {
        self.seek(SeekFrom::Start(offset))
            .with_context(|| format!("seeking to offset {} of the source", offset))?;

        let mut num_read = 0;
        while num_read < buf.len() {
            match self.read(&mut buf[num_read..]) {
                Ok(0) => break,
                Ok(n) => num_read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).with_context(|| format!("reading at offset {} of the source", offset)),
            }
        }
        Ok(num_read)
    }
}

/// The receiver's destination for delivered bytes. Writes arrive in increasing, contiguous
///  offset order, each byte exactly once.
pub trait ByteSink: Send {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> anyhow::Result<()>;

    fn flush_all(&mut self) -> anyhow::Result<()>;
}

impl<T: Write + Seek + Send> ByteSink for T {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        self.seek(SeekFrom::Start(offset))
            .with_context(|| format!("seeking to offset {} of the sink", offset))?;
        self.write_all(data)
            .with_context(|| format!("writing {} bytes at offset {} of the sink", data.len(), offset))?;
        Ok(())
    }

    fn flush_all(&mut self) -> anyhow::Result<()> {
        self.flush()
            .context("flushing the sink")?;
        Ok(())
    }
}
