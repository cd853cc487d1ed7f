//! Interrupt-tolerant drain helpers.
//!
//! Both sync-style framed I/O and the async write pipeline funnel through
//! these two loops: a vectored gather-write that resumes after partial
//! writes, and an exact-length read. `ErrorKind::Interrupted` is retried
//! transparently in both directions, so a signal landing mid-transfer
//! never surfaces to callers.

use std::io::IoSlice;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write every byte of `parts`, in order, to `writer`.
///
/// Uses `write_vectored` so a header and its payload go out in one syscall
/// when the kernel buffer has room; on a partial write the slice list is
/// rebuilt past the consumed prefix and the loop continues.
pub(crate) async fn write_all_vectored<W>(writer: &mut W, parts: &[&[u8]]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = parts.iter().map(|p| p.len()).sum();
    if total == 0 {
        return Ok(());
    }

    let mut written = 0usize;
    while written < total {
        let slices = remaining_slices(parts, written);
        match writer.write_vectored(&slices).await {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write_vectored returned 0",
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    writer.flush().await
}

/// Build the slice list for the bytes of `parts` past `skip`.
fn remaining_slices<'a>(parts: &'a [&'a [u8]], skip: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(parts.len());
    let mut offset = 0usize;
    for part in parts {
        let end = offset + part.len();
        if skip < end {
            let start = skip.saturating_sub(offset);
            slices.push(IoSlice::new(&part[start..]));
        }
        offset = end;
    }
    slices
}

/// Fill `buf` completely from `reader`.
///
/// A clean EOF before `buf` is full maps to `UnexpectedEof`.
pub(crate) async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut pos = 0usize;
    while pos < buf.len() {
        match reader.read(&mut buf[pos..]).await {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the stream",
                ));
            }
            Ok(n) => pos += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
