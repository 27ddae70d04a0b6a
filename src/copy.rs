use crate::remote::{Direction, RemoteMemory, TransferError, Transferred};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;

pub(crate) const DEFAULT_WINDOW: NonZeroUsize = match NonZeroUsize::new(4096) {
    Some(size) => size,
    None => unreachable!(),
};

/// One slice of the requested range, relative to the base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub(crate) offset: u64,
    pub(crate) len: usize,
}

/// Splits `[0, length)` into ascending, contiguous windows of `size` bytes. The last window is
/// shorter when `length` is not a multiple of `size`.
#[derive(Debug, Clone)]
pub(crate) struct Windows {
    offset: u64,
    length: u64,
    size: usize,
}

impl Windows {
    pub(crate) fn new(length: u64, size: NonZeroUsize) -> Windows {
        Windows {
            offset: 0,
            length,
            size: size.get(),
        }
    }
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let remaining = self.length.checked_sub(self.offset).filter(|&r| r > 0)?;
        let len = usize::try_from(remaining).map_or(self.size, |r| r.min(self.size));
        let window = Window {
            offset: self.offset,
            len,
        };
        self.offset += len as u64;
        Some(window)
    }
}

#[derive(Debug)]
pub(crate) struct WindowFailure {
    pub(crate) address: u64,
    pub(crate) len: usize,
    pub(crate) error: TransferError,
}

/// What happened over one run of [`read_range`] or [`write_range`].
#[derive(Debug, Default)]
pub(crate) struct Report {
    pub(crate) windows: u64,
    pub(crate) complete: u64,
    pub(crate) partial: u64,
    /// Bytes moved by the transfer calls.
    pub(crate) transferred: u64,
    /// Bytes read from or written to the backing file.
    pub(crate) file_bytes: u64,
    /// Windows whose transfer call failed outright.
    pub(crate) failed: u64,
    pub(crate) first_failure: Option<WindowFailure>,
}

impl Report {
    fn record(
        &mut self,
        address: u64,
        len: usize,
        result: Result<Transferred, TransferError>,
    ) -> usize {
        self.windows += 1;
        match result {
            Ok(transferred) => {
                if let Transferred::Partial(n) = transferred {
                    log::debug!("short transfer at {:#x}: {:#x}/{:#x} bytes", address, n, len);
                    self.partial += 1;
                } else {
                    self.complete += 1;
                }
                self.transferred += transferred.bytes() as u64;
                transferred.bytes()
            }
            Err(error) => {
                log::debug!("window at {:#x} failed: {}", address, error);
                self.failed += 1;
                if self.first_failure.is_none() {
                    self.first_failure = Some(WindowFailure {
                        address,
                        len,
                        error,
                    });
                }
                0
            }
        }
    }
}

/// Copy `length` bytes starting at `base` in the target into `out`.
///
/// The file mirrors the address range: bytes from `base + o` land at file offset `o`. The offset
/// advances by the full window size even when a window comes back short or fails, so anything
/// that couldn't be read is left as a gap (a hole, or nothing at all past the last byte captured)
/// rather than shifting the data after it. Transfer failures are recorded in the report and the
/// loop keeps going; only errors from `out` itself end the run.
pub(crate) fn read_range<M, W>(
    memory: &M,
    base: u64,
    length: u64,
    window: NonZeroUsize,
    out: &mut W,
) -> io::Result<Report>
where
    M: RemoteMemory + ?Sized,
    W: Write + Seek,
{
    let mut report = Report::default();
    let mut buf = vec![0; window.get()];
    for Window { offset, len } in Windows::new(length, window) {
        let buf = &mut buf[..len];
        let address = base.wrapping_add(offset);
        let result = if base.checked_add(offset).is_some() {
            memory.read_at(address, buf)
        } else {
            Err(TransferError::invalid_range(Direction::FromTarget, address, len))
        };
        let moved = report.record(address, len, result);

        out.seek(SeekFrom::Start(offset))?;
        if moved > 0 {
            out.write_all(&buf[..moved])?;
            report.file_bytes += moved as u64;
        }
    }
    out.flush()?;
    Ok(report)
}

/// Copy everything `input` has into the target starting at `base`.
///
/// Each window is filled from the file before it is sent, and the target offset advances by
/// exactly what the file supplied. The loop ends when the file is exhausted.
pub(crate) fn write_range<M, R>(
    memory: &M,
    base: u64,
    window: NonZeroUsize,
    input: &mut R,
) -> io::Result<Report>
where
    M: RemoteMemory + ?Sized,
    R: Read,
{
    let mut report = Report::default();
    let mut buf = vec![0; window.get()];
    let mut offset = 0u64;
    loop {
        let n = fill(input, &mut buf)?;
        if n == 0 {
            break;
        }
        let address = base.wrapping_add(offset);
        let result = if base.checked_add(offset).is_some() {
            memory.write_at(address, &buf[..n])
        } else {
            Err(TransferError::invalid_range(Direction::IntoTarget, address, n))
        };
        report.record(address, n, result);
        report.file_bytes += n as u64;
        offset += n as u64;
    }
    Ok(report)
}

/// Read until `buf` is full or the reader is at end of file.
fn fill<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
