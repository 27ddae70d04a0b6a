#[cfg(not(target_os = "linux"))]
compile_error!("unsupported target os");

pub(crate) use nix::unistd::Pid;

use nix::errno::Errno;
use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use std::fmt;
use std::io::{IoSlice, IoSliceMut};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    FromTarget,
    IntoTarget,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::FromTarget => "read",
            Direction::IntoTarget => "write",
        })
    }
}

/// How much of a request actually moved. Short transfers are not errors; they happen whenever
/// the remote range runs into an unmapped or inaccessible page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transferred {
    Success(usize),
    Partial(usize),
}

impl Transferred {
    pub(crate) fn new(requested: usize, moved: usize) -> Transferred {
        if moved >= requested {
            Transferred::Success(moved)
        } else {
            Transferred::Partial(moved)
        }
    }

    pub(crate) fn bytes(self) -> usize {
        match self {
            Transferred::Success(n) | Transferred::Partial(n) => n,
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum TransferError {
    #[error("no such process {pid}")]
    NoSuchTarget { pid: Pid },
    #[error("not permitted to access process {pid}")]
    PermissionDenied { pid: Pid },
    #[error("invalid {direction} range of {len:#x} bytes at {address:#x}")]
    InvalidRange {
        direction: Direction,
        address: u64,
        len: usize,
    },
    #[error("{direction} of {len:#x} bytes at {address:#x} in process {pid} failed: {source}")]
    Os {
        direction: Direction,
        pid: Pid,
        address: u64,
        len: usize,
        #[source]
        source: Errno,
    },
}

impl TransferError {
    pub(crate) fn invalid_range(direction: Direction, address: u64, len: usize) -> TransferError {
        TransferError::InvalidRange {
            direction,
            address,
            len,
        }
    }

    fn from_errno(
        errno: Errno,
        direction: Direction,
        pid: Pid,
        address: u64,
        len: usize,
    ) -> TransferError {
        match errno {
            Errno::ESRCH => TransferError::NoSuchTarget { pid },
            Errno::EPERM => TransferError::PermissionDenied { pid },
            // EFAULT is what an unmapped remote page looks like.
            Errno::EFAULT | Errno::EINVAL | Errno::ENOMEM => {
                TransferError::invalid_range(direction, address, len)
            }
            source => TransferError::Os {
                direction,
                pid,
                address,
                len,
                source,
            },
        }
    }
}

/// Something whose address space can be copied to and from, one request at a time.
pub(crate) trait RemoteMemory {
    /// Copy up to `buf.len()` bytes starting at `address` into `buf`.
    fn read_at(&self, address: u64, buf: &mut [u8]) -> Result<Transferred, TransferError>;

    /// Copy up to `buf.len()` bytes from `buf` to `address`.
    fn write_at(&self, address: u64, buf: &[u8]) -> Result<Transferred, TransferError>;
}

/// A running process, accessed with `process_vm_readv(2)` and `process_vm_writev(2)`.
///
/// Nothing is attached or stopped: the kernel checks ptrace access mode on every call, so a
/// process that exits or that we may not inspect shows up as an error on the next transfer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProcessHandle {
    pid: Pid,
}

impl From<Pid> for ProcessHandle {
    fn from(pid: Pid) -> ProcessHandle {
        ProcessHandle { pid }
    }
}

fn remote_iov(
    direction: Direction,
    address: u64,
    len: usize,
) -> Result<RemoteIoVec, TransferError> {
    match usize::try_from(address) {
        Ok(base) if base.checked_add(len).is_some() => Ok(RemoteIoVec { base, len }),
        _ => Err(TransferError::invalid_range(direction, address, len)),
    }
}

impl RemoteMemory for ProcessHandle {
    fn read_at(&self, address: u64, buf: &mut [u8]) -> Result<Transferred, TransferError> {
        let len = buf.len();
        if len == 0 {
            return Ok(Transferred::Success(0));
        }
        let remote = [remote_iov(Direction::FromTarget, address, len)?];
        let moved = process_vm_readv(self.pid, &mut [IoSliceMut::new(buf)], &remote).map_err(
            |errno| TransferError::from_errno(errno, Direction::FromTarget, self.pid, address, len),
        )?;
        log::trace!("read {:#x}/{:#x} bytes at {:#x}", moved, len, address);
        Ok(Transferred::new(len, moved))
    }

    fn write_at(&self, address: u64, buf: &[u8]) -> Result<Transferred, TransferError> {
        let len = buf.len();
        if len == 0 {
            return Ok(Transferred::Success(0));
        }
        let remote = [remote_iov(Direction::IntoTarget, address, len)?];
        let moved = process_vm_writev(self.pid, &[IoSlice::new(buf)], &remote).map_err(
            |errno| TransferError::from_errno(errno, Direction::IntoTarget, self.pid, address, len),
        )?;
        log::trace!("wrote {:#x}/{:#x} bytes at {:#x}", moved, len, address);
        Ok(Transferred::new(len, moved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn this_process() -> ProcessHandle {
        ProcessHandle::from(Pid::this())
    }

    #[test]
    fn test_read_own_memory() {
        let source: Vec<u8> = (0..=255).collect();
        let mut buf = [0; 256];

        let result = this_process()
            .read_at(source.as_ptr() as u64, &mut buf)
            .unwrap();

        assert_eq!(result, Transferred::Success(256));
        assert_eq!(&buf[..], &source[..]);
    }

    #[test]
    fn test_write_own_memory() {
        let mut target = vec![0u8; 64];
        let address = target.as_mut_ptr() as u64;

        let result = this_process().write_at(address, &[0xa5; 64]).unwrap();

        assert_eq!(result, Transferred::Success(64));
        assert!(std::hint::black_box(&target).iter().all(|&b| b == 0xa5));
    }

    #[test]
    fn test_empty_request_skips_syscall() {
        // Address 0 would fault if the kernel were asked.
        let result = this_process().read_at(0, &mut []).unwrap();
        assert_eq!(result, Transferred::Success(0));
    }

    #[test]
    fn test_missing_process() {
        // Larger than any possible pid_max.
        let handle = ProcessHandle::from(Pid::from_raw(i32::MAX));
        let mut buf = [0; 16];

        let err = handle.read_at(0x1000, &mut buf).unwrap_err();
        assert!(matches!(err, TransferError::NoSuchTarget { .. }), "{err:?}");
    }

    #[test]
    fn test_unmapped_address() {
        let mut buf = [0; 16];

        let err = this_process().read_at(0, &mut buf).unwrap_err();
        assert!(
            matches!(
                err,
                TransferError::InvalidRange {
                    direction: Direction::FromTarget,
                    address: 0,
                    len: 16
                }
            ),
            "{err:?}"
        );

        let err = this_process().write_at(0, &buf).unwrap_err();
        assert!(
            matches!(
                err,
                TransferError::InvalidRange {
                    direction: Direction::IntoTarget,
                    ..
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn test_range_past_end_of_address_space() {
        let mut buf = [0; 16];
        let err = this_process().read_at(u64::MAX - 4, &mut buf).unwrap_err();
        assert!(matches!(err, TransferError::InvalidRange { .. }), "{err:?}");
    }

    #[test]
    fn test_errno_classification() {
        let pid = Pid::from_raw(1);
        let classify =
            |errno| TransferError::from_errno(errno, Direction::FromTarget, pid, 0x1000, 16);

        assert!(matches!(
            classify(Errno::EPERM),
            TransferError::PermissionDenied { pid: p } if p == pid
        ));
        assert!(matches!(
            classify(Errno::ESRCH),
            TransferError::NoSuchTarget { pid: p } if p == pid
        ));
        for errno in [Errno::EFAULT, Errno::EINVAL, Errno::ENOMEM] {
            assert!(matches!(
                classify(errno),
                TransferError::InvalidRange {
                    address: 0x1000,
                    len: 16,
                    ..
                }
            ));
        }
        assert!(matches!(
            classify(Errno::EIO),
            TransferError::Os {
                source: Errno::EIO,
                ..
            }
        ));
    }

    #[test]
    fn test_transferred_classification() {
        assert_eq!(Transferred::new(4096, 4096), Transferred::Success(4096));
        assert_eq!(Transferred::new(4096, 17), Transferred::Partial(17));
        assert_eq!(Transferred::new(4096, 0), Transferred::Partial(0));
        assert_eq!(Transferred::Partial(17).bytes(), 17);
    }
}
