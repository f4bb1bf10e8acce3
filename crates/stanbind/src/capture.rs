//! Scoped capture of the process's stderr file descriptor
//!
//! Compilers and linkers write to file descriptor 2, which child processes
//! inherit. Swapping the descriptor itself is the only way to keep that output
//! off the terminal while still recording it.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

// fd 2 is process-global, so only one redirection may be active at a time.
static REDIRECT_LOCK: Mutex<()> = Mutex::new(());

// Unit tests that inspect or write fd 2 hold this for their whole body.
#[cfg(test)]
pub(crate) static TEST_FD_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
pub(crate) fn serialize_fd_tests() -> MutexGuard<'static, ()> {
    TEST_FD_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Redirects fd 2 into an anonymous temporary file until finished or dropped.
///
/// The original descriptor is restored on every exit path, including panic
/// unwinding, because restoration lives in `Drop`.
pub struct StderrCapture {
    file: File,
    saved: Option<SavedFd>,
    _lock: MutexGuard<'static, ()>,
}

impl StderrCapture {
    /// Start capturing. Fails when fd 2 cannot be duplicated (closed, or a
    /// platform without descriptor redirection); callers should then run
    /// unredirected.
    pub fn begin() -> io::Result<Self> {
        let lock = REDIRECT_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        io::stderr().flush()?;
        let file = tempfile::tempfile()?;
        let saved = SavedFd::redirect_stderr_to(&file)?;
        Ok(Self {
            file,
            saved: Some(saved),
            _lock: lock,
        })
    }

    /// Restore stderr and return everything written while capturing
    pub fn finish(mut self) -> io::Result<String> {
        self.restore()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        self.file.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn restore(&mut self) -> io::Result<()> {
        match self.saved.take() {
            Some(saved) => saved.restore(),
            None => Ok(()),
        }
    }
}

impl Drop for StderrCapture {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

#[cfg(unix)]
struct SavedFd(std::os::unix::io::RawFd);

#[cfg(unix)]
impl SavedFd {
    fn redirect_stderr_to(file: &File) -> io::Result<Self> {
        use std::os::unix::io::AsRawFd;

        // Safety: dup/dup2/close on descriptors we own or on fd 2.
        let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
        if saved < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::dup2(file.as_raw_fd(), libc::STDERR_FILENO) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(saved) };
            return Err(err);
        }
        Ok(SavedFd(saved))
    }

    fn restore(self) -> io::Result<()> {
        let result = if unsafe { libc::dup2(self.0, libc::STDERR_FILENO) } < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        };
        unsafe { libc::close(self.0) };
        result
    }
}

#[cfg(not(unix))]
struct SavedFd;

#[cfg(not(unix))]
impl SavedFd {
    fn redirect_stderr_to(_file: &File) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stderr redirection is not supported on this platform",
        ))
    }

    fn restore(self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::FromRawFd;
    use std::process::Command;

    /// (device, inode) currently behind fd 2
    fn stderr_identity() -> (u64, u64) {
        let fd = unsafe { libc::dup(libc::STDERR_FILENO) };
        assert!(fd >= 0);
        let file = unsafe { File::from_raw_fd(fd) };
        let meta = file.metadata().unwrap();
        (meta.dev(), meta.ino())
    }

    fn write_fd2(msg: &str) {
        let n = unsafe { libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len()) };
        assert_eq!(n, msg.len() as isize);
    }

    #[test]
    fn captures_descriptor_level_writes() {
        let _serial = serialize_fd_tests();
        let before = stderr_identity();
        let capture = StderrCapture::begin().unwrap();
        write_fd2("direct write\n");
        let output = capture.finish().unwrap();
        assert!(output.contains("direct write\n"));
        assert_eq!(stderr_identity(), before);
    }

    #[test]
    fn captures_child_process_output() {
        let _serial = serialize_fd_tests();
        let capture = StderrCapture::begin().unwrap();
        let status = Command::new("sh").arg("-c").arg("echo 'warning: from child' >&2").status().unwrap();
        assert!(status.success());
        let output = capture.finish().unwrap();
        assert!(output.contains("warning: from child"));
    }

    #[test]
    fn restores_on_drop_without_finish() {
        let _serial = serialize_fd_tests();
        let before = stderr_identity();
        {
            let _capture = StderrCapture::begin().unwrap();
            assert_ne!(stderr_identity(), before);
        }
        assert_eq!(stderr_identity(), before);
    }

    #[test]
    fn restores_when_unwinding() {
        let _serial = serialize_fd_tests();
        let before = stderr_identity();
        let result = std::panic::catch_unwind(|| {
            let _capture = StderrCapture::begin().unwrap();
            panic!("toolchain exploded");
        });
        assert!(result.is_err());
        assert_eq!(stderr_identity(), before);
    }
}
