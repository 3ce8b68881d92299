//! Programs started by steps
//!
//! Every program a step starts leads a process group of its own. Stopping
//! the step signals the whole group, which reaches whatever the script
//! started in turn.

use std::borrow::Cow;
use std::process::ExitStatus;
use tracing::debug;

/// Decodes one line of program output without its line terminator
///
/// Bytes that are not UTF-8 are replaced rather than ending the stream.
pub fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw)
}

/// Exit code of a finished program; death by signal `n` is `128 + n`
#[cfg(unix)]
pub fn status_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
pub fn status_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Sends SIGKILL to the process group led by `pid`
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };

    // SAFETY: a negative pid addresses the process group `pgid`, which was
    // created for a child spawned by this runner
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            "Process group {} not signalled: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"caf\xe9\n"), "caf\u{fffd}");
    }

    #[cfg(unix)]
    #[test]
    fn test_status_code_for_signals() {
        use std::process::Command;

        let exited = Command::new("sh").args(["-c", "exit 5"]).status().unwrap();
        assert_eq!(status_code(exited), 5);

        let killed = Command::new("sh").args(["-c", "kill -9 $$"]).status().unwrap();
        assert_eq!(status_code(killed), 128 + 9);
    }
}
