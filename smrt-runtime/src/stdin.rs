//! Non-blocking check for piped stdin

use std::io::Read;

/// True when stdin is a pipe/file with data ready right now
#[cfg(unix)]
pub fn stdin_ready() -> bool {
    fd_ready(libc::STDIN_FILENO)
}

#[cfg(not(unix))]
pub fn stdin_ready() -> bool {
    false
}

/// Non-terminal descriptor that is readable or hung up, checked without waiting
#[cfg(unix)]
fn fd_ready(fd: libc::c_int) -> bool {
    // SAFETY: isatty and a zero-timeout poll only inspect the descriptor.
    unsafe {
        if libc::isatty(fd) == 1 {
            return false;
        }

        let mut fds = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        libc::poll(&mut fds, 1, 0) > 0 && (fds.revents & (libc::POLLIN | libc::POLLHUP)) != 0
    }
}

/// Read all of stdin when something was piped in, without ever blocking
/// on an interactive terminal. The read itself runs on the blocking pool.
pub async fn read_piped_stdin() -> std::io::Result<Option<Vec<u8>>> {
    if !stdin_ready() {
        return Ok(None);
    }

    tokio::task::spawn_blocking(|| -> std::io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        std::io::stdin().lock().read_to_end(&mut buf)?;
        Ok((!buf.is_empty()).then_some(buf))
    })
    .await
    .map_err(std::io::Error::other)?
}
