/// Pseudo-terminal pair creation via the platform's `openpty`.
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};

use crate::types::Result;

pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

/// Opens a master/slave pseudo-terminal pair. When `winsize` is given, the
/// device starts with that (rows, cols) window size.
pub fn open_pty(winsize: Option<(u16, u16)>) -> Result<PtyPair> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;

    let mut ws = winsize.map(|(rows, cols)| libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    });
    let ws_ptr = ws
        .as_mut()
        .map_or(std::ptr::null_mut(), |w| w as *mut libc::winsize);

    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            ws_ptr,
        )
    };

    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }

    // openpty returned valid descriptors that nothing else owns yet.
    Ok(PtyPair {
        master: unsafe { OwnedFd::from_raw_fd(master) },
        slave: unsafe { OwnedFd::from_raw_fd(slave) },
    })
}
