//! DRM device nodes.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use tracing::trace;

use crate::error::PresentError;

mod ioctl {
    /// `struct drm_auth` from `drm.h`.
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct DrmAuth {
        pub magic: u32,
    }

    // DRM_IOCTL_GET_MAGIC = DRM_IOR(0x02, struct drm_auth)
    nix::ioctl_read!(drm_get_magic, b'd', 0x02, DrmAuth);
}

use ioctl::{drm_get_magic, DrmAuth};

/// An open DRM device node.
#[derive(Debug)]
pub struct DrmDevice {
    fd: OwnedFd,
    path: PathBuf,
}

impl DrmDevice {
    /// Opens `path` read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PresentError> {
        let path = path.as_ref();
        let raw = open(path, OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty()).map_err(|source| {
            PresentError::Device {
                path: path.to_path_buf(),
                source,
            }
        })?;
        // SAFETY: `open` just returned this descriptor and nothing else owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        trace!(?path, fd = raw, "opened DRM device");
        Ok(Self {
            fd,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetches the magic token the X server needs to authenticate this client.
    pub fn magic(&self) -> Result<u32, PresentError> {
        let mut auth = DrmAuth::default();
        // SAFETY: the descriptor is open for the lifetime of `self` and `auth`
        // matches the layout the ioctl writes.
        unsafe { drm_get_magic(self.fd.as_raw_fd(), &mut auth) }.map_err(|source| {
            PresentError::Device {
                path: self.path.clone(),
                source,
            }
        })?;
        Ok(auth.magic)
    }

    /// Gives up ownership of the descriptor.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsFd for DrmDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for DrmDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
