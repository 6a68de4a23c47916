//! Kernel-backed label bindings.
//!
//! - **Subjects** go through the procfs LSM attribute interface: the label of
//!   process `pid` is the text of `/proc/<pid>/attr/<attribute>`. Only the
//!   calling process may write its own attribute.
//! - **Sockets** carry their label in an extended attribute of the socket
//!   descriptor (`fgetxattr`/`fsetxattr`). A missing attribute (`ENODATA`) means
//!   the socket is unlabeled.
//!
//! Packets have no kernel-visible handle of their own: the kernel labels them
//! from the socket they are sent through. Their bindings are kept in process,
//! with the sealing rules of [`MemoryBackend`].

use std::{
    fs, io,
    os::fd::{BorrowedFd, RawFd},
    path::PathBuf,
};

use rustix::{
    fs::{XattrFlags, fgetxattr, fsetxattr},
    io::Errno,
};

use crate::{
    error::BackendError,
    label::{Label, LabelType, codec},
    store::{LabelBackend, ObjectHandle, SubjectContext, memory::MemoryBackend},
};

pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_PROCESS_ATTRIBUTE: &str = "current";
pub const DEFAULT_OBJECT_XATTR: &str = "security.mac";

const MAX_LABEL_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct LsmBackend {
    proc_root: PathBuf,
    process_attribute: String,
    object_xattr: String,
    packets: MemoryBackend,
}

impl Default for LsmBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESS_ATTRIBUTE, DEFAULT_OBJECT_XATTR)
    }
}

impl LsmBackend {
    pub fn new(process_attribute: impl Into<String>, object_xattr: impl Into<String>) -> Self {
        Self {
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            process_attribute: process_attribute.into(),
            object_xattr: object_xattr.into(),
            packets: MemoryBackend::new(),
        }
    }

    /// Reads process attributes below another procfs mount point.
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    fn attribute_path(&self, context: &SubjectContext) -> PathBuf {
        self.proc_root
            .join(context.pid().to_string())
            .join("attr")
            .join(&self.process_attribute)
    }

    fn socket_fd(handle: ObjectHandle) -> Result<RawFd, BackendError> {
        match handle {
            ObjectHandle::Socket(fd) if fd >= 0 => Ok(fd),
            _ => Err(BackendError::Unsupported(handle.to_string())),
        }
    }
}

/// Labels as stored by the kernel may be NUL-terminated or end with a newline.
fn decode_stored(raw: &[u8], label_type: LabelType) -> Result<Option<Label>, BackendError> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end_matches('\0').trim();
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(codec::parse_as(text, label_type)?))
}

fn classify_write_error(error: io::Error) -> BackendError {
    match error.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput => {
            BackendError::Rejected(error.to_string())
        }
        _ => BackendError::Os(error.to_string()),
    }
}

impl LabelBackend for LsmBackend {
    fn bind_subject(&self, context: &SubjectContext, label: &Label) -> Result<(), BackendError> {
        if *context != SubjectContext::current() {
            return Err(BackendError::Unsupported(format!(
                "{context} is not the calling process"
            )));
        }
        fs::write(self.attribute_path(context), codec::format(label)).map_err(classify_write_error)
    }

    fn subject_label(&self, context: &SubjectContext) -> Result<Option<Label>, BackendError> {
        let raw = fs::read(self.attribute_path(context))?;
        decode_stored(&raw, LabelType::Subject)
    }

    fn bind_object(&self, handle: ObjectHandle, label: &Label) -> Result<(), BackendError> {
        if let ObjectHandle::Packet(_) = handle {
            return self.packets.bind_object(handle, label);
        }
        let raw = Self::socket_fd(handle)?;
        // SAFETY: the caller owns the socket behind the handle for the duration of the call.
        let fd = unsafe { BorrowedFd::borrow_raw(raw) };
        fsetxattr(fd, self.object_xattr.as_str(), codec::format(label).as_bytes(), XattrFlags::empty())
            .map_err(|errno| classify_write_error(io::Error::from(errno)))
    }

    fn object_label(&self, handle: ObjectHandle) -> Result<Option<Label>, BackendError> {
        if let ObjectHandle::Packet(_) = handle {
            return self.packets.object_label(handle);
        }
        let raw = Self::socket_fd(handle)?;
        // SAFETY: the caller owns the socket behind the handle for the duration of the call.
        let fd = unsafe { BorrowedFd::borrow_raw(raw) };
        let mut buffer = [0u8; MAX_LABEL_LEN];
        match fgetxattr(fd, self.object_xattr.as_str(), &mut buffer[..]) {
            Ok(len) => decode_stored(&buffer[..len], LabelType::Object),
            Err(Errno::NODATA) => Ok(None),
            Err(errno) => Err(errno.into()),
        }
    }

    fn seal_object(&self, handle: ObjectHandle) -> Result<(), BackendError> {
        match handle {
            ObjectHandle::Packet(_) => self.packets.seal_object(handle),
            // Kernel socket labels are not sealed here
            ObjectHandle::Socket(_) => Self::socket_fd(handle).map(|_| ()),
        }
    }

    fn release_object(&self, handle: ObjectHandle) {
        self.packets.release_object(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn fake_proc(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("maclabel-{name}-{}", std::process::id()));
        let attr = root.join(std::process::id().to_string()).join("attr");
        fs::create_dir_all(&attr).unwrap();
        root
    }

    fn write_attr(root: &Path, content: &[u8]) {
        fs::write(root.join(std::process::id().to_string()).join("attr").join("current"), content)
            .unwrap();
    }

    #[test]
    fn unit_lsm_decode_stored() {
        assert_eq!(decode_stored(b"2:4,7\0", LabelType::Subject), Ok(Some(Label::subject(2, [4, 7]))));
        assert_eq!(decode_stored(b"1\n", LabelType::Object), Ok(Some(Label::object(1, []))));
        assert_eq!(decode_stored(b"\0", LabelType::Object), Ok(None));
        assert!(matches!(
            decode_stored(b"unconfined_u:unconfined_r", LabelType::Subject),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn unit_lsm_subject_round_trip_through_procfs() {
        let root = fake_proc("round-trip");
        write_attr(&root, b"");
        let backend = LsmBackend::default().with_proc_root(&root);
        let context = SubjectContext::current();

        assert_eq!(backend.subject_label(&context), Ok(None));
        backend.bind_subject(&context, &Label::subject(3, [9, 1])).unwrap();
        assert_eq!(backend.subject_label(&context), Ok(Some(Label::subject(3, [1, 9]))));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn unit_lsm_rejects_foreign_subject() {
        let backend = LsmBackend::default();
        let foreign = SubjectContext::new(std::process::id().wrapping_add(1));
        assert!(matches!(
            backend.bind_subject(&foreign, &Label::subject(1, [])),
            Err(BackendError::Unsupported(_))
        ));
    }

    #[test]
    fn unit_lsm_packets_kept_in_process() {
        let backend = LsmBackend::default();
        let packet = ObjectHandle::Packet(1);

        assert_eq!(backend.object_label(packet), Ok(None));
        backend.bind_object(packet, &Label::object(2, [5])).unwrap();
        backend.seal_object(packet).unwrap();
        assert_eq!(backend.object_label(packet), Ok(Some(Label::object(2, [5]))));
        assert!(backend.bind_object(packet, &Label::object(0, [])).is_err());

        backend.release_object(packet);
        assert_eq!(backend.object_label(packet), Ok(None));
    }
}
