//! Dedicated response channel.
//!
//! The host passes an extra descriptor (fd 3 by default) open for writing.
//! Responses go there and nowhere else; stdout and stderr stay free for
//! handler and launcher diagnostics.

use anyhow::{Context, Result, bail};

pub const DEFAULT_OUTPUT_FD: u32 = 3;

/// Opens the response descriptor for async writes.
///
/// The descriptor is reopened through `/dev/fd` in append mode rather than
/// adopted, so the launcher never closes a descriptor it does not own.
#[cfg(unix)]
pub fn open_output_fd(fd: u32) -> Result<tokio::fs::File> {
    if fd <= 2 {
        bail!("Descriptor {fd} is stdin/stdout/stderr; responses need a dedicated descriptor");
    }
    let path = std::path::Path::new("/dev/fd").join(fd.to_string());
    let file = std::fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .with_context(|| format!("Response descriptor {fd} is not open for writing"))?;
    tracing::debug!("Writing responses to descriptor {}", fd);
    Ok(tokio::fs::File::from_std(file))
}

#[cfg(not(unix))]
pub fn open_output_fd(fd: u32) -> Result<tokio::fs::File> {
    bail!("Response descriptor {fd} cannot be opened: dedicated descriptors need a unix host")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_stdio_descriptors_rejected() {
        for fd in 0..=2 {
            assert!(open_output_fd(fd).is_err());
        }
    }

    #[test]
    fn test_unopened_descriptor_is_error() {
        let err = open_output_fd(987).unwrap_err();
        assert!(err.to_string().contains("987"));
    }
}
