use anyhow::Result;

/// Switch to the configured group and user. The group goes first, while the process still
/// has the right to change it. Nothing happens when neither is configured.
#[cfg(unix)]
pub fn drop_privileges(uid: Option<u32>, gid: Option<u32>) -> Result<()> {
    use anyhow::bail;

    if let Some(gid) = gid {
        // SAFETY: setgid has no memory-safety preconditions.
        if unsafe { libc::setgid(gid as libc::gid_t) } != 0 {
            bail!(
                "Failed to set GID {}: {}",
                gid,
                std::io::Error::last_os_error()
            );
        }
        tracing::info!("Switched to GID {}", gid);
    }

    if let Some(uid) = uid {
        // SAFETY: setuid has no memory-safety preconditions.
        if unsafe { libc::setuid(uid as libc::uid_t) } != 0 {
            bail!(
                "Failed to set UID {}: {}",
                uid,
                std::io::Error::last_os_error()
            );
        }
        tracing::info!("Switched to UID {}", uid);
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn drop_privileges(uid: Option<u32>, gid: Option<u32>) -> Result<()> {
    if uid.is_some() || gid.is_some() {
        tracing::warn!("uid/gid are ignored on this platform");
    }
    Ok(())
}
