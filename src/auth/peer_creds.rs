//! Peer credential checks for scanner feeds on the ingest socket.
//!
//! Anyone who can write to the ingest socket can inject advertisements, so
//! only configured UIDs may connect. An empty allow list rejects everyone.

use std::os::fd::AsFd;

use crate::error::DaemonError;

/// Identity of a connected scanner process.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub uid: u32,
    pub gid: u32,
    /// Not reported on every platform.
    pub pid: Option<i32>,
}

/// Read the peer's credentials and check its UID against `allowed_uids`.
pub fn verify_peer<S: AsFd>(stream: &S, allowed_uids: &[u32]) -> Result<PeerInfo, DaemonError> {
    let peer = peer_info(stream)?;
    check_uid(&peer, allowed_uids)?;
    Ok(peer)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn peer_info<S: AsFd>(stream: &S) -> Result<PeerInfo, DaemonError> {
    use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

    let creds = getsockopt(stream, PeerCredentials).map_err(|e| DaemonError::Socket {
        message: format!("Failed to get peer credentials: {}", e),
    })?;

    Ok(PeerInfo {
        uid: creds.uid(),
        gid: creds.gid(),
        pid: Some(creds.pid()),
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn peer_info<S: AsFd>(stream: &S) -> Result<PeerInfo, DaemonError> {
    let (uid, gid) = nix::unistd::getpeereid(stream.as_fd()).map_err(|e| DaemonError::Socket {
        message: format!("Failed to get peer credentials: {}", e),
    })?;

    Ok(PeerInfo {
        uid: uid.as_raw(),
        gid: gid.as_raw(),
        pid: None,
    })
}

fn check_uid(peer: &PeerInfo, allowed_uids: &[u32]) -> Result<(), DaemonError> {
    if allowed_uids.is_empty() || !allowed_uids.contains(&peer.uid) {
        return Err(DaemonError::UnauthorizedPeer { uid: peer.uid });
    }
    Ok(())
}
