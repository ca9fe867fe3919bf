//! Collision-free socket helpers for tests.

use std::io;
use std::net::{TcpListener, UdpSocket};

/// Bind on an OS-assigned port so concurrent tests never fight over
/// addresses.
pub trait Ephemeral
where
    Self: Sized,
{
    /// Bind an IPv4 socket on an OS-assigned port.
    fn ephemeral_v4() -> io::Result<Self>;
    /// Bind an IPv6 socket on an OS-assigned port.
    fn ephemeral_v6() -> io::Result<Self>;
}

impl Ephemeral for TcpListener {
    fn ephemeral_v4() -> io::Result<Self> {
        Self::bind(("0.0.0.0", 0))
    }

    fn ephemeral_v6() -> io::Result<Self> {
        Self::bind(("::", 0))
    }
}

impl Ephemeral for UdpSocket {
    fn ephemeral_v4() -> io::Result<Self> {
        Self::bind(("0.0.0.0", 0))
    }

    fn ephemeral_v6() -> io::Result<Self> {
        Self::bind(("::", 0))
    }
}
