//! The abstract boundary between the HCI handler and a controller.
//!
//! `ControllerTransport` is the boundary between the HCI handler and a controller: something that
//! can send HCI command/ACL-data octets to a controller and hand back whatever it read. The Linux
//! implementation binds a raw `AF_BLUETOOTH`/`BTPROTO_HCI` socket in `HCI_CHANNEL_USER` mode,
//! which gives this process exclusive ownership of the adapter without going through `bluetoothd`.

use crate::error::{Error, ErrorKind};
use crate::hci::common::ConnectionHandle;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Mutex;

/// HCI packet indicator octets, prefixed on every frame written to/read from the socket (Core
/// Spec Vol 4, Part A §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketIndicator {
    Command = 0x01,
    AclData = 0x02,
    Event = 0x04,
}

/// Abstracts over the raw channel to a Bluetooth controller so the rest of the stack never talks
/// sockets directly. An implementation only needs to move bytes; command/event framing lives in
/// `hci::Hci`.
pub trait ControllerTransport: Send + Sync {
    /// Write a complete HCI command packet (opcode + parameter length + parameters, no packet
    /// indicator -- the transport adds that).
    fn send_command(&self, opcode: u16, parameters: &[u8]) -> Result<(), Error>;

    /// Write a complete L2CAP frame as ACL data for the given connection handle.
    fn send_acl_data(&self, handle: ConnectionHandle, l2cap_frame: &[u8]) -> Result<(), Error>;

    /// Block until the next HCI packet (event or inbound ACL data) is available and return its
    /// raw bytes, packet indicator included.
    fn recv(&self) -> Result<Vec<u8>, Error>;

    /// Unblocks a thread parked in `recv` by tearing down the channel, so `recv` returns `Err`
    /// and the reader loop built on top of it can exit. Default no-op for transports that don't
    /// need explicit teardown (tests feeding an in-memory channel directly).
    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(unix)]
mod linux {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    const AF_BLUETOOTH: i32 = 31;
    const BTPROTO_HCI: i32 = 1;
    const HCI_CHANNEL_USER: u16 = 1;

    #[repr(C)]
    struct SockaddrHci {
        hci_family: libc::sa_family_t,
        hci_dev: u16,
        hci_channel: u16,
    }

    mod ioctl {
        nix::ioctl_write_int!(hci_dev_up, b'H', 201);
        nix::ioctl_write_int!(hci_dev_down, b'H', 202);
    }

    /// Bring adapter `adapter_index` up/down via the management ioctls on a control socket.
    /// These still require a plain (non user-channel) raw HCI socket, so callers do this before
    /// opening a `LinuxHciSocket` for the same index.
    pub fn set_adapter_up(adapter_index: u16, up: bool) -> Result<(), Error> {
        let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_RAW | libc::SOCK_CLOEXEC, BTPROTO_HCI) };

        if fd < 0 {
            return Err(Error::new(ErrorKind::Transport, "failed to open control socket"));
        }

        let result = unsafe {
            if up {
                ioctl::hci_dev_up(fd, adapter_index as nix::sys::ioctl::ioctl_param_type)
            } else {
                ioctl::hci_dev_down(fd, adapter_index as nix::sys::ioctl::ioctl_param_type)
            }
        };

        unsafe { libc::close(fd) };

        result
            .map(|_| ())
            .map_err(|e| Error::new(ErrorKind::Transport, format!("hci dev up/down ioctl failed: {}", e)))
    }

    /// A raw HCI socket bound to one adapter in user-channel mode.
    pub struct LinuxHciSocket {
        stream: Mutex<UnixStream>,
    }

    impl LinuxHciSocket {
        pub fn open(adapter_index: u16) -> Result<Self, Error> {
            let fd = unsafe {
                libc::socket(AF_BLUETOOTH, libc::SOCK_RAW | libc::SOCK_CLOEXEC, BTPROTO_HCI)
            };

            if fd < 0 {
                return Err(Error::new(ErrorKind::Transport, "failed to open AF_BLUETOOTH socket"));
            }

            let addr = SockaddrHci {
                hci_family: AF_BLUETOOTH as libc::sa_family_t,
                hci_dev: adapter_index,
                hci_channel: HCI_CHANNEL_USER,
            };

            let rc = unsafe {
                libc::bind(
                    fd,
                    &addr as *const SockaddrHci as *const libc::sockaddr,
                    std::mem::size_of::<SockaddrHci>() as u32,
                )
            };

            if rc < 0 {
                unsafe { libc::close(fd) };
                return Err(Error::new(ErrorKind::Transport, "failed to bind hci user channel, is an adapter present and unclaimed by bluetoothd?"));
            }

            let stream = unsafe { <UnixStream as std::os::unix::io::FromRawFd>::from_raw_fd(fd) };

            log::debug!("opened HCI user channel on adapter index {}", adapter_index);

            Ok(LinuxHciSocket { stream: Mutex::new(stream) })
        }

        fn write_framed(&self, indicator: PacketIndicator, body: &[u8]) -> Result<(), Error> {
            let mut frame = Vec::with_capacity(1 + body.len());
            frame.push(indicator as u8);
            frame.extend_from_slice(body);

            let mut guard = self.stream.lock().unwrap();
            guard
                .write_all(&frame)
                .map_err(|e| Error::new(ErrorKind::Transport, format!("hci socket write failed: {}", e)))
        }
    }

    impl ControllerTransport for LinuxHciSocket {
        fn send_command(&self, opcode: u16, parameters: &[u8]) -> Result<(), Error> {
            let mut body = Vec::with_capacity(3 + parameters.len());
            body.extend_from_slice(&opcode.to_le_bytes());
            body.push(parameters.len() as u8);
            body.extend_from_slice(parameters);

            log::trace!("HCI command opcode {:#06x}, {} parameter bytes", opcode, parameters.len());

            self.write_framed(PacketIndicator::Command, &body)
        }

        fn send_acl_data(&self, handle: ConnectionHandle, l2cap_frame: &[u8]) -> Result<(), Error> {
            let handle_and_flags: u16 = handle.raw() & 0x0FFF;
            let mut body = Vec::with_capacity(4 + l2cap_frame.len());

            body.extend_from_slice(&handle_and_flags.to_le_bytes());
            body.extend_from_slice(&(l2cap_frame.len() as u16).to_le_bytes());
            body.extend_from_slice(l2cap_frame);

            self.write_framed(PacketIndicator::AclData, &body)
        }

        fn recv(&self) -> Result<Vec<u8>, Error> {
            let mut buf = [0u8; 1024];

            let n = {
                let mut guard = self.stream.lock().unwrap();
                guard
                    .read(&mut buf)
                    .map_err(|e| Error::new(ErrorKind::Transport, format!("hci socket read failed: {}", e)))?
            };

            if n == 0 {
                return Err(Error::new(ErrorKind::Transport, "hci socket closed by controller"));
            }

            Ok(buf[..n].to_vec())
        }

        fn close(&self) -> Result<(), Error> {
            let guard = self.stream.lock().unwrap();
            guard
                .shutdown(std::net::Shutdown::Both)
                .map_err(|e| Error::new(ErrorKind::Transport, format!("hci socket shutdown failed: {}", e)))
        }
    }

    impl AsRawFd for LinuxHciSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.stream.lock().unwrap().as_raw_fd()
        }
    }
}

#[cfg(unix)]
pub use linux::{set_adapter_up, LinuxHciSocket};
