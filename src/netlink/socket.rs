//! Blocking `AF_NETLINK` socket handling: family/group resolution and the multicast receive loop.
//!
//! The kernel module's wire format is an external contract (§1); this is a deliberately
//! conservative consumer of it, not a general genetlink library. It runs on a dedicated blocking
//! thread (§5, role "Event receiver") and hands decoded events across to async code through a
//! bounded channel.

use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use super::{decode_attrs, RawEvent, FAMILY_NAME, GROUP_NAME};
use crate::error::{Error, Result};

const NETLINK_GENERIC: libc::c_int = 16;
const NLMSG_HDRLEN: usize = mem::size_of::<libc::nlmsghdr>();
const GENL_HDRLEN: usize = mem::size_of::<GenlMsgHdr>();

const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;
const CTRL_ATTR_MCAST_GROUPS: u16 = 7;
const CTRL_ATTR_MCAST_GRP_NAME: u16 = 1;
const CTRL_ATTR_MCAST_GRP_ID: u16 = 2;

/// Reconnect backoff bounds, for when the socket drops or the kernel module is briefly absent
/// (§7 "Kernel module restarts mid-session").
const RECONNECT_MIN_DELAY: Duration = Duration::from_millis(200);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

/// `genlmsghdr`, not provided by the `libc` crate.
#[repr(C)]
struct GenlMsgHdr {
    cmd: u8,
    version: u8,
    reserved: u16,
}

/// A raw `AF_NETLINK` socket joined to the kernel module's multicast group, ready to receive
/// decoded [`RawEvent`]s.
pub struct EventSource {
    fd: RawFd,
    family_id: u16,
}

impl EventSource {
    /// Opens the socket, resolves the `vfsmonitor` family and `vfsmonitor_de` group by name, and
    /// joins the multicast group. Blocking; meant to run on its own OS thread.
    pub fn connect() -> Result<Self> {
        let fd = open_socket()?;
        let resolved = match resolve_family(fd) {
            Ok(resolved) => resolved,
            Err(err) => {
                unsafe { libc::close(fd) };
                return Err(err);
            }
        };

        if let Err(err) = join_multicast_group(fd, resolved.group_id) {
            unsafe { libc::close(fd) };
            return Err(err);
        }

        info!(family_id = resolved.family_id, group_id = resolved.group_id, "joined vfsmonitor multicast group");
        Ok(Self { fd, family_id: resolved.family_id })
    }

    /// Blocks on `recv` until one netlink datagram arrives, and decodes every generic-netlink
    /// message it contains. A single `recv` can carry more than one `nlmsghdr` when the kernel
    /// coalesces events.
    pub fn recv_events(&self) -> Result<Vec<RawEvent>> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut _, buf.len(), 0) };
        if n < 0 {
            return Err(Error::Netlink(format!("recv failed: {}", io::Error::last_os_error())));
        }
        buf.truncate(n as usize);
        parse_datagram(&buf, self.family_id)
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// Runs the blocking receive loop forever, decoding events and sending them on `tx`. Reconnects
/// with exponential backoff on socket errors rather than exiting, since the kernel module may not
/// have loaded yet or may be reloaded mid-session (§7).
pub fn run_forever(tx: async_channel::Sender<RawEvent>) {
    let mut delay = RECONNECT_MIN_DELAY;

    loop {
        let source = match EventSource::connect() {
            Ok(source) => {
                delay = RECONNECT_MIN_DELAY;
                source
            }
            Err(err) => {
                warn!(error = %err, delay_ms = delay.as_millis(), "failed to connect to vfsmonitor, retrying");
                thread::sleep(delay);
                delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                continue;
            }
        };

        loop {
            match source.recv_events() {
                Ok(events) => {
                    for event in events {
                        if tx.send_blocking(event).is_err() {
                            // Receiver side shut down; nothing left to do.
                            return;
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "lost vfsmonitor netlink socket, reconnecting");
                    break;
                }
            }
        }
    }
}

struct ResolvedFamily {
    family_id: u16,
    group_id: u32,
}

fn open_socket() -> Result<RawFd> {
    let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, NETLINK_GENERIC) };
    if fd < 0 {
        return Err(Error::Netlink(format!("socket() failed: {}", io::Error::last_os_error())));
    }

    let addr = libc::sockaddr_nl { nl_family: libc::AF_NETLINK as u16, nl_pad: 0, nl_pid: 0, nl_groups: 0 };
    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_nl>() as u32,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(Error::Netlink(format!("bind() failed: {err}")));
    }

    Ok(fd)
}

/// Sends a `CTRL_CMD_GETFAMILY` request for [`FAMILY_NAME`] and parses the family id and
/// [`GROUP_NAME`]'s multicast group id out of the reply, mirroring `genl_ctrl_resolve` and
/// `genl_ctrl_resolve_grp`.
fn resolve_family(fd: RawFd) -> Result<ResolvedFamily> {
    let request = build_getfamily_request(FAMILY_NAME);
    let n = unsafe { libc::send(fd, request.as_ptr() as *const _, request.len(), 0) };
    if n < 0 {
        return Err(Error::Netlink(format!("send(GETFAMILY) failed: {}", io::Error::last_os_error())));
    }

    let mut buf = vec![0u8; 16 * 1024];
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut _, buf.len(), 0) };
    if n < 0 {
        return Err(Error::Netlink(format!("recv(GETFAMILY) failed: {}", io::Error::last_os_error())));
    }
    buf.truncate(n as usize);

    parse_getfamily_reply(&buf)
}

fn build_getfamily_request(family_name: &str) -> Vec<u8> {
    let mut name_attr = Vec::new();
    push_string_attr(&mut name_attr, CTRL_ATTR_FAMILY_NAME, family_name);

    let genl_payload_len = GENL_HDRLEN + name_attr.len();
    let total_len = NLMSG_HDRLEN + genl_payload_len;

    let mut msg = Vec::with_capacity(total_len);
    let header = libc::nlmsghdr {
        nlmsg_len: total_len as u32,
        nlmsg_type: GENL_ID_CTRL,
        nlmsg_flags: (libc::NLM_F_REQUEST | libc::NLM_F_ACK) as u16,
        nlmsg_seq: 1,
        nlmsg_pid: 0,
    };
    push_struct(&mut msg, &header);
    push_struct(&mut msg, &GenlMsgHdr { cmd: CTRL_CMD_GETFAMILY, version: 1, reserved: 0 });
    msg.extend_from_slice(&name_attr);
    msg
}

fn parse_getfamily_reply(buf: &[u8]) -> Result<ResolvedFamily> {
    if buf.len() < NLMSG_HDRLEN + GENL_HDRLEN {
        return Err(Error::Netlink("GETFAMILY reply too short".to_string()));
    }

    let attrs = &buf[NLMSG_HDRLEN + GENL_HDRLEN..];
    let mut family_id = None;
    let mut group_id = None;

    walk_attrs(attrs, |attr_type, body| match attr_type {
        CTRL_ATTR_FAMILY_ID => {
            if body.len() >= 2 {
                family_id = Some(u16::from_ne_bytes([body[0], body[1]]));
            }
        }
        CTRL_ATTR_MCAST_GROUPS => {
            if let Some(id) = find_group_id(body) {
                group_id = Some(id);
            }
        }
        _ => {}
    });

    Ok(ResolvedFamily {
        family_id: family_id.ok_or_else(|| Error::Netlink(format!("{FAMILY_NAME} family id not found in reply")))?,
        group_id: group_id.ok_or_else(|| Error::Netlink(format!("{GROUP_NAME} multicast group not found in reply")))?,
    })
}

/// `CTRL_ATTR_MCAST_GROUPS` is a nested attribute: one unnamed container per group, each holding
/// `CTRL_ATTR_MCAST_GRP_NAME` and `CTRL_ATTR_MCAST_GRP_ID`.
fn find_group_id(nested: &[u8]) -> Option<u32> {
    let mut found = None;
    walk_attrs(nested, |_index_attr_type, group_attrs| {
        let mut name = None;
        let mut id = None;
        walk_attrs(group_attrs, |attr_type, body| match attr_type {
            CTRL_ATTR_MCAST_GRP_NAME => name = std::str::from_utf8(strip_nul(body)).ok().map(str::to_string),
            CTRL_ATTR_MCAST_GRP_ID => {
                if body.len() >= 4 {
                    id = Some(u32::from_ne_bytes([body[0], body[1], body[2], body[3]]));
                }
            }
            _ => {}
        });
        if name.as_deref() == Some(GROUP_NAME) {
            found = id;
        }
    });
    found
}

fn strip_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(pos) => &bytes[..pos],
        None => bytes,
    }
}

fn join_multicast_group(fd: RawFd, group_id: u32) -> Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_NETLINK,
            libc::NETLINK_ADD_MEMBERSHIP,
            &group_id as *const u32 as *const libc::c_void,
            mem::size_of::<u32>() as u32,
        )
    };
    if rc < 0 {
        return Err(Error::Netlink(format!("NETLINK_ADD_MEMBERSHIP failed: {}", io::Error::last_os_error())));
    }
    Ok(())
}

/// Decodes every `(nlmsghdr, genlmsghdr, attrs)` triple in one multicast datagram into
/// [`RawEvent`]s, skipping control messages that aren't from our family.
fn parse_datagram(buf: &[u8], family_id: u16) -> Result<Vec<RawEvent>> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset + NLMSG_HDRLEN <= buf.len() {
        let header = read_nlmsghdr(&buf[offset..]);
        let msg_len = header.nlmsg_len as usize;
        if msg_len < NLMSG_HDRLEN || offset + msg_len > buf.len() {
            break;
        }

        if header.nlmsg_type == family_id && msg_len >= NLMSG_HDRLEN + GENL_HDRLEN {
            let attrs = &buf[offset + NLMSG_HDRLEN + GENL_HDRLEN..offset + msg_len];
            match decode_attrs(attrs) {
                Ok(event) => events.push(event),
                Err(err) => warn!(error = %err, "dropping malformed vfsmonitor event"),
            }
        }

        offset += align4(msg_len);
    }

    Ok(events)
}

fn read_nlmsghdr(buf: &[u8]) -> libc::nlmsghdr {
    let mut header: libc::nlmsghdr = unsafe { mem::zeroed() };
    let size = mem::size_of::<libc::nlmsghdr>();
    unsafe {
        std::ptr::copy_nonoverlapping(buf.as_ptr(), &mut header as *mut _ as *mut u8, size);
    }
    header
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn push_struct<T>(buf: &mut Vec<u8>, value: &T) {
    let size = mem::size_of::<T>();
    let ptr = value as *const T as *const u8;
    buf.extend_from_slice(unsafe { std::slice::from_raw_parts(ptr, size) });
}

fn push_string_attr(buf: &mut Vec<u8>, attr_type: u16, value: &str) {
    let mut payload = value.as_bytes().to_vec();
    payload.push(0);
    let total_len = (4 + payload.len()) as u16;
    buf.extend_from_slice(&total_len.to_ne_bytes());
    buf.extend_from_slice(&attr_type.to_ne_bytes());
    buf.extend_from_slice(&payload);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

/// Walks a buffer of back-to-back `nlattr` TLVs, invoking `f(attr_type, payload)` for each.
fn walk_attrs(buf: &[u8], mut f: impl FnMut(u16, &[u8])) {
    let mut offset = 0;
    while offset + 4 <= buf.len() {
        let total_len = u16::from_ne_bytes([buf[offset], buf[offset + 1]]) as usize;
        let attr_type = u16::from_ne_bytes([buf[offset + 2], buf[offset + 3]]) & 0x3fff; // strip NLA_F_* flags
        if total_len < 4 || offset + total_len > buf.len() {
            break;
        }
        f(attr_type, &buf[offset + 4..offset + total_len]);
        offset += align4(total_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getfamily_request_is_well_formed() {
        let req = build_getfamily_request("vfsmonitor");
        let header = read_nlmsghdr(&req);
        assert_eq!(header.nlmsg_len as usize, req.len());
        assert_eq!(header.nlmsg_type, GENL_ID_CTRL);
    }

    #[test]
    fn walk_attrs_finds_family_id() {
        let mut attrs = Vec::new();
        let id: u16 = 42;
        let mut payload = id.to_ne_bytes().to_vec();
        payload.extend_from_slice(&[0, 0]);
        let total_len = (4 + payload.len()) as u16;
        attrs.extend_from_slice(&total_len.to_ne_bytes());
        attrs.extend_from_slice(&CTRL_ATTR_FAMILY_ID.to_ne_bytes());
        attrs.extend_from_slice(&payload);

        let mut found = None;
        walk_attrs(&attrs, |attr_type, body| {
            if attr_type == CTRL_ATTR_FAMILY_ID {
                found = Some(u16::from_ne_bytes([body[0], body[1]]));
            }
        });
        assert_eq!(found, Some(42));
    }
}
