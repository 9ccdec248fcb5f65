//! AF_PACKET receive ring (TPACKET_V3) bound to a single LAN interface.

use std::{
    ffi::{CStr, CString},
    io, mem,
    net::Ipv4Addr,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    ptr::{self, NonNull},
    slice,
    sync::atomic::{Ordering, fence},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, ensure};
use tokio::task;

use host_traffic::{
    MacAddr,
    classify::{Gateway, PacketType},
};

pub const DEFAULT_BLOCK_SIZE: u32 = 1 << 20; // 1 MiB
pub const DEFAULT_BLOCK_COUNT: u32 = 16;
pub const DEFAULT_FRAME_SIZE: u32 = 2048;
pub const DEFAULT_BLOCK_TIMEOUT_MS: u32 = 100;

#[derive(Clone, Copy, Debug)]
pub struct RingConfig {
    pub block_size: u32,
    pub block_count: u32,
    pub frame_size: u32,
    pub block_timeout_ms: u32,
}

impl RingConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.block_size != 0 && self.block_count != 0 && self.frame_size != 0,
            "ring parameters must be non-zero"
        );
        ensure!(
            self.block_size % self.frame_size == 0,
            "block size must be a multiple of frame size"
        );
        let alignment = libc::TPACKET_ALIGNMENT as u32;
        ensure!(
            self.block_size % alignment == 0 && self.frame_size % alignment == 0,
            "block and frame sizes must be aligned to {alignment} bytes"
        );
        Ok(())
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: DEFAULT_BLOCK_COUNT,
            frame_size: DEFAULT_FRAME_SIZE,
            block_timeout_ms: DEFAULT_BLOCK_TIMEOUT_MS,
        }
    }
}

const fn tpacket_align(len: usize) -> usize {
    let align = libc::TPACKET_ALIGNMENT as usize;
    (len + align - 1) & !(align - 1)
}

/// The kernel stores a `sockaddr_ll` right behind each frame header; its
/// `sll_pkttype` says which way the frame went.
const SLL_OFFSET: usize = tpacket_align(mem::size_of::<libc::tpacket3_hdr>());

pub struct Capture {
    fd: OwnedFd,
    ring: RxRing,
    iface: String,
}

impl Capture {
    /// Opens a raw packet socket on `iface` and maps its receive ring.
    pub fn open(iface: &str, cfg: RingConfig) -> Result<Self> {
        let protocol = (libc::ETH_P_ALL as u16).to_be();
        let raw = cvt(unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::c_int::from(protocol),
            )
        })
        .context("failed to create packet socket")?;
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let version = libc::tpacket_versions::TPACKET_V3 as libc::c_int;
        set_packet_opt(&fd, libc::PACKET_VERSION, &version)
            .context("failed to enable TPACKET_V3")?;
        attach(&fd, iface, protocol)?;
        let ring = RxRing::map(&fd, cfg)?;

        Ok(Self {
            fd,
            ring,
            iface: iface.to_string(),
        })
    }

    pub fn iface(&self) -> &str {
        &self.iface
    }

    pub fn block_count(&self) -> usize {
        self.ring.block_count
    }

    /// Hands every frame in the next ready block to `on_frame`. Returns false
    /// when the kernel still owns that block.
    pub fn next_block(&mut self, on_frame: &mut impl FnMut(&[u8], PacketType)) -> bool {
        self.ring.take_block(on_frame)
    }

    /// Parks until the kernel signals a retired block or `max_wait` elapses.
    /// The poll runs on the blocking pool so the worker thread stays free.
    pub async fn wait(&self, max_wait: Duration) -> Result<()> {
        let fd = self.fd.as_raw_fd();
        task::spawn_blocking(move || poll_readable(fd, max_wait))
            .await
            .context("readiness poll panicked")?
            .context("failed to wait for socket readability")?;
        Ok(())
    }
}

/// True if `fd` became readable within `max_wait`.
fn poll_readable(fd: RawFd, max_wait: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout = libc::c_int::try_from(max_wait.as_millis()).unwrap_or(libc::c_int::MAX);
    loop {
        match cvt(unsafe { libc::poll(&mut pfd, 1, timeout) }) {
            Ok(ready) => return Ok(ready > 0 && pfd.revents & libc::POLLIN != 0),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Looks up the hardware address of `iface` and every local IPv4 address.
pub fn gateway_for(iface: &str) -> Result<Gateway> {
    let mut head: *mut libc::ifaddrs = ptr::null_mut();
    cvt(unsafe { libc::getifaddrs(&mut head) }).context("failed to list interface addresses")?;

    let mut mac = None;
    let mut local_addrs = Vec::new();
    let mut cursor = head;
    while let Some(ifa) = unsafe { cursor.as_ref() } {
        cursor = ifa.ifa_next;
        let Some(addr) = (unsafe { ifa.ifa_addr.as_ref() }) else {
            continue;
        };
        match libc::c_int::from(addr.sa_family) {
            libc::AF_INET => {
                let sin = unsafe { &*ifa.ifa_addr.cast::<libc::sockaddr_in>() };
                local_addrs.push(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)));
            }
            libc::AF_PACKET => {
                let name = unsafe { CStr::from_ptr(ifa.ifa_name) };
                if name.to_bytes() != iface.as_bytes() {
                    continue;
                }
                let sll = unsafe { &*ifa.ifa_addr.cast::<libc::sockaddr_ll>() };
                let len = usize::from(sll.sll_halen);
                if let Ok(found) = MacAddr::try_from(&sll.sll_addr[..len.min(sll.sll_addr.len())]) {
                    mac = Some(found);
                }
            }
            _ => {}
        }
    }
    unsafe { libc::freeifaddrs(head) };

    let mac = mac.ok_or_else(|| anyhow!("{iface} has no Ethernet hardware address"))?;
    Ok(Gateway { mac, local_addrs })
}

fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn set_packet_opt<T>(fd: &OwnedFd, name: libc::c_int, value: &T) -> io::Result<()> {
    cvt(unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_PACKET,
            name,
            (value as *const T).cast(),
            mem::size_of::<T>() as libc::socklen_t,
        )
    })
    .map(drop)
}

fn attach(fd: &OwnedFd, iface: &str, protocol: u16) -> Result<()> {
    let name = CString::new(iface).with_context(|| format!("bad interface name {iface:?}"))?;
    let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if ifindex == 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("unknown interface {iface}"));
    }

    let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
    sll.sll_family = libc::AF_PACKET as libc::c_ushort;
    sll.sll_protocol = protocol;
    sll.sll_ifindex = ifindex as libc::c_int;
    cvt(unsafe {
        libc::bind(
            fd.as_raw_fd(),
            (&sll as *const libc::sockaddr_ll).cast(),
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    })
    .with_context(|| format!("failed to bind packet socket to {iface}"))?;
    Ok(())
}

struct RxRing {
    base: NonNull<u8>,
    block_size: usize,
    block_count: usize,
    next: usize,
}

// The mapping is only touched through `&mut self` by the owning worker;
// shared references never read it.
unsafe impl Send for RxRing {}
unsafe impl Sync for RxRing {}

impl RxRing {
    fn map(fd: &OwnedFd, cfg: RingConfig) -> Result<Self> {
        let frame_nr = (cfg.block_size / cfg.frame_size)
            .checked_mul(cfg.block_count)
            .ok_or_else(|| anyhow!("ring frame count overflows"))?;
        let req = libc::tpacket_req3 {
            tp_block_size: cfg.block_size,
            tp_block_nr: cfg.block_count,
            tp_frame_size: cfg.frame_size,
            tp_frame_nr: frame_nr,
            tp_retire_blk_tov: cfg.block_timeout_ms,
            tp_sizeof_priv: 0,
            tp_feature_req_word: 0,
        };
        set_packet_opt(fd, libc::PACKET_RX_RING, &req)
            .context("failed to configure PACKET_RX_RING")?;

        let block_size = cfg.block_size as usize;
        let block_count = cfg.block_count as usize;
        let len = block_size
            .checked_mul(block_count)
            .ok_or_else(|| anyhow!("ring length overflows"))?;
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error()).context("failed to mmap PACKET_RX_RING");
        }
        let base = NonNull::new(addr.cast::<u8>()).ok_or_else(|| anyhow!("ring mapped at null"))?;

        Ok(Self {
            base,
            block_size,
            block_count,
            next: 0,
        })
    }

    fn take_block(&mut self, on_frame: &mut impl FnMut(&[u8], PacketType)) -> bool {
        let block = unsafe { self.base.as_ptr().add(self.next * self.block_size) };
        let desc = block.cast::<libc::tpacket_block_desc>();
        let status = unsafe { ptr::read_volatile(&raw const (*desc).hdr.bh1.block_status) };
        if status & libc::TP_STATUS_USER == 0 {
            return false;
        }
        fence(Ordering::Acquire);

        let (count, first) = unsafe {
            let hdr = &(*desc).hdr.bh1;
            (hdr.num_pkts, hdr.offset_to_first_pkt as usize)
        };
        let bytes = unsafe { slice::from_raw_parts(block.cast_const(), self.block_size) };
        walk_frames(bytes, first, count, on_frame);

        fence(Ordering::Release);
        unsafe {
            ptr::write_volatile(&raw mut (*desc).hdr.bh1.block_status, libc::TP_STATUS_KERNEL);
        }
        self.next = (self.next + 1) % self.block_count;
        true
    }
}

impl Drop for RxRing {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(
                self.base.as_ptr().cast(),
                self.block_size * self.block_count,
            );
        }
    }
}

/// Walks the frame chain of one retired block. Stops early at the first
/// header or payload that would run past the block.
fn walk_frames(
    block: &[u8],
    first: usize,
    count: u32,
    on_frame: &mut impl FnMut(&[u8], PacketType),
) {
    let mut offset = first;
    for _ in 0..count {
        let Some(hdr) = read_at::<libc::tpacket3_hdr>(block, offset) else {
            break;
        };
        let Some(sll) = read_at::<libc::sockaddr_ll>(block, offset + SLL_OFFSET) else {
            break;
        };
        let start = offset + usize::from(hdr.tp_mac);
        let Some(frame) = block.get(start..start + hdr.tp_snaplen as usize) else {
            break;
        };
        on_frame(frame, PacketType::from_raw(sll.sll_pkttype));

        if hdr.tp_next_offset == 0 {
            break;
        }
        offset += hdr.tp_next_offset as usize;
    }
}

fn read_at<T: Copy>(block: &[u8], offset: usize) -> Option<T> {
    let end = offset.checked_add(mem::size_of::<T>())?;
    let bytes = block.get(offset..end)?;
    Some(unsafe { ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_STRIDE: usize = 256;

    fn write_at<T>(block: &mut [u8], offset: usize, value: T) {
        assert!(offset + mem::size_of::<T>() <= block.len());
        unsafe { ptr::write_unaligned(block.as_mut_ptr().add(offset).cast::<T>(), value) }
    }

    /// Lays frames out the way the kernel does: header, link address, payload.
    fn fake_block(frames: &[(&[u8], u8)], chain_last: bool) -> (Vec<u8>, usize) {
        let first = 48;
        let mut block = vec![0u8; first + FRAME_STRIDE * frames.len()];
        for (i, (payload, pkttype)) in frames.iter().enumerate() {
            let offset = first + i * FRAME_STRIDE;
            let mac = SLL_OFFSET + mem::size_of::<libc::sockaddr_ll>();
            let mut hdr: libc::tpacket3_hdr = unsafe { mem::zeroed() };
            hdr.tp_snaplen = payload.len() as u32;
            hdr.tp_len = payload.len() as u32;
            hdr.tp_mac = mac as u16;
            hdr.tp_next_offset = if i + 1 < frames.len() || chain_last {
                FRAME_STRIDE as u32
            } else {
                0
            };
            write_at(&mut block, offset, hdr);

            let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
            sll.sll_pkttype = *pkttype;
            write_at(&mut block, offset + SLL_OFFSET, sll);

            block[offset + mac..offset + mac + payload.len()].copy_from_slice(payload);
        }
        (block, first)
    }

    fn collect(block: &[u8], first: usize, count: u32) -> Vec<(Vec<u8>, PacketType)> {
        let mut seen = Vec::new();
        walk_frames(block, first, count, &mut |frame, pkttype| {
            seen.push((frame.to_vec(), pkttype))
        });
        seen
    }

    #[test]
    fn walks_every_frame_with_its_packet_type() {
        let (block, first) = fake_block(
            &[
                (&b"first"[..], libc::PACKET_HOST),
                (&b"second"[..], libc::PACKET_OUTGOING),
            ],
            false,
        );
        let seen = collect(&block, first, 2);
        assert_eq!(
            seen,
            vec![
                (b"first".to_vec(), PacketType::Host),
                (b"second".to_vec(), PacketType::Outgoing),
            ]
        );
    }

    #[test]
    fn stops_at_block_boundary() {
        // The header claims a third frame that would sit past the end.
        let (block, first) = fake_block(
            &[(&b"a"[..], libc::PACKET_HOST), (&b"b"[..], libc::PACKET_HOST)],
            true,
        );
        assert_eq!(collect(&block, first, 3).len(), 2);
    }

    #[test]
    fn rejects_oversized_snaplen() {
        let (mut block, first) = fake_block(&[(&b"abc"[..], libc::PACKET_HOST)], false);
        let mut hdr: libc::tpacket3_hdr = read_at(&block, first).unwrap();
        hdr.tp_snaplen = u32::MAX / 2;
        write_at(&mut block, first, hdr);
        assert!(collect(&block, first, 1).is_empty());
    }

    #[test]
    fn default_ring_is_valid() {
        RingConfig::default().validate().unwrap();
        let bad = RingConfig {
            frame_size: 3000,
            ..RingConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn capture_can_move_into_a_spawned_task() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Capture>();
    }

    #[test]
    fn poll_reports_readiness_and_times_out() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (rx, tx) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        assert!(!poll_readable(rx.as_raw_fd(), Duration::from_millis(10)).unwrap());
        let written = unsafe { libc::write(tx.as_raw_fd(), b"x".as_ptr().cast(), 1) };
        assert_eq!(written, 1);
        assert!(poll_readable(rx.as_raw_fd(), Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn loopback_gateway_lists_local_addresses() {
        let gateway = gateway_for("lo").unwrap();
        assert!(gateway.is_local(Ipv4Addr::LOCALHOST));
        assert!(gateway_for("no-such-iface0").is_err());
    }
}
