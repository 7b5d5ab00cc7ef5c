//! Linux raw HCI socket transport (C9).
//!
//! Talks directly to a Bluetooth controller over `AF_BLUETOOTH`/`BTPROTO_HCI`,
//! the same raw-socket interface `hcitool`/`bluetoothd` use, without linking
//! against `libbluetooth`.

use crate::{
    address::{Address, AddressType},
    codec::RawReport,
    error::{Error, ErrorKind, Result},
    packet::Timeval,
};
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Anything that can deliver a stream of raw advertising reports and accept a
/// synthetic beacon payload to transmit.
///
/// Exists so the tracker/engine layer and its tests don't have to talk to a
/// real adapter: [`ReplaySource`] implements this in memory.
pub trait ReportSource {
    /// The address this source is currently using, if known.
    fn address(&self) -> Option<Address>;

    /// Sets the device's random (LE) address.
    fn set_random_address(&mut self, addr: Address) -> Result<()>;

    /// Enables or disables passive LE scanning.
    fn set_scan_enable(&mut self, enable: bool) -> Result<()>;

    /// Sets the advertising payload and enables or disables LE advertising.
    fn set_advertise(&mut self, enable: bool, payload: &[u8]) -> Result<()>;

    /// Blocks reading advertising reports and invoking `on_report` for each,
    /// until `cancel` is set or the source is exhausted. Reports that are not
    /// Exposure Notification beacons are still delivered; callers classify.
    fn read_reports(&mut self, cancel: &Arc<AtomicBool>, on_report: &mut dyn FnMut(RawReport<'_>)) -> Result<()>;
}

#[cfg(target_os = "linux")]
pub use linux::{list_devices, HciSocket};

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use libc::{c_int, c_ushort, sa_family_t, sockaddr, socklen_t};
    use std::{
        mem::size_of,
        os::unix::io::RawFd,
        time::{SystemTime, UNIX_EPOCH},
    };

    const AF_BLUETOOTH: c_int = 31;
    const BTPROTO_HCI: c_int = 1;
    const SOL_HCI: c_int = 0;
    const HCI_FILTER: c_int = 2;
    const HCI_CHANNEL_RAW: c_ushort = 0;

    const HCI_COMMAND_PKT: u8 = 0x01;
    const HCI_EVENT_PKT: u8 = 0x04;
    const EVT_LE_META_EVENT: u8 = 0x3E;
    const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

    const OGF_LE_CTL: u16 = 0x08;
    const OCF_LE_SET_RANDOM_ADDRESS: u16 = 0x0005;
    const OCF_LE_SET_ADVERTISING_PARAMETERS: u16 = 0x0006;
    const OCF_LE_SET_ADVERTISING_DATA: u16 = 0x0008;
    const OCF_LE_SET_ADVERTISE_ENABLE: u16 = 0x000A;
    const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
    const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

    /// A raw HCI device file descriptor, closed on drop.
    ///
    /// Mirrors the `OwnedFd` RAII pattern used elsewhere in this crate for
    /// socket file descriptors.
    struct OwnedFd(RawFd);

    impl Drop for OwnedFd {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.0);
            }
        }
    }

    #[repr(C)]
    struct SockaddrHci {
        hci_family: sa_family_t,
        hci_dev: c_ushort,
        hci_channel: c_ushort,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct HciFilter {
        type_mask: u32,
        event_mask: [u32; 2],
        opcode: u16,
    }

    fn opcode(ogf: u16, ocf: u16) -> u16 {
        (ogf << 10) | ocf
    }

    fn check_transport(ret: c_int, what: &'static str) -> Result<c_int> {
        if ret < 0 {
            Err(Error::new(ErrorKind::Transport(format!("{what}: {}", std::io::Error::last_os_error()))))
        } else {
            Ok(ret)
        }
    }

    fn check_device(ret: c_int, what: &'static str) -> Result<c_int> {
        if ret < 0 {
            Err(Error::new(ErrorKind::Device(format!("{what}: {}", std::io::Error::last_os_error()))))
        } else {
            Ok(ret)
        }
    }

    const HCIGETDEVLIST: libc::c_ulong = 0x800448d2;
    const HCIGETDEVINFO: libc::c_ulong = 0x800448d3;
    const HCI_MAX_DEV: usize = 16;

    #[repr(C)]
    struct HciDevReq {
        dev_id: u16,
        dev_opt: u32,
    }

    #[repr(C)]
    struct HciDevListReq {
        dev_num: u16,
        dev_req: [HciDevReq; HCI_MAX_DEV],
    }

    #[repr(C)]
    struct HciDevStats {
        err_rx: u32,
        err_tx: u32,
        cmd_tx: u32,
        evt_rx: u32,
        acl_tx: u32,
        acl_rx: u32,
        sco_tx: u32,
        sco_rx: u32,
        byte_rx: u32,
        byte_tx: u32,
    }

    #[repr(C)]
    struct HciDevInfo {
        dev_id: u16,
        name: [u8; 8],
        bdaddr: [u8; 6],
        flags: u32,
        dev_type: u8,
        features: [u8; 8],
        pkt_type: u32,
        link_policy: u32,
        link_mode: u32,
        acl_mtu: u16,
        acl_pkts: u16,
        sco_mtu: u16,
        sco_pkts: u16,
        stat: HciDevStats,
    }

    /// Queries `HCIGETDEVINFO` for `dev_id`, returning its name and public address.
    fn device_info(fd: RawFd, dev_id: u16) -> Result<(String, Address)> {
        let mut info: HciDevInfo = unsafe { std::mem::zeroed() };
        info.dev_id = dev_id;
        let ret = unsafe { libc::ioctl(fd, HCIGETDEVINFO as _, &mut info as *mut HciDevInfo) };
        check_device(ret, "ioctl(HCIGETDEVINFO)")?;

        let name_len = info.name.iter().position(|&b| b == 0).unwrap_or(info.name.len());
        let name = String::from_utf8_lossy(&info.name[..name_len]).into_owned();
        let mut addr = info.bdaddr;
        addr.reverse();
        Ok((name, Address::new(addr)))
    }

    /// Enumerates every adapter known to the kernel via `HCIGETDEVLIST`.
    pub fn list_devices() -> Result<Vec<(u16, String, Address)>> {
        let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_RAW | libc::SOCK_CLOEXEC, BTPROTO_HCI) };
        check_device(fd, "socket(AF_BLUETOOTH, SOCK_RAW, BTPROTO_HCI)")?;
        let fd = OwnedFd(fd);

        let mut req: HciDevListReq = unsafe { std::mem::zeroed() };
        req.dev_num = HCI_MAX_DEV as u16;
        let ret = unsafe { libc::ioctl(fd.0, HCIGETDEVLIST as _, &mut req as *mut HciDevListReq) };
        check_device(ret, "ioctl(HCIGETDEVLIST)")?;

        let mut out = Vec::new();
        for dev_req in &req.dev_req[..req.dev_num as usize] {
            if let Ok((name, addr)) = device_info(fd.0, dev_req.dev_id) {
                out.push((dev_req.dev_id, name, addr));
            }
        }
        Ok(out)
    }

    /// A raw HCI socket bound to one adapter (`hciN`, `dev_id = N`).
    pub struct HciSocket {
        fd: OwnedFd,
        dev_id: u16,
        address: Option<Address>,
    }

    impl HciSocket {
        /// Opens the given adapter (`hci0`, `hci1`, ...) in raw mode.
        pub fn open(dev_id: u16) -> Result<Self> {
            let fd = unsafe { libc::socket(AF_BLUETOOTH, libc::SOCK_RAW | libc::SOCK_CLOEXEC, BTPROTO_HCI) };
            check_device(fd, "socket(AF_BLUETOOTH, SOCK_RAW, BTPROTO_HCI)")?;
            let fd = OwnedFd(fd);

            let addr = SockaddrHci { hci_family: AF_BLUETOOTH as sa_family_t, hci_dev: dev_id, hci_channel: HCI_CHANNEL_RAW };
            let ret = unsafe {
                libc::bind(fd.0, &addr as *const SockaddrHci as *const sockaddr, size_of::<SockaddrHci>() as socklen_t)
            };
            check_device(ret, "bind HCI socket")?;

            let address = device_info(fd.0, dev_id).ok().map(|(_, addr)| addr);
            debug!("opened hci{dev_id} raw socket");
            Ok(Self { fd, dev_id, address })
        }

        /// Opens the first available adapter, `hci0`.
        pub fn open_default() -> Result<Self> {
            Self::open(0)
        }

        /// Opens an adapter named `hciN`, parsing `N` from `name`.
        pub fn open_named(name: &str) -> Result<Self> {
            let dev_id: u16 = name
                .strip_prefix("hci")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| Error::new(ErrorKind::Device(format!("not a device name: {name}"))))?;
            Self::open(dev_id)
        }

        /// This adapter's index and name (`hciN`).
        pub fn dev_id(&self) -> u16 {
            self.dev_id
        }

        fn send_command(&self, ocf: u16, params: &[u8]) -> Result<()> {
            let op = opcode(OGF_LE_CTL, ocf).to_le_bytes();
            let mut buf = Vec::with_capacity(4 + params.len());
            buf.push(HCI_COMMAND_PKT);
            buf.extend_from_slice(&op);
            buf.push(params.len() as u8);
            buf.extend_from_slice(params);

            let ret = unsafe { libc::write(self.fd.0, buf.as_ptr() as *const libc::c_void, buf.len()) };
            check_transport(ret as c_int, "write HCI command")?;
            trace!("sent HCI command ocf={ocf:#06x} params={params:02x?}");
            Ok(())
        }

        fn set_event_filter(&self) -> Result<HciFilter> {
            let mut old = HciFilter { type_mask: 0, event_mask: [0, 0], opcode: 0 };
            let mut len = size_of::<HciFilter>() as socklen_t;
            let ret = unsafe {
                libc::getsockopt(self.fd.0, SOL_HCI, HCI_FILTER, &mut old as *mut HciFilter as *mut libc::c_void, &mut len)
            };
            check_transport(ret, "getsockopt(HCI_FILTER)")?;

            let new = HciFilter {
                type_mask: 1 << HCI_EVENT_PKT,
                event_mask: [1u32 << (EVT_LE_META_EVENT % 32), 0],
                opcode: 0,
            };
            let ret = unsafe {
                libc::setsockopt(
                    self.fd.0,
                    SOL_HCI,
                    HCI_FILTER,
                    &new as *const HciFilter as *const libc::c_void,
                    size_of::<HciFilter>() as socklen_t,
                )
            };
            check_transport(ret, "setsockopt(HCI_FILTER)")?;
            Ok(old)
        }

        fn restore_filter(&self, old: HciFilter) {
            unsafe {
                libc::setsockopt(
                    self.fd.0,
                    SOL_HCI,
                    HCI_FILTER,
                    &old as *const HciFilter as *const libc::c_void,
                    size_of::<HciFilter>() as socklen_t,
                );
            }
        }
    }

    impl ReportSource for HciSocket {
        fn address(&self) -> Option<Address> {
            self.address
        }

        fn set_random_address(&mut self, addr: Address) -> Result<()> {
            let mut params = [0u8; 6];
            params.copy_from_slice(&addr.0);
            params.reverse();
            self.send_command(OCF_LE_SET_RANDOM_ADDRESS, &params)?;
            self.address = Some(addr);
            Ok(())
        }

        fn set_scan_enable(&mut self, enable: bool) -> Result<()> {
            if enable {
                // type=passive, interval=window=0x0010 (10ms), own_type=random, filter=accept-all
                self.send_command(OCF_LE_SET_SCAN_PARAMETERS, &[0x00, 0x10, 0x00, 0x10, 0x00, 0x01, 0x00])?;
            }
            self.send_command(OCF_LE_SET_SCAN_ENABLE, &[enable as u8, 0x00])
        }

        fn set_advertise(&mut self, enable: bool, payload: &[u8]) -> Result<()> {
            if enable {
                // min/max interval 0x0800 (1.28s), non-connectable undirected, all channels, random own address
                let mut params = vec![0x00, 0x08, 0x00, 0x08, 0x03, 0x00, 0x01, 0x00];
                params.extend_from_slice(&[0u8; 6]); // direct_bdaddr, unused for non-directed advertising
                params.push(0x07); // chan_map: all three advertising channels
                params.push(0x00); // filter policy: accept all
                self.send_command(OCF_LE_SET_ADVERTISING_PARAMETERS, &params)?;

                let mut data = [0u8; 31];
                data[..payload.len().min(31)].copy_from_slice(&payload[..payload.len().min(31)]);
                let mut adv_data_params = Vec::with_capacity(32);
                adv_data_params.push(payload.len() as u8);
                adv_data_params.extend_from_slice(&data);
                self.send_command(OCF_LE_SET_ADVERTISING_DATA, &adv_data_params)?;
            }
            self.send_command(OCF_LE_SET_ADVERTISE_ENABLE, &[enable as u8])
        }

        fn read_reports(&mut self, cancel: &Arc<AtomicBool>, on_report: &mut dyn FnMut(RawReport<'_>)) -> Result<()> {
            let old_filter = self.set_event_filter()?;
            let mut buf = [0u8; 260];

            while !cancel.load(Ordering::Relaxed) {
                let n = unsafe { libc::read(self.fd.0, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
                if n < 0 {
                    let err = std::io::Error::last_os_error();
                    if err.kind() == std::io::ErrorKind::Interrupted || err.kind() == std::io::ErrorKind::WouldBlock {
                        continue;
                    }
                    self.restore_filter(old_filter);
                    return Err(Error::new(ErrorKind::Transport(format!("read HCI event: {err}"))));
                }
                let n = n as usize;
                if n < 1 + 2 {
                    continue;
                }
                if buf[0] != HCI_EVENT_PKT || buf[1] != EVT_LE_META_EVENT {
                    continue;
                }

                let param_len = buf[2] as usize;
                let meta = &buf[3..3 + param_len.min(n - 3)];
                if meta.is_empty() || meta[0] != EVT_LE_ADVERTISING_REPORT {
                    continue;
                }

                parse_advertising_reports(&meta[1..], on_report);
            }

            self.restore_filter(old_filter);
            Ok(())
        }
    }

    /// Parses the bluez-layout LE advertising report list (`num_reports`
    /// followed by that many `{event_type, addr_type, bdaddr[6], length,
    /// data[length], rssi}` records) and invokes `on_report` for each.
    fn parse_advertising_reports(mut data: &[u8], on_report: &mut dyn FnMut(RawReport<'_>)) {
        if data.is_empty() {
            return;
        }
        let mut num_reports = data[0];
        data = &data[1..];

        let recv_time = now();

        while num_reports > 0 && data.len() >= 2 + 6 + 1 {
            let addr_type = if data[1] == 0 { AddressType::Public } else { AddressType::Random };
            let mut raw_bda: [u8; 6] = data[2..8].try_into().unwrap();
            raw_bda.reverse();
            let bda = Address::new(raw_bda);

            let length = data[8] as usize;
            if data.len() < 9 + length + 1 {
                warn!("truncated LE advertising report, dropping remainder of event");
                break;
            }
            let payload = &data[9..9 + length];
            let rssi = data[9 + length] as i8;

            on_report(RawReport { bda, bda_type: addr_type, payload, rssi, recv_time });

            data = &data[9 + length + 1..];
            num_reports -= 1;
        }
    }

    fn now() -> Timeval {
        let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Timeval::new(d.as_secs() as i64, d.subsec_micros() as i64)
    }
}

/// In-memory [`ReportSource`] that replays a fixed list of reports, for tests
/// and for exercising the engine without a real adapter.
#[derive(Default)]
pub struct ReplaySource {
    address: Option<Address>,
    pending: std::collections::VecDeque<(Address, AddressType, Vec<u8>, i8, Timeval)>,
    transmitted: Vec<Vec<u8>>,
}

impl ReplaySource {
    /// An empty replay source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one report to be delivered on the next [`ReportSource::read_reports`] call.
    pub fn push(&mut self, bda: Address, bda_type: AddressType, payload: Vec<u8>, rssi: i8, recv_time: Timeval) {
        self.pending.push_back((bda, bda_type, payload, rssi, recv_time));
    }

    /// Payloads handed to [`ReportSource::set_advertise`] while enabling, in call order.
    pub fn transmitted(&self) -> &[Vec<u8>] {
        &self.transmitted
    }
}

impl ReportSource for ReplaySource {
    fn address(&self) -> Option<Address> {
        self.address
    }

    fn set_random_address(&mut self, addr: Address) -> Result<()> {
        self.address = Some(addr);
        Ok(())
    }

    fn set_scan_enable(&mut self, _enable: bool) -> Result<()> {
        Ok(())
    }

    fn set_advertise(&mut self, enable: bool, payload: &[u8]) -> Result<()> {
        if enable {
            self.transmitted.push(payload.to_vec());
        }
        Ok(())
    }

    fn read_reports(&mut self, cancel: &Arc<AtomicBool>, on_report: &mut dyn FnMut(RawReport<'_>)) -> Result<()> {
        while let Some((bda, bda_type, payload, rssi, recv_time)) = self.pending.pop_front() {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            on_report(RawReport { bda, bda_type, payload: &payload, rssi, recv_time });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn replay_source_decodes_queued_reports() {
        let mut src = ReplaySource::new();
        let mut payload = vec![0x03, 0x03, 0x6F, 0xFD, 0x17, 0x16, 0x6F, 0xFD];
        payload.extend_from_slice(&[0x11; 16]);
        payload.extend_from_slice(&[0x22; 4]);
        src.push("AA:BB:CC:DD:EE:FF".parse().unwrap(), AddressType::Random, payload, -55, Timeval::new(1, 0));

        let cancel = Arc::new(AtomicBool::new(false));
        let mut seen = 0;
        src.read_reports(&cancel, &mut |report| {
            let pkt = codec::decode(&report);
            assert!(pkt.en_ga().is_some());
            seen += 1;
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn set_advertise_records_transmitted_payload() {
        let mut src = ReplaySource::new();
        src.set_advertise(true, &[1, 2, 3]).unwrap();
        src.set_advertise(false, &[]).unwrap();
        assert_eq!(src.transmitted(), &[vec![1, 2, 3]]);
    }
}
