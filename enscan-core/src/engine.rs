//! The process-lifetime owner of every other component (C10).

use crate::{
    bonding::BondingRegistry,
    codec::{self, RawReport},
    error::{Error, ErrorKind, Result},
    hci::ReportSource,
    metrics, persistence, reporter, stream::StreamStore, tracker,
};
use std::sync::{atomic::AtomicBool, Arc};

/// Owns the Bonding Registry, the Stream Store, and (once selected) the open
/// HCI device, for the lifetime of one CLI process.
///
/// There is exactly one `Engine` per process; every command handler borrows
/// it mutably for the duration of its call. No part of this crate reaches for
/// process-wide global state.
pub struct Engine<D: ReportSource> {
    device: Option<D>,
    bondings: BondingRegistry,
    store: StreamStore,
    /// RPI bytes staged by `ga_rpi`, used by the next `beacon` call.
    pending_rpi: [u8; 16],
    /// AEM bytes staged by `ga_aem`, used by the next `beacon` call.
    pending_aem: [u8; 4],
}

impl<D: ReportSource> Default for Engine<D> {
    fn default() -> Self {
        Self { device: None, bondings: BondingRegistry::new(), store: StreamStore::new(), pending_rpi: [0; 16], pending_aem: [0; 4] }
    }
}

impl<D: ReportSource> Engine<D> {
    /// A fresh Engine with no device selected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts an already-open device (used by the CLI's `dev` handler and by tests).
    pub fn set_device(&mut self, device: D) {
        self.device = Some(device);
    }

    /// Borrows the open device, if one has been selected.
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> Result<&mut D> {
        self.device.as_mut().ok_or_else(|| Error::new(ErrorKind::NoDeviceSelected))
    }

    /// Sets the bytes used for the next synthesised EN beacon's RPI.
    pub fn set_pending_rpi(&mut self, rpi: [u8; 16]) {
        self.pending_rpi = rpi;
    }

    /// Sets the bytes used for the next synthesised EN beacon's AEM.
    pub fn set_pending_aem(&mut self, aem: [u8; 4]) {
        self.pending_aem = aem;
    }

    /// The RPI bytes staged for the next `beacon` call.
    pub fn pending_rpi(&self) -> &[u8; 16] {
        &self.pending_rpi
    }

    /// The AEM bytes staged for the next `beacon` call.
    pub fn pending_aem(&self) -> &[u8; 4] {
        &self.pending_aem
    }

    pub fn bondings(&self) -> &BondingRegistry {
        &self.bondings
    }

    pub fn bondings_mut(&mut self) -> &mut BondingRegistry {
        &mut self.bondings
    }

    pub fn store(&self) -> &StreamStore {
        &self.store
    }

    /// Sets the device's random address (`lerandaddr`).
    pub fn set_random_address(&mut self, addr: crate::address::Address) -> Result<()> {
        self.device_mut()?.set_random_address(addr)
    }

    /// Transmits the staged RPI/AEM as an EN beacon until cancelled (`beacon`).
    pub fn beacon(&mut self, cancel: &Arc<AtomicBool>) -> Result<()> {
        let en = crate::packet::EnGa::new(self.pending_rpi, self.pending_aem);
        let payload = codec::encode_beacon(&en);

        let device = self.device_mut()?;
        device.set_advertise(true, &payload)?;
        while !cancel.load(std::sync::atomic::Ordering::Relaxed) {
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
        device.set_advertise(false, &[])
    }

    /// Scans until cancelled, admitting every decoded report (`scan`).
    pub fn scan(&mut self, cancel: &Arc<AtomicBool>) -> Result<()> {
        let store = &mut self.store;
        let device = self.device.as_mut().ok_or_else(|| Error::new(ErrorKind::NoDeviceSelected))?;

        device.set_scan_enable(true)?;
        let result = device.read_reports(cancel, &mut |report: RawReport<'_>| {
            let pkt = codec::decode(&report);
            if let Err(e) = store.admit(pkt) {
                log::warn!("dropping report: {e}");
            }
        });
        device.set_scan_enable(false)?;
        result
    }

    /// Runs the merge engine to fixpoint and returns the number of merges performed (`track`).
    pub fn track(&mut self) -> usize {
        tracker::run_to_fixpoint(&mut self.store, &self.bondings)
    }

    /// Recomputes per-Stream metrics without running merges.
    pub fn recompute_metrics(&mut self) {
        metrics::recompute_all(&mut self.store);
    }

    /// Enumerates distinct EN identities seen so far (for `track` with no flags).
    pub fn sightings(&self) -> Vec<reporter::Sighting> {
        reporter::sightings(&self.store)
    }

    /// Writes the Stream Store to `path` (`track --dump`).
    pub fn dump(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        persistence::dump(&self.store, path)
    }

    /// Replaces the Stream Store with the contents of `path` (`track --load`).
    pub fn load(&mut self, path: impl AsRef<std::path::Path>) -> Result<()> {
        persistence::load(&mut self.store, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressType;
    use crate::hci::ReplaySource;
    use crate::packet::Timeval;

    #[test]
    fn scan_admits_decoded_reports() {
        let mut engine: Engine<ReplaySource> = Engine::new();
        let mut src = ReplaySource::new();
        let mut payload = vec![0x03, 0x03, 0x6F, 0xFD, 0x17, 0x16, 0x6F, 0xFD];
        payload.extend_from_slice(&[0x01; 16]);
        payload.extend_from_slice(&[0x02; 4]);
        src.push("AA:BB:CC:DD:EE:FF".parse().unwrap(), AddressType::Random, payload, -60, Timeval::new(1, 0));
        engine.set_device(src);

        let cancel = Arc::new(AtomicBool::new(false));
        engine.scan(&cancel).unwrap();
        assert_eq!(engine.store().stream_count(), 1);
    }

    #[test]
    fn beacon_without_a_device_is_an_error() {
        let mut engine: Engine<ReplaySource> = Engine::new();
        let cancel = Arc::new(AtomicBool::new(true));
        let err = engine.beacon(&cancel).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NoDeviceSelected));
    }

    #[test]
    fn beacon_transmits_staged_rpi_and_aem() {
        let mut engine: Engine<ReplaySource> = Engine::new();
        engine.set_device(ReplaySource::new());
        engine.set_pending_rpi([0xAB; 16]);
        engine.set_pending_aem([0xCD; 4]);

        let cancel = Arc::new(AtomicBool::new(true));
        engine.beacon(&cancel).unwrap();

        let device = engine.device().unwrap();
        assert_eq!(device.transmitted().len(), 1);
    }
}
