//! Derived per-Stream metrics (C5).

use crate::stream::StreamStore;

/// Inter-arrival gaps longer than this are excluded from the sum and count:
/// the BLE maximum advertising interval (10.24 s), used as the cutoff beyond
/// which a gap more likely reflects a session break than steady advertising.
pub const MAX_GAP_USEC: u64 = 10_240_000;

/// Recomputes `pkts` and `pkt_gap_usum` for every Stream in the Store, from
/// scratch, by walking each chain backward from `latest` via `older`.
pub fn recompute_all(store: &mut StreamStore) {
    for idx in 0..store.stream_count() {
        recompute_one(store, idx);
    }
}

/// Recomputes metrics for a single Stream by its positional index.
///
/// Mirrors the reference's `ble_stream_meta` exactly: walking from `latest`
/// backward to `head`, each consecutive pair contributes its gap to the sum
/// *and* to `pkts` only if the gap does not exceed [`MAX_GAP_USEC`]. `pkts`
/// therefore counts qualifying inter-arrival gaps, not Stream nodes — for a
/// chain of `n` packets with no excluded gaps, `pkts == n - 1`. Use
/// [`crate::stream::StreamStore::walk_chronological`] (or its `count()`) when
/// the actual number of packets in a Stream is wanted.
pub fn recompute_one(store: &mut StreamStore, idx: usize) {
    let stream = store.stream(idx).clone();
    let ids: Vec<_> = store.walk_reverse(&stream).collect();

    let mut pkts = 0u64;
    let mut gap_usum = 0u64;
    for pair in ids.windows(2) {
        let newer = store.packet(pair[0]).recv_time;
        let older = store.packet(pair[1]).recv_time;
        let gap = newer.diff_usec(&older);
        if gap < 0 || gap as u64 > MAX_GAP_USEC {
            continue;
        }
        gap_usum += gap as u64;
        pkts += 1;
    }

    let s = store.stream_mut(idx);
    s.pkts = pkts;
    s.pkt_gap_usum = gap_usum;
}

/// Average inter-arrival gap, in seconds, or `None` if no gap qualified.
///
/// `pkts` counts qualifying gaps (see [`recompute_one`]), so the average is
/// simply `pkt_gap_usum / pkts`.
pub fn avg_gap_secs(store: &StreamStore, idx: usize) -> Option<f64> {
    let s = store.stream(idx);
    if s.pkts == 0 {
        return None;
    }
    Some((s.pkt_gap_usum as f64 / s.pkts as f64) / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressType;
    use crate::packet::{EnGa, Packet, Payload, Timeval};

    fn push(store: &mut StreamStore, sec: i64, usec: i64) {
        let pkt = Packet {
            recv_time: Timeval::new(sec, usec),
            bda: "AA:AA:AA:AA:AA:AA".parse().unwrap(),
            bda_type: AddressType::Random,
            rssi: -50,
            payload: Payload::EnGa(EnGa::new([1; 16], [1; 4])),
            older: None,
            newer: None,
        };
        store.admit(pkt).unwrap();
    }

    #[test]
    fn gap_of_exactly_cutoff_is_included() {
        let mut store = StreamStore::new();
        push(&mut store, 0, 0);
        push(&mut store, 10, 240_000);
        recompute_all(&mut store);
        let s = store.stream(0);
        assert_eq!(s.pkts, 1);
        assert_eq!(s.pkt_gap_usum, MAX_GAP_USEC);
    }

    #[test]
    fn gap_one_usec_over_cutoff_is_excluded() {
        let mut store = StreamStore::new();
        push(&mut store, 0, 0);
        push(&mut store, 10, 240_001);
        recompute_all(&mut store);
        let s = store.stream(0);
        assert_eq!(s.pkt_gap_usum, 0);
        assert_eq!(s.pkts, 0);
    }

    #[test]
    fn gap_one_usec_under_cutoff_is_included() {
        let mut store = StreamStore::new();
        push(&mut store, 0, 0);
        push(&mut store, 10, 239_999);
        recompute_all(&mut store);
        let s = store.stream(0);
        assert_eq!(s.pkt_gap_usum, 10_239_999);
        assert_eq!(s.pkts, 1);
    }
}
