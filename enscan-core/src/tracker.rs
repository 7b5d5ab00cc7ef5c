//! The merge engine (C6): joins Streams believed to be the same device
//! reappearing under a new Resolvable Private Address.

use crate::{
    bonding::BondingRegistry,
    metrics,
    packet::{PacketId, PacketKind},
    stream::StreamStore,
};

/// Handoff window: a newer Stream beginning more than this many seconds after
/// an older Stream's last packet is not considered a continuation.
const MAX_HANDOFF_SECS: i64 = 11;

/// Maximum tolerated difference between two Streams' average inter-arrival
/// gap, in seconds.
const MAX_CADENCE_DIFF_SECS: f64 = 0.050;

/// Maximum tolerated RSSI difference, in dBm.
const MAX_RSSI_DIFF: i32 = 20;

/// Runs merge passes until fixpoint (a pass performs zero merges) and returns
/// the total number of merges performed.
pub fn run_to_fixpoint(store: &mut StreamStore, bondings: &BondingRegistry) -> usize {
    let mut total = 0;
    loop {
        let merges = merge_pass(store, bondings);
        total += merges;
        if merges == 0 {
            break;
        }
    }
    total
}

/// One scan over every ordered pair of distinct Streams, merging at most once
/// per "older" Stream per pass (mirroring the reference's single `break` out
/// of the inner loop on a successful merge). Returns the number of merges
/// performed.
pub fn merge_pass(store: &mut StreamStore, bondings: &BondingRegistry) -> usize {
    metrics::recompute_all(store);

    let mut merges = 0;
    let stream_count = store.stream_count();

    for older_idx in 0..stream_count {
        let Some(last_pkt) = last_en_ga(store, older_idx) else { continue };

        for newer_idx in 0..stream_count {
            if newer_idx == older_idx {
                continue;
            }
            let Some(next_pkt) = earliest_en_ga(store, newer_idx) else { continue };

            let next = store.packet(next_pkt);
            let last = store.packet(last_pkt);

            let bonded = bondings
                .iter_with_irk()
                .any(|(_, irk)| crate::rpa::resolve(&next.bda, irk) && crate::rpa::resolve(&last.bda, irk));

            let rpa_gap = if bonded {
                None
            } else {
                match heuristic_match(store, older_idx, newer_idx, last_pkt, next_pkt) {
                    Some(gap) => gap,
                    None => continue,
                }
            };

            merge(store, older_idx, newer_idx, rpa_gap);
            merges += 1;
            break;
        }
    }

    merges
}

/// The most recent EN_GA packet in the Stream at `idx`, walking backward from
/// `latest` and stopping at the first EN_GA packet (skipping trailing
/// OTHER_ADV packets). `None` if the Stream is empty or has no EN_GA packet
/// at its tail end.
fn last_en_ga(store: &StreamStore, idx: usize) -> Option<PacketId> {
    let stream = store.stream(idx).clone();
    store.walk_reverse(&stream).find(|&id| store.packet(id).kind() == PacketKind::EnGa)
}

/// The earliest EN_GA packet in the Stream at `idx`: walks the whole chain
/// from `latest` backward, remembering the last EN_GA packet seen (i.e. the
/// one closest to `head`).
fn earliest_en_ga(store: &StreamStore, idx: usize) -> Option<PacketId> {
    let stream = store.stream(idx).clone();
    let mut found = None;
    for id in store.walk_reverse(&stream) {
        if store.packet(id).kind() == PacketKind::EnGa {
            found = Some(id);
        }
    }
    found
}

/// Evaluates the heuristic (no-bonding) predicate. Returns `Some(rpa_gap)` on
/// a match (`rpa_gap` is `None` unless both Streams have a set
/// `rpa_last_change`), `None` if the predicate fails.
fn heuristic_match(
    store: &StreamStore, older_idx: usize, newer_idx: usize, last_pkt: PacketId, next_pkt: PacketId,
) -> Option<Option<i64>> {
    let last = store.packet(last_pkt);
    let next = store.packet(next_pkt);

    if next.recv_time.diff_sec(&last.recv_time) < 0 {
        return None;
    }
    if next.recv_time.diff_sec(&last.recv_time) > MAX_HANDOFF_SECS {
        return None;
    }

    let older_avg = metrics::avg_gap_secs(store, older_idx)?;
    let newer_avg = metrics::avg_gap_secs(store, newer_idx)?;
    if (newer_avg - older_avg).abs() > MAX_CADENCE_DIFF_SECS {
        return None;
    }

    let older = store.stream(older_idx);
    let newer = store.stream(newer_idx);
    let rpa_gap = match (older.rpa_last_change, newer.rpa_last_change) {
        (Some(o), Some(n)) => {
            let gap = n.diff_usec(&o).unsigned_abs() as i64;
            // Reproduces the reference's rotation-window check verbatim,
            // including its empty-intersection bug: this conjunction can
            // never be true, so no (O, N) pair is ever rejected here. See
            // DESIGN.md for the decision to preserve rather than "fix" it.
            if gap > 910_000_000 && gap < 890_000_000 {
                return None;
            }
            Some(gap)
        }
        _ => None,
    };

    if (i32::from(next.rssi) - i32::from(last.rssi)).abs() > MAX_RSSI_DIFF {
        return None;
    }

    Some(rpa_gap)
}

/// Splices `older`'s packet chain in front of `newer`'s and zeroes `older`'s
/// slot so it becomes a reusable free Stream.
fn merge(store: &mut StreamStore, older_idx: usize, newer_idx: usize, rpa_gap: Option<i64>) {
    let older = store.stream(older_idx).clone();
    let newer_head = store.stream(newer_idx).head;

    if let (Some(newer_head), Some(older_latest)) = (newer_head, older.latest) {
        store.packet_mut(newer_head).older = Some(older_latest);
        store.packet_mut(older_latest).newer = Some(newer_head);
    }

    let older_rpa_last_change = older.rpa_last_change;
    let older_pkts = older.pkts;
    let older_gap_usum = older.pkt_gap_usum;
    let older_head = older.head;

    let newer = store.stream_mut(newer_idx);
    newer.head = older_head.or(newer.head);
    newer.pkts += older_pkts;
    newer.pkt_gap_usum += older_gap_usum;
    if let Some(gap) = rpa_gap {
        if gap != 0 {
            newer.rpa_interval_us = Some(gap);
        }
    }
    if let Some(change) = older_rpa_last_change {
        newer.rpa_last_change = Some(change);
    }

    store.free_stream(older_idx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, AddressType};
    use crate::bonding::Bonding;
    use crate::packet::{EnGa, Packet, Payload, Timeval};

    fn build_cadence_stream(store: &mut StreamStore, bda: &str, rpi: u8, aem: u8, start: i64, cadence_ms: i64, n: i64, rssi: i8) {
        for i in 0..n {
            let usec = (i * cadence_ms * 1000) % 1_000_000;
            let sec = start + (i * cadence_ms) / 1000;
            let pkt = Packet {
                recv_time: Timeval::new(sec, usec),
                bda: bda.parse().unwrap(),
                bda_type: AddressType::Random,
                rssi,
                payload: Payload::EnGa(EnGa::new([rpi; 16], [aem; 4])),
                older: None,
                newer: None,
            };
            store.admit(pkt).unwrap();
        }
    }

    #[test]
    fn s5_merges_across_rpa_rotation() {
        let mut store = StreamStore::new();
        build_cadence_stream(&mut store, "AA:AA:AA:AA:AA:AA", 1, 1, 0, 1000, 30, -60);
        build_cadence_stream(&mut store, "BB:BB:BB:BB:BB:BB", 2, 2, 31, 1000, 30, -62);

        let bondings = BondingRegistry::new();
        let merges = run_to_fixpoint(&mut store, &bondings);
        assert_eq!(merges, 1);

        let surviving: Vec<_> = store.streams().filter(|(_, s)| !s.is_free()).collect();
        assert_eq!(surviving.len(), 1);
        let (_, merged) = surviving[0];
        assert_eq!(store.chain_len(merged), 60);
    }

    #[test]
    fn s6_no_merge_on_cadence_mismatch() {
        let mut store = StreamStore::new();
        build_cadence_stream(&mut store, "AA:AA:AA:AA:AA:AA", 1, 1, 0, 1000, 30, -60);
        build_cadence_stream(&mut store, "BB:BB:BB:BB:BB:BB", 2, 2, 31, 200, 30, -62);

        let bondings = BondingRegistry::new();
        let merges = run_to_fixpoint(&mut store, &bondings);
        assert_eq!(merges, 0);
    }

    #[test]
    fn s7_bonded_merge_overrides_heuristic() {
        let mut store = StreamStore::new();
        build_cadence_stream(&mut store, "AA:AA:AA:AA:AA:AA", 1, 1, 0, 1000, 30, -60);
        build_cadence_stream(&mut store, "BB:BB:BB:BB:BB:BB", 2, 2, 31, 200, 30, -62);

        let mut bondings = BondingRegistry::new();
        // An IRK that, per the resolver's algorithm, resolves both addresses
        // used above is impractical to derive by hand; instead we exercise
        // the bonded path's indifference to cadence by using addresses that
        // are not resolvable at all (so the registry never actually has a
        // matching IRK) would defeat the test's purpose. We instead insert a
        // bonding with an IRK and directly assert the heuristic path would
        // have rejected this pair, then verify the bonded branch is the one
        // that short-circuits by constructing resolvable addresses whose
        // prand/hash match a known IRK.
        let irk = [0x11u8; 16];
        let (bda_a, bda_b) = resolving_pair(&irk);
        store.clear();
        build_cadence_stream(&mut store, &bda_a.to_string(), 1, 1, 0, 1000, 30, -60);
        build_cadence_stream(&mut store, &bda_b.to_string(), 2, 2, 31, 200, 30, -62);
        bondings.upsert(Bonding { name: "dev".into(), bda_public: None, irk: Some(irk) });

        let merges = run_to_fixpoint(&mut store, &bondings);
        assert_eq!(merges, 1);
    }

    /// Derives two addresses that both resolve against `irk`, by brute-forcing
    /// the 24-bit prand for a fixed target hash until the encryption matches.
    /// Keeps the test self-contained without hand-computed AES vectors.
    fn resolving_pair(irk: &[u8; 16]) -> (Address, Address) {
        use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
        let cipher = aes::Aes128::new(GenericArray::from_slice(irk));
        let mut addrs = Vec::new();
        let mut prand: u32 = 1;
        while addrs.len() < 2 {
            prand += 1;
            let p = prand.to_be_bytes();
            let mut block = [0u8; 16];
            block[13] = p[1];
            block[14] = p[2];
            block[15] = p[3];
            let mut out = GenericArray::clone_from_slice(&block);
            cipher.encrypt_block(&mut out);
            if p[1] & 0xC0 != 0x40 {
                continue;
            }
            let addr = Address::new([p[1], p[2], p[3], out[13], out[14], out[15]]);
            addrs.push(addr);
        }
        (addrs[0], addrs[1])
    }
}
