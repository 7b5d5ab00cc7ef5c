//! Saves and restores a [`StreamStore`] as CSV (C8).

use crate::{
    codec,
    error::{Error, ErrorKind, Result},
    stream::StreamStore,
};
use std::{
    fs::File,
    io::{BufRead, BufReader, Write},
    path::Path,
};

/// Writes every Stream to `path`, one CSV line per packet, each Stream's
/// packets in order of receipt (`head` to `latest`), Streams in Store order.
pub fn dump(store: &StreamStore, path: impl AsRef<Path>) -> Result<()> {
    let mut file =
        File::create(path).map_err(|e| Error::with_message(ErrorKind::Csv("couldn't create dump file".into()), e.to_string()))?;

    for (_, stream) in store.streams() {
        for id in store.walk_chronological(stream) {
            let line = codec::to_csv_line(store.packet(id));
            writeln!(file, "{line}").map_err(|e| Error::with_message(ErrorKind::Csv("write failed".into()), e.to_string()))?;
        }
    }

    file.flush().map_err(|e| Error::with_message(ErrorKind::Csv("flush failed".into()), e.to_string()))?;
    Ok(())
}

/// Clears `store` and repopulates it by reading `path` line by line, decoding
/// each with [`codec::from_csv_line`] and re-admitting it.
pub fn load(store: &mut StreamStore, path: impl AsRef<Path>) -> Result<()> {
    let file =
        File::open(path).map_err(|e| Error::with_message(ErrorKind::Csv("couldn't open dump file".into()), e.to_string()))?;

    store.clear();

    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::with_message(ErrorKind::Csv("read failed".into()), e.to_string()))?;
        if line.is_empty() {
            continue;
        }
        let pkt = codec::from_csv_line(&line)?;
        store.admit(pkt)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressType;
    use crate::packet::{EnGa, Packet, Payload, Timeval};

    #[test]
    fn s8_csv_round_trips_through_a_file() {
        let mut store = StreamStore::new();
        for i in 0..3u8 {
            let pkt = Packet {
                recv_time: Timeval::new(i as i64, 0),
                bda: "AA:AA:AA:AA:AA:AA".parse().unwrap(),
                bda_type: AddressType::Random,
                rssi: -50 - i as i8,
                payload: Payload::EnGa(EnGa::new([i; 16], [i; 4])),
                older: None,
                newer: None,
            };
            store.admit(pkt).unwrap();
        }

        let dir = std::env::temp_dir().join(format!("enscan-persistence-test-{}.csv", std::process::id()));
        dump(&store, &dir).unwrap();

        let mut reloaded = StreamStore::new();
        load(&mut reloaded, &dir).unwrap();

        assert_eq!(reloaded.stream_count(), store.stream_count());
        let original_chain: Vec<_> =
            store.walk_chronological(store.stream(0)).map(|id| store.packet(id).clone()).collect();
        let reloaded_chain: Vec<_> =
            reloaded.walk_chronological(reloaded.stream(0)).map(|id| reloaded.packet(id).clone()).collect();
        assert_eq!(original_chain.len(), reloaded_chain.len());
        for (a, b) in original_chain.iter().zip(reloaded_chain.iter()) {
            assert_eq!(a.payload, b.payload);
            assert_eq!(a.rssi, b.rssi);
        }

        let _ = std::fs::remove_file(&dir);
    }

    #[test]
    fn load_missing_file_is_an_error_not_a_panic() {
        let mut store = StreamStore::new();
        assert!(load(&mut store, "/nonexistent/enscan-dump-path.csv").is_err());
    }
}
