// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference command-line driver.
//!
//! ```text
//! driver -p|-s [-h <hex-id>] [-c <cid>] [-u] [-C <n>] [-S <mcaddr:port>]
//!        [-G <addr:port,...>] [-M <addr:port,...>] [-X <pct>]
//! ```
//!
//! Exit codes: 0 normal, 1 usage error, 2 transport/address error.

use pico_pubsub::config;
use pico_pubsub::engine::{Config, Engine};
use pico_pubsub::entropy::{Entropy, StdEntropy};
use pico_pubsub::time::{Clock, StdClock};
use pico_pubsub::transport::{DroppingTransport, StdUdpTransport, UdpAddr};
use pico_pubsub::wire::types::{ConduitId, PeerId, ResourceId, SubMode};

struct Args {
    publisher: bool,
    subscriber: bool,
    hex_id: Option<String>,
    conduit: u8,
    best_effort: bool,
    report_every: u32,
    scout_addr: UdpAddr,
    joined_groups: Vec<UdpAddr>,
    mconduit_dests: Vec<UdpAddr>,
    drop_pct: f64,
}

fn parse_addr(s: &str) -> Option<UdpAddr> {
    let (ip, port) = s.split_once(':')?;
    let port: u16 = port.parse().ok()?;
    let octets: Vec<u8> = ip.split('.').filter_map(|p| p.parse().ok()).collect();
    if octets.len() != 4 {
        return None;
    }
    Some(UdpAddr::new([octets[0], octets[1], octets[2], octets[3]], port))
}

fn parse_addr_list(s: &str) -> Option<Vec<UdpAddr>> {
    s.split(',').map(parse_addr).collect()
}

fn parse_args() -> Result<Args, ()> {
    let mut args = Args {
        publisher: false,
        subscriber: false,
        hex_id: None,
        conduit: 0,
        best_effort: false,
        report_every: 1,
        scout_addr: UdpAddr::new([239, 255, 0, 1], 17400),
        joined_groups: Vec::new(),
        mconduit_dests: Vec::new(),
        drop_pct: 0.0,
    };
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        match flag.as_str() {
            "-p" => args.publisher = true,
            "-s" => args.subscriber = true,
            "-h" => args.hex_id = Some(it.next().ok_or(())?),
            "-c" => args.conduit = it.next().ok_or(())?.parse().map_err(|_| ())?,
            "-u" => args.best_effort = true,
            "-C" => args.report_every = it.next().ok_or(())?.parse().map_err(|_| ())?,
            "-S" => args.scout_addr = parse_addr(&it.next().ok_or(())?).ok_or(())?,
            "-G" => args.joined_groups = parse_addr_list(&it.next().ok_or(())?).ok_or(())?,
            "-M" => args.mconduit_dests = parse_addr_list(&it.next().ok_or(())?).ok_or(())?,
            "-X" => args.drop_pct = it.next().ok_or(())?.parse::<f64>().map_err(|_| ())? / 100.0,
            _ => return Err(()),
        }
    }
    if args.publisher == args.subscriber {
        return Err(());
    }
    Ok(args)
}

fn parse_hex_id(s: &str) -> Option<PeerId> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut bytes = heapless::Vec::<u8, 16>::new();
    for chunk in s.as_bytes().chunks(2) {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        bytes.push((hi as u8) << 4 | lo as u8).ok()?;
    }
    PeerId::from_slice(&bytes).ok()
}

// Out-of-order tracking is deliberately a demo-level concern, not
// something the engine's own telemetry can generalize: it only makes
// sense once the payload is interpreted as the synthetic `u32` sample
// counter this driver and its peer write, the same way the reference
// driver's subscribe callback does it. `Handler` is a plain fn pointer
// with no captured state, so the running counters live in statics,
// mirroring how `tests/scenarios.rs` threads counters through `arg`.
static SAMPLES_SEEN: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
static LAST_K: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
static OOOC: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

fn sample_handler(arg: usize, rid: ResourceId, payload: &[u8]) {
    use std::sync::atomic::Ordering;

    let seen = SAMPLES_SEEN.fetch_add(1, Ordering::Relaxed);
    if let Ok(bytes) = <[u8; 4]>::try_from(payload) {
        let k = u32::from_le_bytes(bytes);
        if seen > 0 && k != LAST_K.load(Ordering::Relaxed).wrapping_add(1) {
            let oooc = OOOC.fetch_add(1, Ordering::Relaxed) + 1;
            println!("[rid={rid}] out-of-order sample {k} (running oooc={oooc})");
        }
        LAST_K.store(k, Ordering::Relaxed);
    }
    println!("[rid={rid}] received {} bytes (handler arg={arg})", payload.len());
}

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(()) => {
            eprintln!("usage: driver -p|-s [-h hex-id] [-c cid] [-u] [-C n] [-S addr:port] [-X pct]");
            std::process::exit(1);
        }
    };

    let own_id = match &args.hex_id {
        Some(hex) => match parse_hex_id(hex) {
            Some(id) => id,
            None => {
                eprintln!("invalid -h hex id");
                std::process::exit(1);
            }
        },
        None => StdEntropy.random_peer_id(8).expect("entropy"),
    };

    let transport = match StdUdpTransport::bind(0) {
        Ok(t) => DroppingTransport::new(t, args.drop_pct),
        Err(e) => {
            eprintln!("transport bind failed: {e}");
            std::process::exit(2);
        }
    };

    let mut cfg = Config::new(own_id, args.scout_addr, config::LEASE_DURATION_MS);
    for group in args.joined_groups.iter() {
        cfg = cfg.join_group(*group);
    }
    for dest in args.mconduit_dests.iter() {
        cfg = cfg.mconduit_dest(0, *dest);
    }

    let clock = StdClock::new();
    let mut engine = match Engine::init(cfg, transport, clock.now_ms()) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("engine init failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = engine.start(clock.now_ms()) {
        eprintln!("start failed: {e}");
        std::process::exit(2);
    }

    let rid = ResourceId::new(1).expect("rid");
    let mode = if args.best_effort {
        SubMode::BestEffort
    } else {
        SubMode::Reliable
    };

    if args.publisher {
        let handle = engine
            .publish(rid, ConduitId(args.conduit), !args.best_effort)
            .expect("publish");
        for i in 0u32..100 {
            let _ = engine.write(handle, &i.to_le_bytes(), clock.now_ms());
            if args.report_every > 0 && i % args.report_every == 0 {
                println!("sent sample {i}");
            }
            for _ in 0..5 {
                let _ = engine.poll(clock.now_ms());
                let _ = engine.housekeeping(clock.now_ms());
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    } else {
        engine
            .subscribe(rid, 64, ConduitId(args.conduit), mode, sample_handler, 0)
            .expect("subscribe");
        loop {
            let _ = engine.poll(clock.now_ms());
            let _ = engine.housekeeping(clock.now_ms());
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
    }
}
