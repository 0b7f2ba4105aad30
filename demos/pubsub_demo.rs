// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Temperature publisher/subscriber demo over UDP.
//!
//! ## Usage
//!
//! Terminal 1 (subscriber):
//! ```sh
//! cargo run --example pubsub_demo --features std -- sub
//! ```
//!
//! Terminal 2 (publisher):
//! ```sh
//! cargo run --example pubsub_demo --features std -- pub
//! ```

use pico_pubsub::config;
use pico_pubsub::engine::{Config, Engine};
use pico_pubsub::time::{Clock, StdClock};
use pico_pubsub::transport::{StdUdpTransport, UdpAddr};
use pico_pubsub::wire::types::{ConduitId, PeerId, ResourceId, SubMode};
use pico_pubsub::Result;

const TEMPERATURE_RID: u64 = 1;

fn temperature_handler(_arg: usize, rid: ResourceId, payload: &[u8]) {
    if payload.len() >= 4 {
        let bits = [payload[0], payload[1], payload[2], payload[3]];
        let value = f32::from_le_bytes(bits);
        println!("[rid={rid}] temperature = {value:.1} degC");
    }
}

fn run_publisher() -> Result<()> {
    println!("pico-pubsub temperature publisher");
    let transport = StdUdpTransport::bind(0)?;
    let cfg = Config::new(
        PeerId::from_slice(b"pub-demo")?,
        UdpAddr::new([255, 255, 255, 255], 17401),
        config::LEASE_DURATION_MS,
    );
    let clock = StdClock::new();
    let mut engine = Engine::init(cfg, transport, clock.now_ms())?;
    engine.start(clock.now_ms())?;

    let rid = ResourceId::new(TEMPERATURE_RID)?;
    let handle = engine.publish(rid, ConduitId(0), false)?;

    for i in 0..10 {
        let value = 20.0_f32 + i as f32 * 0.5;
        let wrote = engine.write(handle, &value.to_le_bytes(), clock.now_ms())?;
        println!("published sample #{}: {value:.1} degC (sent={wrote})", i + 1);
        for _ in 0..20 {
            engine.poll(clock.now_ms())?;
            engine.housekeeping(clock.now_ms())?;
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    }
    Ok(())
}

fn run_subscriber() -> Result<()> {
    println!("pico-pubsub temperature subscriber");
    let transport = StdUdpTransport::bind(17401)?;
    let cfg = Config::new(
        PeerId::from_slice(b"sub-demo")?,
        UdpAddr::new([255, 255, 255, 255], 17401),
        config::LEASE_DURATION_MS,
    );
    let clock = StdClock::new();
    let mut engine = Engine::init(cfg, transport, clock.now_ms())?;

    let rid = ResourceId::new(TEMPERATURE_RID)?;
    engine.subscribe(rid, 64, ConduitId(0), SubMode::BestEffort, temperature_handler, 0)?;

    println!("waiting for samples (Ctrl-C to stop)...");
    loop {
        engine.poll(clock.now_ms())?;
        engine.housekeeping(clock.now_ms())?;
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
}

fn main() -> Result<()> {
    let mode = std::env::args().nth(1).unwrap_or_default();
    match mode.as_str() {
        "pub" => run_publisher(),
        "sub" => run_subscriber(),
        _ => {
            eprintln!("usage: pubsub_demo <pub|sub>");
            std::process::exit(2);
        }
    }
}
