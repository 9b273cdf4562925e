//! Loopback harness: a bridge wired to an in-process echo stack.
//!
//! Arguments are bridge configuration keywords, e.g. `punt-echo enable ethernet mtu 1500`.
//! Without arguments the bridge is enabled with the defaults.
#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use punt::bridge::{CollectingRuntime, InMemoryProvisioner};
use punt::buffer::Chain;
use punt::{echo, Bridge, BridgeConfig};
use tracing_subscriber::EnvFilter;

const ROUNDS: usize = 64;
const PACKETS_PER_ROUND: usize = 8;
const MAX_POLLS_PER_ROUND: usize = 10_000;

fn sample_packet(i: usize) -> Vec<u8> {
    // Alternate IPv4 and IPv6 headers with a varying length.
    let len = 40 + (i * 97) % 3000;
    let mut pkt = vec![0u8; len];
    pkt[0] = if i % 2 == 0 { 0x45 } else { 0x60 };
    for (j, b) in pkt.iter_mut().enumerate().skip(1) {
        *b = (i + j) as u8;
    }
    pkt
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let input = if args.is_empty() {
        "enable".to_string()
    } else {
        args.join(" ")
    };
    let config = BridgeConfig::parse(&input).context("invalid bridge configuration")?;

    let (mut bridge, stack) = Bridge::new(config, InMemoryProvisioner::default());
    bridge.enable().context("failed to enable bridge")?;
    if !bridge.is_enabled() {
        tracing::warn!("bridge is not enabled, nothing to do");
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let echo_thread = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || echo::run(stack, stop))
    };

    let mut runtime = CollectingRuntime::default();
    let mut sent = 0usize;
    let mut received = 0usize;
    for round in 0..ROUNDS {
        let mut frame = Vec::with_capacity(PACKETS_PER_ROUND);
        for i in 0..PACKETS_PER_ROUND {
            let pkt = sample_packet(round * PACKETS_PER_ROUND + i);
            let data_size = bridge.pool().data_size();
            let pool = bridge.pool_mut();
            let chain = Chain::allocate(pool, pkt.len().div_ceil(data_size))
                .context("buffer pool exhausted")?;
            for (&bi, bytes) in chain.segments().iter().zip(pkt.chunks(data_size)) {
                pool.get_mut(bi).append(bytes);
            }
            frame.push(chain.head());
        }

        let counts = bridge.tx_frame(&frame);
        sent += counts.enqueued;

        let mut polls = 0;
        while received < sent && polls < MAX_POLLS_PER_ROUND {
            received += bridge.rx_activate(&mut runtime).delivered;
            for (_, head) in runtime.take() {
                bridge.pool_mut().free_chain(head);
            }
            polls += 1;
            thread::yield_now();
        }
    }

    stop.store(true, Ordering::Release);
    let echoed = echo_thread
        .join()
        .map_err(|_| anyhow::anyhow!("echo thread panicked"))?;

    let stats = bridge.stats();
    tracing::info!(
        sent,
        received,
        echoed,
        tx_dropped = stats.tx_dropped(),
        rx_dropped = stats.rx_dropped(),
        unknown = stats.rx_unknown_packet_type,
        "loopback finished"
    );
    bridge.disable();
    Ok(())
}
