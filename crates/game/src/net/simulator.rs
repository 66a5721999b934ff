use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::protocol::Packet;
use super::stats::PacketLossSimulation;

#[derive(Debug)]
struct DelayedPacket {
    release_time: Instant,
    packet: Packet,
    addr: SocketAddr,
}

impl PartialEq for DelayedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time
    }
}

impl Eq for DelayedPacket {}

impl PartialOrd for DelayedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap behavior.
        other.release_time.cmp(&self.release_time)
    }
}

/// Sliding one-second byte budget for a bandwidth cap.
#[derive(Debug, Default)]
struct ByteBudget {
    window: VecDeque<(Instant, usize)>,
    used: usize,
}

impl ByteBudget {
    fn try_spend(&mut self, bytes: usize, budget_bytes_per_sec: usize) -> bool {
        let now = Instant::now();
        while let Some(&(at, size)) = self.window.front() {
            if now.duration_since(at) > Duration::from_secs(1) {
                self.window.pop_front();
                self.used -= size;
            } else {
                break;
            }
        }

        if self.used + bytes > budget_bytes_per_sec {
            return false;
        }
        self.window.push_back((now, bytes));
        self.used += bytes;
        true
    }
}

/// In-process network condition simulator for tests and the demo: per-address
/// loss, delay/jitter, duplication, and a bandwidth cap, applied to packets
/// queued through it.
#[derive(Debug, Default)]
pub struct NetworkSimulator {
    configs: HashMap<SocketAddr, PacketLossSimulation>,
    budgets: HashMap<SocketAddr, ByteBudget>,
    inbound: BinaryHeap<DelayedPacket>,
    outbound: BinaryHeap<DelayedPacket>,
    pub dropped: u64,
    pub throttled: u64,
}

impl NetworkSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config(&mut self, addr: SocketAddr, config: PacketLossSimulation) {
        if config.enabled {
            self.configs.insert(addr, config);
        } else {
            self.configs.remove(&addr);
            self.budgets.remove(&addr);
        }
    }

    pub fn config(&self, addr: &SocketAddr) -> Option<&PacketLossSimulation> {
        self.configs.get(addr)
    }

    fn admit(&mut self, packet: &Packet, addr: SocketAddr) -> Option<(Duration, bool)> {
        let Some(sim) = self.configs.get(&addr) else {
            return Some((Duration::ZERO, false));
        };

        if sim.should_drop() {
            self.dropped += 1;
            return None;
        }

        if sim.bandwidth_kbps > 0 {
            let budget = sim.bandwidth_kbps as usize * 1000 / 8;
            let size = packet.serialize().map(|b| b.len()).unwrap_or(0);
            if !self
                .budgets
                .entry(addr)
                .or_default()
                .try_spend(size, budget)
            {
                self.throttled += 1;
                return None;
            }
        }

        let delay = Duration::from_millis(sim.delay_ms() as u64);
        Some((delay, sim.should_duplicate()))
    }

    pub fn enqueue_inbound(&mut self, packet: Packet, addr: SocketAddr) {
        let Some((delay, duplicate)) = self.admit(&packet, addr) else {
            return;
        };
        let release_time = Instant::now() + delay;
        if duplicate {
            self.inbound.push(DelayedPacket {
                release_time,
                packet: packet.clone(),
                addr,
            });
        }
        self.inbound.push(DelayedPacket {
            release_time,
            packet,
            addr,
        });
    }

    pub fn enqueue_outbound(&mut self, packet: Packet, addr: SocketAddr) {
        let Some((delay, duplicate)) = self.admit(&packet, addr) else {
            return;
        };
        let release_time = Instant::now() + delay;
        if duplicate {
            self.outbound.push(DelayedPacket {
                release_time,
                packet: packet.clone(),
                addr,
            });
        }
        self.outbound.push(DelayedPacket {
            release_time,
            packet,
            addr,
        });
    }

    pub fn take_inbound(&mut self) -> Vec<(Packet, SocketAddr)> {
        Self::drain_ready(&mut self.inbound)
    }

    pub fn take_outbound(&mut self) -> Vec<(Packet, SocketAddr)> {
        Self::drain_ready(&mut self.outbound)
    }

    fn drain_ready(queue: &mut BinaryHeap<DelayedPacket>) -> Vec<(Packet, SocketAddr)> {
        let mut packets = Vec::new();
        let now = Instant::now();
        while let Some(delayed) = queue.peek() {
            if delayed.release_time <= now {
                let delayed = queue.pop().unwrap();
                packets.push((delayed.packet, delayed.addr));
            } else {
                break;
            }
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{PacketHeader, PacketType};

    fn ping(sequence: u32) -> Packet {
        Packet::new(PacketHeader::new(sequence, 0, 0), PacketType::Ping { timestamp: 0 })
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn unconfigured_addresses_pass_through() {
        let mut sim = NetworkSimulator::new();
        sim.enqueue_inbound(ping(1), addr());
        assert_eq!(sim.take_inbound().len(), 1);
    }

    #[test]
    fn total_loss_drops_everything() {
        let mut sim = NetworkSimulator::new();
        sim.set_config(
            addr(),
            PacketLossSimulation {
                enabled: true,
                loss_percent: 100.0,
                ..Default::default()
            },
        );

        for i in 0..20 {
            sim.enqueue_inbound(ping(i), addr());
        }
        assert!(sim.take_inbound().is_empty());
        assert_eq!(sim.dropped, 20);
    }

    #[test]
    fn duplication_doubles_delivery() {
        let mut sim = NetworkSimulator::new();
        sim.set_config(
            addr(),
            PacketLossSimulation {
                enabled: true,
                duplicate_percent: 100.0,
                ..Default::default()
            },
        );

        sim.enqueue_outbound(ping(7), addr());
        assert_eq!(sim.take_outbound().len(), 2);
    }

    #[test]
    fn latency_holds_packets_back() {
        let mut sim = NetworkSimulator::new();
        sim.set_config(
            addr(),
            PacketLossSimulation {
                enabled: true,
                min_latency_ms: 50,
                max_latency_ms: 50,
                ..Default::default()
            },
        );

        sim.enqueue_inbound(ping(1), addr());
        assert!(sim.take_inbound().is_empty());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(sim.take_inbound().len(), 1);
    }

    #[test]
    fn bandwidth_cap_throttles() {
        let mut sim = NetworkSimulator::new();
        sim.set_config(
            addr(),
            PacketLossSimulation {
                enabled: true,
                bandwidth_kbps: 1,
                ..Default::default()
            },
        );

        // 1 kbps is 125 bytes/s; a handful of packets blows the budget.
        for i in 0..10 {
            sim.enqueue_outbound(ping(i), addr());
        }
        assert!(sim.throttled > 0);
    }
}
