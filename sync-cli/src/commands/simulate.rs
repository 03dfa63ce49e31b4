//! Simulate a set of devices sharing one identity.

use anyhow::{ensure, Result};
use selfsync_core::SlotSnapshot;
use selfsync_manager::{ManualClock, SelfCallbacks, SelfConnections, SelfSyncConfig};
use selfsync_types::{FriendId, PacketId, PublicKey};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::loopback::{LoopbackHub, LoopbackTransport};

/// Second at which device 0 broadcasts the friend rename.
const RENAME_AT: u64 = 1;

/// What to simulate.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Shared identity; a fresh one when `None`.
    pub identity: Option<PublicKey>,
    /// Devices sharing the identity.
    pub devices: usize,
    /// Add a device with a different identity that dials device 0.
    pub foreign: bool,
    /// Simulated seconds.
    pub duration: u64,
    /// Friend whose rename device 0 broadcasts.
    pub friend: u32,
    /// The new name.
    pub name: String,
    /// Device whose outgoing traffic is dropped from `silence_at` on.
    pub silence: Option<usize>,
    /// When to silence it.
    pub silence_at: u64,
}

/// Outcome of one dial attempt.
#[derive(Debug, Serialize)]
pub struct Pairing {
    /// Dialing device.
    pub from: usize,
    /// Dialed device.
    pub to: usize,
    /// `linked` or the refusal reason.
    pub result: String,
}

/// Something worth reporting that happened at a given second.
#[derive(Debug, Serialize)]
pub struct Event {
    /// Simulated second.
    pub at: u64,
    /// Device it happened on.
    pub device: usize,
    /// Description.
    pub what: String,
}

/// A rename one device was told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedName {
    /// Friend renamed.
    pub friend_id: u32,
    /// New name, lossily decoded for display.
    pub name: String,
}

/// Final state of one device.
#[derive(Debug, Serialize)]
pub struct DeviceReport {
    /// Device index.
    pub index: usize,
    /// Runs under a different identity.
    pub foreign: bool,
    /// Occupied slots.
    pub active: usize,
    /// Table capacity.
    pub capacity: usize,
    /// Links still open on the transport.
    pub open_links: usize,
    /// Every slot.
    pub slots: Vec<SlotSnapshot>,
    /// Renames received from other devices.
    pub names_received: Vec<ReceivedName>,
}

/// Everything the simulation observed.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Shared identity, hex. Passing it to `--identity` repeats the run.
    pub identity: String,
    /// Simulated seconds.
    pub duration_secs: u64,
    /// Dial attempts in order.
    pub pairings: Vec<Pairing>,
    /// Timeline.
    pub events: Vec<Event>,
    /// Final device states.
    pub devices: Vec<DeviceReport>,
}

#[derive(Default)]
struct NameLog {
    received: Mutex<Vec<ReceivedName>>,
}

impl SelfCallbacks for NameLog {
    fn on_friend_name_changed(&self, friend_id: FriendId, name: &[u8]) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ReceivedName {
                friend_id: friend_id.value(),
                name: String::from_utf8_lossy(name).into_owned(),
            });
    }
}

struct Device {
    manager: SelfConnections<LoopbackTransport>,
    names: Arc<NameLog>,
    foreign: bool,
}

/// Run the simulate command.
pub fn run(config: &SelfSyncConfig, options: &SimulateOptions, json: bool) -> Result<()> {
    let report = simulate(config, options)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Run a simulation and collect what happened.
pub fn simulate(config: &SelfSyncConfig, options: &SimulateOptions) -> Result<SimulationReport> {
    ensure!(options.devices >= 1, "need at least one device");
    if let Some(silenced) = options.silence {
        ensure!(
            silenced < options.devices,
            "cannot silence device {}: only {} devices",
            silenced,
            options.devices
        );
    }

    let hub = LoopbackHub::new();
    let clock = Arc::new(ManualClock::new(0));
    let identity = options.identity.unwrap_or_else(PublicKey::random);

    let mut devices = Vec::new();
    for _ in 0..options.devices {
        devices.push(spawn_device(&hub, &clock, config, identity, false)?);
    }
    if options.foreign {
        let stranger = PublicKey::random();
        devices.push(spawn_device(&hub, &clock, config, stranger, true)?);
    }

    let mut pairings = Vec::new();
    let mut dial = |from: usize, to: usize, devices: &[Device]| {
        let result = match hub.dial(
            devices[from].manager.transport().endpoint(),
            devices[to].manager.transport().endpoint(),
        ) {
            Ok(_) => "linked".to_string(),
            Err(e) => format!("refused: {}", e),
        };
        pairings.push(Pairing { from, to, result });
    };
    for from in 0..options.devices {
        for to in from + 1..options.devices {
            dial(from, to, &devices);
        }
    }
    if options.foreign {
        dial(options.devices, 0, &devices);
    }

    let mut events = Vec::new();
    for now in 0..=options.duration {
        clock.set(now);

        if let Some(index) = options.silence.filter(|_| now == options.silence_at) {
            hub.set_silenced(devices[index].manager.transport().endpoint(), true);
            events.push(Event {
                at: now,
                device: index,
                what: "outgoing traffic silenced".into(),
            });
        }

        if now == RENAME_AT {
            let sent = devices[0].manager.sync_friend_state(
                FriendId::new(options.friend),
                PacketId::FriendName,
                options.name.as_bytes(),
            );
            events.push(Event {
                at: now,
                device: 0,
                what: format!(
                    "broadcast rename of friend {} to {} devices",
                    options.friend, sent
                ),
            });
        }

        for (index, device) in devices.iter().enumerate() {
            let report = device.manager.tick();
            if report.ping_failures > 0 {
                events.push(Event {
                    at: now,
                    device: index,
                    what: format!("{} keepalives failed", report.ping_failures),
                });
            }
            for key in report.expired {
                events.push(Event {
                    at: now,
                    device: index,
                    what: format!("{} timed out and was closed", key),
                });
            }
        }
    }

    let devices = devices
        .iter()
        .enumerate()
        .map(|(index, device)| DeviceReport {
            index,
            foreign: device.foreign,
            active: device.manager.active_count(),
            capacity: device.manager.capacity(),
            open_links: hub.open_links(device.manager.transport().endpoint()),
            slots: device.manager.connections(),
            names_received: device
                .names
                .received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        })
        .collect();

    Ok(SimulationReport {
        identity: identity.to_hex(),
        duration_secs: options.duration,
        pairings,
        events,
        devices,
    })
}

fn spawn_device(
    hub: &LoopbackHub,
    clock: &Arc<ManualClock>,
    config: &SelfSyncConfig,
    identity: PublicKey,
    foreign: bool,
) -> Result<Device> {
    let names = Arc::new(NameLog::default());
    let manager = SelfConnections::with_clock(
        Arc::new(hub.add_endpoint(identity)),
        names.clone(),
        config,
        clock.clone(),
    )?;
    Ok(Device {
        manager,
        names,
        foreign,
    })
}

fn print_report(report: &SimulationReport) {
    println!("=== selfsync simulation ===");
    println!();
    println!("Identity: {}", report.identity);
    println!("Duration: {}s", report.duration_secs);
    println!();

    println!("Pairings:");
    for pairing in &report.pairings {
        println!("  {} -> {}: {}", pairing.from, pairing.to, pairing.result);
    }
    println!();

    println!("Events:");
    if report.events.is_empty() {
        println!("  (none)");
    }
    for Event { at, device, what } in &report.events {
        println!("  t={:<4} device {}: {}", at, device, what);
    }
    println!();

    println!("Devices:");
    for device in &report.devices {
        let label = if device.foreign { " (foreign)" } else { "" };
        println!(
            "  [{}]{} {}/{} slots, {} open links",
            device.index, label, device.active, device.capacity, device.open_links
        );
        for slot in device.slots.iter().filter(|s| s.connection_id.is_some()) {
            println!(
                "    slot {} {:?} conn#{} last sent {} last received {}",
                slot.index,
                slot.status,
                slot.connection_id.unwrap_or_default(),
                format_stamp(slot.last_ping_sent),
                format_stamp(slot.last_ping_received)
            );
        }
        for name in &device.names_received {
            println!("    friend {} is now {:?}", name.friend_id, name.name);
        }
    }
}

fn format_stamp(stamp: Option<u64>) -> String {
    match stamp {
        Some(t) => format!("t={}", t),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(devices: usize) -> SimulateOptions {
        SimulateOptions {
            identity: None,
            devices,
            foreign: false,
            duration: 30,
            friend: 42,
            name: "Bob".into(),
            silence: None,
            silence_at: 5,
        }
    }

    #[test]
    fn all_devices_pair_and_stay_alive() {
        let report = simulate(&SelfSyncConfig::default(), &options(3)).unwrap();

        assert_eq!(report.pairings.len(), 3);
        assert!(report.pairings.iter().all(|p| p.result == "linked"));
        for device in &report.devices {
            assert_eq!(device.active, 2);
            assert_eq!(device.open_links, 2);
        }
    }

    #[test]
    fn rename_reaches_every_other_device() {
        let report = simulate(&SelfSyncConfig::default(), &options(3)).unwrap();

        let expected = vec![ReceivedName {
            friend_id: 42,
            name: "Bob".into(),
        }];
        assert!(report.devices[0].names_received.is_empty());
        assert_eq!(report.devices[1].names_received, expected);
        assert_eq!(report.devices[2].names_received, expected);
    }

    #[test]
    fn foreign_device_is_refused() {
        let mut opts = options(2);
        opts.foreign = true;
        let report = simulate(&SelfSyncConfig::default(), &opts).unwrap();

        let foreign = report.pairings.last().unwrap();
        assert_eq!((foreign.from, foreign.to), (2, 0));
        assert!(foreign.result.starts_with("refused"));
        assert!(report.devices[2].foreign);
        assert_eq!(report.devices[2].active, 0);
        assert_eq!(report.devices[0].active, 1);
    }

    #[test]
    fn silenced_device_is_dropped_by_its_peers() {
        let mut opts = options(3);
        opts.silence = Some(2);
        let report = simulate(&SelfSyncConfig::default(), &opts).unwrap();

        assert_eq!(report.devices[0].active, 1);
        assert_eq!(report.devices[1].active, 1);
        assert_eq!(report.devices[2].active, 0);
        assert_eq!(
            report
                .events
                .iter()
                .filter(|e| e.what.contains("timed out"))
                .count(),
            2
        );
    }

    #[test]
    fn small_table_refuses_extra_devices() {
        let mut config = SelfSyncConfig::default();
        config.table.capacity = 1;
        let report = simulate(&config, &options(3)).unwrap();

        let linked = report
            .pairings
            .iter()
            .filter(|p| p.result == "linked")
            .count();
        assert_eq!(linked, 1);
        assert_eq!(report.devices[2].active, 0);
    }

    #[test]
    fn given_identity_is_reused() {
        let identity = PublicKey::random();
        let mut opts = options(2);
        opts.identity = Some(identity);
        let report = simulate(&SelfSyncConfig::default(), &opts).unwrap();

        assert_eq!(report.identity, identity.to_hex());
        assert_eq!(PublicKey::from_hex(&report.identity), Some(identity));
        assert!(report.pairings.iter().all(|p| p.result == "linked"));
    }

    #[test]
    fn rejects_bad_options() {
        let config = SelfSyncConfig::default();
        assert!(simulate(&config, &options(0)).is_err());

        let mut opts = options(2);
        opts.silence = Some(2);
        assert!(simulate(&config, &opts).is_err());
    }

    #[test]
    fn report_serializes_to_json() {
        let report = simulate(&SelfSyncConfig::default(), &options(2)).unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["devices"][0]["slots"][0]["status"], "Connected");
        assert_eq!(value["pairings"][0]["result"], "linked");
    }
}
