//! MIDI input port discovery and hot-plug handling
//!
//! Ports are opened with midir; each connection's callback only copies the
//! packet into the bridge through an `InputHandle` so the driver thread
//! never touches engine state.

use anyhow::{Context, Result};
use colored::*;
use midir::{Ignore, MidiInput, MidiInputConnection};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::bridge::BridgeSender;
use crate::config::EngineConfig;
use crate::devices::{DeviceId, Direction};
use crate::engine::Engine;

/// Client name announced to the MIDI backend
const CLIENT_NAME: &str = "midimap";

/// Port information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
    pub is_virtual: bool,
}

/// Discover all available MIDI input ports
pub fn discover_input_ports() -> Result<Vec<PortInfo>> {
    let midi_in = MidiInput::new(&format!("{}-discovery", CLIENT_NAME))?;
    let ports = midi_in.ports();

    let mut result = Vec::new();
    for (index, port) in ports.iter().enumerate() {
        if let Ok(name) = midi_in.port_name(port) {
            let is_virtual = is_virtual_port(&name);
            result.push(PortInfo {
                index,
                name,
                is_virtual,
            });
        }
    }

    Ok(result)
}

/// Loopback drivers re-create their ports with fresh identities
fn is_virtual_port(name: &str) -> bool {
    name.contains("Virtual") || name.contains("loopMIDI") || name.contains("IAC")
}

/// Stable fingerprint for a port, if it has one
///
/// Hardware ports keep their name across replugs. Virtual ports do not
/// identify the same endpoint twice, so they get anonymous ids.
pub fn fingerprint_for(name: &str, is_virtual: bool) -> Option<String> {
    if is_virtual {
        None
    } else {
        Some(format!("port:{}", name))
    }
}

/// Print available input ports
pub fn print_ports(config: Option<&EngineConfig>) {
    println!("\n{}", "=== Available MIDI Input Ports ===".bold().cyan());

    match discover_input_ports() {
        Ok(ports) if ports.is_empty() => {
            println!("  {}", "No input ports found".dimmed());
        }
        Ok(ports) => {
            for port in ports {
                let marker = if port.is_virtual {
                    "[VIRTUAL]".yellow()
                } else {
                    "[PHYSICAL]".green()
                };
                let selected = config.map_or(true, |c| c.selects_input(&port.name));
                if selected {
                    println!("  {} {}", marker, port.name.bright_white());
                } else {
                    println!("  {} {} {}", marker, port.name, "(not selected)".dimmed());
                }
            }
        }
        Err(e) => {
            println!("  {} {}", "Failed to list ports:".red(), e);
        }
    }

    println!();
}

/// Changes applied by one `InputPorts::rescan`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescanSummary {
    pub added: usize,
    pub removed: usize,
}

struct OpenPort {
    device: DeviceId,
    _connection: MidiInputConnection<()>,
}

/// Open input connections keyed by port name
pub struct InputPorts {
    bridge: BridgeSender,
    open: HashMap<String, OpenPort>,
}

impl InputPorts {
    pub fn new(bridge: BridgeSender) -> Self {
        Self {
            bridge,
            open: HashMap::new(),
        }
    }

    /// Number of open input connections
    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Reconcile open connections with the ports currently present
    ///
    /// New selected ports are registered with the engine and connected;
    /// vanished ports are closed and their devices marked disconnected.
    /// Must run on the engine's thread.
    pub fn rescan(&mut self, engine: &mut Engine, config: &EngineConfig) -> Result<RescanSummary> {
        let ports = discover_input_ports()?;
        let mut summary = RescanSummary::default();

        let present: Vec<&str> = ports.iter().map(|p| p.name.as_str()).collect();
        let vanished: Vec<String> = self
            .open
            .keys()
            .filter(|name| !present.contains(&name.as_str()))
            .cloned()
            .collect();

        for name in vanished {
            if let Some(port) = self.open.remove(&name) {
                engine.on_device_removed(port.device);
                info!("🔌 Input port disconnected: {} ({})", name, port.device);
                summary.removed += 1;
            }
        }

        for port in ports {
            if self.open.contains_key(&port.name) || !config.selects_input(&port.name) {
                continue;
            }

            let fingerprint = fingerprint_for(&port.name, port.is_virtual);
            let device =
                engine.on_device_discovered(fingerprint.as_deref(), &port.name, Direction::Input);

            match self.connect(&port, device) {
                Ok(connection) => {
                    info!("✅ Input port connected: {} ({})", port.name, device);
                    self.open.insert(
                        port.name,
                        OpenPort {
                            device,
                            _connection: connection,
                        },
                    );
                    summary.added += 1;
                }
                Err(e) => {
                    warn!("⚠️  Could not open input port {}: {:#}", port.name, e);
                    engine.on_device_removed(device);
                }
            }
        }

        if summary != RescanSummary::default() {
            debug!("Port rescan: +{} -{}", summary.added, summary.removed);
        }
        Ok(summary)
    }

    fn connect(&self, info: &PortInfo, device: DeviceId) -> Result<MidiInputConnection<()>> {
        let mut midi_in = MidiInput::new(&format!("{}-in", CLIENT_NAME))
            .context("Failed to create MIDI input")?;
        midi_in.ignore(Ignore::None);

        let port = midi_in
            .ports()
            .into_iter()
            .find(|p| midi_in.port_name(p).ok().as_deref() == Some(info.name.as_str()))
            .with_context(|| format!("Input port '{}' disappeared", info.name))?;

        let handle = self.bridge.input(device);
        midi_in
            .connect(
                &port,
                &format!("{}-{}", CLIENT_NAME, info.index),
                move |stamp, data, _| {
                    handle.deliver(data, stamp);
                },
                (),
            )
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("Failed to connect to input port")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_ports() {
        // Should not panic; backends may be missing on CI
        if let Ok(ports) = discover_input_ports() {
            for port in ports {
                assert_eq!(port.is_virtual, is_virtual_port(&port.name));
            }
        }
    }

    #[test]
    fn test_virtual_port_detection() {
        assert!(is_virtual_port("loopMIDI Port"));
        assert!(is_virtual_port("IAC Driver Bus 1"));
        assert!(!is_virtual_port("nanoKONTROL2 SLIDER/KNOB"));
    }

    #[test]
    fn test_fingerprints() {
        assert_eq!(
            fingerprint_for("nanoKONTROL2", false).as_deref(),
            Some("port:nanoKONTROL2")
        );
        assert_eq!(fingerprint_for("loopMIDI Port", true), None);

        let a = fingerprint_for("nanoKONTROL2", false).unwrap();
        let b = fingerprint_for("nanoKONTROL2", false).unwrap();
        assert_eq!(DeviceId::from_fingerprint(&a), DeviceId::from_fingerprint(&b));
    }
}
