//! Interactive authoring shell
//!
//! Runs on its own OS thread and reaches the engine only through the bridge's
//! command channel; every command is one request/reply round trip.

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

use crate::bindings::BindingId;
use crate::bridge::BridgeSender;
use crate::learn::{LearnFilter, LearnState};
use crate::midi::EventKind;

/// How long `learn` waits for a control to be moved
const LEARN_TIMEOUT: Duration = Duration::from_secs(15);

/// Parsed shell line
#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Help,
    List,
    Devices,
    Stats,
    Learn {
        action_ref: Arc<str>,
        filter: LearnFilter,
    },
    Cancel,
    Enable(BindingId, bool),
    Remove(BindingId),
    Save(Option<PathBuf>),
    Load(Option<PathBuf>),
    Quit,
    Empty,
}

/// Parse one line of shell input
///
/// Channels are entered 1-16 like on hardware and stored 0-15.
pub fn parse_line(line: &str) -> Result<ShellCommand, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(ShellCommand::Empty);
    };
    let args: Vec<&str> = words.collect();

    let parsed = match command.to_ascii_lowercase().as_str() {
        "help" | "?" => ShellCommand::Help,
        "list" | "ls" => ShellCommand::List,
        "devices" => ShellCommand::Devices,
        "stats" => ShellCommand::Stats,
        "cancel" => ShellCommand::Cancel,
        "quit" | "exit" => ShellCommand::Quit,
        "enable" => ShellCommand::Enable(parse_id(&args)?, true),
        "disable" => ShellCommand::Enable(parse_id(&args)?, false),
        "remove" | "rm" => ShellCommand::Remove(parse_id(&args)?),
        "save" => ShellCommand::Save(args.first().map(PathBuf::from)),
        "load" => ShellCommand::Load(args.first().map(PathBuf::from)),
        "learn" => parse_learn(&args)?,
        other => return Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Ok(parsed)
}

fn parse_id(args: &[&str]) -> Result<BindingId, String> {
    let raw = args.first().ok_or("missing binding id")?;
    raw.parse()
        .map_err(|_| format!("invalid binding id '{}'", raw))
}

fn parse_learn(args: &[&str]) -> Result<ShellCommand, String> {
    let action_ref = args.first().ok_or("usage: learn <action> [kind] [channel]")?;
    let mut filter = LearnFilter::any();

    for arg in &args[1..] {
        if let Ok(channel) = arg.parse::<u8>() {
            if !(1..=16).contains(&channel) {
                return Err(format!("channel {} out of range 1-16", channel));
            }
            filter = filter.channel(channel - 1);
        } else if let Some(kind) = EventKind::parse(arg) {
            filter = filter.kind(kind);
        } else {
            let kinds: Vec<&str> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
            return Err(format!(
                "'{}' is neither a channel nor one of: {}",
                arg,
                kinds.join(", ")
            ));
        }
    }

    Ok(ShellCommand::Learn {
        action_ref: Arc::from(*action_ref),
        filter,
    })
}

const HELP: &str = "\
  list                          show bindings
  devices                       show known devices
  learn <action> [kind] [ch]    bind the next moved control to <action>
  cancel                        cancel a pending learn
  enable <id> | disable <id>    toggle a binding
  remove <id>                   delete a binding
  save [path] | load [path]     write or read the mapping document
  stats                         engine counters
  quit                          exit";

/// Run the shell until `quit` or end of input
///
/// Blocks the calling thread; `runtime` drives the bridge requests.
pub fn run_shell(bridge: BridgeSender, runtime: Handle, mappings: PathBuf) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", "midimap shell - type 'help' for commands".bold().cyan());

    loop {
        let line = match rl.readline("midimap> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let _ = rl.add_history_entry(line.as_str());

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{} {}", "error:".red(), e);
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }

        if let Err(e) = runtime.block_on(execute(&bridge, command, &mappings)) {
            println!("{} {:#}", "error:".red(), e);
        }
    }

    Ok(())
}

async fn execute(bridge: &BridgeSender, command: ShellCommand, mappings: &Path) -> Result<()> {
    match command {
        ShellCommand::Help => println!("{}", HELP),
        ShellCommand::Empty | ShellCommand::Quit => {}
        ShellCommand::List => {
            let bindings = bridge.list_bindings().await?;
            if bindings.is_empty() {
                println!("  {}", "No bindings".dimmed());
            }
            for binding in bindings {
                if binding.enabled {
                    println!("  {}", binding);
                } else {
                    println!("  {}", binding.to_string().dimmed());
                }
            }
        }
        ShellCommand::Devices => {
            let devices = bridge.list_devices().await?;
            if devices.is_empty() {
                println!("  {}", "No devices".dimmed());
            }
            for device in devices {
                let status = if device.connected {
                    "●".green()
                } else {
                    "○".red()
                };
                println!("  {} {} {}", status, device.id, device.display_name);
            }
        }
        ShellCommand::Stats => {
            let stats = bridge.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        ShellCommand::Learn { action_ref, filter } => {
            learn(bridge, action_ref, filter).await?;
        }
        ShellCommand::Cancel => {
            if bridge.cancel_learn().await? {
                println!("  Learn cancelled");
            } else {
                println!("  {}", "Nothing to cancel".dimmed());
            }
        }
        ShellCommand::Enable(id, enabled) => {
            bridge.set_enabled(id, enabled).await?;
            let verb = if enabled { "enabled" } else { "disabled" };
            println!("  {} #{} {}", "✓".green(), id, verb);
        }
        ShellCommand::Remove(id) => {
            let removed = bridge.remove_binding(id).await?;
            println!("  {} removed {}", "✓".green(), removed);
        }
        ShellCommand::Save(path) => {
            let path = path.unwrap_or_else(|| mappings.to_path_buf());
            bridge.save(&path).await?;
            println!("  {} saved to {}", "✓".green(), path.display());
        }
        ShellCommand::Load(path) => {
            let path = path.unwrap_or_else(|| mappings.to_path_buf());
            let count = bridge.load(&path).await?;
            println!("  {} loaded {} bindings from {}", "✓".green(), count, path.display());
        }
    }
    Ok(())
}

async fn learn(bridge: &BridgeSender, action_ref: Arc<str>, filter: LearnFilter) -> Result<()> {
    let before = bridge.list_bindings().await?.len();
    bridge.begin_learn(filter, Some(action_ref.clone())).await?;
    println!("  Move a control to bind it to '{}'...", (&*action_ref).bright_white());

    let waited = tokio::time::timeout(LEARN_TIMEOUT, async {
        loop {
            tokio::time::sleep(Duration::from_millis(50)).await;
            match bridge.learn_state().await {
                Ok(LearnState::Armed) => continue,
                other => return other,
            }
        }
    })
    .await;

    match waited {
        Ok(state) => {
            state?;
            let bindings = bridge.list_bindings().await?;
            match bindings.get(before..).and_then(|added| added.last()) {
                Some(binding) => println!("  {} {}", "✓".green(), binding),
                None => println!("  {}", "Learn ended without a binding".dimmed()),
            }
        }
        Err(_) => {
            bridge.cancel_learn().await?;
            println!("  {}", "Learn timed out".yellow());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_line("").unwrap(), ShellCommand::Empty);
        assert_eq!(parse_line("  list ").unwrap(), ShellCommand::List);
        assert_eq!(parse_line("QUIT").unwrap(), ShellCommand::Quit);
        assert_eq!(parse_line("stats").unwrap(), ShellCommand::Stats);
        assert_eq!(
            parse_line("disable #3").unwrap(),
            ShellCommand::Enable(BindingId::from_raw(3), false)
        );
        assert_eq!(
            parse_line("save out.yaml").unwrap(),
            ShellCommand::Save(Some(PathBuf::from("out.yaml")))
        );
        assert_eq!(parse_line("load").unwrap(), ShellCommand::Load(None));
    }

    #[test]
    fn test_parse_learn() {
        let parsed = parse_line("learn mixer.volume cc 16").unwrap();
        assert_eq!(
            parsed,
            ShellCommand::Learn {
                action_ref: Arc::from("mixer.volume"),
                filter: LearnFilter::any().kind(EventKind::ControlChange).channel(15),
            }
        );

        let parsed = parse_line("learn scene.next").unwrap();
        assert_eq!(
            parsed,
            ShellCommand::Learn {
                action_ref: Arc::from("scene.next"),
                filter: LearnFilter::any(),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_line("learn").is_err());
        assert!(parse_line("learn x 17").is_err());
        assert!(parse_line("learn x 0").is_err());
        assert!(parse_line("learn x wobble").is_err());
        assert!(parse_line("remove").is_err());
        assert!(parse_line("remove abc").is_err());
        assert!(parse_line("frobnicate").is_err());
    }
}
