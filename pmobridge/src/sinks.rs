//! # Observation des sinks PulseAudio
//!
//! Le watcher relit la liste des sinks à chaque notification et envoie
//! au registre la différence avec l'état précédent.
//!
//! ```text
//! pactl subscribe ──"Event 'new' on sink #3"──► pactl list sinks ──diff──► registre
//! ```

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::SinkError;
use crate::model::{SampleFormat, Sink, SinkId};
use crate::registry::RegistryHandle;

/// Source des sinks audio
#[async_trait]
pub trait SinkWatcher: Send {
    /// Liste courante des sinks
    async fn list_sinks(&mut self) -> Result<Vec<Sink>, SinkError>;

    /// Attend la prochaine notification concernant un sink.
    ///
    /// `Ok(false)` signale que la source de notifications est épuisée.
    async fn changed(&mut self) -> Result<bool, SinkError>;
}

/// Changement à transmettre au registre
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkChange {
    Added(Sink),
    Removed(SinkId),
    Updated { id: SinkId, format: SampleFormat },
}

/// Différence entre deux listes de sinks
pub fn diff_sinks(known: &BTreeMap<SinkId, Sink>, current: &[Sink]) -> Vec<SinkChange> {
    let mut changes = Vec::new();

    for sink in current {
        match known.get(&sink.id) {
            None => changes.push(SinkChange::Added(sink.clone())),
            Some(previous) if previous.format != sink.format => changes.push(SinkChange::Updated {
                id: sink.id.clone(),
                format: sink.format,
            }),
            Some(_) => {}
        }
    }

    for id in known.keys() {
        if !current.iter().any(|s| &s.id == id) {
            changes.push(SinkChange::Removed(id.clone()));
        }
    }

    changes
}

/// Pousse les sinks vers le registre jusqu'à l'annulation.
pub async fn watch_sinks<W>(mut watcher: W, registry: RegistryHandle, cancel: CancellationToken)
where
    W: SinkWatcher,
{
    let mut known: BTreeMap<SinkId, Sink> = BTreeMap::new();

    loop {
        match watcher.list_sinks().await {
            Ok(current) => {
                for change in diff_sinks(&known, &current) {
                    match change {
                        SinkChange::Added(sink) => registry.sink_added(sink),
                        SinkChange::Removed(id) => registry.sink_removed(id),
                        SinkChange::Updated { id, format } => registry.sink_updated(id, format),
                    }
                }
                known = current.into_iter().map(|s| (s.id.clone(), s)).collect();
            }
            Err(e) => warn!("⚠️ Cannot list sinks: {}", e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = watcher.changed() => match changed {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Sink notifications ended, sink list is now frozen");
                    cancel.cancelled().await;
                    break;
                }
                Err(e) => {
                    warn!("⚠️ Sink notifications failed: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                    }
                }
            },
        }
    }

    debug!("Sink watcher stopped");
}

/// Watcher basé sur `pactl`
pub struct PactlWatcher {
    command: String,
    subscription: Option<(Child, Lines<BufReader<ChildStdout>>)>,
}

impl Default for PactlWatcher {
    fn default() -> Self {
        Self::new("pactl")
    }
}

impl PactlWatcher {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            subscription: None,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.command);
        // Sortie non traduite
        command.env("LC_ALL", "C").stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    fn spawn_subscription(&mut self) -> Result<&mut Lines<BufReader<ChildStdout>>, SinkError> {
        if self.subscription.is_none() {
            let mut child = self
                .command()
                .arg("subscribe")
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|source| SinkError::Command {
                    command: format!("{} subscribe", self.command),
                    source,
                })?;
            let Some(stdout) = child.stdout.take() else {
                return Err(SinkError::Failed {
                    command: format!("{} subscribe", self.command),
                    status: "no stdout".into(),
                });
            };
            info!("🔈 Watching PulseAudio sinks");
            self.subscription = Some((child, BufReader::new(stdout).lines()));
        }

        match self.subscription.as_mut() {
            Some((_, lines)) => Ok(lines),
            None => Err(SinkError::Failed {
                command: format!("{} subscribe", self.command),
                status: "not running".into(),
            }),
        }
    }
}

#[async_trait]
impl SinkWatcher for PactlWatcher {
    async fn list_sinks(&mut self) -> Result<Vec<Sink>, SinkError> {
        let label = format!("{} list sinks", self.command);
        let output = self
            .command()
            .args(["list", "sinks"])
            .output()
            .await
            .map_err(|source| SinkError::Command {
                command: label.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SinkError::Failed {
                command: label,
                status: output.status.to_string(),
            });
        }

        Ok(parse_sink_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn changed(&mut self) -> Result<bool, SinkError> {
        let lines = self.spawn_subscription()?;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if is_sink_event(&line) {
                        trace!("pactl: {}", line);
                        return Ok(true);
                    }
                }
                Ok(None) => {
                    self.subscription = None;
                    return Ok(false);
                }
                Err(source) => {
                    self.subscription = None;
                    return Err(SinkError::Command {
                        command: format!("{} subscribe", self.command),
                        source,
                    });
                }
            }
        }
    }
}

/// `Event 'new' on sink #3` (mais pas `sink-input`)
pub fn is_sink_event(line: &str) -> bool {
    line.contains(" on sink #")
}

/// Parse la sortie de `pactl list sinks`
pub fn parse_sink_list(output: &str) -> Vec<Sink> {
    #[derive(Default)]
    struct Block {
        name: Option<String>,
        description: Option<String>,
        format: Option<SampleFormat>,
        suspended: bool,
    }

    fn finish(block: Block, sinks: &mut Vec<Sink>) {
        let Some(id) = block.name else {
            return;
        };
        let name = block.description.unwrap_or_else(|| id.clone());
        let mut sink = Sink::new(id, name);
        if let Some(format) = block.format {
            sink.format = format;
        }
        sink.live = !block.suspended;
        sinks.push(sink);
    }

    let mut sinks = Vec::new();
    let mut current: Option<Block> = None;

    for line in output.lines() {
        if line.starts_with("Sink #") {
            if let Some(block) = current.take() {
                finish(block, &mut sinks);
            }
            current = Some(Block::default());
            continue;
        }
        let Some(block) = current.as_mut() else {
            continue;
        };
        let line = line.trim();
        if let Some(v) = line.strip_prefix("Name: ") {
            block.name = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("Description: ") {
            block.description = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("Sample Specification: ") {
            block.format = parse_sample_spec(v);
        } else if let Some(v) = line.strip_prefix("State: ") {
            block.suspended = v.trim() == "SUSPENDED";
        }
    }
    if let Some(block) = current.take() {
        finish(block, &mut sinks);
    }

    sinks
}

/// `s16le 2ch 44100Hz`
pub fn parse_sample_spec(spec: &str) -> Option<SampleFormat> {
    let mut parts = spec.split_whitespace();
    let bits: u8 = parts
        .next()?
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    let channels: u8 = parts.next()?.strip_suffix("ch")?.parse().ok()?;
    let rate: u32 = parts.next()?.strip_suffix("Hz")?.parse().ok()?;
    Some(SampleFormat { rate, channels, bits })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACTL_OUTPUT: &str = "Sink #0
\tState: SUSPENDED
\tName: alsa_output.pci-0000_00_1f.3.analog-stereo
\tDescription: Built-in Audio Analog Stereo
\tDriver: module-alsa-card.c
\tSample Specification: s16le 2ch 44100Hz
\tChannel Map: front-left,front-right
\tProperties:
\t\tdevice.description = \"Built-in Audio\"

Sink #3
\tState: RUNNING
\tName: living_room
\tDescription: Living Room
\tSample Specification: s24le 2ch 48000Hz
";

    #[test]
    fn test_parse_sink_list() {
        let sinks = parse_sink_list(PACTL_OUTPUT);
        assert_eq!(sinks.len(), 2);

        assert_eq!(sinks[0].id.as_str(), "alsa_output.pci-0000_00_1f.3.analog-stereo");
        assert_eq!(sinks[0].name, "Built-in Audio Analog Stereo");
        assert_eq!(sinks[0].format, SampleFormat::default());
        assert!(!sinks[0].live);

        assert_eq!(sinks[1].name, "Living Room");
        assert_eq!(
            sinks[1].format,
            SampleFormat {
                rate: 48_000,
                channels: 2,
                bits: 24
            }
        );
        assert!(sinks[1].live);
    }

    #[test]
    fn test_parse_sample_spec() {
        assert_eq!(
            parse_sample_spec("float32le 1ch 22050Hz"),
            Some(SampleFormat {
                rate: 22_050,
                channels: 1,
                bits: 32
            })
        );
        assert_eq!(parse_sample_spec("garbage"), None);
    }

    #[test]
    fn test_sink_events() {
        assert!(is_sink_event("Event 'new' on sink #4"));
        assert!(is_sink_event("Event 'remove' on sink #4"));
        assert!(!is_sink_event("Event 'change' on sink-input #12"));
        assert!(!is_sink_event("Event 'change' on server #-1"));
    }

    #[test]
    fn test_diff_sinks() {
        let mut a = Sink::new("a", "A");
        let b = Sink::new("b", "B");
        let known: BTreeMap<SinkId, Sink> =
            [a.clone(), b.clone()].into_iter().map(|s| (s.id.clone(), s)).collect();

        a.format.rate = 48_000;
        let c = Sink::new("c", "C");
        let changes = diff_sinks(&known, &[a.clone(), c.clone()]);

        assert_eq!(
            changes,
            vec![
                SinkChange::Updated {
                    id: a.id.clone(),
                    format: a.format
                },
                SinkChange::Added(c),
                SinkChange::Removed(b.id),
            ]
        );
    }
}
