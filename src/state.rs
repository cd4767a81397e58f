//! Local mirror of the router's routing and label tables.
//!
//! The tables are written only while folding a completed protocol section,
//! under a single write lock, so a reader can never observe a half-applied
//! section. Readers get cloned snapshots, never live references.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::events::{HubEvent, PortKind};
use crate::protocol::{SECTION_INPUT_LABELS, SECTION_OUTPUT_LABELS, SECTION_ROUTING};

// Both label tables, as carried by the labels snapshot event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelTables {
    pub inputs: HashMap<u32, String>,
    pub outputs: HashMap<u32, String>,
}

#[derive(Debug, Default)]
struct DeviceState {
    routes: HashMap<u32, u32>,
    labels: LabelTables,
}

// Authoritative in-memory state, mutated only by `apply_section`
#[derive(Debug)]
pub(crate) struct StateStore {
    inner: RwLock<DeviceState>,
    video_inputs: u32,
    video_outputs: u32,
    max_label_chars: usize,
}

impl StateStore {
    pub(crate) fn new(cfg: &EngineConfig) -> Self {
        Self {
            inner: RwLock::new(DeviceState::default()),
            video_inputs: cfg.video_inputs,
            video_outputs: cfg.video_outputs,
            max_label_chars: cfg.max_label_chars,
        }
    }

    pub(crate) fn routes(&self) -> HashMap<u32, u32> {
        self.inner.read().unwrap().routes.clone()
    }

    pub(crate) fn labels(&self) -> LabelTables {
        self.inner.read().unwrap().labels.clone()
    }

    pub(crate) fn label(&self, kind: PortKind, index: u32) -> Option<String> {
        let state = self.inner.read().unwrap();
        let table = match kind {
            PortKind::Input => &state.labels.inputs,
            PortKind::Output => &state.labels.outputs,
        };
        table.get(&index).cloned()
    }

    // Fold one completed section into the tables, returning the events the
    // caller should publish. Unknown sections are ignored.
    pub(crate) fn apply_section(&self, name: &str, lines: &[String]) -> Vec<HubEvent> {
        match name {
            SECTION_ROUTING => self.apply_routing(lines),
            SECTION_INPUT_LABELS => self.apply_labels(PortKind::Input, lines),
            SECTION_OUTPUT_LABELS => self.apply_labels(PortKind::Output, lines),
            _ => {
                log::debug!("ignoring unknown section {:?}", name);
                Vec::new()
            }
        }
    }

    fn apply_routing(&self, lines: &[String]) -> Vec<HubEvent> {
        let mut events = Vec::new();
        let mut state = self.inner.write().unwrap();
        for line in lines {
            let Some((output, input)) = parse_route_line(line) else {
                log::warn!("skipping malformed routing line {:?}", line);
                continue;
            };
            if output >= self.video_outputs || input >= self.video_inputs {
                log::warn!("skipping out-of-range route {} -> {}", output, input);
                continue;
            }
            state.routes.insert(output, input);
            events.push(HubEvent::RouteChanged { output, input });
        }
        events
    }

    fn apply_labels(&self, kind: PortKind, lines: &[String]) -> Vec<HubEvent> {
        let limit = match kind {
            PortKind::Input => self.video_inputs,
            PortKind::Output => self.video_outputs,
        };
        let mut events = Vec::new();
        let mut state = self.inner.write().unwrap();
        for line in lines {
            let Some((index, name)) = parse_label_line(line) else {
                log::warn!("skipping malformed {} label line {:?}", kind, line);
                continue;
            };
            if index >= limit {
                log::warn!("skipping out-of-range {} label index {}", kind, index);
                continue;
            }
            if name.chars().count() > self.max_label_chars {
                log::warn!("skipping over-length {} label for index {}", kind, index);
                continue;
            }
            let table = match kind {
                PortKind::Input => &mut state.labels.inputs,
                PortKind::Output => &mut state.labels.outputs,
            };
            table.insert(index, name.to_string());
            events.push(HubEvent::LabelChanged {
                kind,
                index,
                label: name.to_string(),
            });
        }
        // Consumers that want the whole picture rather than a replay of
        // individual changes rely on this trailing snapshot.
        events.push(HubEvent::LabelsSnapshot {
            labels: state.labels.clone(),
        });
        events
    }
}

// `<output> <input>`, exactly two decimal fields
fn parse_route_line(line: &str) -> Option<(u32, u32)> {
    let mut fields = line.split_whitespace();
    let output = fields.next()?.parse().ok()?;
    let input = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((output, input))
}

// `<index> <rest-of-line-as-name>`; the name may contain spaces
fn parse_label_line(line: &str) -> Option<(u32, &str)> {
    let (index, rest) = line.split_once(char::is_whitespace)?;
    let index = index.parse().ok()?;
    let name = rest.trim();
    if name.is_empty() {
        return None;
    }
    Some((index, name))
}
