//! Outbound command validation and encoding.
//!
//! Pure transformation, no I/O: every operation validates against the
//! configured matrix dimensions first and only then produces the wire text.
//! Rejections are typed values, never panics, so a transport layer can map
//! them straight onto a failed request.

use std::collections::HashMap;

use thiserror::Error;

use crate::config::EngineConfig;
use crate::events::PortKind;
use crate::protocol::{SECTION_INPUT_LABELS, SECTION_OUTPUT_LABELS, SECTION_ROUTING};

// Why a command was refused before any bytes were written
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{kind} index {index} out of range (matrix has {limit} {kind}s)")]
    IndexOutOfRange { kind: PortKind, index: u32, limit: u32 },

    #[error("label must not be empty")]
    EmptyLabel,

    #[error("label exceeds {max} characters")]
    LabelTooLong { max: usize },

    #[error("no routes in range, nothing to send")]
    EmptyBatch,

    #[error("not connected or handshake incomplete")]
    NotReady,

    #[error("command queue is full")]
    QueueFull,
}

// A validated, ready-to-send protocol text block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireCommand(String);

impl WireCommand {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(text: &str) -> Self {
        Self(text.to_string())
    }
}

// Validates and encodes routing/label commands for one matrix geometry
#[derive(Debug, Clone, Copy)]
pub struct CommandEncoder {
    video_inputs: u32,
    video_outputs: u32,
    max_label_chars: usize,
}

impl CommandEncoder {
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            video_inputs: cfg.video_inputs,
            video_outputs: cfg.video_outputs,
            max_label_chars: cfg.max_label_chars,
        }
    }

    pub fn set_route(&self, output: u32, input: u32) -> Result<WireCommand, CommandError> {
        self.check_output(output)?;
        self.check_input(input)?;
        Ok(WireCommand(format!(
            "{SECTION_ROUTING}:\n{output} {input}\n\n"
        )))
    }

    // Out-of-range pairs are dropped rather than failing the batch, matching
    // the device's own tolerance; an all-dropped batch is a rejected no-op.
    pub fn set_routes(&self, routes: &HashMap<u32, u32>) -> Result<WireCommand, CommandError> {
        let mut accepted: Vec<(u32, u32)> = Vec::with_capacity(routes.len());
        for (&output, &input) in routes {
            if output >= self.video_outputs || input >= self.video_inputs {
                log::warn!("dropping out-of-range route {} -> {} from batch", output, input);
                continue;
            }
            accepted.push((output, input));
        }
        if accepted.is_empty() {
            return Err(CommandError::EmptyBatch);
        }
        accepted.sort_unstable();

        let mut text = format!("{SECTION_ROUTING}:\n");
        for (output, input) in accepted {
            text.push_str(&format!("{output} {input}\n"));
        }
        text.push('\n');
        Ok(WireCommand(text))
    }

    pub fn set_label(
        &self,
        kind: PortKind,
        index: u32,
        name: &str,
    ) -> Result<WireCommand, CommandError> {
        match kind {
            PortKind::Input => self.check_input(index)?,
            PortKind::Output => self.check_output(index)?,
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(CommandError::EmptyLabel);
        }
        if name.chars().count() > self.max_label_chars {
            return Err(CommandError::LabelTooLong {
                max: self.max_label_chars,
            });
        }
        let header = match kind {
            PortKind::Input => SECTION_INPUT_LABELS,
            PortKind::Output => SECTION_OUTPUT_LABELS,
        };
        Ok(WireCommand(format!("{header}:\n{index} {name}\n\n")))
    }

    fn check_input(&self, index: u32) -> Result<(), CommandError> {
        if index >= self.video_inputs {
            return Err(CommandError::IndexOutOfRange {
                kind: PortKind::Input,
                index,
                limit: self.video_inputs,
            });
        }
        Ok(())
    }

    fn check_output(&self, index: u32) -> Result<(), CommandError> {
        if index >= self.video_outputs {
            return Err(CommandError::IndexOutOfRange {
                kind: PortKind::Output,
                index,
                limit: self.video_outputs,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> CommandEncoder {
        CommandEncoder::new(&EngineConfig::default())
    }

    #[test]
    fn set_route_encodes_one_pair() {
        let cmd = encoder().set_route(0, 1).unwrap();
        assert_eq!(cmd.as_str(), "VIDEO OUTPUT ROUTING:\n0 1\n\n");
    }

    #[test]
    fn set_route_accepts_the_last_ports_of_the_matrix() {
        let cmd = encoder().set_route(119, 119).unwrap();
        assert_eq!(cmd.as_str(), "VIDEO OUTPUT ROUTING:\n119 119\n\n");
    }

    #[test]
    fn set_route_rejects_out_of_range_indices() {
        assert_eq!(
            encoder().set_route(120, 0),
            Err(CommandError::IndexOutOfRange {
                kind: PortKind::Output,
                index: 120,
                limit: 120
            })
        );
        assert_eq!(
            encoder().set_route(0, 120),
            Err(CommandError::IndexOutOfRange {
                kind: PortKind::Input,
                index: 120,
                limit: 120
            })
        );
    }

    #[test]
    fn set_routes_encodes_pairs_in_output_order() {
        let routes = HashMap::from([(10, 20), (0, 2), (1, 3)]);
        let cmd = encoder().set_routes(&routes).unwrap();
        assert_eq!(cmd.as_str(), "VIDEO OUTPUT ROUTING:\n0 2\n1 3\n10 20\n\n");
    }

    #[test]
    fn set_routes_drops_out_of_range_pairs() {
        let routes = HashMap::from([(0, 2), (500, 3)]);
        let cmd = encoder().set_routes(&routes).unwrap();
        assert_eq!(cmd.as_str(), "VIDEO OUTPUT ROUTING:\n0 2\n\n");
    }

    #[test]
    fn an_all_dropped_batch_is_rejected() {
        let routes = HashMap::from([(500, 3), (0, 900)]);
        assert_eq!(encoder().set_routes(&routes), Err(CommandError::EmptyBatch));
    }

    #[test]
    fn set_label_trims_and_encodes() {
        let cmd = encoder()
            .set_label(PortKind::Input, 4, "  Camera 5  ")
            .unwrap();
        assert_eq!(cmd.as_str(), "INPUT LABELS:\n4 Camera 5\n\n");

        let cmd = encoder().set_label(PortKind::Output, 0, "Program").unwrap();
        assert_eq!(cmd.as_str(), "OUTPUT LABELS:\n0 Program\n\n");
    }

    #[test]
    fn set_label_rejects_empty_and_over_length_names() {
        assert_eq!(
            encoder().set_label(PortKind::Input, 0, "   "),
            Err(CommandError::EmptyLabel)
        );
        assert_eq!(
            encoder().set_label(PortKind::Input, 0, &"x".repeat(21)),
            Err(CommandError::LabelTooLong { max: 20 })
        );
        // Exactly 20 characters is still accepted
        assert!(encoder().set_label(PortKind::Input, 0, &"x".repeat(20)).is_ok());
    }

    #[test]
    fn set_label_rejects_out_of_range_indices() {
        assert_eq!(
            encoder().set_label(PortKind::Output, 120, "Monitor"),
            Err(CommandError::IndexOutOfRange {
                kind: PortKind::Output,
                index: 120,
                limit: 120
            })
        );
    }
}
