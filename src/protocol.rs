//! Wire framing for the Videohub control protocol.
//!
//! The device speaks a line-oriented text protocol with no length framing:
//! named sections terminated by a blank line, a bare `ACK` token for command
//! acknowledgement, and an `END PRELUDE:` marker closing the state dump the
//! device pushes on connect. The codec here slices that stream into frames
//! and writes encoded command blocks back out.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::WireCommand;

pub const SECTION_ROUTING: &str = "VIDEO OUTPUT ROUTING";
pub const SECTION_INPUT_LABELS: &str = "INPUT LABELS";
pub const SECTION_OUTPUT_LABELS: &str = "OUTPUT LABELS";
pub const END_PRELUDE: &str = "END PRELUDE";

const ACK_TOKEN: &[u8] = b"ACK";

// One decoded unit of device output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubFrame {
    // A complete blank-line-terminated section
    Section { name: String, lines: Vec<String> },
    // Command acknowledgement token
    Ack,
    // The `END PRELUDE:` marker; the state dump is complete
    PreludeEnd,
}

// A section whose body is still being accumulated
#[derive(Debug)]
struct PendingSection {
    name: String,
    lines: Vec<String>,
}

// Codec for `Framed<TcpStream, VideohubCodec>`. Holds the in-progress
// section between reads; an incomplete trailing line stays in the buffer.
#[derive(Debug, Default)]
pub struct VideohubCodec {
    section: Option<PendingSection>,
}

impl VideohubCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn close_section(&mut self) -> Option<HubFrame> {
        self.section
            .take()
            .map(|s| HubFrame::Section { name: s.name, lines: s.lines })
    }
}

impl Decoder for VideohubCodec {
    type Item = HubFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<HubFrame>> {
        loop {
            // The device may glue ACK tokens onto anything it sends. Outside
            // an open section those three bytes are always the token; inside
            // a section they may be label text and are left alone.
            if self.section.is_none() {
                if strip_ack(src) {
                    return Ok(Some(HubFrame::Ack));
                }
            }

            let Some(nl) = src.iter().position(|&b| b == b'\n') else {
                // No complete line yet; wait for the next read
                return Ok(None);
            };
            let line = String::from_utf8_lossy(&src[..nl]).trim().to_string();

            if let Some(name) = line.strip_suffix(':') {
                if let Some(frame) = self.close_section() {
                    // A new header without an intervening blank line closes
                    // the previous section. The header itself is left in the
                    // buffer and picked up on the next pass.
                    return Ok(Some(frame));
                }
                src.advance(nl + 1);
                if name.trim() == END_PRELUDE {
                    return Ok(Some(HubFrame::PreludeEnd));
                }
                self.section = Some(PendingSection {
                    name: name.trim().to_string(),
                    lines: Vec::new(),
                });
            } else if line.is_empty() {
                src.advance(nl + 1);
                if let Some(frame) = self.close_section() {
                    return Ok(Some(frame));
                }
            } else {
                src.advance(nl + 1);
                match &mut self.section {
                    Some(open) => open.lines.push(line),
                    None => log::debug!("ignoring line outside any section: {:?}", line),
                }
            }
        }
    }
}

impl Encoder<WireCommand> for VideohubCodec {
    type Error = io::Error;

    fn encode(&mut self, cmd: WireCommand, dst: &mut BytesMut) -> io::Result<()> {
        dst.extend_from_slice(cmd.as_str().as_bytes());
        Ok(())
    }
}

// Remove the first ACK token found in the pending region (everything up to
// the next newline, or the whole buffer if no line is complete yet).
// Returns true if a token was removed.
fn strip_ack(src: &mut BytesMut) -> bool {
    let region_end = src
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(src.len());
    let Some(pos) = src[..region_end]
        .windows(ACK_TOKEN.len())
        .position(|w| w == ACK_TOKEN)
    else {
        return false;
    };
    let tail = src.split_off(pos + ACK_TOKEN.len());
    src.truncate(pos);
    src.unsplit(tail);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(codec: &mut VideohubCodec, buf: &mut BytesMut) -> Vec<HubFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn decode_all(input: &str) -> Vec<HubFrame> {
        let mut codec = VideohubCodec::new();
        let mut buf = BytesMut::from(input);
        drain(&mut codec, &mut buf)
    }

    fn section(name: &str, lines: &[&str]) -> HubFrame {
        HubFrame::Section {
            name: name.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn decodes_a_single_section() {
        let frames = decode_all("VIDEO OUTPUT ROUTING:\n0 5\n1 6\n\n");
        assert_eq!(frames, vec![section(SECTION_ROUTING, &["0 5", "1 6"])]);
    }

    #[test]
    fn decodes_prelude_terminator_and_sections() {
        let frames = decode_all(
            "VIDEO OUTPUT ROUTING:\n0 5\n\nINPUT LABELS:\n0 Camera One\n\nEND PRELUDE:\n\n",
        );
        assert_eq!(
            frames,
            vec![
                section(SECTION_ROUTING, &["0 5"]),
                section(SECTION_INPUT_LABELS, &["0 Camera One"]),
                HubFrame::PreludeEnd,
            ]
        );
    }

    #[test]
    fn byte_at_a_time_feeding_matches_single_feed() {
        let input = "INPUT LABELS:\n0 Camera One\n1 Camera Two\n\nACKVIDEO OUTPUT ROUTING:\n3 9\n\n";
        let expected = decode_all(input);

        let mut codec = VideohubCodec::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for byte in input.as_bytes() {
            buf.extend_from_slice(&[*byte]);
            frames.extend(drain(&mut codec, &mut buf));
        }
        assert_eq!(frames, expected);
        assert!(!expected.is_empty());
    }

    #[test]
    fn ack_between_sections_is_extracted() {
        let frames = decode_all("VIDEO OUTPUT ROUTING:\n0 1\n\nACK\n\nINPUT LABELS:\n2 Deck\n\n");
        assert_eq!(
            frames,
            vec![
                section(SECTION_ROUTING, &["0 1"]),
                HubFrame::Ack,
                section(SECTION_INPUT_LABELS, &["2 Deck"]),
            ]
        );
    }

    #[test]
    fn ack_glued_to_a_header_is_extracted_first() {
        let frames = decode_all("ACKOUTPUT LABELS:\n0 Program\n\n");
        assert_eq!(
            frames,
            vec![HubFrame::Ack, section(SECTION_OUTPUT_LABELS, &["0 Program"])]
        );
    }

    #[test]
    fn ack_inside_an_open_section_body_is_untouched() {
        let frames = decode_all("INPUT LABELS:\n5 BlACK Magic\n\n");
        assert_eq!(frames, vec![section(SECTION_INPUT_LABELS, &["5 BlACK Magic"])]);
    }

    #[test]
    fn header_without_blank_line_force_closes_previous_section() {
        let frames = decode_all("VIDEO OUTPUT ROUTING:\n0 1\nINPUT LABELS:\n0 Cam\n\n");
        assert_eq!(
            frames,
            vec![
                section(SECTION_ROUTING, &["0 1"]),
                section(SECTION_INPUT_LABELS, &["0 Cam"]),
            ]
        );
    }

    #[test]
    fn incomplete_trailing_line_is_carried_to_the_next_feed() {
        let mut codec = VideohubCodec::new();
        let mut buf = BytesMut::from("VIDEO OUTPUT ROUTING:\n10 2");
        assert!(drain(&mut codec, &mut buf).is_empty());
        buf.extend_from_slice(b"0\n\n");
        assert_eq!(
            drain(&mut codec, &mut buf),
            vec![section(SECTION_ROUTING, &["10 20"])]
        );
    }

    #[test]
    fn crlf_terminated_lines_are_trimmed() {
        let frames = decode_all("VIDEO OUTPUT ROUTING:\r\n0 7\r\n\r\n");
        assert_eq!(frames, vec![section(SECTION_ROUTING, &["0 7"])]);
    }

    #[test]
    fn content_outside_a_section_is_skipped() {
        let frames = decode_all("stray noise\nVIDEO OUTPUT ROUTING:\n0 1\n\n");
        assert_eq!(frames, vec![section(SECTION_ROUTING, &["0 1"])]);
    }

    #[test]
    fn encoder_writes_the_command_text_verbatim() {
        let mut codec = VideohubCodec::new();
        let mut dst = BytesMut::new();
        let cmd = WireCommand::from_raw("VIDEO OUTPUT ROUTING:\n0 1\n\n");
        codec.encode(cmd, &mut dst).unwrap();
        assert_eq!(&dst[..], b"VIDEO OUTPUT ROUTING:\n0 1\n\n");
    }
}
