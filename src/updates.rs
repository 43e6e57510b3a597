// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Decoding of live update messages.
//!
//! A message either decodes completely and is published whole, or it
//! is dropped with a warning and nothing changes.  The render loop only
//! ever sees values that made it through here.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::colormap::Colormap;
use crate::errors::{RenderError, Result};
use crate::kernel::FractalParameters;
use crate::snapshot::SharedInputs;

/// Thirteen positional coefficients.  Anything else is rejected whole.
pub fn decode_parameters(values: &[f32]) -> Result<FractalParameters> {
    let parameters = FractalParameters::from_slice(values)?;
    parameters
        .validate()
        .map_err(|e| RenderError::MalformedUpdate(e.to_string()))?;
    Ok(parameters)
}

fn floats(blob: &[u8]) -> Result<Vec<[f32; 3]>> {
    if blob.len() % 12 != 0 {
        return Err(RenderError::MalformedUpdate(format!(
            "{} bytes is not a whole number of float triples",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(12)
        .map(|triple| {
            let f = |i: usize| {
                f32::from_le_bytes([triple[i], triple[i + 1], triple[i + 2], triple[i + 3]])
            };
            [f(0), f(4), f(8)]
        })
        .collect())
}

/// Three blobs of little-endian `f32` triples, one per band.  The stop
/// count follows from the blob size.
pub fn decode_channel_colormap(blobs: [&[u8]; 3]) -> Result<Colormap> {
    Colormap::from_channels([floats(blobs[0])?, floats(blobs[1])?, floats(blobs[2])?])
}

/// One blob of RGBA byte quadruples.
pub fn decode_packed_colormap(blob: &[u8]) -> Result<Colormap> {
    if blob.len() % 4 != 0 {
        return Err(RenderError::MalformedUpdate(format!(
            "{} bytes is not a whole number of RGBA stops",
            blob.len()
        )));
    }
    Colormap::from_packed(
        blob.chunks_exact(4)
            .map(|s| [s[0], s[1], s[2], s[3]])
            .collect(),
    )
}

/// A live update, as it arrives from a transport.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateMessage {
    /// Raw coefficients.
    Parameters(Vec<f32>),
    /// A named parameter preset.
    Preset(String),
    /// Three channel blobs.
    ChannelColormap([Vec<u8>; 3]),
    /// One packed blob.
    PackedColormap(Vec<u8>),
    /// A built-in colormap.
    NamedColormap(String),
}

impl FromStr for UpdateMessage {
    type Err = RenderError;

    /// The line protocol: `params <13 floats>`, `preset <name>` or
    /// `colormap <name>`.
    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words
            .next()
            .ok_or_else(|| RenderError::MalformedUpdate("empty line".to_string()))?;
        let rest: Vec<&str> = words.collect();
        let single = |rest: &[&str]| match rest {
            [name] => Ok(name.to_string()),
            _ => Err(RenderError::MalformedUpdate(format!(
                "{} takes exactly one name",
                command
            ))),
        };
        match command {
            "params" => rest
                .iter()
                .map(|w| {
                    w.parse::<f32>().map_err(|_| {
                        RenderError::MalformedUpdate(format!("{} is not a number", w))
                    })
                })
                .collect::<Result<Vec<f32>>>()
                .map(UpdateMessage::Parameters),
            "preset" => single(&rest).map(UpdateMessage::Preset),
            "colormap" => single(&rest).map(UpdateMessage::NamedColormap),
            other => Err(RenderError::MalformedUpdate(format!(
                "unknown command {}",
                other
            ))),
        }
    }
}

/// What a decoded message turns into.
enum Decoded {
    Parameters(FractalParameters),
    Colormap(Colormap),
}

fn decode(message: &UpdateMessage) -> Result<Decoded> {
    Ok(match message {
        UpdateMessage::Parameters(values) => Decoded::Parameters(decode_parameters(values)?),
        UpdateMessage::Preset(name) => Decoded::Parameters(FractalParameters::preset(name)?),
        UpdateMessage::ChannelColormap([a, b, c]) => {
            Decoded::Colormap(decode_channel_colormap([a, b, c])?)
        }
        UpdateMessage::PackedColormap(blob) => Decoded::Colormap(decode_packed_colormap(blob)?),
        UpdateMessage::NamedColormap(name) => Decoded::Colormap(Colormap::named(name)?),
    })
}

/// The producer side: decodes messages and publishes the good ones.
#[derive(Clone)]
pub struct Updater {
    shared: Arc<SharedInputs>,
}

impl Updater {
    /// Publishes into `shared`.
    pub fn new(shared: Arc<SharedInputs>) -> Self {
        Updater { shared }
    }

    /// Applies one message.  Returns false, after logging, when the
    /// message was dropped.
    pub fn apply(&self, message: &UpdateMessage) -> bool {
        match decode(message) {
            Ok(Decoded::Parameters(p)) => {
                if self.shared.parameters.publish(p) {
                    debug!("unread parameters replaced");
                }
                true
            }
            Ok(Decoded::Colormap(c)) => {
                if self.shared.colormap.publish(c) {
                    debug!("unread colormap replaced");
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "update dropped");
                false
            }
        }
    }

    /// Parses and applies one line of the text protocol.  Blank lines
    /// are ignored.
    pub fn apply_line(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }
        match line.parse::<UpdateMessage>() {
            Ok(message) => self.apply(&message),
            Err(e) => {
                warn!(error = %e, line, "update dropped");
                false
            }
        }
    }
}
