//! Outbound message assembly.
//!
//! A message payload is the JSON command text, a NUL, the binary block and a
//! closing NUL. The JSON always carries `cmdName`, `msgIdx` and `dataLen`.

use hdlc_link::{HdlcEncoder, LinkSink};
use serde_json::{Map, Value};

const LOG_TARGET: &str = "CmdHandler";

/// Correlation index of messages that answer no request.
pub const UNNUMBERED: u32 = u32::MAX;

/// Name of the relay envelope.
pub const RELAY_CMD: &str = "rdp";

/// Build one message payload.
///
/// `msg_idx` of `None` leaves the index out, which is how a relayed inner
/// message without its own index is carried.
#[must_use]
pub fn message_payload(
    name: &str,
    body: &Map<String, Value>,
    msg_idx: Option<u32>,
    bin: &[u8],
) -> Option<Vec<u8>> {
    let mut json = Map::new();
    json.insert("cmdName".into(), name.into());
    json.extend(body.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(idx) = msg_idx {
        json.insert("msgIdx".into(), idx.into());
    }
    json.insert("dataLen".into(), bin.len().into());
    let mut payload = match serde_json::to_vec(&Value::Object(json)) {
        Ok(text) => text,
        Err(e) => {
            log::warn!(target: LOG_TARGET, "cannot serialise {name}: {e}");
            return None;
        }
    };
    payload.push(0);
    payload.extend_from_slice(bin);
    payload.push(0);
    Some(payload)
}

/// Frames and sends messages to the host.
pub struct Outbound {
    sink: Box<dyn LinkSink>,
    encoder: HdlcEncoder,
    max_payload: usize,
    frame: Vec<u8>,
    dropped: u64,
}

impl Outbound {
    #[must_use]
    pub fn new(sink: Box<dyn LinkSink>, max_payload: usize) -> Self {
        Self {
            sink,
            encoder: HdlcEncoder::new(),
            max_payload,
            frame: Vec::new(),
            dropped: 0,
        }
    }

    /// Free space in the transmit path.
    #[must_use]
    pub fn tx_available(&self) -> usize {
        self.sink.tx_available()
    }

    /// Messages dropped for being too large.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn send_message(
        &mut self,
        name: &str,
        body: &Map<String, Value>,
        msg_idx: u32,
        bin: &[u8],
    ) -> bool {
        match message_payload(name, body, Some(msg_idx), bin) {
            Some(payload) => self.send_payload(name, &payload),
            None => false,
        }
    }

    /// Push a notice that answers no request. It travels in the relay
    /// envelope so relay-only listeners see it too.
    pub fn send_unnumbered(&mut self, name: &str, body: &Map<String, Value>) -> bool {
        self.send_relay(name, body, Some(UNNUMBERED), &[])
    }

    /// Send a message inside a relay envelope. The envelope carries the
    /// inner index, or the unnumbered sentinel when there is none.
    pub fn send_relay(
        &mut self,
        name: &str,
        body: &Map<String, Value>,
        msg_idx: Option<u32>,
        bin: &[u8],
    ) -> bool {
        let Some(inner) = message_payload(name, body, msg_idx, bin) else {
            return false;
        };
        let outer_idx = msg_idx.unwrap_or(UNNUMBERED);
        match message_payload(RELAY_CMD, &Map::new(), Some(outer_idx), &inner) {
            Some(payload) => self.send_payload(name, &payload),
            None => false,
        }
    }

    fn send_payload(&mut self, name: &str, payload: &[u8]) -> bool {
        if payload.len() > self.max_payload {
            self.dropped += 1;
            log::warn!(
                target: LOG_TARGET,
                "{name} dropped: {} bytes exceeds {}",
                payload.len(),
                self.max_payload
            );
            return false;
        }
        self.frame.clear();
        self.encoder.encode(payload, &mut self.frame);
        self.sink.put_bytes(&self.frame);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdlc_link::{CaptureSink, HdlcDecoder};
    use serde_json::json;

    fn decode_all(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut decoder = HdlcDecoder::new();
        let mut frames = Vec::new();
        for &b in bytes {
            if let Some(frame) = decoder.push_byte(b) {
                frames.push(frame.to_vec());
            }
        }
        frames
    }

    fn split(payload: &[u8]) -> (Value, &[u8]) {
        let nul = payload.iter().position(|&b| b == 0).unwrap();
        let json = serde_json::from_slice(&payload[..nul]).unwrap();
        (json, &payload[nul + 1..payload.len() - 1])
    }

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn message_carries_index_and_length() {
        let sink = CaptureSink::new();
        let mut out = Outbound::new(Box::new(sink.clone()), 12_000);
        assert!(out.send_message("RdResp", &body(json!({"err": "ok"})), 3, &[1, 2]));
        let frames = decode_all(&sink.take());
        assert_eq!(frames.len(), 1);
        let (json, bin) = split(&frames[0]);
        assert_eq!(json, json!({"cmdName": "RdResp", "err": "ok", "msgIdx": 3, "dataLen": 2}));
        assert_eq!(bin, &[1, 2]);
    }

    #[test]
    fn command_name_comes_first() {
        let payload = message_payload("log", &body(json!({"msg": "x"})), Some(UNNUMBERED), &[]).unwrap();
        let text = String::from_utf8(payload[..payload.len() - 2].to_vec()).unwrap();
        assert!(text.starts_with(r#"{"cmdName":"log","msg":"x""#), "{text}");
    }

    #[test]
    fn relay_wraps_inner_message_under_its_index() {
        let sink = CaptureSink::new();
        let mut out = Outbound::new(Box::new(sink.clone()), 12_000);
        out.send_relay("getRegsResp", &body(json!({"err": "ok"})), Some(7), &[]);
        let frames = decode_all(&sink.take());
        let (outer, inner) = split(&frames[0]);
        assert_eq!(outer["cmdName"], "rdp");
        assert_eq!(outer["msgIdx"], 7);
        assert_eq!(outer["dataLen"], inner.len());
        let (inner_json, _) = split(inner);
        assert_eq!(inner_json["cmdName"], "getRegsResp");
        assert_eq!(inner_json["msgIdx"], 7);
    }

    #[test]
    fn oversize_payload_dropped() {
        let sink = CaptureSink::new();
        let mut out = Outbound::new(Box::new(sink.clone()), 64);
        assert!(!out.send_message("big", &Map::new(), 0, &[0u8; 64]));
        assert!(sink.is_empty());
        assert_eq!(out.dropped(), 1);
    }
}
