use std::collections::VecDeque;

use nestattr_core::Value;
use nestattr_engine::{EngineError, Entity, JsonOptions, SetOptions};
use tracing::debug;

/// In-memory stand-in for a server. Requests and responses cross a
/// MessagePack wire so payloads go through a real encode/decode.
#[derive(Debug, Default)]
pub struct FakeTransport {
    responses: VecDeque<Value>,
    requests: Vec<Vec<u8>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the body of the next save response. Without one, the entity's
    /// own plain form is echoed back.
    pub fn stub_response(&mut self, body: Value) {
        self.responses.push_back(body);
    }

    /// Send the nested write payload, apply the response, then signal sync.
    pub fn save(&mut self, entity: &Entity) -> Result<(), EngineError> {
        let request = entity.to_plain(&JsonOptions::nested()).to_msgpack()?;
        self.requests.push(request);

        let body = match self.responses.pop_front() {
            Some(body) => body,
            None => entity.to_plain(&JsonOptions::default()),
        };
        let response = Value::from_msgpack(&body.to_msgpack()?)?;

        entity.set_value(response, &SetOptions::default())?;
        debug!(entity = %entity.entity_type().name(), requests = self.requests.len(), "save acknowledged");
        entity.mark_synced();
        Ok(())
    }

    /// Unsaved entities never reach the server and are not synced.
    pub fn destroy(&mut self, entity: &Entity) -> Result<(), EngineError> {
        let Some(id) = entity.id() else {
            return Ok(());
        };
        self.requests.push(id.to_msgpack()?);
        debug!(entity = %entity.entity_type().name(), "destroy acknowledged");
        entity.mark_synced();
        Ok(())
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Decoded body of the most recent request.
    pub fn last_request(&self) -> Result<Option<Value>, EngineError> {
        self.requests
            .last()
            .map(|bytes| Value::from_msgpack(bytes).map_err(EngineError::from))
            .transpose()
    }
}
