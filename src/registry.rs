use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::{error::GateError, handler::ActionHandler};

/// Write-once-per-id handler registry. Handlers live for the process.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn ActionHandler>) -> Result<(), GateError> {
        let handler_id = handler.handler_id().to_string();
        if handler_id.is_empty() {
            return Err(GateError::EmptyHandlerId);
        }

        let mut seen = HashSet::new();
        for def in handler.permissions() {
            if !seen.insert(def.name.as_str()) {
                return Err(GateError::DuplicatePermission {
                    handler_id,
                    name: def.name.clone(),
                });
            }
        }

        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| GateError::internal("handler registry lock poisoned"))?;
        if handlers.contains_key(&handler_id) {
            return Err(GateError::DuplicateHandler(handler_id));
        }
        handlers.insert(handler_id, handler);
        Ok(())
    }

    pub fn get(&self, handler_id: &str) -> Result<Arc<dyn ActionHandler>, GateError> {
        self.handlers
            .read()
            .map_err(|_| GateError::internal("handler registry lock poisoned"))?
            .get(handler_id)
            .cloned()
            .ok_or_else(|| GateError::UnknownHandler(handler_id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<Arc<dyn ActionHandler>>, GateError> {
        Ok(self
            .handlers
            .read()
            .map_err(|_| GateError::internal("handler registry lock poisoned"))?
            .values()
            .cloned()
            .collect())
    }
}
