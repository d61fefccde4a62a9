//! Value codecs: a per-log registry mapping an `i8` type tag to an
//! encode/decode pair. At the storage boundary values are always bytes;
//! polymorphism lives strictly in this lookup.

use crate::error::LwsError;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Type tag of raw byte payloads; no codec lookup happens for it. Tags at or
/// below this value are reserved.
pub const RAW_CODER_TYPE: i8 = 0;

/// Encodes and decodes one value type, selected by its tag.
pub trait Coder: Send + Sync {
    /// The tag this coder serves; must be positive.
    fn coder_type(&self) -> i8;

    fn encode(&self, obj: &dyn Any) -> Result<Vec<u8>, LwsError>;

    fn decode(&self, data: &[u8]) -> Result<Box<dyn Any>, LwsError>;
}

/// Per-log codec registry.
#[derive(Default)]
pub(crate) struct CoderMap {
    m: Mutex<HashMap<i8, Arc<dyn Coder>>>,
}

impl CoderMap {
    pub fn register(&self, coder: Arc<dyn Coder>) -> Result<(), LwsError> {
        let typ = coder.coder_type();
        check_coder_type(typ)?;
        let mut m = self.m.lock().unwrap();
        if m.contains_key(&typ) {
            return Err(LwsError::CoderExist);
        }
        m.insert(typ, coder);
        Ok(())
    }

    /// Removing an unknown tag is a no-op.
    pub fn unregister(&self, typ: i8) -> Result<(), LwsError> {
        check_coder_type(typ)?;
        self.m.lock().unwrap().remove(&typ);
        Ok(())
    }

    pub fn get(&self, typ: i8) -> Result<Arc<dyn Coder>, LwsError> {
        self.m
            .lock()
            .unwrap()
            .get(&typ)
            .cloned()
            .ok_or(LwsError::CoderNotExist)
    }
}

fn check_coder_type(typ: i8) -> Result<(), LwsError> {
    if typ <= RAW_CODER_TYPE {
        return Err(LwsError::CoderSysType);
    }
    Ok(())
}
