//! Caché en memoria de las respuestas del panel de documentos.
//!
//! Clave `(dni, correo)`, caducidad por TTL y tope de tamaño: al superarlo se
//! expulsa la entrada insertada hace más tiempo (orden de inserción, no LRU).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

type CacheKey = (String, String);

struct CacheEntry {
    stored_at: Instant,
    payload: Value,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
}

pub struct DocumentCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl DocumentCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Devuelve la respuesta guardada si sigue dentro del TTL. Las entradas
    /// caducadas se eliminan al consultarlas.
    pub fn get(&self, dni: &str, correo: &str) -> Option<Value> {
        let key = (dni.to_string(), correo.to_string());
        let mut inner = self.lock();
        let expired = match inner.entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                return Some(entry.payload.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(&key);
            inner.order.retain(|k| k != &key);
        }
        None
    }

    pub fn insert(&self, dni: &str, correo: &str, payload: Value) {
        let key = (dni.to_string(), correo.to_string());
        let mut inner = self.lock();
        let entry = CacheEntry {
            stored_at: Instant::now(),
            payload,
        };
        if inner.entries.insert(key.clone(), entry).is_some() {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key);

        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // Un pánico con el lock tomado no deja la caché en un estado inválido.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
