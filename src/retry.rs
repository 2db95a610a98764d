//! Política de reintentos y carreras contra timeout para las llamadas
//! externas que no están en el camino crítico (permisos, Sheets, correo...).

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::warn;

/// Número de intentos, espera entre intentos y timeout de cada intento.
///
/// La espera crece linealmente: `delay * intento`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Ejecuta `op` hasta `max_attempts` veces. Devuelve el último error si
    /// ningún intento tiene éxito.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = anyhow!("{label}: sin intentos");

        for attempt in 1..=attempts {
            match within(self.attempt_timeout, op()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!("{label}: intento {attempt}/{attempts} fallido: {err:#}");
                    last_error = err;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.delay * attempt).await;
            }
        }

        Err(last_error.context(format!("{label}: agotados {attempts} intentos")))
    }
}

/// Corre `fut` contra un timeout; perder la carrera se traduce en error.
pub async fn within<T, Fut>(limit: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("timeout tras {} ms", limit.as_millis())),
    }
}
