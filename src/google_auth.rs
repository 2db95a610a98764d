//! Autenticación con cuenta de servicio de Google (OAuth2, JWT bearer grant).
//!
//! El token se firma con RS256 y se reutiliza hasta un minuto antes de caducar.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::GoogleCredentials;

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct ServiceAccountAuth {
    http: reqwest::Client,
    client_email: String,
    key_id: Option<String>,
    encoding_key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(http: reqwest::Client, credentials: &GoogleCredentials) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())
            .context("GOOGLE_PRIVATE_KEY no es una clave RSA PEM válida")?;
        info!(
            "Cuenta de servicio {} (proyecto {}) preparada",
            credentials.client_email, credentials.project_id
        );
        Ok(Self {
            http,
            client_email: credentials.client_email.clone(),
            key_id: credentials.private_key_id.clone(),
            encoding_key,
            token: Mutex::new(None),
        })
    }

    /// Token de acceso vigente; lo renueva si no hay ninguno o está a punto de caducar.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.request_token().await?;
        let value = fresh.access_token.clone();
        *cached = Some(CachedToken {
            value: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        Ok(value)
    }

    async fn request_token(&self) -> Result<TokenResponse> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: SCOPES,
            aud: TOKEN_URI,
            iat: now,
            exp: now + 3600,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();
        let assertion = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .context("No se pudo firmar el JWT de la cuenta de servicio")?;

        debug!("Solicitando token OAuth2 para {}", self.client_email);
        let response = self
            .http
            .post(TOKEN_URI)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("Error contactando con el servidor de tokens de Google")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Google rechazó la autenticación ({status}): {body}"));
        }
        response
            .json::<TokenResponse>()
            .await
            .context("Respuesta de token de Google ilegible")
    }
}

/// Convierte una respuesta no-2xx de una API de Google en error con cuerpo.
pub async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("{what} falló ({status}): {body}"))
}
