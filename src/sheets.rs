//! Registro de trabajadores sobre Google Sheets (API v4, `spreadsheets.values`).

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::google_auth::{check_status, ServiceAccountAuth};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets/";

/// Almacén de filas direccionado por rangos estilo `"Hoja!A:P"`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Lee todas las filas del rango (las celdas vacías finales pueden faltar).
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>>;

    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<()>;

    /// Sobrescribe varios rangos en una sola llamada.
    async fn update_ranges(&self, updates: Vec<(String, Vec<String>)>) -> Result<()>;
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct SheetsClient {
    http: reqwest::Client,
    auth: Arc<ServiceAccountAuth>,
    spreadsheet_id: String,
}

impl SheetsClient {
    pub fn new(http: reqwest::Client, auth: Arc<ServiceAccountAuth>, spreadsheet_id: String) -> Self {
        Self {
            http,
            auth,
            spreadsheet_id,
        }
    }

    /// `.../spreadsheets/{id}/values/{segmento}` con el rango bien escapado.
    fn values_url(&self, segment: &str) -> Result<Url> {
        let mut url = Url::parse(SHEETS_API)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("URL base de Sheets inválida"))?
            .pop_if_empty()
            .push(&self.spreadsheet_id)
            .push("values")
            .push(segment);
        Ok(url)
    }

    fn batch_update_url(&self) -> Result<Url> {
        let mut url = Url::parse(SHEETS_API)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("URL base de Sheets inválida"))?
            .pop_if_empty()
            .push(&self.spreadsheet_id)
            .push("values:batchUpdate");
        Ok(url)
    }
}

#[async_trait]
impl RecordStore for SheetsClient {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let token = self.auth.access_token().await?;
        let url = self.values_url(range)?;
        debug!("Sheets GET {range}");

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Error leyendo {range} de Sheets"))?;
        let body: ValueRange = check_status(response, "Lectura de Sheets")
            .await?
            .json()
            .await
            .context("Respuesta de Sheets ilegible")?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    async fn append_row(&self, range: &str, row: Vec<String>) -> Result<()> {
        let token = self.auth.access_token().await?;
        let mut url = self.values_url(&format!("{range}:append"))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        debug!("Sheets APPEND {range}");

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .with_context(|| format!("Error añadiendo fila a {range}"))?;
        check_status(response, "Escritura en Sheets").await?;
        Ok(())
    }

    async fn update_ranges(&self, updates: Vec<(String, Vec<String>)>) -> Result<()> {
        let token = self.auth.access_token().await?;
        let data: Vec<Value> = updates
            .into_iter()
            .map(|(range, row)| json!({ "range": range, "values": [row] }))
            .collect();

        let response = self
            .http
            .post(self.batch_update_url()?)
            .bearer_auth(token)
            .json(&json!({ "valueInputOption": "USER_ENTERED", "data": data }))
            .send()
            .await
            .context("Error en batchUpdate de Sheets")?;
        check_status(response, "Actualización de Sheets").await?;
        Ok(())
    }
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
