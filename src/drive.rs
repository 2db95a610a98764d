//! Almacén documental sobre Google Drive (API v3).
//!
//! Soporta unidades compartidas: con un `drive_id` los listados se hacen con
//! `corpora=drive` y todas las llamadas llevan `supportsAllDrives=true`.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::google_auth::{check_status, ServiceAccountAuth};
use crate::models::{DriveFile, FOLDER_MIME_TYPE};

const FILES_API: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FILE_FIELDS: &str = "id,name,mimeType,createdTime,modifiedTime,webViewLink,size,driveId";
const PAGE_SIZE: &str = "100";

/// Contenido binario a subir.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub name: String,
    pub parent_id: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_metadata(&self, file_id: &str) -> Result<DriveFile>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile>;

    /// Primera subcarpeta de `parent_id` con ese nombre exacto, si existe.
    async fn find_folder(&self, parent_id: &str, name: &str, drive_id: Option<&str>) -> Result<Option<DriveFile>>;

    /// Hijos directos (no borrados) de una carpeta, recorriendo todas las páginas.
    async fn list_children(&self, folder_id: &str, drive_id: Option<&str>) -> Result<Vec<DriveFile>>;

    async fn upload_file(&self, upload: UploadRequest) -> Result<DriveFile>;

    /// Comparte el fichero o carpeta con `email` en modo lectura.
    async fn grant_reader(&self, file_id: &str, email: &str) -> Result<()>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    created_time: Option<DateTime<Utc>>,
    modified_time: Option<DateTime<Utc>>,
    web_view_link: Option<String>,
    /// Drive devuelve el tamaño como cadena.
    size: Option<String>,
    drive_id: Option<String>,
}

impl From<ApiFile> for DriveFile {
    fn from(file: ApiFile) -> Self {
        DriveFile {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            created_time: file.created_time,
            modified_time: file.modified_time,
            web_view_link: file.web_view_link,
            size: file.size.and_then(|s| s.parse().ok()),
            drive_id: file.drive_id,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<ApiFile>,
    next_page_token: Option<String>,
}

pub struct DriveClient {
    http: reqwest::Client,
    auth: Arc<ServiceAccountAuth>,
}

impl DriveClient {
    pub fn new(http: reqwest::Client, auth: Arc<ServiceAccountAuth>) -> Self {
        Self { http, auth }
    }

    async fn query(&self, q: &str, drive_id: Option<&str>) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.auth.access_token().await?;
            let url = list_url(q, drive_id, page_token.as_deref())?;

            let response = self
                .http
                .get(url)
                .bearer_auth(token)
                .send()
                .await
                .context("Error listando ficheros de Drive")?;
            let page: FileList = check_status(response, "Listado de Drive")
                .await?
                .json()
                .await
                .context("Listado de Drive ilegible")?;

            files.extend(page.files.into_iter().map(DriveFile::from));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl DocumentStore for DriveClient {
    async fn get_metadata(&self, file_id: &str) -> Result<DriveFile> {
        let token = self.auth.access_token().await?;
        let mut url = Url::parse(&format!("{FILES_API}/{file_id}"))?;
        url.query_pairs_mut()
            .append_pair("fields", FILE_FIELDS)
            .append_pair("supportsAllDrives", "true");

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Error leyendo metadatos de {file_id}"))?;
        let file: ApiFile = check_status(response, "Metadatos de Drive")
            .await?
            .json()
            .await
            .context("Metadatos de Drive ilegibles")?;
        Ok(file.into())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile> {
        let token = self.auth.access_token().await?;
        let mut url = Url::parse(FILES_API)?;
        url.query_pairs_mut()
            .append_pair("fields", FILE_FIELDS)
            .append_pair("supportsAllDrives", "true");
        debug!("Drive: creando carpeta '{name}' en {parent_id}");

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }))
            .send()
            .await
            .with_context(|| format!("Error creando la carpeta '{name}'"))?;
        let file: ApiFile = check_status(response, "Creación de carpeta")
            .await?
            .json()
            .await
            .context("Respuesta de creación de carpeta ilegible")?;
        Ok(file.into())
    }

    async fn find_folder(&self, parent_id: &str, name: &str, drive_id: Option<&str>) -> Result<Option<DriveFile>> {
        let q = format!(
            "'{}' in parents and mimeType='{FOLDER_MIME_TYPE}' and name='{}' and trashed=false",
            escape_query(parent_id),
            escape_query(name)
        );
        Ok(self.query(&q, drive_id).await?.into_iter().next())
    }

    async fn list_children(&self, folder_id: &str, drive_id: Option<&str>) -> Result<Vec<DriveFile>> {
        let q = format!("'{}' in parents and trashed=false", escape_query(folder_id));
        self.query(&q, drive_id).await
    }

    async fn upload_file(&self, upload: UploadRequest) -> Result<DriveFile> {
        let token = self.auth.access_token().await?;
        let mut url = Url::parse(UPLOAD_API)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("fields", FILE_FIELDS)
            .append_pair("supportsAllDrives", "true");

        let boundary = format!("upload-{}", Uuid::new_v4().simple());
        let metadata = json!({ "name": upload.name, "parents": [upload.parent_id] });
        let body = multipart_related_body(&boundary, &metadata, &upload.mime_type, &upload.bytes);
        debug!("Drive: subiendo '{}' ({} bytes)", upload.name, upload.bytes.len());

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .with_context(|| format!("Error subiendo '{}'", upload.name))?;
        let file: ApiFile = check_status(response, "Subida a Drive")
            .await?
            .json()
            .await
            .context("Respuesta de subida ilegible")?;
        Ok(file.into())
    }

    async fn grant_reader(&self, file_id: &str, email: &str) -> Result<()> {
        let token = self.auth.access_token().await?;
        let mut url = Url::parse(&format!("{FILES_API}/{file_id}/permissions"))?;
        url.query_pairs_mut()
            .append_pair("sendNotificationEmail", "false")
            .append_pair("supportsAllDrives", "true");

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "type": "user", "role": "reader", "emailAddress": email }))
            .send()
            .await
            .with_context(|| format!("Error compartiendo {file_id}"))?;
        check_status(response, "Permiso de Drive").await?;
        Ok(())
    }
}

/// URL de `files.list`. Con `drive_id` la consulta se limita a esa unidad
/// compartida.
fn list_url(q: &str, drive_id: Option<&str>, page_token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(FILES_API)?;
    {
        let mut params = url.query_pairs_mut();
        params
            .append_pair("q", q)
            .append_pair("fields", &format!("nextPageToken,files({FILE_FIELDS})"))
            .append_pair("orderBy", "createdTime desc")
            .append_pair("pageSize", PAGE_SIZE)
            .append_pair("supportsAllDrives", "true")
            .append_pair("includeItemsFromAllDrives", "true");
        if let Some(drive_id) = drive_id {
            params.append_pair("corpora", "drive").append_pair("driveId", drive_id);
        }
        if let Some(page) = page_token {
            params.append_pair("pageToken", page);
        }
    }
    Ok(url)
}

/// Cuerpo `multipart/related`: metadatos JSON seguidos del contenido.
fn multipart_related_body(boundary: &str, metadata: &serde_json::Value, mime_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Escapa comillas y barras para las consultas `q` de Drive.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Extrae el id de carpeta de una URL `.../folders/<id>` (con o sin query).
pub fn folder_id_from_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let segment = match Url::parse(raw) {
        Ok(url) => url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string)),
        // Se admite también un id suelto.
        Err(_) => Some(raw.to_string()),
    };
    segment
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .ok_or_else(|| anyhow!("URL de carpeta inválida: '{raw}'"))
}
