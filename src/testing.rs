//! Implementaciones en memoria de los servicios externos para los tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    app_state::AppState,
    config::{AppConfig, GoogleCredentials, OrchestrationSettings},
    drive::{DocumentStore, UploadRequest},
    mailer::{ConfirmationEmail, Notifier},
    models::{file_view_url, folder_url, DriveFile, FOLDER_MIME_TYPE},
    register::DocumentUpload,
    retry::RetryPolicy,
    sheets::RecordStore,
};

pub fn test_config() -> AppConfig {
    AppConfig {
        google: GoogleCredentials {
            project_id: "proyecto".into(),
            client_email: "svc@proyecto.iam.gserviceaccount.com".into(),
            private_key: String::new(),
            private_key_id: None,
        },
        sheet_id: "hoja".into(),
        sheet_name: "Trabajadores".into(),
        parent_folder_id: "parent".into(),
        shared_drive_id: None,
        smtp: None,
        from_name: "Sistema de Gestión Documental".into(),
        from_email: None,
        app_url: "https://app.test".into(),
        server_addr: "127.0.0.1:0".into(),
        frontend_dir: None,
        max_upload_bytes: 5 * 1024 * 1024,
        expose_error_details: true,
        settings: OrchestrationSettings {
            duplicate_check_timeout: Duration::from_millis(200),
            ledger_timeout: Duration::from_millis(200),
            email_timeout: Duration::from_millis(100),
            bookkeeping_timeout: Duration::from_millis(200),
            permission_retry: RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
                attempt_timeout: Duration::from_millis(100),
            },
            permission_batch_size: 3,
            permission_batch_pause: Duration::from_millis(1),
            permission_total_timeout: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 10,
            recent_documents_limit: 10,
            max_depth: 2,
        },
    }
}

pub fn fake_state(
    records: Arc<FakeRecordStore>,
    documents: Arc<FakeDocumentStore>,
    notifier: Arc<FakeNotifier>,
) -> AppState {
    AppState::new(test_config(), records, documents, notifier)
}

pub fn jpeg(name: &str) -> DocumentUpload {
    DocumentUpload {
        bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'],
        file_name: Some(name.to_string()),
        content_type: Some("image/jpeg".to_string()),
    }
}

// --- Hoja de cálculo ---

#[derive(Default)]
pub struct FakeRecordStore {
    rows: Mutex<Vec<Vec<String>>>,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
    fail_appends: AtomicBool,
    fail_updates: AtomicBool,
}

impl FakeRecordStore {
    pub fn push_row(&self, row: Vec<String>) {
        self.rows.lock().unwrap().push(row);
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().unwrap().clone()
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

/// Índice (base 0) de una columna en notación de letras: `A` → 0, `P` → 15.
fn column_index(letters: &str) -> usize {
    letters
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .fold(0, |acc, c| acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1))
        - 1
}

/// Separa `Hoja!L2` en (columna, fila base 1).
fn parse_cell(range: &str) -> Result<(usize, usize)> {
    let cell = range.rsplit('!').next().unwrap_or(range);
    let letters: String = cell.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let number: usize = cell[letters.len()..].parse()?;
    Ok((column_index(&letters), number))
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("Sheets no disponible"));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        let columns = range.rsplit('!').next().unwrap_or(range);
        let (first, last) = columns.split_once(':').unwrap_or((columns, columns));
        let (first, last) = (column_index(first), column_index(last));

        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|row| row.iter().skip(first).take(last + 1 - first).cloned().collect())
            .collect())
    }

    async fn append_row(&self, _range: &str, row: Vec<String>) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(anyhow!("cuota de Sheets agotada"));
        }
        self.push_row(row);
        Ok(())
    }

    async fn update_ranges(&self, updates: Vec<(String, Vec<String>)>) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(anyhow!("batchUpdate rechazado"));
        }
        let mut rows = self.rows.lock().unwrap();
        for (range, values) in updates {
            let (column, number) = parse_cell(&range)?;
            let row = rows
                .get_mut(number - 1)
                .ok_or_else(|| anyhow!("fila {number} inexistente"))?;
            for (offset, value) in values.into_iter().enumerate() {
                let index = column + offset;
                if row.len() <= index {
                    row.resize(index + 1, String::new());
                }
                row[index] = value;
            }
        }
        Ok(())
    }
}

// --- Drive ---

struct Entry {
    file: DriveFile,
    parent: Option<String>,
}

#[derive(Default)]
pub struct FakeDocumentStore {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicUsize,
    failing_folders: Mutex<HashSet<String>>,
    failing_listings: Mutex<HashSet<String>>,
    failing_upload_prefixes: Mutex<Vec<String>>,
    fail_permissions: AtomicBool,
    hang_permissions_after: Mutex<Option<usize>>,
    list_calls: AtomicUsize,
    permission_calls: AtomicUsize,
}

impl FakeDocumentStore {
    pub fn with_parent(parent_id: &str) -> Self {
        let store = Self::default();
        store.add_folder(parent_id, "Trabajadores", None);
        store
    }

    pub fn add_folder(&self, id: &str, name: &str, parent: Option<&str>) -> String {
        self.entries.lock().unwrap().push(Entry {
            file: DriveFile {
                id: id.to_string(),
                name: name.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                web_view_link: Some(folder_url(id)),
                ..Default::default()
            },
            parent: parent.map(str::to_string),
        });
        id.to_string()
    }

    pub fn add_file(
        &self,
        id: &str,
        name: &str,
        mime_type: &str,
        parent: &str,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) {
        self.entries.lock().unwrap().push(Entry {
            file: DriveFile {
                id: id.to_string(),
                name: name.to_string(),
                mime_type: mime_type.to_string(),
                created_time: Some(created),
                modified_time: Some(modified),
                web_view_link: Some(file_view_url(id)),
                size: Some(1024),
                drive_id: None,
            },
            parent: Some(parent.to_string()),
        });
    }

    pub fn fail_folder(&self, name: &str) {
        self.failing_folders.lock().unwrap().insert(name.to_string());
    }

    pub fn fail_listing(&self, folder_id: &str) {
        self.failing_listings.lock().unwrap().insert(folder_id.to_string());
    }

    pub fn fail_uploads_starting_with(&self, prefix: &str) {
        self.failing_upload_prefixes.lock().unwrap().push(prefix.to_string());
    }

    pub fn fail_permissions(&self, fail: bool) {
        self.fail_permissions.store(fail, Ordering::SeqCst);
    }

    /// A partir de la llamada `n` (base 0) los permisos no responden.
    pub fn hang_permissions_after(&self, n: usize) {
        *self.hang_permissions_after.lock().unwrap() = Some(n);
    }

    pub fn folder_count(&self) -> usize {
        self.entries.lock().unwrap().iter().filter(|e| e.file.is_folder()).count()
    }

    pub fn child_named(&self, parent_id: &str, name: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.parent.as_deref() == Some(parent_id) && e.file.name == name)
            .map(|e| e.file.id.clone())
    }

    pub fn child_names(&self, parent_id: &str) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.parent.as_deref() == Some(parent_id))
            .map(|e| e.file.name.clone())
            .collect()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn permission_calls(&self) -> usize {
        self.permission_calls.load(Ordering::SeqCst)
    }

    fn generate_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn exists(&self, id: &str) -> bool {
        self.entries.lock().unwrap().iter().any(|e| e.file.id == id)
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn get_metadata(&self, file_id: &str) -> Result<DriveFile> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.file.id == file_id)
            .map(|e| e.file.clone())
            .ok_or_else(|| anyhow!("File not found: {file_id}"))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile> {
        if self.failing_folders.lock().unwrap().contains(name) {
            return Err(anyhow!("rateLimitExceeded creando {name}"));
        }
        if !self.exists(parent_id) {
            return Err(anyhow!("File not found: {parent_id}"));
        }
        let id = self.generate_id("fld");
        self.add_folder(&id, name, Some(parent_id));
        self.get_metadata(&id).await
    }

    async fn find_folder(&self, parent_id: &str, name: &str, _drive_id: Option<&str>) -> Result<Option<DriveFile>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.parent.as_deref() == Some(parent_id) && e.file.is_folder() && e.file.name == name)
            .map(|e| e.file.clone()))
    }

    async fn list_children(&self, folder_id: &str, _drive_id: Option<&str>) -> Result<Vec<DriveFile>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_listings.lock().unwrap().contains(folder_id) {
            return Err(anyhow!("backendError listando {folder_id}"));
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.parent.as_deref() == Some(folder_id))
            .map(|e| e.file.clone())
            .collect())
    }

    async fn upload_file(&self, upload: UploadRequest) -> Result<DriveFile> {
        let failing = self
            .failing_upload_prefixes
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| upload.name.starts_with(prefix.as_str()));
        if failing {
            return Err(anyhow!("subida interrumpida: {}", upload.name));
        }
        let id = self.generate_id("file");
        let now = Utc::now();
        self.add_file(&id, &upload.name, &upload.mime_type, &upload.parent_id, now, now);
        self.get_metadata(&id).await
    }

    async fn grant_reader(&self, file_id: &str, _email: &str) -> Result<()> {
        let call = self.permission_calls.fetch_add(1, Ordering::SeqCst);
        let hang_after = *self.hang_permissions_after.lock().unwrap();
        if hang_after.is_some_and(|n| call >= n) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if self.fail_permissions.load(Ordering::SeqCst) {
            return Err(anyhow!("userRateLimitExceeded en {file_id}"));
        }
        Ok(())
    }
}

// --- Correo ---

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<ConfirmationEmail>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<ConfirmationEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_confirmation(&self, email: &ConfirmationEmail) -> Result<String> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("535 autenticación SMTP rechazada"));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(format!("<{}@test>", self.sent.lock().unwrap().len()))
    }
}
