//! Alta de un trabajador: validación, comprobación de duplicados, creación de
//! la carpeta y sus subcarpetas, subida del DNI, permisos, fila en la hoja y
//! correo de confirmación.
//!
//! Una vez creada la carpeta raíz el alta siempre termina en 200: cada paso
//! posterior informa de su resultado por separado en la respuesta.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{Local, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    config::AppConfig,
    drive::{DocumentStore, UploadRequest},
    error::ApiError,
    mailer::{ConfirmationEmail, Notifier},
    models::{folder_url, file_view_url, WorkerRecord, EXPECTED_FOLDERS, PERSONAL_DOCUMENTS_FOLDER, STATUS_ACTIVE},
    retry::{within, RetryPolicy},
    sheets::RecordStore,
};

const FRONT_FIELD: &str = "dniDelante";
const BACK_FIELD: &str = "dniDetras";

// --- Entrada ---

/// Imagen recibida en el formulario.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpload {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

/// Formulario tal como llega, antes de validar.
#[derive(Debug, Clone, Default)]
pub struct RegistrationSubmission {
    pub fields: HashMap<String, String>,
    pub dni_delante: Option<DocumentUpload>,
    pub dni_detras: Option<DocumentUpload>,
}

/// Alta validada: todos los campos presentes y ambas imágenes no vacías.
#[derive(Debug, Clone)]
pub struct NewWorker {
    pub nombre: String,
    pub dni: String,
    pub correo: String,
    pub telefono: String,
    pub direccion: String,
    pub empresa: String,
    pub talla: String,
    pub dni_delante: DocumentUpload,
    pub dni_detras: DocumentUpload,
}

impl RegistrationSubmission {
    fn field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Dirección completa; si no viene, se compone con calle, número, código
    /// postal, localidad y provincia.
    fn address(&self) -> Option<String> {
        if let Some(direccion) = self.field("direccion") {
            return Some(direccion);
        }
        let calle = self.field("calle")?;
        let mut first = calle;
        if let Some(numero) = self.field("numero") {
            first = format!("{first} {numero}");
        }
        let second = [self.field("codigoPostal"), self.field("localidad")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        let parts: Vec<String> = [Some(first), Some(second), self.field("provincia")]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();
        Some(parts.join(", "))
    }

    /// Falla antes de cualquier llamada externa, enumerando lo que falta.
    pub fn validate(self) -> Result<NewWorker, ApiError> {
        let mut missing = Vec::new();
        let mut take = |name: &str, value: Option<String>| {
            if value.is_none() {
                missing.push(name.to_string());
            }
            value.unwrap_or_default()
        };

        let nombre = take("nombre", self.field("nombre"));
        let dni = take("dni", self.field("dni"));
        let correo = take("correo", self.field("correo"));
        let telefono = take("telefono", self.field("telefono"));
        let direccion = take("direccion", self.address());
        let empresa = take("empresa", self.field("empresa"));
        let talla = take("talla", self.field("talla"));

        let front = self.dni_delante.filter(|u| !u.bytes.is_empty());
        let back = self.dni_detras.filter(|u| !u.bytes.is_empty());
        if front.is_none() {
            missing.push(FRONT_FIELD.to_string());
        }
        if back.is_none() {
            missing.push(BACK_FIELD.to_string());
        }

        match (front, back) {
            (Some(dni_delante), Some(dni_detras)) if missing.is_empty() => {
                if !is_valid_email(&correo) {
                    return Err(ApiError::BadRequest(
                        "El formato del correo electrónico no es válido".to_string(),
                    ));
                }
                Ok(NewWorker {
                    nombre,
                    dni,
                    correo,
                    telefono,
                    direccion,
                    empresa,
                    talla,
                    dni_delante,
                    dni_detras,
                })
            }
            _ => Err(ApiError::MissingFields(missing)),
        }
    }
}

/// Equivalente a `^[^\s@]+@[^\s@]+\.[^\s@]+$`.
pub fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

// --- Respuesta ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub message: String,
    pub success: bool,
    pub id_interno: String,
    pub carpeta_url: String,
    pub worker_access: WorkerAccess,
    pub email_sent: bool,
    pub email_details: EmailDetails,
    pub dni_uploaded: DniUploaded,
    pub upload_errors: UploadErrors,
    pub sheets_saved: bool,
    pub subcarpetas: Vec<SubfolderOutcome>,
    pub details: RegistrationDetails,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerAccess {
    pub granted: bool,
    pub access_level: String,
    pub total_permissions: usize,
    pub errores: Vec<PermissionFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionFailure {
    pub carpeta: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDetails {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DniUploaded {
    pub delante: bool,
    pub detras: bool,
    pub delante_url: Option<String>,
    pub detras_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadErrors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delante: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detras: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubfolderOutcome {
    pub nombre: String,
    pub created: bool,
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDetails {
    pub nombre: String,
    pub empresa: String,
    pub correo: String,
    pub fecha_registro: String,
    /// `false` si la comprobación de duplicados no pudo completarse.
    pub duplicate_check_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheets_error: Option<String>,
}

// --- Orquestación ---

/// Ejecuta el alta completa contra los servicios del estado.
pub async fn register_worker(state: &AppState, worker: NewWorker) -> Result<RegistrationResponse, ApiError> {
    let cfg = &state.config;
    let records = state.records.as_ref();
    let documents = state.documents.as_ref();
    info!("🚀 Iniciando registro de trabajador {} ({})", worker.nombre, worker.empresa);

    // 1) Duplicados (best-effort)
    let duplicate_check_completed = match check_duplicate(records, cfg, &worker).await {
        DuplicateCheck::Duplicate => {
            info!("Registro rechazado: DNI o correo ya existentes");
            return Err(ApiError::Duplicate);
        }
        DuplicateCheck::Clear => true,
        DuplicateCheck::Unknown(reason) => {
            warn!("No se pudo comprobar duplicados, se continúa: {reason}");
            false
        }
    };

    // 2) Carpeta padre: sin ella no se ha creado nada todavía.
    let parent = documents
        .get_metadata(&cfg.parent_folder_id)
        .await
        .map_err(|e| ApiError::internal("No se pudo acceder a la carpeta principal de Drive", &e, cfg.expose_error_details))?;
    let drive_id = cfg.shared_drive_id.clone().or(parent.drive_id);

    // 3) Carpeta raíz del trabajador (crítica)
    let root_name = format!("{} - {}", worker.nombre, worker.empresa);
    let root = documents
        .create_folder(&root_name, &parent.id)
        .await
        .map_err(|e| ApiError::internal("Error creando la carpeta del trabajador", &e, cfg.expose_error_details))?;
    let carpeta_url = folder_url(&root.id);
    info!("📁 Carpeta creada: {carpeta_url}");

    // 4) Subcarpetas y subida del DNI en paralelo
    let timestamp = Utc::now().timestamp_millis();
    let id_interno = format!("WRK-{timestamp}");
    let fecha_registro = Local::now().format("%d/%m/%Y").to_string();

    let other_folders = EXPECTED_FOLDERS
        .iter()
        .filter(|name| **name != PERSONAL_DOCUMENTS_FOLDER)
        .map(|name| create_subfolder(documents, name, &root.id));
    let (created, (personal, front, back)) = tokio::join!(
        join_all(other_folders),
        provision_personal_documents(documents, &root.id, drive_id.as_deref(), &worker, timestamp),
    );

    let mut by_name: HashMap<String, SubfolderOutcome> = created
        .into_iter()
        .chain(std::iter::once(personal))
        .map(|outcome| (outcome.nombre.clone(), outcome))
        .collect();
    let subcarpetas: Vec<SubfolderOutcome> = EXPECTED_FOLDERS
        .iter()
        .filter_map(|name| by_name.remove(*name))
        .collect();

    // 5) Correo: se lanza ya y nunca bloquea la respuesta más allá de su timeout.
    let email = ConfirmationEmail {
        nombre: worker.nombre.clone(),
        correo: worker.correo.clone(),
        empresa: worker.empresa.clone(),
        dni: worker.dni.clone(),
        telefono: worker.telefono.clone(),
        id_interno: id_interno.clone(),
        fecha_registro: fecha_registro.clone(),
        carpeta_url: carpeta_url.clone(),
        app_url: cfg.app_url.clone(),
    };
    let email_task = dispatch_email(state.notifier.clone(), email);

    // 6) Permisos y fila en la hoja, sin orden entre ellos
    let mut share_targets = vec![(root_name.clone(), root.id.clone())];
    share_targets.extend(
        subcarpetas
            .iter()
            .filter_map(|s| s.id.clone().map(|id| (s.nombre.clone(), id))),
    );

    let record = WorkerRecord {
        nombre: worker.nombre.clone(),
        dni: worker.dni.clone(),
        correo: worker.correo.clone(),
        telefono: worker.telefono.clone(),
        direccion: worker.direccion.clone(),
        empresa: worker.empresa.clone(),
        talla: worker.talla.clone(),
        id_interno: id_interno.clone(),
        carpeta_url: carpeta_url.clone(),
        estado: STATUS_ACTIVE.to_string(),
        fecha_incorporacion: fecha_registro.clone(),
        ultimo_acceso: String::new(),
        total_documentos: "0".to_string(),
        notas: "Registro completado".to_string(),
        dni_delante_url: front.url.clone().unwrap_or_default(),
        dni_detras_url: back.url.clone().unwrap_or_default(),
    };

    let ledger_range = cfg.ledger_range();
    let (permissions, ledger) = tokio::join!(
        grant_permissions(documents, &share_targets, &worker.correo, cfg),
        within(cfg.settings.ledger_timeout, records.append_row(&ledger_range, record.to_row())),
    );
    let sheets_error = match ledger {
        Ok(()) => {
            info!("📝 Registro añadido a Google Sheets");
            None
        }
        Err(e) => {
            error!("No se pudo guardar el registro en Sheets: {e:#}");
            Some(format!("{e:#}"))
        }
    };

    // 7) Resultado del correo (o "en_proceso" si sigue enviándose)
    let email_details = email_task.outcome(cfg.settings.email_timeout).await;

    let sheets_saved = sheets_error.is_none();
    let all_uploaded = front.url.is_some() && back.url.is_some();
    let message = if sheets_saved && all_uploaded {
        "Trabajador registrado exitosamente"
    } else {
        "Trabajador registrado con incidencias"
    };
    info!("✅ {message}: {id_interno}");

    Ok(RegistrationResponse {
        message: message.to_string(),
        success: true,
        id_interno,
        carpeta_url,
        worker_access: WorkerAccess {
            granted: permissions.root_granted,
            access_level: "reader".to_string(),
            total_permissions: permissions.granted,
            errores: permissions.failures,
        },
        email_sent: email_details.status == "enviado",
        email_details,
        dni_uploaded: DniUploaded {
            delante: front.url.is_some(),
            detras: back.url.is_some(),
            delante_url: front.url,
            detras_url: back.url,
        },
        upload_errors: UploadErrors {
            delante: front.error,
            detras: back.error,
        },
        sheets_saved,
        subcarpetas,
        details: RegistrationDetails {
            nombre: worker.nombre,
            empresa: worker.empresa,
            correo: worker.correo,
            fecha_registro,
            duplicate_check_completed,
            sheets_error,
        },
    })
}

// --- Paso: duplicados ---

#[derive(Debug, PartialEq)]
enum DuplicateCheck {
    Clear,
    Duplicate,
    Unknown(String),
}

/// Busca filas con el mismo DNI o el mismo correo (columnas B y C).
async fn check_duplicate(records: &dyn RecordStore, cfg: &AppConfig, worker: &NewWorker) -> DuplicateCheck {
    let range = format!("{}!B:C", cfg.sheet_name);
    match within(cfg.settings.duplicate_check_timeout, records.read_range(&range)).await {
        Ok(rows) => {
            let exists = rows.iter().any(|row| {
                let dni = row.first().map(|s| s.trim()).unwrap_or_default();
                let correo = row.get(1).map(|s| s.trim()).unwrap_or_default();
                dni == worker.dni || correo.eq_ignore_ascii_case(&worker.correo)
            });
            if exists {
                DuplicateCheck::Duplicate
            } else {
                DuplicateCheck::Clear
            }
        }
        Err(e) => DuplicateCheck::Unknown(format!("{e:#}")),
    }
}

// --- Paso: subcarpetas y DNI ---

async fn create_subfolder(documents: &dyn DocumentStore, name: &str, root_id: &str) -> SubfolderOutcome {
    match documents.create_folder(name, root_id).await {
        Ok(folder) => SubfolderOutcome {
            nombre: name.to_string(),
            created: true,
            id: Some(folder.id),
            error: None,
        },
        Err(e) => {
            warn!("Error creando subcarpeta {name}: {e:#}");
            SubfolderOutcome {
                nombre: name.to_string(),
                created: false,
                id: None,
                error: Some(format!("{e:#}")),
            }
        }
    }
}

#[derive(Debug, Default)]
struct UploadOutcome {
    url: Option<String>,
    error: Option<String>,
}

/// Busca o crea "Documentos Personales" y sube ambas caras del DNI. Si la
/// subcarpeta no está disponible las imágenes van a la carpeta raíz.
async fn provision_personal_documents(
    documents: &dyn DocumentStore,
    root_id: &str,
    drive_id: Option<&str>,
    worker: &NewWorker,
    timestamp: i64,
) -> (SubfolderOutcome, UploadOutcome, UploadOutcome) {
    let folder = match documents.find_folder(root_id, PERSONAL_DOCUMENTS_FOLDER, drive_id).await {
        Ok(Some(existing)) => Ok(existing),
        Ok(None) => documents.create_folder(PERSONAL_DOCUMENTS_FOLDER, root_id).await,
        Err(e) => {
            warn!("No se pudo buscar {PERSONAL_DOCUMENTS_FOLDER}, se intenta crear: {e:#}");
            documents.create_folder(PERSONAL_DOCUMENTS_FOLDER, root_id).await
        }
    };

    let (outcome, target) = match folder {
        Ok(folder) => (
            SubfolderOutcome {
                nombre: PERSONAL_DOCUMENTS_FOLDER.to_string(),
                created: true,
                id: Some(folder.id.clone()),
                error: None,
            },
            folder.id,
        ),
        Err(e) => {
            warn!("Error con subcarpeta {PERSONAL_DOCUMENTS_FOLDER}, usando carpeta principal: {e:#}");
            (
                SubfolderOutcome {
                    nombre: PERSONAL_DOCUMENTS_FOLDER.to_string(),
                    created: false,
                    id: None,
                    error: Some(format!("{e:#}")),
                },
                root_id.to_string(),
            )
        }
    };

    let (front, back) = tokio::join!(
        upload_identity_image(documents, &target, "DNI_Delante", &worker.dni_delante, timestamp),
        upload_identity_image(documents, &target, "DNI_Detras", &worker.dni_detras, timestamp),
    );
    (outcome, front, back)
}

async fn upload_identity_image(
    documents: &dyn DocumentStore,
    parent_id: &str,
    prefix: &str,
    upload: &DocumentUpload,
    timestamp: i64,
) -> UploadOutcome {
    let mime_type = upload_mime_type(upload);
    let request = UploadRequest {
        name: format!("{prefix}_{timestamp}.{}", upload_extension(upload, &mime_type)),
        parent_id: parent_id.to_string(),
        mime_type,
        bytes: upload.bytes.clone(),
    };
    let name = request.name.clone();

    match documents.upload_file(request).await {
        Ok(file) => {
            info!("📷 {name} subido");
            UploadOutcome {
                url: Some(file.web_view_link.unwrap_or_else(|| file_view_url(&file.id))),
                error: None,
            }
        }
        Err(e) => {
            error!("Error subiendo {name}: {e:#}");
            UploadOutcome {
                url: None,
                error: Some(format!("{e:#}")),
            }
        }
    }
}

/// Content-type declarado; si falta, se deduce del nombre original.
fn upload_mime_type(upload: &DocumentUpload) -> String {
    if let Some(declared) = upload.content_type.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        return declared.to_string();
    }
    upload
        .file_name
        .as_deref()
        .and_then(|name| mime_guess::from_path(name).first())
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string())
}

fn upload_extension(upload: &DocumentUpload, mime_type: &str) -> String {
    let from_name = upload
        .file_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| !ext.is_empty());
    if let Some(ext) = from_name {
        return ext;
    }
    match mime_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "application/pdf" => "pdf",
        _ => "jpg",
    }
    .to_string()
}

// --- Paso: permisos ---

#[derive(Debug, Default)]
struct PermissionReport {
    root_granted: bool,
    granted: usize,
    failures: Vec<PermissionFailure>,
    /// Ids ya resueltos (con éxito o no).
    processed: HashSet<String>,
}

/// Comparte cada carpeta en lectura. El paso completo está acotado por
/// `permission_total_timeout`: las carpetas sin resolver cuentan como fallos.
async fn grant_permissions(
    documents: &dyn DocumentStore,
    targets: &[(String, String)],
    email: &str,
    cfg: &AppConfig,
) -> PermissionReport {
    let limit = cfg.settings.permission_total_timeout;
    let mut report = PermissionReport::default();

    let finished = tokio::time::timeout(limit, grant_in_batches(documents, targets, email, cfg, &mut report))
        .await
        .is_ok();
    if !finished {
        warn!("Permisos sin terminar tras {} ms", limit.as_millis());
        for (name, id) in targets {
            if !report.processed.contains(id) {
                report.failures.push(PermissionFailure {
                    carpeta: name.clone(),
                    error: format!("timeout tras {} ms", limit.as_millis()),
                });
            }
        }
    }

    info!("🔐 Permisos concedidos: {}/{}", report.granted, targets.len());
    report
}

/// Reintentos por carpeta, lotes pequeños y una pausa entre lotes. El primer
/// objetivo es la carpeta raíz.
async fn grant_in_batches(
    documents: &dyn DocumentStore,
    targets: &[(String, String)],
    email: &str,
    cfg: &AppConfig,
    report: &mut PermissionReport,
) {
    let policy: RetryPolicy = cfg.settings.permission_retry;
    let batch_size = cfg.settings.permission_batch_size.max(1);

    for (batch_index, batch) in targets.chunks(batch_size).enumerate() {
        if batch_index > 0 {
            tokio::time::sleep(cfg.settings.permission_batch_pause).await;
        }
        let results = join_all(batch.iter().map(|(name, id)| async move {
            let label = format!("Permiso en '{name}'");
            let result = policy.run(&label, || documents.grant_reader(id, email)).await;
            (name, id, result)
        }))
        .await;

        for (name, id, result) in results {
            report.processed.insert(id.clone());
            match result {
                Ok(()) => {
                    report.granted += 1;
                    if *id == targets[0].1 {
                        report.root_granted = true;
                    }
                }
                Err(e) => {
                    warn!("No se pudo compartir '{name}' con {email}: {e:#}");
                    report.failures.push(PermissionFailure {
                        carpeta: name.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }
    }
}

// --- Paso: correo ---

struct EmailTask {
    handle: tokio::task::JoinHandle<anyhow::Result<String>>,
}

fn dispatch_email(notifier: Arc<dyn Notifier>, email: ConfirmationEmail) -> EmailTask {
    let handle = tokio::spawn(async move {
        let result = notifier.send_confirmation(&email).await;
        if let Err(e) = &result {
            warn!("Error enviando email a {}: {e:#}", email.correo);
        }
        result
    });
    EmailTask { handle }
}

impl EmailTask {
    /// Espera como mucho `limit`; si el envío sigue en curso se deja correr
    /// en segundo plano y se informa como pendiente.
    async fn outcome(mut self, limit: std::time::Duration) -> EmailDetails {
        match tokio::time::timeout(limit, &mut self.handle).await {
            Ok(Ok(Ok(message_id))) => EmailDetails {
                status: "enviado",
                message_id: Some(message_id),
                error: None,
            },
            Ok(Ok(Err(e))) => EmailDetails {
                status: "fallido",
                message_id: None,
                error: Some(format!("{e:#}")),
            },
            Ok(Err(join_error)) => EmailDetails {
                status: "fallido",
                message_id: None,
                error: Some(join_error.to_string()),
            },
            Err(_) => {
                info!("📧 El correo sigue enviándose en segundo plano");
                EmailDetails {
                    status: "en_proceso",
                    message_id: None,
                    error: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::folder_id_from_url;
    use crate::testing::{fake_state, jpeg, FakeDocumentStore, FakeNotifier, FakeRecordStore};

    fn submission() -> RegistrationSubmission {
        let fields = [
            ("nombre", "Ana García"),
            ("dni", "12345678A"),
            ("correo", "ana@x.com"),
            ("telefono", "600000000"),
            ("direccion", "Calle 1, 28000 Madrid, Madrid"),
            ("empresa", "Pide Argoo"),
            ("talla", "M"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        RegistrationSubmission {
            fields,
            dni_delante: Some(jpeg("delante.jpg")),
            dni_detras: Some(jpeg("detras.jpg")),
        }
    }

    #[test]
    fn email_syntax() {
        assert!(is_valid_email("ana@x.com"));
        assert!(is_valid_email("a.b@sub.dominio.es"));
        assert!(!is_valid_email("ana@x"));
        assert!(!is_valid_email("ana x@x.com"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("ana@x.com@y.com"));
        assert!(!is_valid_email("ana@.com"));
        assert!(!is_valid_email("ana@x."));
    }

    #[test]
    fn missing_fields_are_listed() {
        let mut form = submission();
        form.fields.remove("telefono");
        form.fields.insert("talla".into(), "   ".into());
        form.dni_detras = None;

        match form.validate() {
            Err(ApiError::MissingFields(fields)) => {
                assert_eq!(fields, vec!["telefono", "talla", "dniDetras"]);
            }
            other => panic!("se esperaba MissingFields, llegó {other:?}"),
        }
    }

    #[test]
    fn empty_image_counts_as_missing() {
        let mut form = submission();
        form.dni_delante = Some(DocumentUpload::default());
        assert!(matches!(form.validate(), Err(ApiError::MissingFields(f)) if f == vec!["dniDelante"]));
    }

    #[test]
    fn invalid_email_is_rejected() {
        let mut form = submission();
        form.fields.insert("correo".into(), "no-es-correo".into());
        assert!(matches!(form.validate(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn address_is_assembled_from_parts() {
        let mut form = submission();
        form.fields.remove("direccion");
        for (k, v) in [
            ("calle", "Calle Mayor"),
            ("numero", "1"),
            ("codigoPostal", "28000"),
            ("localidad", "Madrid"),
            ("provincia", "Madrid"),
        ] {
            form.fields.insert(k.into(), v.into());
        }
        let worker = form.validate().unwrap();
        assert_eq!(worker.direccion, "Calle Mayor 1, 28000 Madrid, Madrid");
    }

    #[test]
    fn upload_type_and_extension() {
        let png = DocumentUpload {
            bytes: vec![1],
            file_name: Some("foto.PNG".into()),
            content_type: None,
        };
        assert_eq!(upload_mime_type(&png), "image/png");
        assert_eq!(upload_extension(&png, "image/png"), "png");

        let anonymous = DocumentUpload {
            bytes: vec![1],
            file_name: None,
            content_type: Some("image/webp".into()),
        };
        assert_eq!(upload_mime_type(&anonymous), "image/webp");
        assert_eq!(upload_extension(&anonymous, "image/webp"), "webp");
    }

    #[tokio::test]
    async fn happy_path_provisions_everything() {
        let records = Arc::new(FakeRecordStore::default());
        let documents = Arc::new(FakeDocumentStore::with_parent("parent"));
        let notifier = Arc::new(FakeNotifier::default());
        let state = fake_state(records.clone(), documents.clone(), notifier.clone());

        let worker = submission().validate().unwrap();
        let response = register_worker(&state, worker).await.unwrap();

        assert!(response.success);
        assert!(response.id_interno.starts_with("WRK-"));
        assert!(response.id_interno[4..].chars().all(|c| c.is_ascii_digit()));
        assert!(response.carpeta_url.starts_with("https://drive.google.com/drive/folders/"));
        assert_eq!(response.subcarpetas.len(), EXPECTED_FOLDERS.len());
        assert!(response.subcarpetas.iter().all(|s| s.created));
        assert!(response.dni_uploaded.delante && response.dni_uploaded.detras);
        assert!(response.sheets_saved);
        assert!(response.email_sent);
        assert!(response.worker_access.granted);
        assert_eq!(response.worker_access.total_permissions, 1 + EXPECTED_FOLDERS.len());

        let rows = records.rows();
        assert_eq!(rows.len(), 1);
        let saved = WorkerRecord::from_row(&rows[0]);
        assert_eq!(saved.dni, "12345678A");
        assert_eq!(saved.estado, STATUS_ACTIVE);
        assert_eq!(saved.carpeta_url, response.carpeta_url);
        assert!(!saved.dni_delante_url.is_empty());

        let personal = documents
            .child_named(&folder_id_from_url(&response.carpeta_url).unwrap(), PERSONAL_DOCUMENTS_FOLDER)
            .expect("Documentos Personales creada");
        let uploaded = documents.child_names(&personal);
        assert_eq!(uploaded.len(), 2);
        assert!(uploaded.iter().any(|n| n.starts_with("DNI_Delante_")));
        assert!(uploaded.iter().any(|n| n.starts_with("DNI_Detras_")));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_dni_is_rejected_before_any_folder() {
        let records = Arc::new(FakeRecordStore::default());
        records.push_row(vec!["Otra".into(), "12345678A".into(), "otra@x.com".into()]);
        let documents = Arc::new(FakeDocumentStore::with_parent("parent"));
        let state = fake_state(records, documents.clone(), Arc::new(FakeNotifier::default()));

        let err = register_worker(&state, submission().validate().unwrap()).await.unwrap_err();
        assert!(matches!(err, ApiError::Duplicate));
        assert_eq!(documents.folder_count(), 1);
    }

    #[tokio::test]
    async fn registering_the_same_worker_twice_conflicts() {
        let records = Arc::new(FakeRecordStore::default());
        let documents = Arc::new(FakeDocumentStore::with_parent("parent"));
        let state = fake_state(records.clone(), documents.clone(), Arc::new(FakeNotifier::default()));

        register_worker(&state, submission().validate().unwrap()).await.unwrap();
        let folders_after_first = documents.folder_count();

        let err = register_worker(&state, submission().validate().unwrap()).await.unwrap_err();
        assert!(matches!(err, ApiError::Duplicate));
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
        assert_eq!(records.rows().len(), 1);
        assert_eq!(documents.folder_count(), folders_after_first);
    }

    #[tokio::test]
    async fn unavailable_duplicate_check_does_not_block() {
        let records = Arc::new(FakeRecordStore::default());
        records.fail_reads(true);
        let state = fake_state(
            records.clone(),
            Arc::new(FakeDocumentStore::with_parent("parent")),
            Arc::new(FakeNotifier::default()),
        );

        let response = register_worker(&state, submission().validate().unwrap()).await.unwrap();
        assert!(!response.details.duplicate_check_completed);
        assert!(response.sheets_saved);
    }

    #[tokio::test]
    async fn unreachable_parent_folder_is_fatal_without_side_effects() {
        let documents = Arc::new(FakeDocumentStore::default());
        let records = Arc::new(FakeRecordStore::default());
        let state = fake_state(records.clone(), documents.clone(), Arc::new(FakeNotifier::default()));

        let err = register_worker(&state, submission().validate().unwrap()).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(documents.folder_count(), 0);
        assert!(records.rows().is_empty());
    }

    #[tokio::test]
    async fn partial_upload_still_succeeds() {
        let documents = Arc::new(FakeDocumentStore::with_parent("parent"));
        documents.fail_uploads_starting_with("DNI_Detras");
        let records = Arc::new(FakeRecordStore::default());
        let state = fake_state(records.clone(), documents, Arc::new(FakeNotifier::default()));

        let response = register_worker(&state, submission().validate().unwrap()).await.unwrap();
        assert!(response.dni_uploaded.delante);
        assert!(!response.dni_uploaded.detras);
        assert!(response.upload_errors.detras.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(response.upload_errors.delante.is_none());

        let saved = WorkerRecord::from_row(&records.rows()[0]);
        assert!(!saved.dni_delante_url.is_empty());
        assert_eq!(saved.dni_detras_url, "");
    }

    #[tokio::test]
    async fn failing_subfolder_and_ledger_are_reported_not_fatal() {
        let documents = Arc::new(FakeDocumentStore::with_parent("parent"));
        documents.fail_folder("Nóminas");
        let records = Arc::new(FakeRecordStore::default());
        records.fail_appends(true);
        let notifier = Arc::new(FakeNotifier::default());
        notifier.fail(true);
        let state = fake_state(records, documents, notifier);

        let response = register_worker(&state, submission().validate().unwrap()).await.unwrap();
        let nominas = response.subcarpetas.iter().find(|s| s.nombre == "Nóminas").unwrap();
        assert!(!nominas.created);
        assert!(nominas.id.is_none());
        assert!(!response.sheets_saved);
        assert!(response.details.sheets_error.is_some());
        assert!(!response.email_sent);
        assert_eq!(response.email_details.status, "fallido");
        assert_eq!(response.worker_access.total_permissions, EXPECTED_FOLDERS.len());
    }

    #[tokio::test]
    async fn permission_failures_are_retried_and_collected() {
        let documents = Arc::new(FakeDocumentStore::with_parent("parent"));
        documents.fail_permissions(true);
        let state = fake_state(
            Arc::new(FakeRecordStore::default()),
            documents.clone(),
            Arc::new(FakeNotifier::default()),
        );

        let response = register_worker(&state, submission().validate().unwrap()).await.unwrap();
        assert!(!response.worker_access.granted);
        assert_eq!(response.worker_access.total_permissions, 0);
        assert_eq!(response.worker_access.errores.len(), 1 + EXPECTED_FOLDERS.len());
        let attempts = state.config.settings.permission_retry.max_attempts as usize;
        assert_eq!(documents.permission_calls(), attempts * (1 + EXPECTED_FOLDERS.len()));
    }

    #[tokio::test]
    async fn permission_step_is_bounded_and_reports_unfinished_folders() {
        let documents = Arc::new(FakeDocumentStore::with_parent("parent"));
        // El primer lote (raíz + 2) responde; el resto se queda colgado.
        documents.hang_permissions_after(3);
        let mut state = fake_state(
            Arc::new(FakeRecordStore::default()),
            documents,
            Arc::new(FakeNotifier::default()),
        );
        state.config.settings.permission_total_timeout = std::time::Duration::from_millis(150);

        let started = std::time::Instant::now();
        let response = register_worker(&state, submission().validate().unwrap()).await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        let access = &response.worker_access;
        assert!(access.granted);
        assert_eq!(access.total_permissions, 3);
        assert_eq!(access.errores.len(), 1 + EXPECTED_FOLDERS.len() - 3);
        assert!(access.errores.iter().all(|e| e.error.contains("timeout")));
        assert!(response.sheets_saved);
    }

    #[tokio::test]
    async fn slow_email_is_reported_as_pending() {
        let notifier = Arc::new(FakeNotifier::default());
        notifier.delay(std::time::Duration::from_millis(500));
        let state = fake_state(
            Arc::new(FakeRecordStore::default()),
            Arc::new(FakeDocumentStore::with_parent("parent")),
            notifier,
        );

        let response = register_worker(&state, submission().validate().unwrap()).await.unwrap();
        assert!(!response.email_sent);
        assert_eq!(response.email_details.status, "en_proceso");
    }
}
