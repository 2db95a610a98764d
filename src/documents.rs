//! Panel de documentos de un trabajador.
//!
//! Flujo:
//!   1. Caché por `(dni, correo)`.
//!   2. Búsqueda de la fila que coincide en DNI y correo a la vez.
//!   3. Metadatos de la carpeta raíz (y contexto de unidad compartida).
//!   4. Recorrido acotado en profundidad; en la raíz se reconcilia contra las
//!      subcarpetas esperadas.
//!   5. Totales, documentos recientes y estadísticas.
//!   6. Actualización best-effort de la hoja y guardado en caché.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    drive::{folder_id_from_url, DocumentStore},
    error::ApiError,
    models::{DocumentEntry, DriveFile, FolderNode, WorkerRecord, EXPECTED_FOLDERS},
    retry::within,
};

const ROOT_DISPLAY_NAME: &str = "Mis Documentos";

// --- Recorrido ---

/// Resultado de visitar una carpeta.
#[derive(Debug, Clone, PartialEq)]
pub enum FolderVisit {
    Found(FolderNode),
    /// Carpeta esperada que no existe.
    Missing(String),
    /// El listado falló; el resto del árbol sigue adelante.
    Error { id: String, nombre: String, reason: String },
}

impl FolderVisit {
    pub fn into_node(self) -> FolderNode {
        match self {
            Self::Found(node) => node,
            Self::Missing(nombre) => FolderNode::missing(&nombre),
            Self::Error { id, nombre, reason } => FolderNode::failed(id, nombre, reason),
        }
    }
}

/// Parámetros compartidos por todo el recorrido.
pub struct Walker<'a> {
    pub store: &'a dyn DocumentStore,
    pub drive_id: Option<&'a str>,
    pub max_depth: usize,
}

impl<'a> Walker<'a> {
    /// Recorre la carpeta raíz. Un fallo al listar la raíz sí es un error:
    /// sin ella no hay nada que mostrar.
    pub async fn walk_root(&self, root_id: &str, nombre: &str) -> anyhow::Result<FolderNode> {
        let children = self.store.list_children(root_id, self.drive_id).await?;
        let (folders, files): (Vec<DriveFile>, Vec<DriveFile>) =
            children.into_iter().partition(DriveFile::is_folder);

        let subcarpetas = self.reconcile(folders).await;
        Ok(FolderNode::found(
            root_id.to_string(),
            nombre.to_string(),
            sorted_documents(&files),
            subcarpetas,
        ))
    }

    /// Una entrada por cada subcarpeta esperada (real o `Missing`), seguida de
    /// las carpetas adicionales que haya en Drive.
    async fn reconcile(&self, folders: Vec<DriveFile>) -> Vec<FolderNode> {
        let mut remaining = folders;
        let mut visits: Vec<BoxFuture<'_, FolderVisit>> = Vec::new();

        for expected in EXPECTED_FOLDERS {
            match remaining.iter().position(|f| same_folder_name(&f.name, expected)) {
                Some(pos) => {
                    let folder = remaining.remove(pos);
                    visits.push(self.visit_child(folder.id, expected.to_string()));
                }
                None => visits.push(async move { FolderVisit::Missing(expected.to_string()) }.boxed()),
            }
        }

        remaining.sort_by(|a, b| a.name.cmp(&b.name));
        visits.extend(remaining.into_iter().map(|f| self.visit_child(f.id, f.name)));

        join_all(visits)
            .await
            .into_iter()
            .map(FolderVisit::into_node)
            .collect()
    }

    /// Hijo directo de la raíz: se recorre salvo que `max_depth` sea 0.
    fn visit_child(&self, id: String, nombre: String) -> BoxFuture<'_, FolderVisit> {
        if self.max_depth == 0 {
            let node = FolderNode::unexplored(id, nombre);
            return async move { FolderVisit::Found(node) }.boxed();
        }
        self.walk(id, nombre, 1)
    }

    /// Visita una carpeta por debajo de la raíz: lista su contenido y baja a
    /// sus subcarpetas hasta `max_depth`.
    pub fn walk(&self, id: String, nombre: String, depth: usize) -> BoxFuture<'_, FolderVisit> {
        async move {
            let children = match self.store.list_children(&id, self.drive_id).await {
                Ok(children) => children,
                Err(e) => {
                    warn!("Error procesando carpeta {nombre}: {e:#}");
                    return FolderVisit::Error {
                        id,
                        nombre,
                        reason: format!("{e:#}"),
                    };
                }
            };
            let (folders, files): (Vec<DriveFile>, Vec<DriveFile>) =
                children.into_iter().partition(DriveFile::is_folder);

            let subcarpetas = if depth >= self.max_depth {
                folders
                    .into_iter()
                    .map(|f| FolderNode::unexplored(f.id, f.name))
                    .collect()
            } else {
                join_all(folders.into_iter().map(|f| self.walk(f.id, f.name, depth + 1)))
                    .await
                    .into_iter()
                    .map(FolderVisit::into_node)
                    .collect()
            };

            FolderVisit::Found(FolderNode::found(id, nombre, sorted_documents(&files), subcarpetas))
        }
        .boxed()
    }
}

fn same_folder_name(actual: &str, expected: &str) -> bool {
    actual.trim().to_lowercase() == expected.to_lowercase()
}

/// Documentos de la carpeta, del más reciente al más antiguo por creación.
fn sorted_documents(files: &[DriveFile]) -> Vec<DocumentEntry> {
    let mut documents: Vec<DocumentEntry> = files.iter().map(DocumentEntry::from_drive_file).collect();
    documents.sort_by(|a, b| b.fecha_creacion.cmp(&a.fecha_creacion));
    documents
}

// --- Agregados ---

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecentDocument {
    #[serde(flatten)]
    pub documento: DocumentEntry,
    pub carpeta: String,
    pub carpeta_id: Option<String>,
}

/// Todos los documentos del árbol ordenados por fecha de modificación
/// (o de creación si falta), los `limit` más recientes.
pub fn recent_documents(root: &FolderNode, limit: usize) -> Vec<RecentDocument> {
    fn collect(node: &FolderNode, out: &mut Vec<RecentDocument>) {
        out.extend(node.documentos.iter().map(|doc| RecentDocument {
            documento: doc.clone(),
            carpeta: node.nombre.clone(),
            carpeta_id: node.id.clone(),
        }));
        for child in &node.subcarpetas {
            collect(child, out);
        }
    }

    let mut all = Vec::new();
    collect(root, &mut all);
    let stamp = |r: &RecentDocument| -> Option<DateTime<Utc>> {
        r.documento.fecha_modificacion.or(r.documento.fecha_creacion)
    };
    all.sort_by(|a, b| stamp(b).cmp(&stamp(a)));
    all.truncate(limit);
    all
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderSummary {
    pub nombre: String,
    pub id: Option<String>,
    pub total_documentos: usize,
    pub documentos_directos: usize,
    pub is_empty: bool,
    pub is_missing: bool,
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn folder_summary(root: &FolderNode) -> Vec<FolderSummary> {
    root.subcarpetas
        .iter()
        .map(|node| FolderSummary {
            nombre: node.nombre.clone(),
            id: node.id.clone(),
            total_documentos: node.total_documentos,
            documentos_directos: node.documentos.len(),
            is_empty: node.is_empty,
            is_missing: node.is_missing,
            url: node.url.clone(),
            error: node.error.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_documentos: usize,
    /// Carpetas existentes por debajo de la raíz.
    pub total_carpetas: usize,
    pub carpetas_vacias: usize,
    pub carpetas_faltantes: usize,
    pub carpetas_con_error: usize,
    pub documentos_por_tipo: BTreeMap<&'static str, usize>,
    pub documentos_por_estado: BTreeMap<&'static str, usize>,
}

pub fn statistics(root: &FolderNode) -> Statistics {
    fn visit(node: &FolderNode, stats: &mut Statistics) {
        for doc in &node.documentos {
            *stats.documentos_por_tipo.entry(doc.tipo.label()).or_default() += 1;
            *stats.documentos_por_estado.entry(doc.estado.label()).or_default() += 1;
        }
        for child in &node.subcarpetas {
            if child.is_missing {
                stats.carpetas_faltantes += 1;
            } else {
                stats.total_carpetas += 1;
                if child.error.is_some() {
                    stats.carpetas_con_error += 1;
                } else if child.is_empty {
                    stats.carpetas_vacias += 1;
                }
            }
            visit(child, stats);
        }
    }

    let mut stats = Statistics {
        total_documentos: root.total_documentos,
        ..Default::default()
    };
    visit(root, &mut stats);
    stats
}

// --- Respuesta ---

#[derive(Debug, Clone, Serialize)]
pub struct DniUrls {
    pub delante: Option<String>,
    pub detras: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub nombre: String,
    pub empresa: String,
    pub correo: String,
    pub id_interno: String,
    pub estado: String,
    pub fecha_incorporacion: String,
    pub ultimo_acceso: String,
    pub total_documents: usize,
    pub carpeta_url: String,
    pub dni_urls: DniUrls,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDocumentsResponse {
    pub success: bool,
    pub folder_structure: FolderNode,
    pub folder_summary: Vec<FolderSummary>,
    pub recent_documents: Vec<RecentDocument>,
    pub worker_info: WorkerInfo,
    pub statistics: Statistics,
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim().to_string()).filter(|v| !v.is_empty())
}

/// Construye (o recupera de caché) el panel de documentos del trabajador.
pub async fn worker_documents(state: &AppState, dni: &str, correo: &str) -> Result<Value, ApiError> {
    let cfg = &state.config;
    let expose = cfg.expose_error_details;

    // 1) Caché
    if let Some(cached) = state.cache.get(dni, correo) {
        info!("Devolviendo datos desde cache");
        return Ok(cached);
    }

    // 2) Fila del trabajador: DNI y correo deben coincidir a la vez.
    let rows = state
        .records
        .read_range(&cfg.ledger_range())
        .await
        .map_err(|e| ApiError::internal("Error leyendo el registro de trabajadores", &e, expose))?;
    let (index, row) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| {
            row.get(WorkerRecord::COLUMN_DNI).map(|s| s.trim()) == Some(dni)
                && row.get(WorkerRecord::COLUMN_CORREO).map(|s| s.trim()) == Some(correo)
        })
        .ok_or_else(|| ApiError::NotFound("Trabajador no encontrado. Verifica tus datos.".to_string()))?;
    let record = WorkerRecord::from_row(row);
    let sheet_row = index + 1;

    // 3) Carpeta raíz
    let root_id = folder_id_from_url(&record.carpeta_url)
        .map_err(|e| ApiError::internal("La carpeta del trabajador no es válida", &e, expose))?;
    let root_meta = state
        .documents
        .get_metadata(&root_id)
        .await
        .map_err(|e| ApiError::internal("No se pudo acceder a la carpeta del trabajador", &e, expose))?;
    let drive_id = cfg.shared_drive_id.clone().or(root_meta.drive_id);

    // 4) Recorrido
    let walker = Walker {
        store: state.documents.as_ref(),
        drive_id: drive_id.as_deref(),
        max_depth: cfg.settings.max_depth,
    };
    let folder_structure = walker
        .walk_root(&root_id, ROOT_DISPLAY_NAME)
        .await
        .map_err(|e| ApiError::internal("Error listando la carpeta del trabajador", &e, expose))?;
    let total = folder_structure.total_documentos;
    info!("📂 {} documentos en la carpeta de {}", total, record.nombre);

    // 5) Bookkeeping best-effort
    let ultimo_acceso = Local::now().format("%d/%m/%Y").to_string();
    let updates = vec![
        (
            format!("{}!{}{sheet_row}", cfg.sheet_name, WorkerRecord::LAST_ACCESS_COLUMN),
            vec![ultimo_acceso.clone()],
        ),
        (
            format!("{}!{}{sheet_row}", cfg.sheet_name, WorkerRecord::TOTAL_DOCUMENTS_COLUMN),
            vec![total.to_string()],
        ),
    ];
    if let Err(e) = within(cfg.settings.bookkeeping_timeout, state.records.update_ranges(updates)).await {
        warn!("Error actualizando total docs: {e:#}");
    }

    // 6) Respuesta y caché
    let response = WorkerDocumentsResponse {
        success: true,
        folder_summary: folder_summary(&folder_structure),
        recent_documents: recent_documents(&folder_structure, cfg.settings.recent_documents_limit),
        statistics: statistics(&folder_structure),
        worker_info: WorkerInfo {
            nombre: record.nombre.clone(),
            empresa: record.empresa.clone(),
            correo: record.correo.clone(),
            id_interno: record.id_interno.clone(),
            estado: record.estado.clone(),
            fecha_incorporacion: record.fecha_incorporacion.clone(),
            ultimo_acceso,
            total_documents: total,
            carpeta_url: record.carpeta_url.clone(),
            dni_urls: DniUrls {
                delante: non_empty(&record.dni_delante_url),
                detras: non_empty(&record.dni_detras_url),
            },
        },
        folder_structure,
    };
    let payload = serde_json::to_value(&response)
        .map_err(|e| ApiError::internal("Error serializando la respuesta", &anyhow::Error::from(e), expose))?;

    state.cache.insert(dni, correo, payload.clone());
    Ok(payload)
}
