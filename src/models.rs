//! Modelos de dominio: fila del registro de trabajadores, ficheros de Drive
//! y la estructura de carpetas que se devuelve al panel.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classify::{DocumentKind, DocumentStatus};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const PERSONAL_DOCUMENTS_FOLDER: &str = "Documentos Personales";

/// Subcarpetas que toda carpeta de trabajador debería contener.
pub const EXPECTED_FOLDERS: [&str; 6] = [
    "Nóminas",
    "Contratos",
    "Formación",
    "Certificados",
    PERSONAL_DOCUMENTS_FOLDER,
    "Pendiente de Firma",
];

pub const STATUS_ACTIVE: &str = "Activo";

/// Una fila de la hoja `Trabajadores` (columnas A..P).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerRecord {
    pub nombre: String,
    pub dni: String,
    pub correo: String,
    pub telefono: String,
    pub direccion: String,
    pub empresa: String,
    pub talla: String,
    pub id_interno: String,
    pub carpeta_url: String,
    pub estado: String,
    pub fecha_incorporacion: String,
    pub ultimo_acceso: String,
    pub total_documentos: String,
    pub notas: String,
    pub dni_delante_url: String,
    pub dni_detras_url: String,
}

impl WorkerRecord {
    pub const COLUMN_DNI: usize = 1;
    pub const COLUMN_CORREO: usize = 2;
    /// Letras de las columnas que el panel actualiza.
    pub const LAST_ACCESS_COLUMN: char = 'L';
    pub const TOTAL_DOCUMENTS_COLUMN: char = 'M';

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.nombre.clone(),
            self.dni.clone(),
            self.correo.clone(),
            self.telefono.clone(),
            self.direccion.clone(),
            self.empresa.clone(),
            self.talla.clone(),
            self.id_interno.clone(),
            self.carpeta_url.clone(),
            self.estado.clone(),
            self.fecha_incorporacion.clone(),
            self.ultimo_acceso.clone(),
            self.total_documentos.clone(),
            self.notas.clone(),
            self.dni_delante_url.clone(),
            self.dni_detras_url.clone(),
        ]
    }

    /// Reconstruye el registro a partir de una fila; las celdas que faltan
    /// al final (Sheets las omite si están vacías) quedan en blanco.
    pub fn from_row(row: &[String]) -> Self {
        let cell = |i: usize| row.get(i).cloned().unwrap_or_default();
        Self {
            nombre: cell(0),
            dni: cell(1),
            correo: cell(2),
            telefono: cell(3),
            direccion: cell(4),
            empresa: cell(5),
            talla: cell(6),
            id_interno: cell(7),
            carpeta_url: cell(8),
            estado: cell(9),
            fecha_incorporacion: cell(10),
            ultimo_acceso: cell(11),
            total_documentos: cell(12),
            notas: cell(13),
            dni_delante_url: cell(14),
            dni_detras_url: cell(15),
        }
    }
}

/// Metadatos de un fichero o carpeta tal como los devuelve Drive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub created_time: Option<DateTime<Utc>>,
    pub modified_time: Option<DateTime<Utc>>,
    pub web_view_link: Option<String>,
    pub size: Option<u64>,
    pub drive_id: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

pub fn folder_url(id: &str) -> String {
    format!("https://drive.google.com/drive/folders/{id}")
}

pub fn file_view_url(id: &str) -> String {
    format!("https://drive.google.com/file/d/{id}/view")
}

/// Documento (no carpeta) dentro de un `FolderNode`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEntry {
    pub id: String,
    pub nombre: String,
    pub fecha_creacion: Option<DateTime<Utc>>,
    pub fecha_modificacion: Option<DateTime<Utc>>,
    /// Fecha de creación en formato `dd/mm/aaaa` para mostrar.
    pub fecha: String,
    pub tipo: DocumentKind,
    pub estado: DocumentStatus,
    pub url: String,
    pub mime_type: String,
    pub tamano: Option<u64>,
}

impl DocumentEntry {
    pub fn from_drive_file(file: &DriveFile) -> Self {
        Self {
            id: file.id.clone(),
            nombre: file.name.clone(),
            fecha_creacion: file.created_time,
            fecha_modificacion: file.modified_time,
            fecha: file
                .created_time
                .map(|t| t.format("%d/%m/%Y").to_string())
                .unwrap_or_default(),
            tipo: DocumentKind::from_mime(&file.mime_type),
            estado: DocumentStatus::from_file_name(&file.name),
            url: file
                .web_view_link
                .clone()
                .unwrap_or_else(|| file_view_url(&file.id)),
            mime_type: file.mime_type.clone(),
            tamano: file.size,
        }
    }
}

/// Reconstrucción en memoria de una carpeta y su contenido.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderNode {
    pub id: Option<String>,
    pub nombre: String,
    pub url: Option<String>,
    pub documentos: Vec<DocumentEntry>,
    pub subcarpetas: Vec<FolderNode>,
    pub total_documentos: usize,
    pub is_empty: bool,
    pub is_missing: bool,
    /// `false` cuando la carpeta quedó por debajo del límite de profundidad.
    pub explored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FolderNode {
    /// Carpeta encontrada; el total se calcula aquí para que siempre cumpla
    /// `total = directos + suma(total de las subcarpetas)`.
    pub fn found(
        id: String,
        nombre: String,
        documentos: Vec<DocumentEntry>,
        subcarpetas: Vec<FolderNode>,
    ) -> Self {
        let total = documentos.len() + subcarpetas.iter().map(|c| c.total_documentos).sum::<usize>();
        Self {
            url: Some(folder_url(&id)),
            id: Some(id),
            nombre,
            documentos,
            subcarpetas,
            total_documentos: total,
            is_empty: total == 0,
            is_missing: false,
            explored: true,
            error: None,
        }
    }

    /// Carpeta esperada que no existe en Drive.
    pub fn missing(nombre: &str) -> Self {
        Self {
            id: None,
            nombre: nombre.to_string(),
            url: None,
            documentos: Vec::new(),
            subcarpetas: Vec::new(),
            total_documentos: 0,
            is_empty: true,
            is_missing: true,
            explored: false,
            error: None,
        }
    }

    /// Carpeta cuyo listado falló.
    pub fn failed(id: String, nombre: String, reason: String) -> Self {
        Self {
            url: Some(folder_url(&id)),
            id: Some(id),
            nombre,
            documentos: Vec::new(),
            subcarpetas: Vec::new(),
            total_documentos: 0,
            is_empty: true,
            is_missing: false,
            explored: false,
            error: Some(reason),
        }
    }

    /// Carpeta existente que no se recorre por estar en el límite de profundidad.
    pub fn unexplored(id: String, nombre: String) -> Self {
        Self {
            explored: false,
            ..Self::found(id, nombre, Vec::new(), Vec::new())
        }
    }
}
