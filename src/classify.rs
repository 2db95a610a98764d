//! Clasificación heurística de documentos: tipo a partir del MIME y estado
//! a partir del nombre del fichero.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DocumentKind {
    #[serde(rename = "PDF")]
    Pdf,
    #[serde(rename = "Imagen")]
    Image,
    #[serde(rename = "Hoja de Cálculo")]
    Spreadsheet,
    #[serde(rename = "Documento de Texto")]
    TextDocument,
    #[serde(rename = "Presentación")]
    Presentation,
    #[serde(rename = "Vídeo")]
    Video,
    #[serde(rename = "Audio")]
    Audio,
    #[serde(rename = "Documento")]
    Generic,
}

impl DocumentKind {
    /// El orden de las ramas importa: los tipos de Google Workspace
    /// (`...google-apps.spreadsheet`) se comprueban antes que el genérico
    /// `document`. Cualquier otro MIME cae en `Generic`.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.to_ascii_lowercase();
        match mime.as_str() {
            m if m.contains("pdf") => Self::Pdf,
            m if m.starts_with("image/") || m.ends_with(".photo") => Self::Image,
            m if m.contains("spreadsheet") || m.contains("excel") || m == "text/csv" => {
                Self::Spreadsheet
            }
            m if m.contains("presentation") || m.contains("powerpoint") => Self::Presentation,
            m if m.starts_with("video/") => Self::Video,
            m if m.starts_with("audio/") => Self::Audio,
            m if m.contains("document") || m.contains("msword") || m.starts_with("text/") => {
                Self::TextDocument
            }
            _ => Self::Generic,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pdf => "PDF",
            Self::Image => "Imagen",
            Self::Spreadsheet => "Hoja de Cálculo",
            Self::TextDocument => "Documento de Texto",
            Self::Presentation => "Presentación",
            Self::Video => "Vídeo",
            Self::Audio => "Audio",
            Self::Generic => "Documento",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DocumentStatus {
    Firmado,
    Aprobado,
    Completado,
    Pendiente,
}

impl DocumentStatus {
    /// Primera coincidencia por subcadena (sin distinguir mayúsculas);
    /// sin coincidencia el documento queda `Pendiente`.
    pub fn from_file_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("firmado") {
            Self::Firmado
        } else if name.contains("aprobado") {
            Self::Aprobado
        } else if name.contains("completado") {
            Self::Completado
        } else {
            Self::Pendiente
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Firmado => "Firmado",
            Self::Aprobado => "Aprobado",
            Self::Completado => "Completado",
            Self::Pendiente => "Pendiente",
        }
    }
}
