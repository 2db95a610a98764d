//! Envío del correo de confirmación de alta por SMTP.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, SmtpConfig};

/// Datos que aparecen en el correo de bienvenida.
#[derive(Debug, Clone)]
pub struct ConfirmationEmail {
    pub nombre: String,
    pub correo: String,
    pub empresa: String,
    pub dni: String,
    pub telefono: String,
    pub id_interno: String,
    pub fecha_registro: String,
    pub carpeta_url: String,
    pub app_url: String,
}

impl ConfirmationEmail {
    pub fn subject(&self) -> String {
        "🎉 Bienvenido al Sistema de Gestión Documental".to_string()
    }

    pub fn text_body(&self) -> String {
        format!(
            "Hola {nombre},\n\n\
             Tu registro en el Sistema de Gestión Documental se ha completado exitosamente.\n\n\
             Datos de tu registro:\n\
             - Nombre: {nombre}\n\
             - DNI: {dni}\n\
             - Empresa: {empresa}\n\
             - Email: {correo}\n\
             - Teléfono: {telefono}\n\
             - ID interno: {id}\n\
             - Fecha: {fecha}\n\n\
             Tu carpeta de documentos: {carpeta}\n\
             Accede al sistema en: {app}\n\n\
             Gracias,\nSistema de Gestión Documental\n",
            nombre = self.nombre,
            dni = self.dni,
            empresa = self.empresa,
            correo = self.correo,
            telefono = self.telefono,
            id = self.id_interno,
            fecha = self.fecha_registro,
            carpeta = self.carpeta_url,
            app = self.app_url,
        )
    }

    pub fn html_body(&self) -> String {
        let row = |label: &str, value: &str| {
            format!(
                "<tr><td style=\"padding:5px 0;font-weight:bold;\">{label}:</td><td style=\"padding:5px 0;\">{}</td></tr>",
                escape_html(value)
            )
        };
        let rows = [
            row("Nombre", &self.nombre),
            row("DNI", &self.dni),
            row("Empresa", &self.empresa),
            row("Email", &self.correo),
            row("Teléfono", &self.telefono),
            row("ID interno", &self.id_interno),
            row("Fecha", &self.fecha_registro),
        ]
        .join("");

        format!(
            "<!DOCTYPE html><html lang=\"es\"><head><meta charset=\"UTF-8\"><title>Bienvenido al Sistema</title></head>\
             <body style=\"font-family:Arial,sans-serif;background-color:#f4f4f4;padding:20px;\">\
             <div style=\"max-width:600px;margin:0 auto;background:white;border-radius:10px;padding:30px;\">\
             <h1 style=\"color:#667eea;font-weight:300;\">¡Bienvenido al Sistema!</h1>\
             <p>Hola <strong>{nombre}</strong>, tu registro se ha completado exitosamente.</p>\
             <table style=\"width:100%;\">{rows}</table>\
             <p><a href=\"{carpeta}\">📁 Ver mi carpeta de documentos</a></p>\
             <p><a href=\"{app}\">🔗 Acceder al Sistema</a></p>\
             </div></body></html>",
            nombre = escape_html(&self.nombre),
            rows = rows,
            carpeta = escape_html(&self.carpeta_url),
            app = escape_html(&self.app_url),
        )
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Canal de notificaciones. Devuelve el `Message-ID` del correo enviado.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, email: &ConfirmationEmail) -> Result<String>;
}

/// Transporte SMTP con pool de conexiones, creado una vez al arrancar.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn from_config(smtp: &SmtpConfig, from_name: &str, from_email: &str) -> Result<Self> {
        // SMTP_SECURE=true significa TLS implícito (465); si no, STARTTLS.
        let builder = if smtp.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        }
        .with_context(|| format!("Servidor SMTP inválido: {}", smtp.host))?;

        let transport = builder
            .port(smtp.port)
            .credentials(Credentials::new(smtp.user.clone(), smtp.password.clone()))
            .timeout(Some(Duration::from_secs(30)))
            .build();

        let from = format!("{from_name} <{from_email}>")
            .parse::<Mailbox>()
            .with_context(|| format!("Remitente inválido: {from_email}"))?;

        Ok(Self { transport, from })
    }

    /// Comprueba la conexión con el servidor; sólo informa, nunca aborta.
    pub async fn verify(&self) {
        match self.transport.test_connection().await {
            Ok(true) => info!("Servidor SMTP configurado correctamente"),
            Ok(false) => warn!("El servidor SMTP no respondió a la verificación"),
            Err(e) => warn!("Error en la configuración SMTP: {e}"),
        }
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_confirmation(&self, email: &ConfirmationEmail) -> Result<String> {
        let to = email
            .correo
            .parse::<Mailbox>()
            .with_context(|| format!("Destinatario inválido: {}", email.correo))?;
        let domain = self.from.email.domain().to_string();
        let message_id = format!("<{}@{}>", Uuid::new_v4(), domain);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject())
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(
                email.text_body(),
                email.html_body(),
            ))
            .context("No se pudo componer el correo")?;

        self.transport
            .send(message)
            .await
            .context("El servidor SMTP rechazó el envío")?;
        info!("Email enviado exitosamente: {message_id}");
        Ok(message_id)
    }
}

/// Se usa cuando faltan variables SMTP: todos los envíos fallan sin bloquear.
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send_confirmation(&self, _email: &ConfirmationEmail) -> Result<String> {
        Err(anyhow!("Transportador no configurado"))
    }
}

/// Construye el notificador según la configuración y lo verifica una vez.
pub async fn notifier_from_config(cfg: &AppConfig) -> Result<std::sync::Arc<dyn Notifier>> {
    match (&cfg.smtp, &cfg.from_email) {
        (Some(smtp), Some(from_email)) => {
            let notifier = SmtpNotifier::from_config(smtp, &cfg.from_name, from_email)?;
            notifier.verify().await;
            Ok(std::sync::Arc::new(notifier))
        }
        _ => {
            warn!("Configuración SMTP incompleta: los correos de confirmación no se enviarán");
            Ok(std::sync::Arc::new(DisabledNotifier))
        }
    }
}
