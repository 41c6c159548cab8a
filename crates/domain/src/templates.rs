//! Appointment notification templates.
//!
//! Each [`TemplateKind`] renders a fixed Spanish message with the
//! appointment date, time and psychologist substituted in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    CitaGratis,
    CitaPagada,
    RecordatorioCita,
    ConfirmacionAsistencia,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 4] = [
        TemplateKind::CitaGratis,
        TemplateKind::CitaPagada,
        TemplateKind::RecordatorioCita,
        TemplateKind::ConfirmacionAsistencia,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CitaGratis => "cita_gratis",
            Self::CitaPagada => "cita_pagada",
            Self::RecordatorioCita => "recordatorio_cita",
            Self::ConfirmacionAsistencia => "confirmacion_asistencia",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::Template(format!("unknown template \"{s}\"")))
    }
}

/// Values substituted into a template.  Field aliases accept the payload
/// shape the booking frontend already sends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateParams {
    #[serde(default, alias = "psicologo")]
    pub psychologist: String,
    #[serde(default, alias = "fecha")]
    pub date: String,
    #[serde(default, alias = "hora")]
    pub time: String,
}

impl TemplateParams {
    /// Names of the fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.psychologist.trim().is_empty() {
            missing.push("psychologist");
        }
        if self.date.trim().is_empty() {
            missing.push("date");
        }
        if self.time.trim().is_empty() {
            missing.push("time");
        }
        missing
    }
}

/// Render the message body for `kind`.
pub fn render(kind: TemplateKind, params: &TemplateParams) -> String {
    let TemplateParams {
        psychologist,
        date,
        time,
    } = params;

    match kind {
        TemplateKind::CitaGratis => format!(
            "¡Hola 👋\n\n\
             ✅ Tu primera cita GRATUITA ha sido confirmada:\n\n\
             📅 Fecha: {date}\n\
             🕐 Hora: {time}\n\
             👨‍⚕️ Psicólogo: {psychologist}\n\n\
             🎉 ¡Recuerda que tu primera consulta es completamente GRATIS!\n\n\
             Si tienes alguna consulta, no dudes en contactarnos.\n\n\
             ¡Te esperamos! 🌟"
        ),
        TemplateKind::CitaPagada => format!(
            "¡Hola 👋\n\n\
             ✅ Tu cita ha sido confirmada:\n\n\
             📅 Fecha: {date}\n\
             🕐 Hora: {time}\n\
             👨‍⚕️ Psicólogo: {psychologist}\n\n\
             Por favor, realiza el pago antes de la consulta para confirmar tu reserva.\n\n\
             Si tienes dudas, contáctanos.\n\n\
             ¡Gracias por confiar en nosotros!"
        ),
        TemplateKind::RecordatorioCita => format!(
            "¡Hola 👋\n\n\
             ⏰ Te recordamos tu cita próxima:\n\n\
             📅 Fecha: {date}\n\
             🕐 Hora: {time}\n\
             👨‍⚕️ Psicólogo: {psychologist}\n\n\
             Por favor, confirma tu asistencia respondiendo a este mensaje.\n\n\
             ¡Nos vemos pronto!"
        ),
        TemplateKind::ConfirmacionAsistencia => format!(
            "¡Hola 👋\n\n\
             ✅ Hemos recibido tu confirmación de asistencia para la cita:\n\n\
             📅 Fecha: {date}\n\
             🕐 Hora: {time}\n\
             👨‍⚕️ Psicólogo: {psychologist}\n\n\
             ¡Gracias por avisarnos!"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TemplateParams {
        TemplateParams {
            psychologist: "Dra. Rojas".into(),
            date: "2026-10-21".into(),
            time: "15:00".into(),
        }
    }

    #[test]
    fn every_kind_substitutes_all_fields() {
        for kind in TemplateKind::ALL {
            let text = render(kind, &params());
            assert!(text.contains("Fecha: 2026-10-21"), "{kind}");
            assert!(text.contains("Hora: 15:00"), "{kind}");
            assert!(text.contains("Psicólogo: Dra. Rojas"), "{kind}");
        }
    }

    #[test]
    fn free_appointment_mentions_gratis() {
        let text = render(TemplateKind::CitaGratis, &params());
        assert!(text.contains("GRATUITA"));
        assert!(text.starts_with("¡Hola 👋\n\n"));
    }

    #[test]
    fn parse_known_and_unknown_kinds() {
        assert_eq!(
            "recordatorio_cita".parse::<TemplateKind>().unwrap(),
            TemplateKind::RecordatorioCita
        );
        assert!("promo".parse::<TemplateKind>().is_err());
    }

    #[test]
    fn params_accept_spanish_aliases() {
        let p: TemplateParams = serde_json::from_value(serde_json::json!({
            "psicologo": "Dr. Paz",
            "fecha": "lunes",
            "hora": "10:00",
        }))
        .unwrap();
        assert_eq!(p.psychologist, "Dr. Paz");
        assert!(p.missing_fields().is_empty());
    }

    #[test]
    fn missing_fields_reports_blanks() {
        let p = TemplateParams {
            date: "lunes".into(),
            ..Default::default()
        };
        assert_eq!(p.missing_fields(), vec!["psychologist", "time"]);
    }
}
