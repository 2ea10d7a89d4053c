//! Error taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category assigned to every classified error
///
/// Each category has a stable wire code (`E-50`, `ES-TIMEOUT`, ...) that is
/// persisted and returned to clients, and a display name for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Unrecognized error value
    UnknownError,
    /// HTTP exception carrying its own status
    HttpException,
    /// Data-layer query failure
    SqlError,
    /// Input validation failure
    DtoValidationError,
    /// External service answered with an error response
    ServerAxiosError,
    /// External service could not be reached
    ServerConexion,
    /// External service timed out behind a gateway
    ServerTimeout,
    /// External service presented an expired certificate
    ServerCertExpired,
    /// External service error body `{ message }`
    #[serde(rename = "SERVER_ERROR_1")]
    ServerError1,
    /// External service error body `{ data }`
    #[serde(rename = "SERVER_ERROR_2")]
    ServerError2,
}

impl ErrorCode {
    /// Stable wire code
    pub fn code(self) -> &'static str {
        match self {
            Self::UnknownError => "E-50",
            Self::HttpException => "E-40",
            Self::SqlError => "E-SQL",
            Self::DtoValidationError => "E-DTO",
            Self::ServerAxiosError => "ES-REQUEST",
            Self::ServerConexion => "ES-ECONNREFUSED",
            Self::ServerTimeout => "ES-TIMEOUT",
            Self::ServerCertExpired => "ES-CERT",
            Self::ServerError1 => "ES-MESSAGE",
            Self::ServerError2 => "ES-DATA",
        }
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::UnknownError => "Error desconocido",
            Self::HttpException => "Error HTTP",
            Self::SqlError => "Error de consulta con la Base de Datos",
            Self::DtoValidationError => "Error de validación con el DTO",
            Self::ServerAxiosError => "Error de consulta con Servicio Externo",
            Self::ServerConexion => "Error de conexión con Servicio Externo",
            Self::ServerTimeout => "Error de TIEMOUT con Servicio Externo",
            Self::ServerCertExpired => "Error de certificado con Servicio Externo",
            Self::ServerError1 => "Error desconocido con Servicio Externo (message)",
            Self::ServerError2 => "Error desconocido con Servicio Externo (data)",
        }
    }

    /// `"<name> (<code>)"`, the persisted `codigo` field
    pub fn code_name(self) -> String {
        format!("{} ({})", self.name(), self.code())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_name() {
        assert_eq!(ErrorCode::UnknownError.code_name(), "Error desconocido (E-50)");
        assert_eq!(ErrorCode::ServerConexion.to_string(), "ES-ECONNREFUSED");
    }

    #[test]
    fn test_serde_uses_taxonomy_names() {
        let json = serde_json::to_string(&ErrorCode::ServerCertExpired).unwrap();
        assert_eq!(json, "\"SERVER_CERT_EXPIRED\"");
        let code: ErrorCode = serde_json::from_str("\"SERVER_ERROR_1\"").unwrap();
        assert_eq!(code, ErrorCode::ServerError1);
    }
}
