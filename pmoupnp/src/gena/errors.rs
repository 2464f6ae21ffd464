use crate::http::HttpMessage;
use thiserror::Error;

/// Violation du protocole GENA, portant le code HTTP à renvoyer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenaError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
}

impl GenaError {
    pub fn status_code(&self) -> u16 {
        match self {
            GenaError::BadRequest(_) => 400,
            GenaError::PreconditionFailed(_) => 412,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GenaError::BadRequest(_) => "Bad Request",
            GenaError::PreconditionFailed(_) => "Precondition Failed",
        }
    }

    /// Réponse HTTP vide correspondant à l'erreur.
    pub fn to_response(&self) -> HttpMessage {
        HttpMessage::response(self.status_code(), self.reason()).with_header("CONTENT-LENGTH", "0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let bad = GenaError::BadRequest("SID with NT".into());
        let pre = GenaError::PreconditionFailed("unknown SID".into());
        assert_eq!(bad.status_code(), 400);
        assert_eq!(pre.status_code(), 412);
        assert_eq!(
            pre.to_response().to_wire(false),
            "HTTP/1.1 412 Precondition Failed\r\nCONTENT-LENGTH: 0\r\n\r\n"
        );
    }
}
