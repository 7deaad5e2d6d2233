pub mod admin;
pub mod client;
pub mod health;

use axum::{http::StatusCode, Json};

use crate::engine::BookingError;
use crate::models::{ApiResponse, BookingStatus};
use crate::store::StoreError;

pub type ApiError = (StatusCode, Json<ApiResponse<()>>);
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn status_label(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Pending => "pendente",
        BookingStatus::Confirmed => "confirmado",
        BookingStatus::Cancelled => "cancelado",
        BookingStatus::Completed => "concluído",
    }
}

pub fn status_code(e: &BookingError) -> StatusCode {
    match e {
        BookingError::InvalidConfiguration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BookingError::SlotConflict { .. } | BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
        BookingError::StoreUnavailable(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        BookingError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        BookingError::NotFound(_) => StatusCode::NOT_FOUND,
        BookingError::Validation(_) => StatusCode::BAD_REQUEST,
    }
}

/// Client-facing text. Conflicts and outages get fixed wording so the
/// caller knows whether to pick another slot or retry.
pub fn user_message(e: &BookingError) -> String {
    match e {
        BookingError::SlotConflict { .. } => {
            "Este horário ou parte dele foi preenchido. Por favor, escolha outro.".into()
        }
        BookingError::StoreUnavailable(StoreError::Unavailable(_)) => {
            "Serviço temporariamente indisponível. Tente novamente em instantes.".into()
        }
        BookingError::StoreUnavailable(_) => {
            "Erro interno ao acessar os agendamentos.".into()
        }
        BookingError::InvalidTransition { from, to } => format!(
            "Não é possível alterar um agendamento {} para {}.",
            status_label(*from),
            status_label(*to)
        ),
        BookingError::InvalidConfiguration(detail) => {
            format!("Configuração de horários inválida: {detail}")
        }
        BookingError::NotFound(what) => format!("Não encontrado: {what}"),
        BookingError::Validation(detail) => format!("Dados inválidos: {detail}"),
    }
}

/// Maps an engine error onto the response envelope. Store failures are
/// logged here; rejections are already logged by the service.
pub fn reject(op: &str, e: BookingError) -> ApiError {
    if let BookingError::StoreUnavailable(inner) = &e {
        tracing::error!("{}: {}", op, inner);
    }
    (
        status_code(&e),
        Json(ApiResponse::error_with_code(user_message(&e), e.code()).retryable(e.is_retryable())),
    )
}
